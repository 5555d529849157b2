use config::CONFIG;
use proxy::create_proxy_router;
use service::app_state::create_app_state;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod database;
mod proxy;
mod schema;
mod service;
mod utils;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&CONFIG.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = format!("{}:{}", &CONFIG.host, CONFIG.port);
    info!("server start at {}", &addr);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    let app_state = create_app_state();
    axum::serve(
        listener,
        create_proxy_router()
            .with_state(app_state)
            .into_make_service(),
    )
    .await
    .expect("failed to start server");
}
