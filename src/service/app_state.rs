use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::Utc;

use crate::config::CONFIG;
use crate::proxy::logging::UsageLogWriter;
use crate::service::accounts::health::HealthRegistry;
use crate::utils::crypto::CryptoBox;
use crate::utils::limit::RateLimiter;

const JANITOR_INTERVAL: Duration = Duration::from_secs(60);
const WINDOW_RETENTION_MS: i64 = 5 * 60 * 1000;

/// Process-wide request-plane state. Health and rate-limit maps are local to
/// this process; replicas do not coordinate.
pub struct AppState {
    pub crypto: CryptoBox,
    pub limiter: RateLimiter,
    pub health: HealthRegistry,
    pub http: reqwest::Client,
    pub usage: UsageLogWriter,
}

pub type StateRouter = Router<Arc<AppState>>;

pub fn create_state_router() -> StateRouter {
    Router::new()
}

pub fn create_app_state() -> Arc<AppState> {
    let crypto = CryptoBox::from_hex_key(&CONFIG.encryption_key)
        .expect("ENCRYPTION_KEY must be 64 hex characters");

    let state = Arc::new(AppState {
        crypto,
        limiter: RateLimiter::new(),
        health: HealthRegistry::new(),
        http: reqwest::Client::new(),
        usage: UsageLogWriter::new(),
    });

    let janitor_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let cutoff = Utc::now().timestamp_millis() - WINDOW_RETENTION_MS;
            janitor_state.limiter.evict_started_before(cutoff);
        }
    });

    state
}
