use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    routing::{get, post},
};

use super::handlers::{handle_list_models, handle_not_found, handle_proxy_endpoint};
use crate::service::app_state::{create_state_router, AppState, StateRouter};
use crate::service::translate::Endpoint;

pub fn create_proxy_router() -> StateRouter {
    create_state_router()
        .route(
            "/v1/chat/completions",
            post(
                |State(app_state): State<Arc<AppState>>, request: Request<Body>| async move {
                    handle_proxy_endpoint(app_state, Endpoint::ChatCompletions, request).await
                },
            ),
        )
        .route(
            "/v1/completions",
            post(
                |State(app_state): State<Arc<AppState>>, request: Request<Body>| async move {
                    handle_proxy_endpoint(app_state, Endpoint::Completions, request).await
                },
            ),
        )
        .route(
            "/v1/embeddings",
            post(
                |State(app_state): State<Arc<AppState>>, request: Request<Body>| async move {
                    handle_proxy_endpoint(app_state, Endpoint::Embeddings, request).await
                },
            ),
        )
        .route("/v1/models", get(handle_list_models))
        .fallback(handle_not_found)
}
