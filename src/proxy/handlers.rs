use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::Request,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use super::auth::authenticate_request;
use super::dispatch::dispatch_upstream;
use super::logging::StreamUsageGuard;
use super::resolve::{resolve_route, ResolvedRoute};
use super::stream::StreamTransformer;
use crate::config::CONFIG;
use crate::controller::{ErrorKind, ProxyError};
use crate::database::api_key::ApiKey;
use crate::database::model::Model;
use crate::database::usage_log::NewUsageLog;
use crate::service::app_state::AppState;
use crate::service::translate::{
    build_upstream_request, extract_usage, normalize_response, wire_family, Endpoint, UsageTriple,
    WireFamily,
};
use crate::utils::generate_request_id;
use crate::utils::limit::RateDecision;

/// Shared pipeline behind the three proxy endpoints:
/// auth -> rate limits -> body parse -> route resolution -> translate ->
/// dispatch -> stream-transform | normalize -> usage log.
pub(super) async fn handle_proxy_endpoint(
    state: Arc<AppState>,
    endpoint: Endpoint,
    request: Request<Body>,
) -> Response {
    let request_id = generate_request_id();
    let started = Utc::now().timestamp_millis();
    match run_pipeline(&state, endpoint, request, &request_id, started).await {
        Ok(response) => response,
        Err(err) => err.with_request_id(&request_id).into_response(),
    }
}

async fn run_pipeline(
    state: &Arc<AppState>,
    endpoint: Endpoint,
    request: Request<Body>,
    request_id: &str,
    started: i64,
) -> Result<Response, ProxyError> {
    let api_key = authenticate_request(request.headers())?;
    check_rate_limits(state, &api_key)?;

    let body = parse_request_body(request).await?;
    let Some(public_model) = body.get("model").and_then(Value::as_str).map(str::to_string)
    else {
        return Err(ProxyError::bad_request("'model' field is required"));
    };
    let streaming = endpoint.is_completion()
        && body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    info!(
        "[{}] {} request for model '{}' (stream: {})",
        request_id,
        endpoint.path(),
        public_model,
        streaming
    );

    let route = resolve_route(state, &public_model).await?;
    if streaming && !route.model.supports_streaming {
        return Err(ProxyError::bad_request(format!(
            "model '{}' does not support streaming",
            public_model
        )));
    }

    let log_entry = NewUsageLog {
        api_key_id: Some(api_key.id.clone()),
        provider_id: Some(route.provider.id.clone()),
        model_id: Some(route.model.id.clone()),
        model_name: public_model.clone(),
        ..Default::default()
    };

    let upstream = build_upstream_request(&route, endpoint, &body, streaming, request_id)?;
    let response = match dispatch_upstream(state, &route, upstream).await {
        Ok(response) => response,
        Err(err) => {
            record_usage(state, log_entry, err.kind.status().as_u16() as i32, started);
            return Err(err);
        }
    };

    let family = wire_family(route.provider.provider_type);
    if streaming {
        Ok(stream_response(
            state,
            family,
            &route,
            response,
            log_entry,
            started,
            request_id,
        ))
    } else {
        buffered_response(
            state,
            endpoint,
            family,
            &public_model,
            response,
            log_entry,
            started,
            request_id,
        )
        .await
    }
}

/// Global ceiling is consulted first; a global denial never consumes the
/// caller's own window.
fn check_rate_limits(state: &AppState, api_key: &ApiKey) -> Result<(), ProxyError> {
    let window_ms = CONFIG.rate_limit_window_ms;
    let global = state
        .limiter
        .check("global", CONFIG.global_rate_limit_max as i64, window_ms);
    if !global.allowed {
        return Err(rate_limit_error("global rate limit exceeded", &global));
    }
    let scope = format!("key:{}", api_key.id);
    let per_key = state
        .limiter
        .check(&scope, api_key.rate_limit as i64, window_ms);
    if !per_key.allowed {
        return Err(rate_limit_error("rate limit exceeded for this API key", &per_key));
    }
    Ok(())
}

fn rate_limit_error(message: &str, decision: &RateDecision) -> ProxyError {
    let retry_after_ms = decision.reset_at - Utc::now().timestamp_millis();
    let retry_after_secs = (retry_after_ms.max(0) + 999) / 1000;
    ProxyError::rate_limited(
        format!("{}; retry after {}s", message, retry_after_secs),
        retry_after_secs,
    )
}

async fn parse_request_body(request: Request<Body>) -> Result<Value, ProxyError> {
    let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| ProxyError::bad_request(format!("failed to read request body: {}", e)))?;
    if bytes.is_empty() {
        return Err(ProxyError::bad_request("request body must be a JSON object"));
    }
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ProxyError::bad_request(format!("malformed JSON body: {}", e)))?;
    if !value.is_object() {
        return Err(ProxyError::bad_request("request body must be a JSON object"));
    }
    Ok(value)
}

#[allow(clippy::too_many_arguments)]
async fn buffered_response(
    state: &Arc<AppState>,
    endpoint: Endpoint,
    family: WireFamily,
    public_model: &str,
    response: reqwest::Response,
    log_entry: NewUsageLog,
    started: i64,
    request_id: &str,
) -> Result<Response, ProxyError> {
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            record_usage(
                state,
                log_entry,
                StatusCode::BAD_GATEWAY.as_u16() as i32,
                started,
            );
            return Err(ProxyError::provider_error(format!(
                "failed to read upstream response body: {}",
                e
            )));
        }
    };

    let value: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            record_usage(
                state,
                log_entry,
                StatusCode::BAD_GATEWAY.as_u16() as i32,
                started,
            );
            return Err(ProxyError::provider_error(format!(
                "upstream returned a non-JSON body: {}",
                e
            )));
        }
    };

    // Only chat completions are reshaped; the legacy and embeddings
    // endpoints return the upstream body as-is for every wire family, with
    // usage still read out of its native fields for accounting.
    let (payload, usage) = match endpoint {
        Endpoint::ChatCompletions => normalize_response(family, value, public_model),
        Endpoint::Completions | Endpoint::Embeddings => {
            let usage = extract_usage(family, &value);
            (value, usage)
        }
    };

    let mut entry = log_entry;
    apply_usage(&mut entry, &usage);
    record_usage(state, entry, StatusCode::OK.as_u16() as i32, started);

    let body = serde_json::to_vec(&payload)
        .map_err(|e| ProxyError::internal(format!("failed to serialize response: {}", e)))?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header("X-Request-ID", request_id)
        .body(Body::from(body))
        .unwrap())
}

fn stream_response(
    state: &Arc<AppState>,
    family: WireFamily,
    route: &ResolvedRoute,
    response: reqwest::Response,
    log_entry: NewUsageLog,
    started: i64,
    request_id: &str,
) -> Response {
    let mut transformer = StreamTransformer::new(family, &log_entry.model_name);
    let writer = state.usage.clone();
    let provider_name = route.provider.name.clone();

    // Dropping this body (client disconnect) drops the reqwest stream and
    // closes the upstream connection; the guard then logs the cancellation.
    let body_stream = async_stream::stream! {
        let mut guard = StreamUsageGuard::new(writer, log_entry, started);
        let mut upstream = response.bytes_stream();
        let mut failed = false;
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    let out = transformer.process(&bytes);
                    if !out.is_empty() {
                        yield Ok::<Bytes, std::io::Error>(out);
                    }
                }
                Err(e) => {
                    error!("stream from provider '{}' failed: {}", provider_name, e);
                    guard.finish(StatusCode::BAD_GATEWAY.as_u16() as i32);
                    yield Err(std::io::Error::other(e));
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            let tail = transformer.finish();
            if !tail.is_empty() {
                yield Ok(tail);
            }
            guard.finish(StatusCode::OK.as_u16() as i32);
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("X-Request-ID", request_id)
        .body(Body::from_stream(body_stream))
        .unwrap()
}

fn apply_usage(entry: &mut NewUsageLog, usage: &UsageTriple) {
    entry.input_tokens = usage.prompt_tokens;
    entry.output_tokens = usage.completion_tokens;
}

fn record_usage(state: &AppState, mut entry: NewUsageLog, status_code: i32, started: i64) {
    entry.status_code = status_code;
    entry.latency_ms = Utc::now().timestamp_millis() - started;
    state.usage.record(entry);
}

// --- /v1/models ---

#[derive(Serialize, Debug)]
struct ModelListResponse {
    object: String,
    data: Vec<ModelInfo>,
}

#[derive(Serialize, Debug)]
struct ModelInfo {
    id: String,
    object: String,
    created: i64,
    owned_by: String,
}

/// Lists active public model names. A fallback chain appears once, owned by
/// its most-preferred provider. Public endpoint.
pub(super) async fn handle_list_models() -> Response {
    let request_id = generate_request_id();
    let rows = match Model::list_active_with_provider() {
        Ok(rows) => rows,
        Err(e) => {
            return ProxyError::from(e)
                .with_request_id(&request_id)
                .into_response()
        }
    };

    let mut seen = HashSet::new();
    let mut data: Vec<ModelInfo> = Vec::new();
    for candidate in rows {
        if seen.insert(candidate.model.public_name.clone()) {
            data.push(ModelInfo {
                id: candidate.model.public_name,
                object: "model".to_string(),
                created: candidate.model.created_at / 1000,
                owned_by: candidate.provider.name,
            });
        }
    }
    data.sort_by(|a, b| a.id.cmp(&b.id));

    let payload = ModelListResponse {
        object: "list".to_string(),
        data,
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header("X-Request-ID", request_id)
        .body(Body::from(serde_json::to_vec(&payload).unwrap_or_default()))
        .unwrap()
}

pub(super) async fn handle_not_found(request: Request<Body>) -> Response {
    ProxyError::new(
        ErrorKind::NotFound,
        format!("unknown path {}", request.uri().path()),
    )
    .with_request_id(&generate_request_id())
    .into_response()
}
