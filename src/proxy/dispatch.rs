use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, error};

use crate::controller::ProxyError;
use crate::proxy::resolve::ResolvedRoute;
use crate::service::app_state::AppState;
use crate::service::translate::UpstreamRequest;

const ERROR_BODY_PREFIX_CHARS: usize = 500;

/// Sends the built request upstream under the provider's deadline and feeds
/// the outcome back into the health engine when an OAuth account was used.
/// Returns the response only on 2xx; from that point the outcome is final
/// for this request (no cross-candidate retry).
pub async fn dispatch_upstream(
    state: &AppState,
    route: &ResolvedRoute,
    upstream: UpstreamRequest,
) -> Result<reqwest::Response, ProxyError> {
    let timeout = Duration::from_millis(route.provider.timeout_ms.max(1) as u64);
    let account_id = route.oauth.as_ref().map(|s| s.account_id.clone());

    debug!("dispatching to {} (timeout {:?})", upstream.url, timeout);
    let result = state
        .http
        .post(&upstream.url)
        .headers(upstream.headers)
        .body(upstream.body)
        .timeout(timeout)
        .send()
        .await;

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            if let Some(id) = &account_id {
                state.health.record_failure(id);
            }
            if e.is_timeout() {
                return Err(ProxyError::timeout(format!(
                    "upstream did not respond within {} ms",
                    route.provider.timeout_ms
                )));
            }
            error!("upstream request to {} failed: {}", upstream.url, e);
            return Err(ProxyError::provider_error(format!(
                "upstream request failed: {}",
                e
            )));
        }
    };

    let status = response.status();
    if status.is_success() {
        if let Some(id) = &account_id {
            state.health.record_success(id);
        }
        return Ok(response);
    }

    if let Some(id) = &account_id {
        if status == StatusCode::TOO_MANY_REQUESTS {
            state.health.record_rate_limit(id);
        } else {
            state.health.record_failure(id);
        }
    }

    let body = response.text().await.unwrap_or_default();
    let prefix: String = body.chars().take(ERROR_BODY_PREFIX_CHARS).collect();
    error!(
        "upstream returned {} for provider '{}': {}",
        status, route.provider.name, prefix
    );
    Err(ProxyError::provider_error(format!(
        "upstream returned {}: {}",
        status.as_u16(),
        prefix
    )))
}
