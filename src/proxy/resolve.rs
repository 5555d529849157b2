use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::controller::ProxyError;
use crate::database::model::{Model, RouteCandidate};
use crate::database::provider::Provider;
use crate::schema::enum_def::AuthKind;
use crate::service::accounts::{refresh::refresh_if_expired, selector::select_account};
use crate::service::app_state::AppState;
use crate::utils::ssrf::check_upstream_url;

/// A bearer-token session picked from the OAuth account pool.
pub struct OAuthSession {
    pub account_id: String,
    pub access_token: String,
}

/// The fully materialized target for one request: provider row, model row,
/// and plaintext credential material. Lives only for the request; the Debug
/// form never shows secrets.
pub struct ResolvedRoute {
    pub provider: Provider,
    pub model: Model,
    pub credentials: Option<String>,
    pub oauth: Option<OAuthSession>,
}

impl std::fmt::Debug for ResolvedRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedRoute")
            .field("provider", &self.provider.name)
            .field("model", &self.model.public_name)
            .field("credentials", &self.credentials.as_ref().map(|_| "<redacted>"))
            .field("oauth", &self.oauth.as_ref().map(|s| s.account_id.as_str()))
            .finish()
    }
}

/// Walks the fallback chain behind a public model name and returns the first
/// candidate that passes the SSRF guard and yields usable credentials.
/// Per-candidate failures are recovered by advancing to the next entry.
pub async fn resolve_route(state: &AppState, public_name: &str) -> Result<ResolvedRoute, ProxyError> {
    let candidates = Model::route_candidates(public_name)?;
    if candidates.is_empty() {
        return Err(ProxyError::model_not_found(public_name));
    }

    for RouteCandidate { model, provider } in candidates {
        if let Err(reason) = check_upstream_url(&provider.base_url, &CONFIG) {
            warn!(
                "skipping provider '{}' for model '{}': {}",
                provider.name, public_name, reason
            );
            continue;
        }

        let mut credentials = None;
        let mut oauth = None;
        match provider.auth_type {
            AuthKind::Bearer | AuthKind::Header => {
                let Some(sealed) = provider.encrypted_credentials.as_deref() else {
                    warn!(
                        "skipping provider '{}': auth type requires credentials but none are set",
                        provider.name
                    );
                    continue;
                };
                match state.crypto.decrypt(sealed) {
                    Ok(plain) => credentials = Some(plain),
                    Err(e) => {
                        warn!(
                            "skipping provider '{}': cannot unseal credentials: {}",
                            provider.name, e
                        );
                        continue;
                    }
                }
            }
            AuthKind::Oauth => match prepare_oauth_session(state, &provider).await {
                Ok(Some(session)) => oauth = Some(session),
                Ok(None) => {
                    warn!(
                        "skipping provider '{}': no active oauth account available",
                        provider.name
                    );
                    continue;
                }
                Err(e) => {
                    warn!("skipping provider '{}': {}", provider.name, e);
                    continue;
                }
            },
            AuthKind::None => {}
        }

        debug!(
            "resolved model '{}' to provider '{}' ({})",
            public_name, provider.name, model.upstream_model_name
        );
        return Ok(ResolvedRoute {
            provider,
            model,
            credentials,
            oauth,
        });
    }

    Err(ProxyError::provider_error(format!(
        "no available provider for model '{}'",
        public_name
    )))
}

async fn prepare_oauth_session(
    state: &AppState,
    provider: &Provider,
) -> Result<Option<OAuthSession>, ProxyError> {
    let Some(account) = select_account(&state.health, &provider.id).await? else {
        return Ok(None);
    };
    let account = refresh_if_expired(
        &state.http,
        &state.crypto,
        account,
        provider.provider_type,
    )
    .await
    .map_err(|e| ProxyError::provider_error(e.to_string()))?;
    let access_token = state
        .crypto
        .decrypt(&account.encrypted_access_token)
        .map_err(|e| ProxyError::internal(format!("cannot unseal access token: {}", e)))?;
    Ok(Some(OAuthSession {
        account_id: account.id,
        access_token,
    }))
}
