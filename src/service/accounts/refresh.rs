use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::CONFIG;
use crate::database::oauth_account::OAuthAccount;
use crate::schema::enum_def::ProviderKind;
use crate::utils::crypto::CryptoBox;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const OPENAI_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";

// Tokens expiring within this window are refreshed before dispatch.
const EXPIRY_SKEW_MS: i64 = 5 * 60 * 1000;
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("token refresh failed: {0}")]
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

/// Returns the account with a currently-valid access token, refreshing and
/// persisting a new token triple when the sealed one is (nearly) expired.
///
/// Refreshes are not single-flighted; two concurrent refreshes for the same
/// account each produce a valid persisted state.
pub async fn refresh_if_expired(
    http: &reqwest::Client,
    crypto: &CryptoBox,
    account: OAuthAccount,
    provider_type: ProviderKind,
) -> Result<OAuthAccount, RefreshError> {
    let now = Utc::now().timestamp_millis();
    if account.expires_at > now + EXPIRY_SKEW_MS {
        return Ok(account);
    }

    debug!(
        "access token for account {} expires at {}, refreshing",
        account.id, account.expires_at
    );

    let sealed_refresh = account
        .encrypted_refresh_token
        .as_deref()
        .ok_or_else(|| RefreshError::Failed("account has no refresh token".to_string()))?;
    let refresh_token = crypto
        .decrypt(sealed_refresh)
        .map_err(|e| RefreshError::Failed(format!("cannot unseal refresh token: {}", e)))?;

    let (token, new_refresh) = match provider_type {
        ProviderKind::Openai => refresh_openai(http, &refresh_token).await?,
        _ => refresh_google(http, &refresh_token).await?,
    };

    let sealed_access = crypto
        .encrypt(&token.access_token)
        .map_err(|e| RefreshError::Failed(format!("cannot seal access token: {}", e)))?;
    let sealed_new_refresh = match &new_refresh {
        Some(refresh) => Some(
            crypto
                .encrypt(refresh)
                .map_err(|e| RefreshError::Failed(format!("cannot seal refresh token: {}", e)))?,
        ),
        None => None,
    };
    let expires_at =
        now + token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS).saturating_mul(1000);

    let updated = OAuthAccount::update_tokens(
        &account.id,
        &sealed_access,
        sealed_new_refresh.as_deref(),
        expires_at,
    )
    .map_err(|e| RefreshError::Failed(format!("cannot persist refreshed tokens: {}", e)))?;

    info!("refreshed oauth tokens for account {}", updated.id);
    Ok(updated)
}

/// Google form-encoded refresh. Refresh tokens may carry a `|<projectId>`
/// suffix; the bare token goes on the wire and the suffix is re-appended to
/// any newly issued refresh token.
async fn refresh_google(
    http: &reqwest::Client,
    refresh_token: &str,
) -> Result<(TokenResponse, Option<String>), RefreshError> {
    let client_id = CONFIG
        .google_client_id
        .as_deref()
        .ok_or_else(|| RefreshError::Failed("GOOGLE_CLIENT_ID is not configured".to_string()))?;
    let client_secret = CONFIG.google_client_secret.as_deref().ok_or_else(|| {
        RefreshError::Failed("GOOGLE_CLIENT_SECRET is not configured".to_string())
    })?;

    let (bare_token, project_suffix) = split_project_suffix(refresh_token);

    let response = http
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", bare_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ])
        .send()
        .await
        .map_err(|e| RefreshError::Failed(format!("google token endpoint unreachable: {}", e)))?;

    let token = read_token_response(response).await?;
    let new_refresh = token.refresh_token.clone().map(|fresh| match project_suffix {
        Some(project) => format!("{}|{}", fresh, project),
        None => fresh,
    });
    Ok((token, new_refresh))
}

async fn refresh_openai(
    http: &reqwest::Client,
    refresh_token: &str,
) -> Result<(TokenResponse, Option<String>), RefreshError> {
    let client_id = CONFIG
        .openai_client_id
        .as_deref()
        .ok_or_else(|| RefreshError::Failed("OPENAI_CLIENT_ID is not configured".to_string()))?;

    let response = http
        .post(OPENAI_TOKEN_URL)
        .json(&json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": client_id,
        }))
        .send()
        .await
        .map_err(|e| RefreshError::Failed(format!("openai token endpoint unreachable: {}", e)))?;

    let token = read_token_response(response).await?;
    let new_refresh = token.refresh_token.clone();
    Ok((token, new_refresh))
}

async fn read_token_response(response: reqwest::Response) -> Result<TokenResponse, RefreshError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let prefix: String = body.chars().take(200).collect();
        return Err(RefreshError::Failed(format!(
            "token endpoint returned {}: {}",
            status, prefix
        )));
    }
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| RefreshError::Failed(format!("malformed token response: {}", e)))
}

fn split_project_suffix(refresh_token: &str) -> (&str, Option<&str>) {
    match refresh_token.rsplit_once('|') {
        Some((token, project)) if !token.is_empty() => (token, Some(project)),
        _ => (refresh_token, None),
    }
}
