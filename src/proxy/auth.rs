use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::controller::ProxyError;
use crate::database::api_key::{hash_api_key, ApiKey};

const BEARER_PREFIX: &str = "Bearer ";

/// Pulls the bearer token out of the Authorization header. The prefix match
/// is exact-case; the remainder is trimmed.
pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix(BEARER_PREFIX)?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Looks a raw key up by its SHA-256 hash. Only active keys authenticate;
/// the raw key itself is never stored or logged.
pub fn validate_api_key(raw: &str) -> Result<ApiKey, ProxyError> {
    let hash = hash_api_key(raw);
    match ApiKey::find_by_hash(&hash) {
        Ok(Some(key)) if key.is_active => Ok(key),
        Ok(_) => Err(ProxyError::invalid_api_key("invalid or inactive API key")),
        Err(e) => Err(e.into()),
    }
}

pub fn authenticate_request(headers: &HeaderMap) -> Result<ApiKey, ProxyError> {
    let token = extract_bearer(headers).ok_or_else(|| {
        ProxyError::invalid_api_key("missing API key; provide it as 'Authorization: Bearer <key>'")
    })?;
    validate_api_key(&token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_bearer_happy_path() {
        let headers = headers_with_auth("Bearer sk-gw-abc123");
        assert_eq!(extract_bearer(&headers).as_deref(), Some("sk-gw-abc123"));
    }

    #[test]
    fn test_extract_bearer_trims_remainder() {
        let headers = headers_with_auth("Bearer   sk-gw-abc123  ");
        assert_eq!(extract_bearer(&headers).as_deref(), Some("sk-gw-abc123"));
    }

    #[test]
    fn test_extract_bearer_requires_exact_case_prefix() {
        assert_eq!(extract_bearer(&headers_with_auth("bearer sk-gw-abc")), None);
        assert_eq!(extract_bearer(&headers_with_auth("BEARER sk-gw-abc")), None);
        assert_eq!(extract_bearer(&headers_with_auth("Basic sk-gw-abc")), None);
    }

    #[test]
    fn test_extract_bearer_rejects_empty_token() {
        assert_eq!(extract_bearer(&headers_with_auth("Bearer ")), None);
        assert_eq!(extract_bearer(&headers_with_auth("Bearer    ")), None);
    }

    #[test]
    fn test_extract_bearer_missing_header() {
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }
}
