use axum::{
    response::{IntoResponse, Response},
    Json,
};
use reqwest::StatusCode;
use serde_json::json;

use crate::config::CONFIG;
use crate::database::StoreError;
use crate::utils::crypto::CryptoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidApiKey,
    Forbidden,
    NotFound,
    ModelNotFound,
    BadRequest,
    RateLimitExceeded,
    ProviderError,
    Timeout,
    InternalError,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidApiKey => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound | ErrorKind::ModelNotFound => StatusCode::NOT_FOUND,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ProviderError => StatusCode::BAD_GATEWAY,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidApiKey => "invalid_api_key",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InternalError => "internal_error",
        }
    }

    pub fn envelope_type(&self) -> &'static str {
        match self {
            ErrorKind::InvalidApiKey => "authentication_error",
            ErrorKind::Forbidden => "permission_error",
            ErrorKind::NotFound | ErrorKind::ModelNotFound | ErrorKind::BadRequest => {
                "invalid_request_error"
            }
            ErrorKind::RateLimitExceeded => "rate_limit_error",
            ErrorKind::ProviderError | ErrorKind::Timeout | ErrorKind::InternalError => "api_error",
        }
    }
}

/// The wire error for every proxy endpoint:
/// `{"error": {"message", "type", "code", "request_id"}}`.
#[derive(Debug)]
pub struct ProxyError {
    pub kind: ErrorKind,
    pub message: String,
    pub request_id: Option<String>,
    pub retry_after_secs: Option<i64>,
}

impl ProxyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            request_id: None,
            retry_after_secs: None,
        }
    }

    pub fn invalid_api_key(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidApiKey, message)
    }

    pub fn model_not_found(public_name: &str) -> Self {
        Self::new(
            ErrorKind::ModelNotFound,
            format!("model '{}' not found", public_name),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: i64) -> Self {
        let mut err = Self::new(ErrorKind::RateLimitExceeded, message);
        err.retry_after_secs = Some(retry_after_secs.max(0));
        err
    }

    pub fn provider_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl From<StoreError> for ProxyError {
    fn from(err: StoreError) -> Self {
        ProxyError::internal(err.to_string())
    }
}

impl From<CryptoError> for ProxyError {
    fn from(err: CryptoError) -> Self {
        ProxyError::internal(err.to_string())
    }
}


impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let message = if self.kind == ErrorKind::InternalError && CONFIG.is_production() {
            "internal server error".to_string()
        } else {
            self.message
        };
        let body = Json(json!({
            "error": {
                "message": message,
                "type": self.kind.envelope_type(),
                "code": self.kind.code(),
                "request_id": self.request_id,
            }
        }));
        let mut response = (self.kind.status(), body).into_response();
        if let Some(id) = &self.request_id {
            if let Ok(value) = axum::http::HeaderValue::from_str(id) {
                response.headers_mut().insert("X-Request-ID", value);
            }
        }
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}
