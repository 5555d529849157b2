use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use crate::controller::ProxyError;
use crate::proxy::resolve::ResolvedRoute;
use crate::schema::enum_def::{AuthKind, ProviderKind};

pub mod anthropic;
pub mod gemini;
pub mod openai;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Wire dialect spoken by a provider. `oauth` and `custom` providers are
/// OpenAI-compatible endpoints with different authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFamily {
    OpenAiLike,
    Google,
    Anthropic,
}

pub fn wire_family(kind: ProviderKind) -> WireFamily {
    match kind {
        ProviderKind::Google => WireFamily::Google,
        ProviderKind::Anthropic => WireFamily::Anthropic,
        ProviderKind::Openai | ProviderKind::Oauth | ProviderKind::Custom => WireFamily::OpenAiLike,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    ChatCompletions,
    Completions,
    Embeddings,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::ChatCompletions => "/v1/chat/completions",
            Endpoint::Completions => "/v1/completions",
            Endpoint::Embeddings => "/v1/embeddings",
        }
    }

    pub fn is_completion(&self) -> bool {
        matches!(self, Endpoint::ChatCompletions | Endpoint::Completions)
    }
}

/// Everything the dispatcher needs to issue the upstream call.
pub struct UpstreamRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTriple {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
}

/// Identity of one streamed completion, fixed for its whole lifetime.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub chat_id: String,
    pub created: i64,
    pub model: String,
}

/// Maps the caller's OpenAI-shaped request onto the provider's native URL,
/// headers, and body. Credentials come from the resolved route and never
/// leave this request.
pub fn build_upstream_request(
    route: &ResolvedRoute,
    endpoint: Endpoint,
    body: &Value,
    streaming: bool,
    request_id: &str,
) -> Result<UpstreamRequest, ProxyError> {
    let family = wire_family(route.provider.provider_type);
    let base = route.provider.base_url.trim_end_matches('/');
    let upstream_model = &route.model.upstream_model_name;

    let (url, payload) = match family {
        WireFamily::OpenAiLike => {
            let mut payload = body.clone();
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("model".to_string(), Value::String(upstream_model.clone()));
            }
            (format!("{}{}", base, endpoint.path()), payload)
        }
        WireFamily::Google => {
            let action = if !endpoint.is_completion() {
                "predict"
            } else if streaming {
                "streamGenerateContent"
            } else {
                "generateContent"
            };
            let mut url = format!("{}/v1beta/models/{}:{}", base, upstream_model, action);
            if streaming {
                url.push_str("?alt=sse");
            }
            (url, gemini::translate_request(body))
        }
        WireFamily::Anthropic => (
            format!("{}/v1/messages", base),
            anthropic::translate_request(body, upstream_model),
        ),
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        "X-Request-ID",
        HeaderValue::from_str(request_id)
            .map_err(|_| ProxyError::internal("request id is not a valid header value"))?,
    );
    if route.provider.provider_type == ProviderKind::Anthropic {
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
    }
    apply_auth_headers(route, &mut headers)?;

    let body_bytes = serde_json::to_vec(&payload)
        .map(Bytes::from)
        .map_err(|e| ProxyError::internal(format!("failed to serialize upstream body: {}", e)))?;

    Ok(UpstreamRequest {
        url,
        headers,
        body: body_bytes,
    })
}

fn apply_auth_headers(route: &ResolvedRoute, headers: &mut HeaderMap) -> Result<(), ProxyError> {
    match route.provider.auth_type {
        AuthKind::Bearer => {
            let credentials = route
                .credentials
                .as_deref()
                .ok_or_else(|| ProxyError::internal("bearer provider without credentials"))?;
            insert_header(headers, AUTHORIZATION, &format!("Bearer {}", credentials))?;
        }
        AuthKind::Header => {
            let credentials = route
                .credentials
                .as_deref()
                .ok_or_else(|| ProxyError::internal("header provider without credentials"))?;
            apply_custom_headers(credentials, headers)?;
        }
        AuthKind::Oauth => {
            let session = route
                .oauth
                .as_ref()
                .ok_or_else(|| ProxyError::internal("oauth provider without selected account"))?;
            insert_header(
                headers,
                AUTHORIZATION,
                &format!("Bearer {}", session.access_token),
            )?;
        }
        AuthKind::None => {}
    }
    Ok(())
}

/// `header`-auth credentials are a JSON object of header name to value, or a
/// single `Name:Value` pair when the blob is not JSON.
fn apply_custom_headers(credentials: &str, headers: &mut HeaderMap) -> Result<(), ProxyError> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(credentials) {
        for (name, value) in &map {
            if let Some(value) = value.as_str() {
                insert_named_header(headers, name, value)?;
            }
        }
        return Ok(());
    }
    match credentials.split_once(':') {
        Some((name, value)) => insert_named_header(headers, name.trim(), value.trim()),
        None => Err(ProxyError::internal(
            "header credentials are neither JSON nor 'Name:Value'",
        )),
    }
}

fn insert_named_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), ProxyError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ProxyError::internal(format!("invalid credential header name '{}'", name)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| ProxyError::internal("invalid credential header value"))?;
    headers.insert(name, value);
    Ok(())
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<(), ProxyError> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| ProxyError::internal("credential is not a valid header value"))?;
    headers.insert(name, value);
    Ok(())
}

/// Buffered response translation into the OpenAI `chat.completion` shape.
/// Only the chat endpoint reshapes bodies; see `extract_usage` for the
/// passthrough endpoints.
pub fn normalize_response(
    family: WireFamily,
    value: Value,
    public_model: &str,
) -> (Value, UsageTriple) {
    match family {
        WireFamily::OpenAiLike => openai::normalize_response(value, public_model),
        WireFamily::Google => gemini::normalize_response(&value, public_model),
        WireFamily::Anthropic => anthropic::normalize_response(&value, public_model),
    }
}

/// Usage accounting for passthrough responses: reads the family's native
/// usage fields without touching the body.
pub fn extract_usage(family: WireFamily, value: &Value) -> UsageTriple {
    match family {
        WireFamily::OpenAiLike => openai::extract_usage(value),
        WireFamily::Google => gemini::extract_usage(value),
        WireFamily::Anthropic => anthropic::extract_usage(value),
    }
}

/// One upstream SSE frame to at most one `chat.completion.chunk`.
pub fn transform_stream_frame(
    family: WireFamily,
    frame: &Value,
    ctx: &StreamContext,
) -> Option<Value> {
    match family {
        WireFamily::OpenAiLike => Some(frame.clone()),
        WireFamily::Google => gemini::transform_stream_frame(frame, ctx),
        WireFamily::Anthropic => anthropic::transform_stream_frame(frame, ctx),
    }
}

pub(crate) fn usage_i32(value: Option<&Value>) -> i32 {
    value.and_then(Value::as_i64).unwrap_or(0) as i32
}
