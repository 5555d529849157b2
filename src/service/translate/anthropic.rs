use serde_json::{json, Map, Value};

use super::gemini::content_to_text;
use super::{usage_i32, StreamContext, UsageTriple};
use crate::utils::generate_chat_id;

const DEFAULT_MAX_TOKENS: i64 = 4096;

/// Anthropic stop reasons to the OpenAI vocabulary.
pub(crate) fn map_stop_reason(reason: &str) -> &'static str {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}

/// OpenAI chat body to an Anthropic Messages body: system messages move to
/// the top-level `system` field, `max_tokens` is mandatory upstream and
/// defaults to 4096, sampling knobs pass through.
pub fn translate_request(body: &Value, upstream_model: &str) -> Value {
    let mut messages: Vec<Value> = Vec::new();
    let mut system_parts: Vec<String> = Vec::new();

    if let Some(list) = body.get("messages").and_then(Value::as_array) {
        for message in list {
            let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
            if role == "system" {
                let text = content_to_text(message.get("content"));
                if !text.is_empty() {
                    system_parts.push(text);
                }
                continue;
            }
            messages.push(message.clone());
        }
    }

    let mut out = Map::new();
    out.insert("model".to_string(), json!(upstream_model));
    out.insert("messages".to_string(), Value::Array(messages));
    out.insert(
        "max_tokens".to_string(),
        body.get("max_tokens")
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or_else(|| json!(DEFAULT_MAX_TOKENS)),
    );
    if !system_parts.is_empty() {
        out.insert("system".to_string(), json!(system_parts.join("\n")));
    }
    for passthrough in ["temperature", "top_p", "stream"] {
        if let Some(value) = body.get(passthrough) {
            if !value.is_null() {
                out.insert(passthrough.to_string(), value.clone());
            }
        }
    }

    Value::Object(out)
}

pub fn normalize_response(value: &Value, public_model: &str) -> (Value, UsageTriple) {
    let text = value
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    let finish_reason = value
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(map_stop_reason)
        .unwrap_or("stop");

    let usage = extract_usage(value);

    let out = json!({
        "id": generate_chat_id(),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": public_model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": usage.prompt_tokens,
            "completion_tokens": usage.completion_tokens,
            "total_tokens": usage.total_tokens,
        },
    });
    (out, usage)
}

pub fn extract_usage(value: &Value) -> UsageTriple {
    let raw = value.get("usage");
    let prompt_tokens = usage_i32(raw.and_then(|u| u.get("input_tokens")));
    let completion_tokens = usage_i32(raw.and_then(|u| u.get("output_tokens")));
    UsageTriple {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    }
}

/// Anthropic event stream to `chat.completion.chunk`s. Only text deltas and
/// the final `message_delta` produce output; every other event type
/// (message_start, content_block_start, ping, ...) is dropped.
pub fn transform_stream_frame(frame: &Value, ctx: &StreamContext) -> Option<Value> {
    match frame.get("type").and_then(Value::as_str)? {
        "content_block_delta" => {
            let text = frame.pointer("/delta/text").and_then(Value::as_str)?;
            Some(chunk(ctx, json!({"content": text}), Value::Null))
        }
        "message_delta" => {
            let finish_reason = frame
                .pointer("/delta/stop_reason")
                .and_then(Value::as_str)
                .map(map_stop_reason)
                .unwrap_or("stop");
            Some(chunk(ctx, json!({}), json!(finish_reason)))
        }
        _ => None,
    }
}

fn chunk(ctx: &StreamContext, delta: Value, finish_reason: Value) -> Value {
    json!({
        "id": ctx.chat_id,
        "object": "chat.completion.chunk",
        "created": ctx.created,
        "model": ctx.model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> StreamContext {
        StreamContext {
            chat_id: "chatcmpl-test".to_string(),
            created: 1_700_000_000,
            model: "claude-sonnet".to_string(),
        }
    }

    #[test]
    fn test_translate_request_extracts_system_and_defaults_max_tokens() {
        let body = json!({
            "model": "claude-sonnet",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "hi"}
            ],
            "temperature": 0.2,
            "stream": true
        });
        let out = translate_request(&body, "claude-3-5-sonnet-latest");
        assert_eq!(out["model"], "claude-3-5-sonnet-latest");
        assert_eq!(out["system"], "Be brief.");
        assert_eq!(out["max_tokens"], 4096);
        assert_eq!(out["temperature"], 0.2);
        assert_eq!(out["stream"], true);
        assert_eq!(out["messages"], json!([{"role": "user", "content": "hi"}]));
    }

    #[test]
    fn test_translate_request_keeps_explicit_max_tokens() {
        let body = json!({"messages": [], "max_tokens": 128});
        let out = translate_request(&body, "claude");
        assert_eq!(out["max_tokens"], 128);
        assert!(out.get("system").is_none());
    }

    #[test]
    fn test_normalize_response_joins_text_blocks() {
        let upstream = json!({
            "content": [
                {"type": "text", "text": "Hello"},
                {"type": "tool_use", "name": "lookup"},
                {"type": "text", "text": " world"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 4}
        });
        let (out, usage) = normalize_response(&upstream, "claude-sonnet");
        assert_eq!(out["choices"][0]["message"]["content"], "Hello world");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 4);
        assert_eq!(usage.total_tokens, 14);
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(map_stop_reason("end_turn"), "stop");
        assert_eq!(map_stop_reason("stop_sequence"), "stop");
        assert_eq!(map_stop_reason("max_tokens"), "length");
        assert_eq!(map_stop_reason("tool_use"), "tool_calls");
        assert_eq!(map_stop_reason("unknown"), "stop");
    }

    #[test]
    fn test_stream_text_delta() {
        let frame = json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "Hel"}
        });
        let chunk = transform_stream_frame(&frame, &ctx()).unwrap();
        assert_eq!(chunk["choices"][0]["delta"]["content"], "Hel");
        assert_eq!(chunk["choices"][0]["finish_reason"], Value::Null);
    }

    #[test]
    fn test_stream_message_delta_maps_finish() {
        let frame = json!({
            "type": "message_delta",
            "delta": {"stop_reason": "max_tokens"},
            "usage": {"output_tokens": 9}
        });
        let chunk = transform_stream_frame(&frame, &ctx()).unwrap();
        assert_eq!(chunk["choices"][0]["delta"], json!({}));
        assert_eq!(chunk["choices"][0]["finish_reason"], "length");
    }

    #[test]
    fn test_other_events_are_dropped() {
        for event in [
            json!({"type": "message_start", "message": {}}),
            json!({"type": "content_block_start", "index": 0}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "ping"}),
            json!({"type": "message_stop"}),
        ] {
            assert!(transform_stream_frame(&event, &ctx()).is_none());
        }
    }
}
