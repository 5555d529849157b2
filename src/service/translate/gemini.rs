use serde_json::{json, Map, Value};

use super::{usage_i32, StreamContext, UsageTriple};
use crate::utils::generate_chat_id;

/// Gemini finish reasons to the OpenAI vocabulary. Unknown reasons read as a
/// normal stop.
pub(crate) fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" => "content_filter",
        "OTHER" => "stop",
        _ => "stop",
    }
}

/// OpenAI chat body to a Gemini `generateContent` body. The system message
/// becomes `systemInstruction`, roles are remapped (`assistant` -> `model`,
/// everything else -> `user`), and array content is collapsed to text.
pub fn translate_request(body: &Value) -> Value {
    let mut contents: Vec<Value> = Vec::new();
    let mut system_parts: Vec<String> = Vec::new();

    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        for message in messages {
            let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
            let text = content_to_text(message.get("content"));
            if role == "system" {
                if !text.is_empty() {
                    system_parts.push(text);
                }
                continue;
            }
            let gemini_role = if role == "assistant" { "model" } else { "user" };
            contents.push(json!({
                "role": gemini_role,
                "parts": [{"text": text}],
            }));
        }
    }

    let mut out = Map::new();
    out.insert("contents".to_string(), Value::Array(contents));

    if !system_parts.is_empty() {
        out.insert(
            "systemInstruction".to_string(),
            json!({"parts": [{"text": system_parts.join("\n")}]}),
        );
    }

    let mut generation_config = Map::new();
    if let Some(temperature) = body.get("temperature") {
        if !temperature.is_null() {
            generation_config.insert("temperature".to_string(), temperature.clone());
        }
    }
    if let Some(top_p) = body.get("top_p") {
        if !top_p.is_null() {
            generation_config.insert("topP".to_string(), top_p.clone());
        }
    }
    if let Some(max_tokens) = body.get("max_tokens") {
        if !max_tokens.is_null() {
            generation_config.insert("maxOutputTokens".to_string(), max_tokens.clone());
        }
    }
    if !generation_config.is_empty() {
        out.insert("generationConfig".to_string(), Value::Object(generation_config));
    }

    Value::Object(out)
}

/// Collapses OpenAI message content (string or part array) to plain text.
pub(crate) fn content_to_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

pub fn normalize_response(value: &Value, public_model: &str) -> (Value, UsageTriple) {
    let candidate = value.get("candidates").and_then(|c| c.get(0));
    let text = candidate
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    let finish_reason = candidate
        .and_then(|c| c.get("finishReason"))
        .and_then(Value::as_str)
        .map(map_finish_reason)
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
    let metadata = value.get("usageMetadata");
    UsageTriple {
        prompt_tokens: usage_i32(metadata.and_then(|m| m.get("promptTokenCount"))),
        completion_tokens: usage_i32(metadata.and_then(|m| m.get("candidatesTokenCount"))),
        total_tokens: usage_i32(metadata.and_then(|m| m.get("totalTokenCount"))),
    }
}

/// One Gemini SSE frame to one `chat.completion.chunk`; frames without a
/// candidate produce nothing.
pub fn transform_stream_frame(frame: &Value, ctx: &StreamContext) -> Option<Value> {
    let candidate = frame.get("candidates").and_then(|c| c.get(0))?;

    let mut delta = Map::new();
    if let Some(text) = candidate.pointer("/content/parts/0/text").and_then(Value::as_str) {
        delta.insert("content".to_string(), json!(text));
    }
    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .map(map_finish_reason);

    Some(json!({
        "id": ctx.chat_id,
        "object": "chat.completion.chunk",
        "created": ctx.created,
        "model": ctx.model,
        "choices": [{
            "index": 0,
            "delta": Value::Object(delta),
            "finish_reason": finish_reason,
        }],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> StreamContext {
        StreamContext {
            chat_id: "chatcmpl-test".to_string(),
            created: 1_700_000_000,
            model: "gemini-2.5-flash".to_string(),
        }
    }

    #[test]
    fn test_translate_request_basic() {
        let body = json!({
            "model": "gemini-2.5-flash",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
                {"role": "tool", "content": "ignored role becomes user"}
            ],
            "temperature": 0.5,
            "max_tokens": 100,
            "top_p": 0.9
        });
        let out = translate_request(&body);
        assert_eq!(
            out["systemInstruction"],
            json!({"parts": [{"text": "Be terse."}]})
        );
        assert_eq!(out["contents"][0], json!({"role": "user", "parts": [{"text": "hi"}]}));
        assert_eq!(out["contents"][1]["role"], "model");
        assert_eq!(out["contents"][2]["role"], "user");
        assert_eq!(
            out["generationConfig"],
            json!({"temperature": 0.5, "topP": 0.9, "maxOutputTokens": 100})
        );
        assert!(out.get("model").is_none());
    }

    #[test]
    fn test_translate_request_collapses_content_parts() {
        let body = json!({
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "part one "},
                    {"type": "image_url", "image_url": {"url": "ignored"}},
                    {"type": "text", "text": "part two"}
                ]}
            ]
        });
        let out = translate_request(&body);
        assert_eq!(out["contents"][0]["parts"][0]["text"], "part one part two");
        assert!(out.get("generationConfig").is_none());
    }

    #[test]
    fn test_normalize_response() {
        let upstream = json!({
            "candidates": [{
                "content": {"parts": [{"text": "Hel"}, {"text": "lo"}], "role": "model"},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}
        });
        let (out, usage) = normalize_response(&upstream, "gemini-2.5-flash");
        assert_eq!(out["object"], "chat.completion");
        assert_eq!(out["choices"][0]["message"]["content"], "Hello");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["model"], "gemini-2.5-flash");
        assert!(out["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert_eq!(usage.prompt_tokens, 4);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total_tokens, 6);
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason("STOP"), "stop");
        assert_eq!(map_finish_reason("MAX_TOKENS"), "length");
        assert_eq!(map_finish_reason("SAFETY"), "content_filter");
        assert_eq!(map_finish_reason("RECITATION"), "content_filter");
        assert_eq!(map_finish_reason("OTHER"), "stop");
        assert_eq!(map_finish_reason("SOMETHING_NEW"), "stop");
    }

    #[test]
    fn test_stream_frame_content() {
        let frame = json!({"candidates": [{"content": {"parts": [{"text": "Hel"}]}}]});
        let chunk = transform_stream_frame(&frame, &ctx()).unwrap();
        assert_eq!(chunk["object"], "chat.completion.chunk");
        assert_eq!(chunk["choices"][0]["delta"]["content"], "Hel");
        assert_eq!(chunk["choices"][0]["finish_reason"], Value::Null);
        assert_eq!(chunk["id"], "chatcmpl-test");
        assert_eq!(chunk["created"], 1_700_000_000);
    }

    #[test]
    fn test_stream_frame_finish() {
        let frame = json!({
            "candidates": [{"content": {"parts": [{"text": "lo"}]}, "finishReason": "STOP"}]
        });
        let chunk = transform_stream_frame(&frame, &ctx()).unwrap();
        assert_eq!(chunk["choices"][0]["delta"]["content"], "lo");
        assert_eq!(chunk["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_stream_frame_without_candidate_is_dropped() {
        assert!(transform_stream_frame(&json!({"usageMetadata": {}}), &ctx()).is_none());
        assert!(transform_stream_frame(&json!({"candidates": []}), &ctx()).is_none());
    }
}
