use chrono::Utc;
use serde_json::{json, Value};

use super::{usage_i32, UsageTriple};
use crate::utils::generate_chat_id;

/// OpenAI-compatible responses pass through nearly untouched: missing
/// identity fields are synthesized, the public model name is restored, and
/// the usage triple is defaulted so callers always see all three fields.
pub fn normalize_response(mut value: Value, public_model: &str) -> (Value, UsageTriple) {
    let usage = extract_usage(&value);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("object".to_string(), json!("chat.completion"));
        obj.entry("id").or_insert_with(|| json!(generate_chat_id()));
        obj.entry("created").or_insert_with(|| json!(Utc::now().timestamp()));
        obj.insert("model".to_string(), json!(public_model));
        obj.insert(
            "usage".to_string(),
            json!({
                "prompt_tokens": usage.prompt_tokens,
                "completion_tokens": usage.completion_tokens,
                "total_tokens": usage.total_tokens,
            }),
        );
    }
    (value, usage)
}

pub fn extract_usage(value: &Value) -> UsageTriple {
    let usage = value.get("usage");
    UsageTriple {
        prompt_tokens: usage_i32(usage.and_then(|u| u.get("prompt_tokens"))),
        completion_tokens: usage_i32(usage.and_then(|u| u.get("completion_tokens"))),
        total_tokens: usage_i32(usage.and_then(|u| u.get("total_tokens"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_preserves_choices_and_usage() {
        let upstream = json!({
            "id": "x",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8}
        });
        let (out, usage) = normalize_response(upstream, "gpt-4o");
        assert_eq!(out["object"], "chat.completion");
        assert_eq!(out["id"], "x");
        assert_eq!(out["model"], "gpt-4o");
        assert_eq!(out["choices"][0]["message"]["content"], "hi");
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 8);
        assert!(out["created"].is_number());
    }

    #[test]
    fn test_normalize_synthesizes_missing_identity() {
        let (out, usage) = normalize_response(json!({"choices": []}), "gpt-4o");
        assert!(out["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert!(out["created"].is_number());
        assert_eq!(usage, UsageTriple::default());
        assert_eq!(out["usage"]["total_tokens"], 0);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let upstream = json!({
            "id": "abc",
            "created": 1700000000,
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
        });
        let (once, _) = normalize_response(upstream, "gpt-4o");
        let (twice, _) = normalize_response(once.clone(), "gpt-4o");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_usage_defaults_missing_fields_to_zero() {
        let usage = extract_usage(&json!({"usage": {"prompt_tokens": 7}}));
        assert_eq!(usage.prompt_tokens, 7);
        assert_eq!(usage.completion_tokens, 0);
        assert_eq!(usage.total_tokens, 0);
    }
}
