//! Response decoding
//!
//! Pulls the plain completion text out of whatever envelope the model
//! transport produced.

use crate::error::DecodeError;
use serde_json::Value;

/// Top-level keys that may carry the completion text, in lookup order
const TEXT_KEYS: &[&str] = &["response", "content", "text", "output", "completion"];

/// Tokens some models leak into their output
const SENTINEL_TOKENS: &[&str] = &[
    "<|endoftext|>",
    "<|im_end|>",
    "<|im_start|>",
    "<|eot_id|>",
    "</s>",
    "<s>",
];

/// Delimited blocks that tool-calling models wrap their output in
const WRAPPERS: &[(&str, &str)] = &[
    ("<tool_output>", "</tool_output>"),
    ("<output>", "</output>"),
    ("```json", "```"),
];

/// Decode a raw transport body, treating non-JSON bodies as plain text.
pub fn decode_str(raw: &str) -> Result<String, DecodeError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Object(_) | Value::String(_))) => decode(&value),
        _ => clean(raw),
    }
}

/// Extract the completion text from a model envelope.
pub fn decode(envelope: &Value) -> Result<String, DecodeError> {
    let text = primary_text(envelope).ok_or_else(|| {
        DecodeError(format!(
            "no recognized text field (expected one of: {})",
            TEXT_KEYS.join(", ")
        ))
    })?;

    match unwrap_nested(text) {
        Some(inner) => clean(&inner),
        None => clean(text),
    }
}

fn primary_text(envelope: &Value) -> Option<&str> {
    match envelope {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => {
            for key in TEXT_KEYS {
                if let Some(Value::String(s)) = map.get(*key) {
                    return Some(s.as_str());
                }
            }
            envelope
                .pointer("/message/content")
                .or_else(|| envelope.pointer("/choices/0/message/content"))
                .or_else(|| envelope.pointer("/choices/0/text"))
                .and_then(Value::as_str)
        }
        _ => None,
    }
}

/// Unwrap exactly one level of a delimited block holding a nested envelope.
fn unwrap_nested(text: &str) -> Option<String> {
    let trimmed = text.trim();
    for (open, close) in WRAPPERS {
        let Some(rest) = trimmed.strip_prefix(open) else {
            continue;
        };
        let Some(end) = rest.rfind(close) else {
            continue;
        };
        let inner = rest[..end].trim();
        let Ok(nested) = serde_json::from_str::<Value>(inner) else {
            continue;
        };
        if nested.is_object() {
            if let Some(s) = primary_text(&nested) {
                return Some(s.to_string());
            }
        }
    }
    None
}

fn clean(text: &str) -> Result<String, DecodeError> {
    let mut cleaned = text.to_string();
    for token in SENTINEL_TOKENS {
        cleaned = cleaned.replace(token, "");
    }
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        return Err(DecodeError("response text is empty".to_string()));
    }
    Ok(cleaned)
}
