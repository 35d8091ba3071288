//! Tool-result message shapes and the rewrites the post-result pipeline
//! applies to them. A message is either a plain string or a structured
//! object carrying `toolCallId`/`toolName` plus a `content` field (string
//! or an array of `{type: "text", text: "..."}` blocks). Any rewrite that
//! touches a structured message preserves its `toolCallId`/`toolName`
//! verbatim (§4.9 message transformation invariant).

use serde_json::{json, Value};

/// Pull whatever plain text a message carries, for size-guarding and
/// injection scanning. Returns an empty string for shapes with no text.
pub fn extract_plain_text(message: &Value) -> String {
    match message {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(blocks)) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        },
        _ => String::new(),
    }
}

fn preserved_id_fields(original: &Value, tool_call_id: Option<&str>, tool_name: &str) -> (Option<Value>, Option<Value>) {
    let id = original
        .get("toolCallId")
        .cloned()
        .or_else(|| tool_call_id.map(|s| json!(s)));
    let name = original.get("toolName").cloned().or_else(|| Some(json!(tool_name)));
    (id, name)
}

/// Replace `original` with a structured message carrying `text` as its
/// sole content block, preserving identifiers. Used for size-guard block
/// and injection block.
pub fn make_structured(original: &Value, tool_call_id: Option<&str>, tool_name: &str, text: &str, is_error: bool) -> Value {
    let (id, name) = preserved_id_fields(original, tool_call_id, tool_name);
    let mut obj = serde_json::Map::new();
    if let Some(v) = id {
        obj.insert("toolCallId".to_string(), v);
    }
    if let Some(v) = name {
        obj.insert("toolName".to_string(), v);
    }
    obj.insert("isError".to_string(), json!(is_error));
    obj.insert("content".to_string(), json!([{"type": "text", "text": text}]));
    Value::Object(obj)
}

/// Replace the text content of `original` with `text` without marking it
/// an error (size-guard truncate). Preserves identifiers when present;
/// for a bare string input with no identifiers, returns a plain string.
pub fn replace_text(original: &Value, tool_call_id: Option<&str>, tool_name: &str, text: &str) -> Value {
    match original {
        Value::String(_) => json!(text),
        _ => {
            let (id, name) = preserved_id_fields(original, tool_call_id, tool_name);
            let mut obj = serde_json::Map::new();
            if let Some(v) = id {
                obj.insert("toolCallId".to_string(), v);
            }
            if let Some(v) = name {
                obj.insert("toolName".to_string(), v);
            }
            obj.insert("content".to_string(), json!(text));
            Value::Object(obj)
        }
    }
}

/// Append a warning block/line to `original` without discarding its prior
/// content (injection alert mode). Appends at the end per §9's resolution
/// of the unspecified append position.
pub fn append_warning(original: &Value, tool_call_id: Option<&str>, tool_name: &str, warning: &str) -> Value {
    match original {
        Value::String(s) => json!(format!("{s}\n{warning}")),
        Value::Object(map) => {
            let (id, name) = preserved_id_fields(original, tool_call_id, tool_name);
            let mut obj = map.clone();
            if let Some(v) = id {
                obj.insert("toolCallId".to_string(), v);
            }
            if let Some(v) = name {
                obj.insert("toolName".to_string(), v);
            }
            match obj.get("content").cloned() {
                Some(Value::Array(mut blocks)) => {
                    blocks.push(json!({"type": "text", "text": warning}));
                    obj.insert("content".to_string(), Value::Array(blocks));
                }
                Some(Value::String(s)) => {
                    obj.insert("content".to_string(), json!(format!("{s}\n{warning}")));
                }
                _ => {
                    obj.insert("content".to_string(), json!(warning));
                }
            }
            Value::Object(obj)
        }
        other => other.clone(),
    }
}

/// Truncate a byte buffer to `max_chars` UTF-8 characters and append the
/// `...` marker used for approval previews.
pub fn preview_truncate(bytes: &[u8], max_chars: usize) -> String {
    let s = String::from_utf8_lossy(bytes);
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_plain_text_from_string_message() {
        assert_eq!(extract_plain_text(&json!("hello")), "hello");
    }

    #[test]
    fn extract_plain_text_from_structured_array_content() {
        let msg = json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]});
        assert_eq!(extract_plain_text(&msg), "ab");
    }

    #[test]
    fn make_structured_preserves_identifiers() {
        let original = json!({"toolCallId": "call-1", "toolName": "web_fetch", "content": "orig"});
        let rewritten = make_structured(&original, None, "web_fetch", "blocked", true);
        assert_eq!(rewritten["toolCallId"], json!("call-1"));
        assert_eq!(rewritten["toolName"], json!("web_fetch"));
        assert_eq!(rewritten["isError"], json!(true));
    }

    #[test]
    fn append_warning_preserves_prior_content_blocks() {
        let original = json!({"content": [{"type": "text", "text": "first"}]});
        let rewritten = append_warning(&original, None, "web_fetch", "[firewall] warn");
        let arr = rewritten["content"].as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["text"], json!("first"));
        assert_eq!(arr[1]["text"], json!("[firewall] warn"));
    }

    #[test]
    fn preview_truncate_adds_marker_only_when_exceeding_limit() {
        assert_eq!(preview_truncate(b"short", 500), "short");
        let long: String = std::iter::repeat('a').take(600).collect();
        let preview = preview_truncate(long.as_bytes(), 500);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.len(), 503);
    }
}
