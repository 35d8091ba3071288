//! firewall_redact
//!
//! Deep structural redaction over `serde_json::Value`: recurses through
//! objects and arrays, runs `firewall_detect` on every string leaf, and
//! merges the per-leaf reports into one `RedactionReport` for the whole
//! tree.
//!
//! `serde_json::Value` is an owned tree, not a graph, so a true reference
//! cycle cannot occur here the way it could in a language with aliased
//! object references. The termination invariant is instead enforced with
//! a depth bound: past `MAX_DEPTH` a node is treated as an opaque leaf and
//! left untouched rather than walked, which keeps the traversal from
//! blowing the stack on pathological input.

use firewall_spec::{RedactionMode, RedactionReport};
use serde_json::Value;

const MAX_DEPTH: usize = 64;

/// Redact every string found anywhere in `value`, recursing through
/// objects and arrays up to `MAX_DEPTH`. Returns the rewritten value and
/// the merged report. `mode == Off` returns `value` unchanged.
pub fn redact_value(value: &Value, mode: RedactionMode) -> (Value, RedactionReport) {
    if mode == RedactionMode::Off {
        return (value.clone(), RedactionReport::empty());
    }
    walk(value, mode, 0)
}

fn walk(value: &Value, mode: RedactionMode, depth: usize) -> (Value, RedactionReport) {
    if depth >= MAX_DEPTH {
        return (value.clone(), RedactionReport::empty());
    }
    match value {
        Value::String(s) => {
            let (redacted, report) = firewall_detect::redact_string(s, mode);
            (Value::String(redacted), report)
        }
        Value::Array(items) => {
            let mut report = RedactionReport::empty();
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let (v, r) = walk(item, mode, depth + 1);
                out.push(v);
                report = report.merge(r);
            }
            (Value::Array(out), report)
        }
        Value::Object(map) => {
            let mut report = RedactionReport::empty();
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let (rv, r) = walk(v, mode, depth + 1);
                out.insert(k.clone(), rv);
                report = report.merge(r);
            }
            (Value::Object(out), report)
        }
        other => (other.clone(), RedactionReport::empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_nested_string_leaves() {
        let input = json!({
            "user": {"email": "a@b.com", "id": 7},
            "notes": ["contact a@b.com please", "no secrets here"],
        });
        let (out, report) = redact_value(&input, RedactionMode::Standard);
        assert!(out["user"]["email"].as_str().unwrap().starts_with("[REDACTED:email:"));
        assert_eq!(out["user"]["id"], json!(7));
        assert!(out["notes"][0].as_str().unwrap().contains("[REDACTED:email:"));
        assert_eq!(out["notes"][1], json!("no secrets here"));
        assert!(report.redacted);
        assert_eq!(report.matches.iter().find(|m| m.r#type == "email").unwrap().count, 2);
    }

    #[test]
    fn non_string_leaves_are_untouched() {
        let input = json!({"count": 3, "active": true, "ratio": 1.5, "nothing": null});
        let (out, report) = redact_value(&input, RedactionMode::Standard);
        assert_eq!(out, input);
        assert!(!report.redacted);
    }

    #[test]
    fn off_mode_clones_without_scanning() {
        let input = json!({"secret": "sk-abcdefghijklmnopqrstuvwx"});
        let (out, report) = redact_value(&input, RedactionMode::Off);
        assert_eq!(out, input);
        assert!(!report.redacted);
    }

    #[test]
    fn repeated_redaction_is_idempotent_on_whole_tree() {
        let input = json!({"a": ["api_key: abcdefghijklmno", "x@y.com"]});
        let (first, _) = redact_value(&input, RedactionMode::Standard);
        let (second, _) = redact_value(&first, RedactionMode::Standard);
        assert_eq!(first, second);
    }

    #[test]
    fn depth_bound_stops_pathological_nesting_without_panicking() {
        let mut v = json!("leaf@example.com");
        for _ in 0..(MAX_DEPTH + 10) {
            v = json!({"nested": v});
        }
        let (_out, _report) = redact_value(&v, RedactionMode::Standard);
    }
}
