//! firewall_guard
//!
//! Path allowlist enforcement (C7): extract candidate paths from tool
//! params, resolve/absolutize them via an injected `PathResolver`, and
//! check them against a rule's `allowPaths`.
//!
//! The resolver is injected rather than calling `std::fs` directly so
//! tests can stub filesystem behavior without touching disk.

use firewall_spec::Decision;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardResolutionError {
    #[error("path resolver failed for `{0}`")]
    ResolveFailed(String),
}

/// Injected capability that turns a raw path string into an absolute one.
/// Implementations must be thread-safe (called synchronously from the
/// pre-call pipeline's critical section).
pub trait PathResolver: Send + Sync {
    fn absolutize(&self, raw: &str) -> Result<String, GuardResolutionError>;
}

/// Resolver that treats paths as already-absolute strings and only
/// normalizes separators; suitable for tests and hosts that pre-absolutize.
pub struct IdentityResolver;

impl PathResolver for IdentityResolver {
    fn absolutize(&self, raw: &str) -> Result<String, GuardResolutionError> {
        if raw.trim().is_empty() {
            return Err(GuardResolutionError::ResolveFailed(raw.to_string()));
        }
        Ok(raw.replace('\\', "/"))
    }
}

/// Extract candidate path strings from `params` for the given tool name,
/// per the §4.6 per-tool extraction contract. Order is preserved,
/// duplicates are not removed here (dedup happens in `apply_patch` parsing
/// only, per spec).
pub fn extract_candidate_paths(tool_name: &str, params: &Value) -> Vec<String> {
    match tool_name {
        "read" | "write" | "edit" => extract_read_write_edit(params),
        "apply_patch" => extract_apply_patch(params),
        _ => Vec::new(),
    }
}

fn extract_read_write_edit(params: &Value) -> Vec<String> {
    let mut out = Vec::new();
    for key in ["path", "file_path", "filePath"] {
        if let Some(s) = params.get(key).and_then(Value::as_str) {
            out.push(s.to_string());
            break;
        }
    }
    for key in ["paths", "file_paths", "filePaths"] {
        if let Some(arr) = params.get(key).and_then(Value::as_array) {
            for v in arr {
                if let Some(s) = v.as_str() {
                    out.push(s.to_string());
                }
            }
        }
    }
    out
}

const ADD_MARKER: &str = "*** Add File: ";
const UPDATE_MARKER: &str = "*** Update File: ";
const DELETE_MARKER: &str = "*** Delete File: ";
const MOVE_MARKER: &str = "*** Move to: ";

fn extract_apply_patch(params: &Value) -> Vec<String> {
    let Some(input) = params.get("input").and_then(Value::as_str) else {
        return Vec::new();
    };
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for line in input.lines() {
        let candidate = [ADD_MARKER, UPDATE_MARKER, DELETE_MARKER, MOVE_MARKER]
            .iter()
            .find_map(|marker| line.strip_prefix(marker));
        if let Some(path) = candidate {
            let path = path.trim().to_string();
            if !path.is_empty() && seen.insert(path.clone()) {
                out.push(path);
            }
        }
    }
    out
}

pub struct GuardOverride {
    pub decision: Decision,
    pub reason: String,
}

/// Evaluate the path guard for a tool call. Returns `None` when the rule
/// carries no allowlist (guard does not apply). `path_action` is the
/// rule's configured fallback decision (default ASK) used on violation.
pub fn check(
    tool_name: &str,
    params: &Value,
    allow_paths: Option<&[String]>,
    path_action: Decision,
    resolver: &dyn PathResolver,
) -> Option<GuardOverride> {
    let allow_paths = allow_paths?;
    if allow_paths.is_empty() {
        return None;
    }

    let resolved_allow: Vec<String> = allow_paths
        .iter()
        .filter_map(|p| resolver.absolutize(p).ok())
        .collect();

    let candidates = extract_candidate_paths(tool_name, params);
    let resolved_candidates: Vec<String> = candidates
        .iter()
        .filter_map(|c| resolver.absolutize(c).ok())
        .collect();

    if resolved_candidates.is_empty() {
        return Some(GuardOverride {
            decision: path_action,
            reason: "No path argument found for path allowlist enforcement.".to_string(),
        });
    }

    let is_allowed = |candidate: &str| {
        resolved_allow.iter().any(|allowed| {
            candidate == allowed || candidate.starts_with(&format!("{allowed}/"))
        })
    };

    if resolved_candidates.iter().any(|c| !is_allowed(c)) {
        return Some(GuardOverride {
            decision: path_action,
            reason: "Path guard: Path is outside the allowed path list.".to_string(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_allowlist_means_no_override() {
        let params = json!({"path": "/etc/passwd"});
        let result = check("read", &params, None, Decision::Ask, &IdentityResolver);
        assert!(result.is_none());
    }

    #[test]
    fn path_within_allowlist_passes() {
        let params = json!({"path": "/tmp/a.txt"});
        let allow = vec!["/tmp".to_string()];
        let result = check("read", &params, Some(&allow), Decision::Ask, &IdentityResolver);
        assert!(result.is_none());
    }

    #[test]
    fn path_outside_allowlist_triggers_override() {
        let params = json!({"path": "/etc/passwd"});
        let allow = vec!["/tmp".to_string()];
        let result = check("write", &params, Some(&allow), Decision::Deny, &IdentityResolver).unwrap();
        assert_eq!(result.decision, Decision::Deny);
        assert!(result.reason.contains("Path guard"));
    }

    #[test]
    fn missing_path_argument_is_reported_distinctly() {
        let params = json!({"content": "no path here"});
        let allow = vec!["/tmp".to_string()];
        let result = check("write", &params, Some(&allow), Decision::Ask, &IdentityResolver).unwrap();
        assert_eq!(result.reason, "No path argument found for path allowlist enforcement.");
    }

    #[test]
    fn apply_patch_extracts_and_dedups_markers() {
        let input = "*** Add File: /tmp/a.txt\nsome content\n*** Update File: /tmp/a.txt\n*** Delete File: /tmp/b.txt\n";
        let params = json!({"input": input});
        let paths = extract_candidate_paths("apply_patch", &params);
        assert_eq!(paths, vec!["/tmp/a.txt".to_string(), "/tmp/b.txt".to_string()]);
    }

    #[test]
    fn array_path_variants_are_merged() {
        let params = json!({"file_paths": ["/tmp/a", "/tmp/b"]});
        let paths = extract_candidate_paths("read", &params);
        assert_eq!(paths, vec!["/tmp/a".to_string(), "/tmp/b".to_string()]);
    }

    #[test]
    fn exact_allow_entry_matches_without_trailing_separator() {
        let params = json!({"path": "/tmp"});
        let allow = vec!["/tmp".to_string()];
        let result = check("read", &params, Some(&allow), Decision::Ask, &IdentityResolver);
        assert!(result.is_none());
    }
}
