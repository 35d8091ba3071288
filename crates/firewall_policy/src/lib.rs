//! firewall_policy
//!
//! Loads and normalizes a `firewall_spec::Policy`: start from the
//! hard-coded DEFAULT, merge a named preset over it, merge an override
//! YAML file over that, splice in the baseline tool set, then fold any
//! user-authored tool rules over the baseline by normalized name.
//!
//! Nothing here ever fails hard: a malformed preset name or override file
//! is logged as a warning and the loader falls back to the last-known-good
//! policy, per the ConfigLoadError/PolicyValidationWarning kinds.

use firewall_spec::{
    Decision, InjectionDefaults, InjectionMode, LogMode, NormalizedToolRule, Policy,
    PolicyDefaults, RawToolRule, RedactionMode, Risk, RiskMap,
};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInjectionDefaults {
    mode: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDefaults {
    deny_unknown_tools: Option<bool>,
    unknown_tool_action: Option<String>,
    log: Option<String>,
    redaction: Option<String>,
    injection: Option<RawInjectionDefaults>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRisk {
    read: Option<String>,
    write: Option<String>,
    critical: Option<String>,
    unknown: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPolicyFile {
    mode: Option<String>,
    #[serde(default)]
    defaults: Option<RawDefaults>,
    #[serde(default)]
    risk: Option<RawRisk>,
    #[serde(default)]
    tools: Option<Vec<RawToolRule>>,
}

fn merge_opt<T: Clone>(base: &Option<T>, over: &Option<T>) -> Option<T> {
    over.clone().or_else(|| base.clone())
}

fn merge_defaults(base: &RawDefaults, over: &RawDefaults) -> RawDefaults {
    RawDefaults {
        deny_unknown_tools: merge_opt(&base.deny_unknown_tools, &over.deny_unknown_tools),
        unknown_tool_action: merge_opt(&base.unknown_tool_action, &over.unknown_tool_action),
        log: merge_opt(&base.log, &over.log),
        redaction: merge_opt(&base.redaction, &over.redaction),
        injection: match (&base.injection, &over.injection) {
            (_, Some(o)) if o.mode.is_some() => Some(o.clone()),
            (Some(b), _) => Some(b.clone()),
            (None, over) => over.clone(),
        },
    }
}

fn merge_risk(base: &RawRisk, over: &RawRisk) -> RawRisk {
    RawRisk {
        read: merge_opt(&base.read, &over.read),
        write: merge_opt(&base.write, &over.write),
        critical: merge_opt(&base.critical, &over.critical),
        unknown: merge_opt(&base.unknown, &over.unknown),
    }
}

fn merge_raw_policy(base: RawPolicyFile, over: RawPolicyFile) -> RawPolicyFile {
    let defaults = match (base.defaults, over.defaults) {
        (Some(b), Some(o)) => Some(merge_defaults(&b, &o)),
        (Some(b), None) => Some(b),
        (None, Some(o)) => Some(o),
        (None, None) => None,
    };
    let risk = match (base.risk, over.risk) {
        (Some(b), Some(o)) => Some(merge_risk(&b, &o)),
        (Some(b), None) => Some(b),
        (None, Some(o)) => Some(o),
        (None, None) => None,
    };
    let mut tools = base.tools.unwrap_or_default();
    tools.extend(over.tools.unwrap_or_default());
    RawPolicyFile {
        mode: over.mode.or(base.mode),
        defaults,
        risk,
        tools: if tools.is_empty() { None } else { Some(tools) },
    }
}

fn default_raw_policy() -> RawPolicyFile {
    RawPolicyFile {
        mode: Some("default".to_string()),
        defaults: Some(RawDefaults {
            deny_unknown_tools: Some(true),
            unknown_tool_action: Some("deny".to_string()),
            log: Some("safe".to_string()),
            redaction: Some("standard".to_string()),
            injection: Some(RawInjectionDefaults { mode: Some("shadow".to_string()) }),
        }),
        risk: Some(RawRisk {
            read: Some("allow".to_string()),
            write: Some("ask".to_string()),
            critical: Some("ask".to_string()),
            unknown: Some("deny".to_string()),
        }),
        tools: None,
    }
}

/// Named presets, each expressed as an overlay on top of the default
/// policy. Returns `None` for an unrecognized preset name.
fn preset_raw_policy(name: &str) -> Option<RawPolicyFile> {
    match name {
        "standard" => Some(RawPolicyFile {
            mode: Some("standard".to_string()),
            defaults: Some(RawDefaults {
                injection: Some(RawInjectionDefaults { mode: Some("alert".to_string()) }),
                ..Default::default()
            }),
            risk: None,
            tools: None,
        }),
        "strict" => Some(RawPolicyFile {
            mode: Some("strict".to_string()),
            defaults: Some(RawDefaults {
                redaction: Some("strict".to_string()),
                injection: Some(RawInjectionDefaults { mode: Some("block".to_string()) }),
                ..Default::default()
            }),
            risk: Some(RawRisk { critical: Some("deny".to_string()), ..Default::default() }),
            tools: None,
        }),
        "dev" => Some(RawPolicyFile {
            mode: Some("dev".to_string()),
            defaults: Some(RawDefaults {
                deny_unknown_tools: Some(false),
                unknown_tool_action: Some("ask".to_string()),
                injection: Some(RawInjectionDefaults { mode: Some("shadow".to_string()) }),
                ..Default::default()
            }),
            risk: Some(RawRisk { write: Some("allow".to_string()), critical: Some("ask".to_string()), ..Default::default() }),
            tools: None,
        }),
        _ => None,
    }
}

/// Baseline tools preloaded into every policy (§6), as raw rules with the
/// three redaction/scan flags on by default and no explicit action — their
/// decision comes from the risk map unless a user rule overrides them.
fn baseline_tool_rules() -> Vec<RawToolRule> {
    const READ: &[&str] = &[
        "read", "agents_list", "canvas", "image", "session_status", "sessions_history",
        "sessions_list", "tts", "web_fetch", "web_search", "memory_search", "memory_get",
    ];
    const WRITE: &[&str] = &["write", "edit", "apply_patch", "browser", "cron", "message", "sessions_send"];
    const CRITICAL: &[&str] = &["exec", "process", "gateway", "nodes", "sessions_spawn"];

    let mut rules = Vec::new();
    for &name in READ {
        rules.push(baseline_rule(name, "read", name == "exec"));
    }
    for &name in WRITE {
        rules.push(baseline_rule(name, "write", false));
    }
    for &name in CRITICAL {
        rules.push(baseline_rule(name, "critical", name == "exec"));
    }
    rules
}

fn baseline_rule(name: &str, risk: &str, use_exec_approvals: bool) -> RawToolRule {
    RawToolRule {
        name: Some(name.to_string()),
        risk: Some(risk.to_string()),
        action: None,
        allow: None,
        allow_paths: None,
        path_action: None,
        redact_params: Some(true),
        redact_result: Some(true),
        scan_injection: Some(true),
        use_exec_approvals: Some(use_exec_approvals),
    }
}

/// Fold a tool-rule list by normalized name: later entries override earlier
/// ones field-wise, insertion position follows first occurrence.
fn fold_tool_rules(rules: Vec<RawToolRule>) -> Vec<RawToolRule> {
    let mut order: Vec<String> = Vec::new();
    let mut by_name: std::collections::HashMap<String, RawToolRule> = std::collections::HashMap::new();
    for rule in rules {
        let Some(raw_name) = rule.name.clone() else {
            tracing::warn!("policy: tool rule missing `name`, skipped");
            continue;
        };
        let key = raw_name.trim().to_ascii_lowercase();
        if key.is_empty() {
            tracing::warn!("policy: tool rule has empty `name`, skipped");
            continue;
        }
        match by_name.get_mut(&key) {
            Some(existing) => {
                existing.risk = merge_opt(&existing.risk, &rule.risk);
                existing.action = merge_opt(&existing.action, &rule.action);
                existing.allow = merge_opt(&existing.allow, &rule.allow);
                existing.allow_paths = merge_opt(&existing.allow_paths, &rule.allow_paths);
                existing.path_action = merge_opt(&existing.path_action, &rule.path_action);
                existing.redact_params = merge_opt(&existing.redact_params, &rule.redact_params);
                existing.redact_result = merge_opt(&existing.redact_result, &rule.redact_result);
                existing.scan_injection = merge_opt(&existing.scan_injection, &rule.scan_injection);
                existing.use_exec_approvals = merge_opt(&existing.use_exec_approvals, &rule.use_exec_approvals);
            }
            None => {
                order.push(key.clone());
                let mut normalized = rule;
                normalized.name = Some(key.clone());
                by_name.insert(key, normalized);
            }
        }
    }
    order.into_iter().filter_map(|k| by_name.remove(&k)).collect()
}

fn parse_decision_or_warn(s: &str, warnings: &mut Vec<String>, field: &str) -> Option<Decision> {
    match Decision::parse_loose(s) {
        Some(d) => Some(d),
        None => {
            warnings.push(format!("policy: unrecognized decision `{s}` for {field}, reverting to default"));
            None
        }
    }
}

fn resolve_risk_map(raw: &RawRisk, base: &RiskMap, warnings: &mut Vec<String>) -> RiskMap {
    let pick = |field: &str, value: &Option<String>, base_value: Decision| match value {
        Some(s) => parse_decision_or_warn(s, warnings, field).unwrap_or(base_value),
        None => base_value,
    };
    RiskMap {
        read: pick("risk.read", &raw.read, base.read),
        write: pick("risk.write", &raw.write, base.write),
        critical: pick("risk.critical", &raw.critical, base.critical),
        unknown: pick("risk.unknown", &raw.unknown, base.unknown),
    }
}

fn resolve_defaults(raw: &RawDefaults, base: &PolicyDefaults, warnings: &mut Vec<String>) -> PolicyDefaults {
    let unknown_tool_action = match &raw.unknown_tool_action {
        Some(s) => parse_decision_or_warn(s, warnings, "defaults.unknownToolAction").unwrap_or(base.unknown_tool_action),
        None => base.unknown_tool_action,
    };
    let log = match raw.log.as_deref() {
        Some("debug") => LogMode::Debug,
        Some("safe") => LogMode::Safe,
        Some(other) => {
            warnings.push(format!("policy: unrecognized log mode `{other}`, reverting to default"));
            base.log
        }
        None => base.log,
    };
    let redaction = match raw.redaction.as_deref() {
        Some("standard") => RedactionMode::Standard,
        Some("strict") => RedactionMode::Strict,
        Some("off") => RedactionMode::Off,
        Some(other) => {
            warnings.push(format!("policy: unrecognized redaction mode `{other}`, reverting to default"));
            base.redaction
        }
        None => base.redaction,
    };
    let injection_mode = match raw.injection.as_ref().and_then(|i| i.mode.as_deref()) {
        Some("shadow") => InjectionMode::Shadow,
        Some("alert") => InjectionMode::Alert,
        Some("block") => InjectionMode::Block,
        Some(other) => {
            warnings.push(format!("policy: unrecognized injection mode `{other}`, reverting to default"));
            base.injection.mode
        }
        None => base.injection.mode,
    };
    PolicyDefaults {
        deny_unknown_tools: raw.deny_unknown_tools.unwrap_or(base.deny_unknown_tools),
        unknown_tool_action,
        log,
        redaction,
        injection: InjectionDefaults { mode: injection_mode },
    }
}

/// Resolve a single raw rule into its normalized form (§4.3 decision
/// resolution). `risk_map`/`defaults` are the already-resolved policy-level
/// values used as fallbacks.
fn normalize_rule(raw: &RawToolRule, risk_map: &RiskMap, defaults: &PolicyDefaults, warnings: &mut Vec<String>) -> Option<NormalizedToolRule> {
    let name = raw.name.as_ref()?.trim().to_ascii_lowercase();
    if name.is_empty() {
        return None;
    }

    let risk = match raw.risk.as_deref() {
        Some(s) => match Risk::parse_loose(s) {
            Some(r) => Some(r),
            None => {
                warnings.push(format!("policy: unrecognized risk `{s}` for tool `{name}`, defaulting to unknown"));
                None
            }
        },
        None => None,
    };
    let resolved_risk = risk.unwrap_or(Risk::Unknown);

    let action = if let Some(action_str) = &raw.action {
        parse_decision_or_warn(action_str, warnings, &format!("tools.{name}.action")).unwrap_or_else(|| risk_map.get(resolved_risk))
    } else if let Some(allow) = &raw.allow {
        allow.resolve().unwrap_or_else(|| risk_map.get(resolved_risk))
    } else if raw.risk.is_some() {
        risk_map.get(resolved_risk)
    } else {
        defaults.unknown_tool_action
    };

    let allow_paths = raw
        .allow_paths
        .clone()
        .map(|v| v.into_iter().filter(|p| !p.trim().is_empty()).collect::<Vec<_>>())
        .filter(|v| !v.is_empty());

    let path_action = match &raw.path_action {
        Some(s) => parse_decision_or_warn(s, warnings, &format!("tools.{name}.pathAction")).unwrap_or(Decision::Ask),
        None => Decision::Ask,
    };

    Some(NormalizedToolRule {
        name,
        risk: resolved_risk,
        action,
        redact_params: raw.redact_params.unwrap_or(true),
        redact_result: raw.redact_result.unwrap_or(true),
        scan_injection: raw.scan_injection.unwrap_or(true),
        use_exec_approvals: raw.use_exec_approvals.unwrap_or(false),
        allow_paths,
        path_action,
    })
}

/// Result of a policy load: the resolved policy plus any warnings
/// collected along the way (ConfigLoadError / PolicyValidationWarning).
pub struct LoadedPolicy {
    pub policy: Policy,
    pub warnings: Vec<String>,
}

/// Load a policy: DEFAULT, overlaid by `preset` (if any and recognized),
/// overlaid by `override_yaml` (if any and parseable), baseline tools
/// spliced in, user tool rules folded over them by normalized name.
pub fn load_policy(preset: Option<&str>, override_yaml: Option<&str>) -> LoadedPolicy {
    let mut warnings = Vec::new();
    let mut raw = default_raw_policy();

    if let Some(name) = preset {
        match preset_raw_policy(name) {
            Some(overlay) => raw = merge_raw_policy(raw, overlay),
            None => warnings.push(format!("policy: unknown preset `{name}`, using defaults")),
        }
    }

    if let Some(yaml) = override_yaml {
        match serde_yaml::from_str::<RawPolicyFile>(yaml) {
            Ok(overlay) => raw = merge_raw_policy(raw, overlay),
            Err(e) => warnings.push(format!("policy: override file failed to parse ({e}), using defaults")),
        }
    }

    // Resolve defaults/risk against the hard-coded default as the ultimate fallback.
    let hardcoded_default = default_raw_policy();
    let default_risk = resolve_risk_map(hardcoded_default.risk.as_ref().unwrap(), &RiskMap {
        read: Decision::Allow,
        write: Decision::Ask,
        critical: Decision::Ask,
        unknown: Decision::Deny,
    }, &mut Vec::new());
    let default_defaults = resolve_defaults(hardcoded_default.defaults.as_ref().unwrap(), &PolicyDefaults {
        deny_unknown_tools: true,
        unknown_tool_action: Decision::Deny,
        log: LogMode::Safe,
        redaction: RedactionMode::Standard,
        injection: InjectionDefaults { mode: InjectionMode::Shadow },
    }, &mut Vec::new());

    let risk_map = raw.risk.as_ref().map(|r| resolve_risk_map(r, &default_risk, &mut warnings)).unwrap_or(default_risk);
    let defaults = raw.defaults.as_ref().map(|d| resolve_defaults(d, &default_defaults, &mut warnings)).unwrap_or(default_defaults);
    let mode = raw.mode.clone().unwrap_or_else(|| "default".to_string());

    let mut all_tools = baseline_tool_rules();
    if let Some(user_tools) = raw.tools {
        all_tools.extend(user_tools);
    }
    let folded = fold_tool_rules(all_tools);

    let mut tools = Vec::with_capacity(folded.len());
    for rule in &folded {
        if let Some(normalized) = normalize_rule(rule, &risk_map, &defaults, &mut warnings) {
            tools.push(normalized);
        } else {
            warnings.push("policy: tool rule missing `name`, skipped".to_string());
        }
    }

    LoadedPolicy { policy: Policy { mode, defaults, risk: risk_map, tools }, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_denies_unknown_tools() {
        let loaded = load_policy(None, None);
        assert!(loaded.policy.defaults.deny_unknown_tools);
        assert_eq!(loaded.policy.defaults.unknown_tool_action, Decision::Deny);
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn baseline_tools_are_present() {
        let loaded = load_policy(None, None);
        assert!(loaded.policy.find_rule("exec").is_some());
        assert!(loaded.policy.find_rule("write").is_some());
        let exec = loaded.policy.find_rule("exec").unwrap();
        assert!(exec.use_exec_approvals);
        assert_eq!(exec.risk, Risk::Critical);
    }

    #[test]
    fn strict_preset_sets_block_injection_and_strict_redaction() {
        let loaded = load_policy(Some("strict"), None);
        assert_eq!(loaded.policy.defaults.injection.mode, InjectionMode::Block);
        assert_eq!(loaded.policy.defaults.redaction, RedactionMode::Strict);
    }

    #[test]
    fn override_yaml_wins_over_preset_and_baseline() {
        let yaml = r#"
tools:
  - name: write
    action: DENY
    allowPaths: ["/tmp"]
"#;
        let loaded = load_policy(Some("standard"), Some(yaml));
        let write = loaded.policy.find_rule("write").unwrap();
        assert_eq!(write.action, Decision::Deny);
        assert_eq!(write.allow_paths.as_deref(), Some(&["/tmp".to_string()][..]));
        // redactResult flag from baseline is preserved since override didn't touch it.
        assert!(write.redact_result);
    }

    #[test]
    fn malformed_override_falls_back_to_defaults_with_warning() {
        let loaded = load_policy(None, Some("not: [valid: yaml"));
        assert!(!loaded.warnings.is_empty());
        assert!(loaded.policy.find_rule("read").is_some());
    }

    #[test]
    fn legacy_allow_alias_is_honored() {
        let yaml = r#"
tools:
  - name: custom_tool
    risk: write
    allow: "ask"
"#;
        let loaded = load_policy(None, Some(yaml));
        let rule = loaded.policy.find_rule("custom_tool").unwrap();
        assert_eq!(rule.action, Decision::Ask);
    }

    #[test]
    fn rule_missing_name_is_skipped_with_warning() {
        let yaml = r#"
tools:
  - risk: write
    action: ALLOW
"#;
        let loaded = load_policy(None, Some(yaml));
        assert!(loaded.warnings.iter().any(|w| w.contains("missing")));
    }

    #[test]
    fn no_duplicate_normalized_names() {
        let loaded = load_policy(Some("dev"), None);
        let mut names: Vec<&str> = loaded.policy.tools.iter().map(|t| t.name.as_str()).collect();
        let before = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), before);
    }
}
