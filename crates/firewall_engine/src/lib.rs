//! firewall_engine
//!
//! Pure decision evaluation (C6): given a `Policy` and a `ToolCall`,
//! produce a `FirewallDecision`. No I/O, no mutable state — purity here is
//! what makes `evaluate` byte-equal across runs and processes (§8
//! Determinism).

use firewall_spec::{Decision, FirewallDecision, Policy, RedactionPlan, Risk, ToolCall};

/// Evaluate `tool_call` against `policy`. Reason strings follow the exact
/// templates the decision engine is specified to produce.
pub fn evaluate(policy: &Policy, tool_call: &ToolCall) -> FirewallDecision {
    let normalized_name = tool_call.tool_name.trim().to_ascii_lowercase();

    if let Some(rule) = policy.find_rule(&normalized_name) {
        let reason = format!("Tool \"{}\" ({}) resolved to {}.", tool_call.tool_name, rule.risk, rule.action);
        return FirewallDecision {
            decision: rule.action,
            reason,
            risk: rule.risk,
            redaction_plan: RedactionPlan { redact_params: rule.redact_params, redact_result: rule.redact_result },
            scan_injection: rule.scan_injection,
            use_exec_approvals: rule.use_exec_approvals,
            tool_rule: Some(rule.clone()),
        };
    }

    let decision = if policy.defaults.deny_unknown_tools {
        policy.defaults.unknown_tool_action
    } else {
        policy.risk.get(Risk::Unknown)
    };

    let reason = if decision == Decision::Deny {
        format!("Unknown tool \"{}\" denied by default policy.", tool_call.tool_name)
    } else {
        format!("Unknown tool \"{}\" resolved to {} by default policy.", tool_call.tool_name, decision)
    };

    FirewallDecision {
        decision,
        reason,
        risk: Risk::Unknown,
        redaction_plan: RedactionPlan { redact_params: true, redact_result: true },
        scan_injection: true,
        use_exec_approvals: false,
        tool_rule: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firewall_spec::{InjectionDefaults, InjectionMode, LogMode, NormalizedToolRule, PolicyDefaults, RedactionMode, RiskMap, ToolCallContext};

    fn policy_with(tools: Vec<NormalizedToolRule>) -> Policy {
        Policy {
            mode: "test".to_string(),
            defaults: PolicyDefaults {
                deny_unknown_tools: true,
                unknown_tool_action: Decision::Deny,
                log: LogMode::Safe,
                redaction: RedactionMode::Standard,
                injection: InjectionDefaults { mode: InjectionMode::Alert },
            },
            risk: RiskMap { read: Decision::Allow, write: Decision::Ask, critical: Decision::Ask, unknown: Decision::Deny },
            tools,
        }
    }

    fn call(name: &str) -> ToolCall {
        ToolCall { tool_name: name.to_string(), params: serde_json::json!({}), context: ToolCallContext::default() }
    }

    #[test]
    fn known_tool_reason_matches_exact_template() {
        let rule = NormalizedToolRule {
            name: "write".into(),
            risk: firewall_spec::Risk::Write,
            action: Decision::Ask,
            redact_params: true,
            redact_result: true,
            scan_injection: true,
            use_exec_approvals: false,
            allow_paths: None,
            path_action: Decision::Ask,
        };
        let policy = policy_with(vec![rule]);
        let decision = evaluate(&policy, &call("write"));
        assert_eq!(decision.reason, "Tool \"write\" (write) resolved to ASK.");
        assert_eq!(decision.decision, Decision::Ask);
    }

    #[test]
    fn unknown_tool_denied_by_default_reason() {
        let policy = policy_with(vec![]);
        let decision = evaluate(&policy, &call("mystery_tool"));
        assert_eq!(decision.decision, Decision::Deny);
        assert_eq!(decision.reason, "Unknown tool \"mystery_tool\" denied by default policy.");
    }

    #[test]
    fn unknown_tool_resolved_by_risk_when_not_denying_unknown() {
        let mut policy = policy_with(vec![]);
        policy.defaults.deny_unknown_tools = false;
        policy.risk.unknown = Decision::Ask;
        let decision = evaluate(&policy, &call("mystery_tool"));
        assert_eq!(decision.decision, Decision::Ask);
        assert_eq!(decision.reason, "Unknown tool \"mystery_tool\" resolved to ASK by default policy.");
    }

    #[test]
    fn evaluate_is_deterministic_across_calls() {
        let policy = policy_with(vec![]);
        let a = evaluate(&policy, &call("mystery_tool"));
        let b = evaluate(&policy, &call("mystery_tool"));
        assert_eq!(a.reason, b.reason);
        assert_eq!(a.decision, b.decision);
    }

    #[test]
    fn tool_name_lookup_is_case_insensitive() {
        let rule = NormalizedToolRule {
            name: "exec".into(),
            risk: firewall_spec::Risk::Critical,
            action: Decision::Ask,
            redact_params: true,
            redact_result: true,
            scan_injection: true,
            use_exec_approvals: true,
            allow_paths: None,
            path_action: Decision::Ask,
        };
        let policy = policy_with(vec![rule]);
        let decision = evaluate(&policy, &call("EXEC"));
        assert!(decision.use_exec_approvals);
    }
}
