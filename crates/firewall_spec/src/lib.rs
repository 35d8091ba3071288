//! firewall_spec
//!
//! The shared data model for the tool-call firewall: `Decision`/`Risk`
//! with their total order, the raw/normalized tool-rule split, `Policy`,
//! `FirewallDecision`, the approval-store records, and `Receipt`.
//!
//! This crate holds types only — no I/O, no policy logic. It plays the
//! role the teacher's `pieBot_audit_spec` crate played for audit events,
//! generalized to the firewall's whole decision/approval/receipt model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ----------------------------
// Decision / Risk
// ----------------------------

/// Allow/deny/ask outcome attached to a tool invocation.
///
/// Total order for composition: `ALLOW < ASK < DENY`. Guards only ever
/// raise the decision (see `rank`), never lower it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Allow,
    Ask,
    Deny,
}

impl Decision {
    pub fn rank(self) -> u8 {
        match self {
            Decision::Allow => 0,
            Decision::Ask => 1,
            Decision::Deny => 2,
        }
    }

    /// Parse case-insensitively; returns `None` for unrecognized strings so
    /// callers can fall back to a base-policy value (§4.3 normalization).
    pub fn parse_loose(s: &str) -> Option<Decision> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALLOW" => Some(Decision::Allow),
            "ASK" => Some(Decision::Ask),
            "DENY" => Some(Decision::Deny),
            _ => None,
        }
    }

    /// The more restrictive of two decisions (max by rank).
    pub fn most_restrictive(self, other: Decision) -> Decision {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Allow => "ALLOW",
            Decision::Ask => "ASK",
            Decision::Deny => "DENY",
        };
        write!(f, "{s}")
    }
}

/// Severity band used as a fallback axis for decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Read,
    Write,
    Critical,
    Unknown,
}

impl Risk {
    pub fn parse_loose(s: &str) -> Option<Risk> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Some(Risk::Read),
            "write" => Some(Risk::Write),
            "critical" => Some(Risk::Critical),
            "unknown" => Some(Risk::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Risk::Read => "read",
            Risk::Write => "write",
            Risk::Critical => "critical",
            Risk::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

// ----------------------------
// ToolCall
// ----------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub context: ToolCallContext,
}

// ----------------------------
// Tool rules: raw (policy input) vs normalized
// ----------------------------

/// Accepts the legacy `allow` alias: `true|false|"ask"|"deny"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyAllow {
    Bool(bool),
    Str(String),
}

impl LegacyAllow {
    pub fn resolve(&self) -> Option<Decision> {
        match self {
            LegacyAllow::Bool(true) => Some(Decision::Allow),
            LegacyAllow::Bool(false) => Some(Decision::Deny),
            LegacyAllow::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "ask" => Some(Decision::Ask),
                "deny" => Some(Decision::Deny),
                "allow" => Some(Decision::Allow),
                _ => None,
            },
        }
    }
}

/// Raw, as-authored tool rule (policy file / preset input).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawToolRule {
    pub name: Option<String>,
    pub risk: Option<String>,
    pub action: Option<String>,
    pub allow: Option<LegacyAllow>,
    #[serde(default)]
    pub allow_paths: Option<Vec<String>>,
    pub path_action: Option<String>,
    pub redact_params: Option<bool>,
    pub redact_result: Option<bool>,
    pub scan_injection: Option<bool>,
    pub use_exec_approvals: Option<bool>,
}

/// Deterministic projection of a `RawToolRule`: defaulted, lowercased name,
/// resolved action. This is the only shape the decision engine reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedToolRule {
    pub name: String,
    pub risk: Risk,
    pub action: Decision,
    pub redact_params: bool,
    pub redact_result: bool,
    pub scan_injection: bool,
    pub use_exec_approvals: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_paths: Option<Vec<String>>,
    pub path_action: Decision,
}

// ----------------------------
// Policy
// ----------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogMode {
    Safe,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    Standard,
    Strict,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionMode {
    Shadow,
    Alert,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionDefaults {
    pub mode: InjectionMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDefaults {
    pub deny_unknown_tools: bool,
    pub unknown_tool_action: Decision,
    pub log: LogMode,
    pub redaction: RedactionMode,
    pub injection: InjectionDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMap {
    pub read: Decision,
    pub write: Decision,
    pub critical: Decision,
    pub unknown: Decision,
}

impl RiskMap {
    pub fn get(&self, risk: Risk) -> Decision {
        match risk {
            Risk::Read => self.read,
            Risk::Write => self.write,
            Risk::Critical => self.critical,
            Risk::Unknown => self.unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub mode: String,
    pub defaults: PolicyDefaults,
    pub risk: RiskMap,
    pub tools: Vec<NormalizedToolRule>,
}

impl Policy {
    /// Find a normalized rule by already-normalized (lowercased/trimmed) name.
    pub fn find_rule(&self, normalized_name: &str) -> Option<&NormalizedToolRule> {
        self.tools.iter().find(|t| t.name == normalized_name)
    }
}

// ----------------------------
// FirewallDecision
// ----------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RedactionPlan {
    pub redact_params: bool,
    pub redact_result: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallDecision {
    pub decision: Decision,
    pub reason: String,
    pub risk: Risk,
    pub redaction_plan: RedactionPlan,
    pub scan_injection: bool,
    pub use_exec_approvals: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_rule: Option<NormalizedToolRule>,
}

// ----------------------------
// Redaction report
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionMatch {
    pub r#type: String,
    pub count: u64,
    pub hashes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedactionReport {
    pub redacted: bool,
    pub matches: Vec<RedactionMatch>,
}

impl RedactionReport {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(r#type: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            redacted: true,
            matches: vec![RedactionMatch {
                r#type: r#type.into(),
                count: 1,
                hashes: vec![hash.into()],
            }],
        }
    }

    /// Commutative, associative merge: counts summed and hash lists
    /// concatenated per detector type.
    pub fn merge(mut self, other: RedactionReport) -> RedactionReport {
        self.redacted = self.redacted || other.redacted;
        for m in other.matches {
            if let Some(existing) = self.matches.iter_mut().find(|x| x.r#type == m.r#type) {
                existing.count += m.count;
                existing.hashes.extend(m.hashes);
            } else {
                self.matches.push(m);
            }
        }
        self
    }
}

// ----------------------------
// Injection findings
// ----------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionFinding {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    pub match_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectionReport {
    pub flagged: bool,
    pub findings: Vec<InjectionFinding>,
}

// ----------------------------
// Approval store
// ----------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    Once,
    Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: String,
    pub tool_name: String,
    pub params_hash: String,
    pub params_preview: String,
    pub risk: Risk,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ApprovalScope>,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<bool>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionApproval {
    pub id: String,
    pub tool_name: String,
    pub params_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    pub approved_at: u64,
}

impl SessionApproval {
    pub fn matches(&self, id: &str, tool_name: &str, params_hash: &str, session_key: Option<&str>) -> bool {
        self.id == id
            && self.tool_name == tool_name
            && self.params_hash == params_hash
            && self.session_key.as_deref() == session_key
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalStore {
    pub version: u32,
    pub requests: Vec<ApprovalRecord>,
    pub session_approvals: Vec<SessionApproval>,
}

impl ApprovalStore {
    pub fn empty() -> Self {
        Self { version: 1, requests: vec![], session_approvals: vec![] }
    }

    pub fn find_request(&self, id: &str, tool_name: &str, params_hash: &str) -> Option<&ApprovalRecord> {
        self.requests
            .iter()
            .find(|r| r.id == id && r.tool_name == tool_name && r.params_hash == params_hash)
    }

    pub fn find_request_mut(&mut self, id: &str, tool_name: &str, params_hash: &str) -> Option<&mut ApprovalRecord> {
        self.requests
            .iter_mut()
            .find(|r| r.id == id && r.tool_name == tool_name && r.params_hash == params_hash)
    }

    pub fn find_session_approval(&self, id: &str, tool_name: &str, params_hash: &str, session_key: Option<&str>) -> bool {
        self.session_approvals
            .iter()
            .any(|s| s.matches(id, tool_name, params_hash, session_key))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalHistoryEvent {
    pub id: String,
    pub tool_name: String,
    pub risk: Risk,
    pub scope: ApprovalScope,
    pub approved_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalRollup {
    pub counts: HashMap<String, u64>,
    pub updated_at: u64,
}

impl ApprovalRollup {
    pub fn rollup_key(tool_name: &str, risk: Risk) -> String {
        format!("{tool_name}:{risk}")
    }

    /// Rebuild a rollup from a sequence of approved history events. Ordering
    /// commutes: this only counts occurrences per key.
    pub fn rebuild(history: &[ApprovalHistoryEvent], updated_at: u64) -> Self {
        let mut counts = HashMap::new();
        for ev in history {
            let key = Self::rollup_key(&ev.tool_name, ev.risk);
            *counts.entry(key).or_insert(0) += 1;
        }
        Self { counts, updated_at }
    }
}

// ----------------------------
// Receipt
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub timestamp: u64,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<Risk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub redaction: RedactionReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injection: Option<InjectionReport>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_total_order_and_rank() {
        assert!(Decision::Allow.rank() < Decision::Ask.rank());
        assert!(Decision::Ask.rank() < Decision::Deny.rank());
    }

    #[test]
    fn most_restrictive_is_monotonic_upgrade_only() {
        assert_eq!(Decision::Allow.most_restrictive(Decision::Deny), Decision::Deny);
        assert_eq!(Decision::Deny.most_restrictive(Decision::Allow), Decision::Deny);
        assert_eq!(Decision::Ask.most_restrictive(Decision::Allow), Decision::Ask);
    }

    #[test]
    fn decision_parse_loose_is_case_insensitive() {
        assert_eq!(Decision::parse_loose("deny"), Some(Decision::Deny));
        assert_eq!(Decision::parse_loose("Ask"), Some(Decision::Ask));
        assert_eq!(Decision::parse_loose("nonsense"), None);
    }

    #[test]
    fn legacy_allow_resolves_all_forms() {
        assert_eq!(LegacyAllow::Bool(true).resolve(), Some(Decision::Allow));
        assert_eq!(LegacyAllow::Bool(false).resolve(), Some(Decision::Deny));
        assert_eq!(LegacyAllow::Str("ask".into()).resolve(), Some(Decision::Ask));
        assert_eq!(LegacyAllow::Str("deny".into()).resolve(), Some(Decision::Deny));
    }

    #[test]
    fn redaction_report_merge_is_commutative_on_counts() {
        let a = RedactionReport::single("email", "abcd1234");
        let b = RedactionReport::single("email", "ef012345");
        let merged_ab = a.clone().merge(b.clone());
        let merged_ba = b.merge(a);
        assert_eq!(merged_ab.matches[0].count, merged_ba.matches[0].count);
    }

    #[test]
    fn rollup_rebuild_is_order_independent() {
        let mk = |tool: &str, risk: Risk| ApprovalHistoryEvent {
            id: "x".into(),
            tool_name: tool.into(),
            risk,
            scope: ApprovalScope::Once,
            approved_at: 0,
            session_key: None,
            agent_id: None,
        };
        let h1 = vec![mk("write", Risk::Write), mk("write", Risk::Write), mk("exec", Risk::Critical)];
        let mut h2 = h1.clone();
        h2.reverse();
        let r1 = ApprovalRollup::rebuild(&h1, 0);
        let r2 = ApprovalRollup::rebuild(&h2, 0);
        assert_eq!(r1.counts, r2.counts);
        assert_eq!(r1.counts[&ApprovalRollup::rollup_key("write", Risk::Write)], 2);
    }
}
