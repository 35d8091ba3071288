//! firewall_inject
//!
//! Prompt-injection scanner: a fixed set of case-insensitive, word-bounded
//! rules run over tool-result text. Each rule that matches contributes one
//! `InjectionFinding` with its total match count; the report is flagged if
//! any rule matched. The scanner is pure over its input text — no state,
//! no I/O.

use firewall_spec::{InjectionFinding, InjectionReport, Severity};
use once_cell::sync::Lazy;
use regex::Regex;

struct Rule {
    id: &'static str,
    severity: Severity,
    message: &'static str,
    regex: Regex,
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule {
            id: "ignore_instructions",
            severity: Severity::High,
            message: "content asks the model to ignore prior instructions",
            regex: Regex::new(r"(?i)\bignore (all|previous|above) instructions\b").unwrap(),
        },
        Rule {
            id: "system_prompt",
            severity: Severity::High,
            message: "content references or claims to be a system prompt",
            regex: Regex::new(r"(?i)\bsystem prompt\b|\byou are chatgpt\b").unwrap(),
        },
        Rule {
            id: "tool_call_coercion",
            severity: Severity::High,
            message: "content instructs the model to invoke a tool",
            regex: Regex::new(r"(?i)\bcall the tool\b|\binvoke tool\b|\bexecute tool\b").unwrap(),
        },
        Rule {
            id: "credential_theft",
            severity: Severity::Medium,
            message: "content references credentials or secrets",
            regex: Regex::new(r"(?i)\bapi key\b|\bpassword\b|\bseed phrase\b|\bprivate key\b").unwrap(),
        },
        Rule {
            id: "role_impersonation",
            severity: Severity::Medium,
            message: "content impersonates a system or developer role marker",
            regex: Regex::new(r"(?i)\b(system|developer):").unwrap(),
        },
        Rule {
            id: "data_exfiltration",
            severity: Severity::Medium,
            message: "content instructs exfiltration of data",
            regex: Regex::new(r"(?i)\bexfiltrate\b|\bupload to\b|\bsend (all|everything)\b").unwrap(),
        },
        Rule {
            id: "overrides",
            severity: Severity::Low,
            message: "content claims an override or compliance directive",
            regex: Regex::new(r"(?i)\bdo not refuse\b|\boverride\b|\bmust comply\b").unwrap(),
        },
    ]
});

/// Scan `text` against the fixed rule set and return a merged report.
pub fn scan(text: &str) -> InjectionReport {
    let mut findings = Vec::new();
    for rule in RULES.iter() {
        let count = rule.regex.find_iter(text).count() as u64;
        if count > 0 {
            findings.push(InjectionFinding {
                id: rule.id.to_string(),
                severity: rule.severity,
                message: rule.message.to_string(),
                match_count: count,
            });
        }
    }
    InjectionReport { flagged: !findings.is_empty(), findings }
}
