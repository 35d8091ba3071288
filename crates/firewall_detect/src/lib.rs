//! firewall_detect
//!
//! Regex-based recognizers for secrets, identifiers, and crypto artifacts.
//! `redact_string` runs the active detector set over one string and
//! returns the redacted text plus a merged `RedactionReport`.
//!
//! Detectors never re-wrap an already-redacted token: any candidate whose
//! value span is itself `[REDACTED:<type>:<hash8>]` is skipped. That is
//! what makes `redact(redact(x)) == redact(x)` (§8 redaction idempotence).

use firewall_common::sha256_hex_prefix;
use firewall_spec::{RedactionMatch, RedactionMode, RedactionReport};
use once_cell::sync::Lazy;
use regex::Regex;

struct Detector {
    type_name: &'static str,
    regex: Regex,
    /// Capture group holding the sensitive value. `0` means the whole match.
    value_group: usize,
    strict_only: bool,
    validator: Option<fn(&str) -> bool>,
}

static ALREADY_REDACTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[REDACTED:[a-z0-9_]+:[0-9a-f]{8}\]$").unwrap());

fn is_already_redacted(s: &str) -> bool {
    ALREADY_REDACTED.is_match(s)
}

fn has_letter_and_digit(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_alphabetic()) && s.chars().any(|c| c.is_ascii_digit())
}

static DETECTORS: Lazy<Vec<Detector>> = Lazy::new(|| {
    vec![
        Detector {
            type_name: "email",
            regex: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
            value_group: 0,
            strict_only: false,
            validator: None,
        },
        Detector {
            type_name: "ipv4",
            regex: Regex::new(
                r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
            )
            .unwrap(),
            value_group: 0,
            strict_only: false,
            validator: None,
        },
        Detector {
            type_name: "authorization",
            regex: Regex::new(r"(?i)(Authorization:\s*(?:Bearer|Basic|Token)\s+)(\S+)").unwrap(),
            value_group: 2,
            strict_only: false,
            validator: None,
        },
        Detector {
            type_name: "openai_key",
            regex: Regex::new(r"\bsk-[A-Za-z0-9]{20,}\b").unwrap(),
            value_group: 0,
            strict_only: false,
            validator: None,
        },
        Detector {
            type_name: "aws_key",
            regex: Regex::new(r"\bAKIA[A-Z0-9]{16}\b").unwrap(),
            value_group: 0,
            strict_only: false,
            validator: None,
        },
        Detector {
            type_name: "slack_token",
            regex: Regex::new(r"\bxox[baprs]-[A-Za-z0-9-]+\b").unwrap(),
            value_group: 0,
            strict_only: false,
            validator: None,
        },
        Detector {
            type_name: "stripe_key",
            regex: Regex::new(r"\bsk_live_[A-Za-z0-9]{24,}\b").unwrap(),
            value_group: 0,
            strict_only: false,
            validator: None,
        },
        Detector {
            type_name: "generic_secret",
            regex: Regex::new(r"(?i)\b(api_key|token|secret|password)\s*[:=]\s*(\S{12,})").unwrap(),
            value_group: 2,
            strict_only: false,
            validator: None,
        },
        Detector {
            type_name: "eth_address",
            regex: Regex::new(r"\b0x[0-9a-fA-F]{40}\b").unwrap(),
            value_group: 0,
            strict_only: false,
            validator: None,
        },
        Detector {
            type_name: "btc_address",
            regex: Regex::new(r"\b(?:bc1[a-z0-9]{20,}|[13][A-HJ-NP-Za-km-z1-9]{25,34})\b").unwrap(),
            value_group: 0,
            strict_only: false,
            validator: None,
        },
        Detector {
            type_name: "hex_tx_id",
            regex: Regex::new(r"\b[0-9a-fA-F]{64}\b").unwrap(),
            value_group: 0,
            strict_only: false,
            validator: None,
        },
        Detector {
            type_name: "seed_phrase",
            regex: Regex::new(r"\b(?:[a-z]{3,8}\s+){11,23}[a-z]{3,8}\b").unwrap(),
            value_group: 0,
            strict_only: false,
            validator: None,
        },
        // --- strict-mode additions ---
        Detector {
            type_name: "long_token",
            regex: Regex::new(r"\b[A-Za-z0-9]{24,}\b").unwrap(),
            value_group: 0,
            strict_only: true,
            validator: Some(has_letter_and_digit),
        },
        Detector {
            type_name: "base64_run",
            regex: Regex::new(r"\b[A-Za-z0-9+/]{32,}={0,2}\b").unwrap(),
            value_group: 0,
            strict_only: true,
            validator: None,
        },
        Detector {
            type_name: "hex_run",
            regex: Regex::new(r"\b[0-9a-fA-F]{32,}\b").unwrap(),
            value_group: 0,
            strict_only: true,
            validator: None,
        },
    ]
});

struct Candidate {
    start: usize,
    end: usize,
    type_name: &'static str,
    value: String,
}

fn collect_candidates(text: &str, mode: RedactionMode) -> Vec<Candidate> {
    let mut out = Vec::new();
    for det in DETECTORS.iter() {
        if det.strict_only && mode != RedactionMode::Strict {
            continue;
        }
        for caps in det.regex.captures_iter(text) {
            let m = if det.value_group == 0 {
                caps.get(0)
            } else {
                caps.get(det.value_group)
            };
            let Some(m) = m else { continue };
            let value = m.as_str().to_string();
            if is_already_redacted(&value) {
                continue;
            }
            if let Some(validator) = det.validator {
                if !validator(&value) {
                    continue;
                }
            }
            out.push(Candidate {
                start: m.start(),
                end: m.end(),
                type_name: det.type_name,
                value,
            });
        }
    }
    out
}

/// Run the active detector set (per `mode`) over `text`, returning the
/// redacted string and a merged report. `mode == Off` is a no-op.
pub fn redact_string(text: &str, mode: RedactionMode) -> (String, RedactionReport) {
    if mode == RedactionMode::Off || text.is_empty() {
        return (text.to_string(), RedactionReport::empty());
    }

    let mut candidates = collect_candidates(text, mode);
    // Deterministic resolution: earliest start wins; ties keep detector
    // declaration order (stable sort preserves that).
    candidates.sort_by_key(|c| c.start);

    let mut out = String::with_capacity(text.len());
    let mut report = RedactionReport::empty();
    let mut cursor = 0usize;

    for c in candidates {
        if c.start < cursor {
            continue; // overlaps a previously accepted match
        }
        out.push_str(&text[cursor..c.start]);
        let hash8 = sha256_hex_prefix(c.value.as_bytes(), 8);
        out.push_str(&format!("[REDACTED:{}:{}]", c.type_name, hash8));
        report = report.merge(RedactionReport {
            redacted: true,
            matches: vec![RedactionMatch {
                r#type: c.type_name.to_string(),
                count: 1,
                hashes: vec![hash8],
            }],
        });
        cursor = c.end;
    }
    out.push_str(&text[cursor..]);
    (out, report)
}
