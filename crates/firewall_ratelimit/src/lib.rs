//! firewall_ratelimit
//!
//! Sliding-window rate limiter (C8): per-rule-per-scope bucket of call
//! timestamps. `RateLimiter::evaluate` is the only mutating entry point;
//! state is behind one mutex per bucket key so concurrent calls from the
//! host runtime serialize correctly (§5 ordering guarantees).

use firewall_spec::Decision;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScope {
    Session,
    Global,
}

/// Raw, as-authored config entry (plugin `rateLimits` field).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRateLimitEntry {
    pub tool_name: String,
    pub max_calls: i64,
    pub window_sec: i64,
    pub action: String,
    pub scope: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitRule {
    pub tool_name: String,
    pub max_calls: u64,
    pub window_sec: u64,
    pub action: Decision,
    pub scope: RateScope,
}

/// Drop invalid entries (missing/blank name, non-positive counts, or an
/// unrecognized action/scope) rather than failing the whole config.
pub fn parse_rules(entries: &[RawRateLimitEntry]) -> Vec<RateLimitRule> {
    entries
        .iter()
        .filter_map(|e| {
            if e.tool_name.trim().is_empty() || e.max_calls <= 0 || e.window_sec <= 0 {
                return None;
            }
            let action = match e.action.trim().to_ascii_uppercase().as_str() {
                "ASK" => Decision::Ask,
                "DENY" => Decision::Deny,
                _ => return None,
            };
            let scope = match e.scope.trim().to_ascii_lowercase().as_str() {
                "session" => RateScope::Session,
                "global" => RateScope::Global,
                _ => return None,
            };
            Some(RateLimitRule {
                tool_name: e.tool_name.trim().to_ascii_lowercase(),
                max_calls: e.max_calls as u64,
                window_sec: e.window_sec as u64,
                action,
                scope,
            })
        })
        .collect()
}

fn rule_matches(rule: &RateLimitRule, tool_name: &str) -> bool {
    rule.tool_name == "*" || rule.tool_name == "all" || rule.tool_name == tool_name
}

pub struct RateLimitOverride {
    pub decision: Decision,
    pub reason: String,
}

pub struct RateLimiter {
    rules: Vec<RateLimitRule>,
    buckets: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl RateLimiter {
    pub fn new(rules: Vec<RateLimitRule>) -> Self {
        Self { rules, buckets: Mutex::new(HashMap::new()) }
    }

    fn scope_key(rule_idx: usize, rule: &RateLimitRule, session_key: Option<&str>) -> String {
        match rule.scope {
            RateScope::Session => format!("{rule_idx}:{}", session_key.unwrap_or("no-session")),
            RateScope::Global => format!("{rule_idx}:global"),
        }
    }

    /// Evaluate all rules matching `tool_name` at time `now_ms`, updating
    /// their buckets unconditionally. Returns the most restrictive override
    /// among rules that were hit (DENY beats ASK), or `None` if none hit.
    pub fn evaluate(&self, tool_name: &str, session_key: Option<&str>, now_ms: u64) -> Option<RateLimitOverride> {
        let normalized = tool_name.trim().to_ascii_lowercase();
        let mut best: Option<RateLimitOverride> = None;
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");

        for (idx, rule) in self.rules.iter().enumerate() {
            if !rule_matches(rule, &normalized) {
                continue;
            }
            let key = Self::scope_key(idx, rule, session_key);
            let bucket = buckets.entry(key).or_default();
            let window_ms = rule.window_sec * 1000;
            let cutoff = now_ms.saturating_sub(window_ms);
            while let Some(&front) = bucket.front() {
                if front < cutoff {
                    bucket.pop_front();
                } else {
                    break;
                }
            }
            let hit = bucket.len() as u64 >= rule.max_calls;
            bucket.push_back(now_ms);

            if hit {
                let candidate = RateLimitOverride {
                    decision: rule.action,
                    reason: format!("Rate limit exceeded ({} calls / {}s).", rule.max_calls, rule.window_sec),
                };
                best = match best {
                    Some(existing) if existing.decision.rank() >= candidate.decision.rank() => Some(existing),
                    _ => Some(candidate),
                };
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(tool: &str, max_calls: u64, window_sec: u64, action: Decision, scope: RateScope) -> RateLimitRule {
        RateLimitRule { tool_name: tool.to_string(), max_calls, window_sec, action, scope }
    }

    #[test]
    fn second_call_within_window_trips_session_scope() {
        let limiter = RateLimiter::new(vec![rule("web_fetch", 1, 60, Decision::Ask, RateScope::Session)]);
        assert!(limiter.evaluate("web_fetch", Some("s1"), 1_000).is_none());
        let second = limiter.evaluate("web_fetch", Some("s1"), 1_500).unwrap();
        assert_eq!(second.decision, Decision::Ask);
        assert_eq!(second.reason, "Rate limit exceeded (1 calls / 60s).");
    }

    #[test]
    fn different_sessions_have_independent_buckets() {
        let limiter = RateLimiter::new(vec![rule("web_fetch", 1, 60, Decision::Ask, RateScope::Session)]);
        assert!(limiter.evaluate("web_fetch", Some("s1"), 1_000).is_none());
        assert!(limiter.evaluate("web_fetch", Some("s2"), 1_000).is_none());
    }

    #[test]
    fn global_scope_shares_bucket_across_sessions() {
        let limiter = RateLimiter::new(vec![rule("web_fetch", 1, 60, Decision::Deny, RateScope::Global)]);
        assert!(limiter.evaluate("web_fetch", Some("s1"), 1_000).is_none());
        let second = limiter.evaluate("web_fetch", Some("s2"), 1_200).unwrap();
        assert_eq!(second.decision, Decision::Deny);
    }

    #[test]
    fn entries_outside_window_expire() {
        let limiter = RateLimiter::new(vec![rule("web_fetch", 1, 60, Decision::Ask, RateScope::Session)]);
        assert!(limiter.evaluate("web_fetch", Some("s1"), 0).is_none());
        assert!(limiter.evaluate("web_fetch", Some("s1"), 120_000).is_none());
    }

    #[test]
    fn invalid_entries_are_silently_dropped() {
        let entries = vec![
            RawRateLimitEntry { tool_name: "".into(), max_calls: 5, window_sec: 60, action: "ASK".into(), scope: "session".into() },
            RawRateLimitEntry { tool_name: "write".into(), max_calls: 0, window_sec: 60, action: "ASK".into(), scope: "session".into() },
            RawRateLimitEntry { tool_name: "write".into(), max_calls: 5, window_sec: 60, action: "MAYBE".into(), scope: "session".into() },
            RawRateLimitEntry { tool_name: "write".into(), max_calls: 5, window_sec: 60, action: "ASK".into(), scope: "session".into() },
        ];
        let rules = parse_rules(&entries);
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn most_restrictive_wins_among_multiple_matching_rules() {
        let limiter = RateLimiter::new(vec![
            rule("*", 1, 60, Decision::Ask, RateScope::Global),
            rule("exec", 1, 60, Decision::Deny, RateScope::Global),
        ]);
        assert!(limiter.evaluate("exec", None, 0).is_none());
        let second = limiter.evaluate("exec", None, 100).unwrap();
        assert_eq!(second.decision, Decision::Deny);
    }
}
