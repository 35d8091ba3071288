//! firewall_store
//!
//! Persistent approval ledger (C9): `approvals.json` (point-in-time,
//! write-then-rename), `approvals.history.jsonl` and `receipts.jsonl`
//! (append-only), `approvals.rollup.json` and `last-decision.json`
//! (point-in-time snapshots). The whole store lives in memory behind one
//! mutex and is persisted on every mutation — single-writer discipline,
//! as specified in §5 and §9.
//!
//! Timestamps are passed in by the caller rather than read from the
//! system clock here, keeping everything in this crate deterministic and
//! testable (the only non-determinism the core tolerates is "what time is
//! it", which belongs to the host).

use firewall_common::sha256_hex;
use firewall_spec::{
    ApprovalHistoryEvent, ApprovalRecord, ApprovalRollup, ApprovalScope, ApprovalStatus,
    ApprovalStore, Receipt, Risk, SessionApproval,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Compute the deterministic approval ID: `sha256_hex(tool:session:hash:risk)[:16]`.
pub fn approval_id(tool_name: &str, session_key: Option<&str>, params_hash: &str, risk: Risk) -> String {
    let material = format!("{tool_name}:{}:{params_hash}:{risk}", session_key.unwrap_or(""));
    sha256_hex(material.as_bytes()).chars().take(16).collect()
}

pub enum AskResolution {
    /// The call is allowed; reason replaces the ASK decision's reason.
    Allowed { reason: String },
    /// The call remains blocked pending human approval.
    Pending { record: ApprovalRecord },
}

pub struct ApprovalStoreHandle {
    state_dir: PathBuf,
    inner: Mutex<ApprovalStore>,
}

impl ApprovalStoreHandle {
    /// Open (or tolerantly initialize) the store at `state_dir`. A missing
    /// or unparseable `approvals.json` is treated as an empty store
    /// (StateIOError, non-fatal) rather than propagated.
    pub fn open(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        let path = state_dir.join("approvals.json");
        let store = fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<ApprovalStore>(&bytes).ok())
            .unwrap_or_else(|| {
                if path.exists() {
                    tracing::warn!(path = %path.display(), "approvals.json unreadable, starting from empty store");
                }
                ApprovalStore::empty()
            });
        Self { state_dir, inner: Mutex::new(store) }
    }

    fn write_then_rename(&self, rel_path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.state_dir)?;
        let final_path = self.state_dir.join(rel_path);
        let tmp_path = self.state_dir.join(format!("{rel_path}.tmp"));
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn append_jsonl(&self, rel_path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.state_dir)?;
        let mut f = fs::OpenOptions::new().create(true).append(true).open(self.state_dir.join(rel_path))?;
        f.write_all(bytes)?;
        f.write_all(b"\n")?;
        f.flush()?;
        Ok(())
    }

    fn persist_store_locked(&self, store: &ApprovalStore) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(store)?;
        self.write_then_rename("approvals.json", &bytes)
    }

    fn persist_rollup(&self, rollup: &ApprovalRollup) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(rollup)?;
        self.write_then_rename("approvals.rollup.json", &bytes)
    }

    fn read_history(&self) -> Vec<ApprovalHistoryEvent> {
        let path = self.state_dir.join("approvals.history.jsonl");
        let Ok(contents) = fs::read_to_string(path) else { return Vec::new() };
        contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Resolve an ASK decision per §4.5's three-step approval logic. The
    /// store read, decision, and write for one approval id happen while
    /// holding the lock, so this is atomic with respect to other callers.
    pub fn resolve_ask(
        &self,
        id: &str,
        tool_name: &str,
        params_hash: &str,
        params_preview: &str,
        risk: Risk,
        reason: &str,
        session_key: Option<&str>,
        agent_id: Option<&str>,
        log_debug: bool,
        now: u64,
    ) -> Result<AskResolution, StoreError> {
        let mut store = self.inner.lock().expect("approval store mutex poisoned");

        if store.find_session_approval(id, tool_name, params_hash, session_key) {
            return Ok(AskResolution::Allowed { reason: "Tool call approved by firewall.".to_string() });
        }

        if let Some(existing) = store.find_request(id, tool_name, params_hash) {
            match (existing.status, existing.scope) {
                (ApprovalStatus::Approved, Some(ApprovalScope::Once)) if existing.used == Some(true) => {
                    return Ok(AskResolution::Pending { record: existing.clone() });
                }
                (ApprovalStatus::Approved, Some(ApprovalScope::Once)) => {
                    let record_id = existing.id.clone();
                    if let Some(r) = store.find_request_mut(&record_id, tool_name, params_hash) {
                        r.used = Some(true);
                        r.updated_at = Some(now);
                    }
                    self.persist_store_locked(&store)?;
                    return Ok(AskResolution::Allowed { reason: "Tool call approved by firewall.".to_string() });
                }
                (ApprovalStatus::Approved, Some(ApprovalScope::Session)) => {
                    if !store.find_session_approval(id, tool_name, params_hash, session_key) {
                        store.session_approvals.push(SessionApproval {
                            id: id.to_string(),
                            tool_name: tool_name.to_string(),
                            params_hash: params_hash.to_string(),
                            session_key: session_key.map(str::to_string),
                            approved_at: now,
                        });
                    }
                    self.persist_store_locked(&store)?;
                    return Ok(AskResolution::Allowed { reason: "Tool call approved by firewall.".to_string() });
                }
                _ => {
                    return Ok(AskResolution::Pending { record: existing.clone() });
                }
            }
        }

        let preview = if log_debug { params_preview.to_string() } else { "[redacted]".to_string() };
        let record = ApprovalRecord {
            id: id.to_string(),
            tool_name: tool_name.to_string(),
            params_hash: params_hash.to_string(),
            params_preview: preview,
            risk,
            status: ApprovalStatus::Pending,
            scope: None,
            created_at: now,
            updated_at: None,
            used: None,
            reason: reason.to_string(),
            session_key: session_key.map(str::to_string),
            agent_id: agent_id.map(str::to_string),
        };
        store.requests.push(record.clone());
        self.persist_store_locked(&store)?;
        Ok(AskResolution::Pending { record })
    }

    /// Chat command `approve <id> [once|session]`. Returns `true` iff the
    /// request transitioned from a non-approved status to approved.
    pub fn approve(&self, id: &str, scope: ApprovalScope, now: u64) -> Result<bool, StoreError> {
        let mut store = self.inner.lock().expect("approval store mutex poisoned");
        let Some(record) = store.requests.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        let was_approved = record.status == ApprovalStatus::Approved;
        record.status = ApprovalStatus::Approved;
        record.scope = Some(scope);
        record.updated_at = Some(now);
        let event = ApprovalHistoryEvent {
            id: record.id.clone(),
            tool_name: record.tool_name.clone(),
            risk: record.risk,
            scope,
            approved_at: now,
            session_key: record.session_key.clone(),
            agent_id: record.agent_id.clone(),
        };
        self.persist_store_locked(&store)?;
        drop(store);

        if !was_approved {
            let bytes = serde_json::to_vec(&event)?;
            self.append_jsonl("approvals.history.jsonl", &bytes)?;
            let history = self.read_history();
            let rollup = ApprovalRollup::rebuild(&history, now);
            self.persist_rollup(&rollup)?;
        }
        Ok(!was_approved)
    }

    /// Chat command `deny <id>`.
    pub fn deny(&self, id: &str, now: u64) -> Result<bool, StoreError> {
        let mut store = self.inner.lock().expect("approval store mutex poisoned");
        let Some(record) = store.requests.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        record.status = ApprovalStatus::Denied;
        record.updated_at = Some(now);
        self.persist_store_locked(&store)?;
        Ok(true)
    }

    /// Chat command `status`.
    pub fn list_pending(&self) -> Vec<ApprovalRecord> {
        let store = self.inner.lock().expect("approval store mutex poisoned");
        store.requests.iter().filter(|r| r.status == ApprovalStatus::Pending).cloned().collect()
    }

    pub fn append_receipt(&self, receipt: &Receipt) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(receipt)?;
        self.append_jsonl("receipts.jsonl", &bytes)?;
        let snapshot = serde_json::to_vec_pretty(receipt)?;
        self.write_then_rename("last-decision.json", &snapshot)
    }

    /// Chat command `explain`.
    pub fn last_decision(&self) -> Option<Receipt> {
        let path = self.state_dir.join("last-decision.json");
        fs::read(path).ok().and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}
