//! Ledger trait, in-memory implementation, and chain verification.

use crate::entry::{AuditDraft, AuditEntry};
use crate::redact::Redactor;
use arbiter_core::clock::{Clock, SystemClock};
use arbiter_core::ids::new_audit_id;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors emitted by the ledger.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The backing store rejected the read or write.
    #[error("audit storage error: {0}")]
    Storage(String),
}

/// Chain verification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainVerdict {
    /// Whether every hash and link checked out.
    pub valid: bool,
    /// Index of the first broken entry, when invalid.
    pub broken_at: Option<usize>,
}

/// Append-only audit ledger. Appends are serialized by the implementation
/// (a mutex in-process; an advisory lock for shared backings), so the chain
/// stays unbroken under concurrent writers.
#[async_trait]
pub trait AuditLedger: Send + Sync {
    /// Redact, link, seal, and append a draft. Returns the sealed entry.
    async fn append(&self, draft: AuditDraft) -> Result<AuditEntry, AuditError>;

    /// All entries in insertion order.
    async fn entries(&self) -> Result<Vec<AuditEntry>, AuditError>;

    /// Entries from `index` (inclusive) in insertion order.
    async fn entries_from(&self, index: usize) -> Result<Vec<AuditEntry>, AuditError>;

    /// Number of entries appended so far.
    async fn len(&self) -> Result<usize, AuditError>;
}

/// Verify an ordered chain prefix. `preceding_hash` is the `entry_hash`
/// immediately before `entries[0]` (`None` when verifying from genesis).
/// Fails fast at the first broken entry.
pub fn verify_chain(entries: &[AuditEntry], preceding_hash: Option<&str>) -> ChainVerdict {
    let mut prev = preceding_hash.map(str::to_string);
    for (i, entry) in entries.iter().enumerate() {
        if entry.previous_entry_hash.as_deref() != prev.as_deref()
            || entry.computed_hash() != entry.entry_hash
        {
            return ChainVerdict { valid: false, broken_at: Some(i) };
        }
        prev = Some(entry.entry_hash.clone());
    }
    ChainVerdict { valid: true, broken_at: None }
}

/// Single-process ledger; the async mutex is the advisory-lock analogue.
pub struct InMemoryLedger {
    inner: Mutex<Vec<AuditEntry>>,
    redactor: Redactor,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(Redactor::builtin(), Arc::new(SystemClock))
    }
}

impl InMemoryLedger {
    /// Build a ledger with an explicit redactor and clock.
    pub fn new(redactor: Redactor, clock: Arc<dyn Clock>) -> Self {
        Self { inner: Mutex::new(Vec::new()), redactor, clock }
    }
}

#[async_trait]
impl AuditLedger for InMemoryLedger {
    async fn append(&self, draft: AuditDraft) -> Result<AuditEntry, AuditError> {
        // Lock first: the previous hash must not move between read and write.
        let mut entries = self.inner.lock().await;
        let previous_entry_hash = entries.last().map(|e| e.entry_hash.clone());

        let mut snapshot = draft.snapshot;
        let redacted_fields = self.redactor.redact(&mut snapshot);

        let mut entry = AuditEntry {
            id: new_audit_id(),
            event_type: draft.event_type,
            timestamp_ms: self.clock.now_ms(),
            actor_type: draft.actor_type,
            actor_id: draft.actor_id,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            risk_category: draft.risk_category,
            visibility_level: draft.visibility_level,
            summary: draft.summary,
            snapshot,
            evidence_pointers: draft.evidence_pointers,
            redaction_applied: !redacted_fields.is_empty(),
            redacted_fields,
            chain_hash_version: 1,
            schema_version: 1,
            entry_hash: String::new(),
            previous_entry_hash,
            envelope_id: draft.envelope_id,
            organization_id: draft.organization_id,
            trace_id: draft.trace_id,
        };
        entry.entry_hash = entry.computed_hash();
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.inner.lock().await.clone())
    }

    async fn entries_from(&self, index: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let entries = self.inner.lock().await;
        Ok(entries.get(index..).unwrap_or_default().to_vec())
    }

    async fn len(&self) -> Result<usize, AuditError> {
        Ok(self.inner.lock().await.len())
    }
}
