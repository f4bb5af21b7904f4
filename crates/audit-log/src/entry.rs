//! Audit entry wire shape and drafting.

use arbiter_core::canon::canonical_sha256;
use arbiter_core::risk::RiskCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Audience an entry is intended for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityLevel {
    /// Day-to-day pipeline events.
    #[default]
    Operational,
    /// Governance-relevant decisions (approvals, denials, profile changes).
    Governance,
    /// Integrity alerts (chain breaks, invariant breaches).
    Security,
}

/// A sealed, hash-linked audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry id (insertion-ordered).
    pub id: String,
    /// Event type label (see [`crate::event`]).
    pub event_type: String,
    /// Seal timestamp (ms since epoch).
    pub timestamp_ms: u64,
    /// Actor kind (`user` | `agent` | `system`).
    pub actor_type: String,
    /// Actor id.
    pub actor_id: String,
    /// Governed entity kind (`envelope` | `approval` | `competence` | `ledger`).
    pub entity_type: String,
    /// Governed entity id.
    pub entity_id: String,
    /// Risk category of the underlying action, when known.
    pub risk_category: Option<RiskCategory>,
    /// Intended audience.
    pub visibility_level: VisibilityLevel,
    /// One-line, human-readable summary.
    pub summary: String,
    /// Redacted state snapshot at seal time.
    pub snapshot: JsonValue,
    /// Evidence pointers (opaque refs).
    pub evidence_pointers: Vec<String>,
    /// Whether redaction changed the snapshot.
    pub redaction_applied: bool,
    /// Field paths redaction touched.
    pub redacted_fields: Vec<String>,
    /// Hash-chain algorithm version.
    pub chain_hash_version: u32,
    /// Entry schema version.
    pub schema_version: u32,
    /// SHA-256 over the canonical entry minus this field.
    pub entry_hash: String,
    /// `entry_hash` of the preceding entry; `None` for the genesis entry.
    pub previous_entry_hash: Option<String>,
    /// Envelope this entry concerns (weak ref).
    pub envelope_id: Option<String>,
    /// Owning organization.
    pub organization_id: Option<String>,
    /// Correlation trace id.
    pub trace_id: Option<String>,
}

impl AuditEntry {
    /// Recompute the entry hash from the entry's own fields.
    /// Equals `entry_hash` iff the entry is untampered.
    pub fn computed_hash(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(JsonValue::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("entry_hash");
        }
        canonical_sha256(&value)
    }
}

/// Unsealed entry content; the ledger assigns id, timestamp, redaction,
/// chain link, and hash at append time.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    /// Event type label.
    pub event_type: String,
    /// Actor kind.
    pub actor_type: String,
    /// Actor id.
    pub actor_id: String,
    /// Governed entity kind.
    pub entity_type: String,
    /// Governed entity id.
    pub entity_id: String,
    /// Risk category, when known.
    pub risk_category: Option<RiskCategory>,
    /// Intended audience.
    pub visibility_level: VisibilityLevel,
    /// One-line summary.
    pub summary: String,
    /// Unredacted snapshot; the ledger redacts a copy before sealing.
    pub snapshot: JsonValue,
    /// Evidence pointers.
    pub evidence_pointers: Vec<String>,
    /// Envelope weak ref.
    pub envelope_id: Option<String>,
    /// Owning organization.
    pub organization_id: Option<String>,
    /// Correlation trace id.
    pub trace_id: Option<String>,
}

impl AuditDraft {
    /// Start a draft with the required fields; the rest default to empty.
    pub fn new(
        event_type: impl Into<String>,
        actor_type: impl Into<String>,
        actor_id: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            actor_type: actor_type.into(),
            actor_id: actor_id.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            risk_category: None,
            visibility_level: VisibilityLevel::Operational,
            summary: summary.into(),
            snapshot: JsonValue::Null,
            evidence_pointers: Vec::new(),
            envelope_id: None,
            organization_id: None,
            trace_id: None,
        }
    }

    /// Attach a state snapshot.
    pub fn snapshot(mut self, snapshot: JsonValue) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Attach the envelope weak ref.
    pub fn envelope(mut self, envelope_id: impl Into<String>) -> Self {
        self.envelope_id = Some(envelope_id.into());
        self
    }

    /// Attach the owning organization.
    pub fn organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Attach the correlation trace id.
    pub fn trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Set the risk category.
    pub fn risk(mut self, category: RiskCategory) -> Self {
        self.risk_category = Some(category);
        self
    }

    /// Set the intended audience.
    pub fn visibility(mut self, level: VisibilityLevel) -> Self {
        self.visibility_level = level;
        self
    }
}
