//! Approval request/state wire shapes and the binding hash.

use arbiter_core::canon::canonical_sha256;
use arbiter_core::governance::ApprovalLevel;
use arbiter_core::ids::new_approval_id;
use arbiter_core::risk::RiskCategory;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// Canonical-JSON SHA-256 over the payload an approval authorizes.
/// The key spelling is part of the wire contract.
pub fn binding_hash(
    action_type: &str,
    parameters: &JsonValue,
    principal_id: &str,
    cartridge_id: &str,
) -> String {
    canonical_sha256(&json!({
        "actionType": action_type,
        "parameters": parameters,
        "principalId": principal_id,
        "cartridgeId": cartridge_id,
    }))
}

/// What happens when a pending approval outlives its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExpiredBehavior {
    /// The envelope is denied-by-expiry.
    #[default]
    Deny,
}

/// N-of-M quorum requirement on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumRule {
    /// Distinct approvals required before the request transitions.
    pub required: u32,
}

/// One approver's contribution under quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumEntry {
    /// Approver principal.
    pub approver_id: String,
    /// Binding hash the approver confirmed.
    pub binding_hash: String,
    /// Approval time (ms since epoch).
    pub approved_at_ms: u64,
}

/// Mutable quorum progress inside the state record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumProgress {
    /// Distinct approvals required.
    pub required: u32,
    /// Contributions so far, at most one per approver.
    pub entries: Vec<QuorumEntry>,
}

/// Immutable approval request created at routing time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Request id.
    pub id: String,
    /// Proposal/action id the request gates.
    pub action_id: String,
    /// Envelope the request belongs to (weak ref).
    pub envelope_id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Human-readable summary shown to approvers.
    pub summary: String,
    /// Risk category of the gated action.
    pub risk_category: RiskCategory,
    /// Approval level the routing computed.
    pub level: ApprovalLevel,
    /// Hash binding the request to the exact payload it authorizes.
    pub binding_hash: String,
    /// Approvers in routing order.
    pub approvers: Vec<String>,
    /// Fallback approver when the list is unreachable.
    pub fallback_approver: Option<String>,
    /// Expiry deadline (ms since epoch).
    pub expires_at_ms: u64,
    /// Behavior when the window elapses.
    pub expired_behavior: ExpiredBehavior,
    /// Quorum requirement, when the level demands more than one approver.
    pub quorum: Option<QuorumRule>,
    /// Creation time (ms since epoch).
    pub created_at_ms: u64,
}

/// Lifecycle status of an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting responses.
    Pending,
    /// Approved (single approver or quorum met).
    Approved,
    /// Rejected by any approver.
    Rejected,
    /// Window elapsed.
    Expired,
    /// Approved with an equal-canonical-form payload patch.
    Patched,
}

impl ApprovalStatus {
    /// Stable wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
            ApprovalStatus::Patched => "patched",
        }
    }
}

/// Mutable approval state, advanced only through the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalState {
    /// Request this state belongs to.
    pub approval_id: String,
    /// Current status.
    pub status: ApprovalStatus,
    /// Responder that finalized the state.
    pub responded_by: Option<String>,
    /// Response time (ms since epoch).
    pub responded_at_ms: Option<u64>,
    /// Patched payload, when status is `patched`.
    pub patch_value: Option<JsonValue>,
    /// Expiry deadline (mirrors the request).
    pub expires_at_ms: u64,
    /// Quorum progress, when the request carries a quorum rule.
    pub quorum: Option<QuorumProgress>,
    /// Optimistic version; every transition bumps it.
    pub version: u64,
}

impl ApprovalRequest {
    /// Create a request and its initial pending state, binding the payload.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        action_id: impl Into<String>,
        envelope_id: impl Into<String>,
        organization_id: impl Into<String>,
        summary: impl Into<String>,
        risk_category: RiskCategory,
        level: ApprovalLevel,
        action_type: &str,
        parameters: &JsonValue,
        principal_id: &str,
        cartridge_id: &str,
        approvers: Vec<String>,
        fallback_approver: Option<String>,
        expires_at_ms: u64,
        quorum: Option<QuorumRule>,
        now_ms: u64,
    ) -> (Self, ApprovalState) {
        let id = new_approval_id();
        let request = Self {
            id: id.clone(),
            action_id: action_id.into(),
            envelope_id: envelope_id.into(),
            organization_id: organization_id.into(),
            summary: summary.into(),
            risk_category,
            level,
            binding_hash: binding_hash(action_type, parameters, principal_id, cartridge_id),
            approvers,
            fallback_approver,
            expires_at_ms,
            expired_behavior: ExpiredBehavior::Deny,
            quorum,
            created_at_ms: now_ms,
        };
        let state = ApprovalState {
            approval_id: id,
            status: ApprovalStatus::Pending,
            responded_by: None,
            responded_at_ms: None,
            patch_value: None,
            expires_at_ms,
            quorum: quorum.map(|q| QuorumProgress { required: q.required, entries: Vec::new() }),
            version: 1,
        };
        (request, state)
    }
}
