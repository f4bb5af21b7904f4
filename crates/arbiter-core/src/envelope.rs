//! Action envelopes: one lifecycle unit from proposal to terminal state.

use crate::decision::DecisionTrace;
use crate::execute::ExecuteResult;
use crate::ids::{new_envelope_id, new_trace_id};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Lifecycle status of an envelope. Transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    /// Created; governance has not decided yet.
    Proposed,
    /// Queued behind a human approval.
    PendingApproval,
    /// Cleared for execution.
    Approved,
    /// Execution in flight.
    Executing,
    /// Executed successfully. Terminal unless rolled back.
    Executed,
    /// Denied by policy or approval response. Terminal.
    Denied,
    /// Approval window elapsed. Terminal.
    Expired,
    /// Execution failed terminally. Terminal.
    Failed,
    /// Reversed by a child undo envelope. Terminal.
    RolledBack,
}

impl EnvelopeStatus {
    /// Stable wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeStatus::Proposed => "proposed",
            EnvelopeStatus::PendingApproval => "pending_approval",
            EnvelopeStatus::Approved => "approved",
            EnvelopeStatus::Executing => "executing",
            EnvelopeStatus::Executed => "executed",
            EnvelopeStatus::Denied => "denied",
            EnvelopeStatus::Expired => "expired",
            EnvelopeStatus::Failed => "failed",
            EnvelopeStatus::RolledBack => "rolled_back",
        }
    }

    /// Whether the status admits no further transitions (except undo links,
    /// which create fresh child envelopes rather than mutating this one).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EnvelopeStatus::Denied
                | EnvelopeStatus::Expired
                | EnvelopeStatus::Failed
                | EnvelopeStatus::RolledBack
        )
    }

    /// Forward-only transition check.
    pub fn can_transition_to(self, to: EnvelopeStatus) -> bool {
        use EnvelopeStatus::*;
        matches!(
            (self, to),
            (Proposed, PendingApproval)
                | (Proposed, Approved)
                | (Proposed, Denied)
                | (PendingApproval, Approved)
                | (PendingApproval, Denied)
                | (PendingApproval, Expired)
                | (Approved, Executing)
                | (Approved, Denied)
                | (Executing, Executed)
                | (Executing, Failed)
                | (Executed, RolledBack)
        )
    }
}

/// Rejected envelope state change.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The requested transition is not in the forward-only matrix.
    #[error("cannot transition envelope from {from} to {to}")]
    CannotTransition {
        /// Current status label.
        from: &'static str,
        /// Requested status label.
        to: &'static str,
    },
}

/// One proposed action inside an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique proposal/action id.
    pub id: String,
    /// Namespaced action type, e.g. `ads.campaign.pause`.
    pub action_type: String,
    /// Action parameters (canonicalized only at binding-hash time).
    pub parameters: JsonValue,
    /// Evidence strings the caller supplied for the trace.
    pub evidence: Vec<String>,
    /// Caller confidence in [0, 1].
    pub confidence: f64,
}

/// An external entity reference resolved through the cartridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedEntity {
    /// Entity type, e.g. `campaign`.
    pub entity_type: String,
    /// The raw reference the caller supplied.
    pub input_ref: String,
    /// The resolved external id.
    pub resolved_id: String,
    /// Display name for summaries.
    pub display_name: String,
    /// Resolution confidence in [0, 1].
    pub confidence: f64,
}

/// The full lifecycle record of a proposed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEnvelope {
    /// Unique envelope id.
    pub id: String,
    /// Monotonically-incremented version; bumped on every mutation.
    pub version: u64,
    /// Proposing principal.
    pub principal_id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Cartridge the proposals execute through.
    pub cartridge_id: String,
    /// Ordered proposals (single-proposal envelopes are the common case).
    pub proposals: Vec<Proposal>,
    /// Entities resolved during intake.
    pub resolved_entities: Vec<ResolvedEntity>,
    /// Decision trace produced by policy evaluation.
    pub decision_trace: Option<DecisionTrace>,
    /// Approval requests raised for this envelope (weak refs by id).
    pub approval_request_ids: Vec<String>,
    /// Execution results in attempt order.
    pub execution_results: Vec<ExecuteResult>,
    /// Audit entries recorded for this envelope (weak refs by id).
    pub audit_entry_ids: Vec<String>,
    /// Current lifecycle status.
    pub status: EnvelopeStatus,
    /// Parent envelope when this envelope is a synthesized undo.
    pub parent_envelope_id: Option<String>,
    /// Correlation trace id.
    pub trace_id: String,
    /// Creation timestamp (ms since epoch).
    pub created_at_ms: u64,
    /// Last mutation timestamp (ms since epoch).
    pub updated_at_ms: u64,
}

impl ActionEnvelope {
    /// Construct a fresh `proposed` envelope with a single proposal.
    pub fn new_proposed(
        principal_id: impl Into<String>,
        organization_id: impl Into<String>,
        cartridge_id: impl Into<String>,
        proposal: Proposal,
        trace_id: Option<String>,
        now_ms: u64,
    ) -> Self {
        Self {
            id: new_envelope_id(),
            version: 1,
            principal_id: principal_id.into(),
            organization_id: organization_id.into(),
            cartridge_id: cartridge_id.into(),
            proposals: vec![proposal],
            resolved_entities: Vec::new(),
            decision_trace: None,
            approval_request_ids: Vec::new(),
            execution_results: Vec::new(),
            audit_entry_ids: Vec::new(),
            status: EnvelopeStatus::Proposed,
            parent_envelope_id: None,
            trace_id: trace_id.unwrap_or_else(new_trace_id),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Advance the lifecycle status, bumping the version.
    pub fn transition(&mut self, to: EnvelopeStatus, now_ms: u64) -> Result<(), EnvelopeError> {
        if !self.status.can_transition_to(to) {
            return Err(EnvelopeError::CannotTransition {
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        self.status = to;
        self.version += 1;
        self.updated_at_ms = now_ms;
        Ok(())
    }

    /// The first proposal. Every envelope the broker creates has at least one.
    pub fn primary_proposal(&self) -> Option<&Proposal> {
        self.proposals.first()
    }
}
