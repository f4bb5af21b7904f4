//! Execution results and undo recipes returned by cartridges.

use crate::governance::ApprovalLevel;
use crate::risk::RiskCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One failed sub-step inside an otherwise structured execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialFailure {
    /// Stable failure code.
    pub code: String,
    /// Error text; matched against transient patterns for retry classification.
    pub error: String,
    /// External entity the failure concerns, if any.
    pub entity_ref: Option<String>,
}

/// Data embedded in an ExecuteResult describing how to synthesize the
/// reverse action later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoRecipe {
    /// Action id of the executed proposal this recipe reverses.
    pub original_action_id: String,
    /// Envelope id of the executed proposal.
    pub original_envelope_id: String,
    /// Action type of the synthesized reverse proposal.
    pub reverse_action_type: String,
    /// Parameters of the synthesized reverse proposal.
    pub reverse_parameters: JsonValue,
    /// Recipe expiry (ms since epoch); undo is denied afterwards.
    pub undo_expires_at_ms: u64,
    /// Risk category the reverse action should carry.
    pub undo_risk_category: RiskCategory,
    /// Approval floor for the reverse action.
    pub undo_approval_required: ApprovalLevel,
}

/// Outcome of one guarded cartridge execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    /// Whether the external mutation succeeded.
    pub success: bool,
    /// One-line, human-readable outcome.
    pub summary: String,
    /// External system references (vendor ids, receipts).
    pub external_refs: Vec<String>,
    /// Whether a rollback path exists.
    pub rollback_available: bool,
    /// Failed sub-steps (empty on full success).
    pub partial_failures: Vec<PartialFailure>,
    /// Wall-clock duration of the cartridge call.
    pub duration_ms: u64,
    /// Undo recipe for reversible actions.
    pub undo_recipe: Option<UndoRecipe>,
}

impl ExecuteResult {
    /// A synthetic failure result (interceptor veto, pre-flight rejection).
    pub fn vetoed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: "execution vetoed".into(),
            external_refs: Vec::new(),
            rollback_available: false,
            partial_failures: vec![PartialFailure {
                code: "interceptor-veto".into(),
                error: reason.into(),
                entity_ref: None,
            }],
            duration_ms: 0,
            undo_recipe: None,
        }
    }
}
