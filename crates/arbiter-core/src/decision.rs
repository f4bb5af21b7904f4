//! Decision vocabulary: the trace every governance check contributes to.

use crate::governance::ApprovalLevel;
use crate::risk::RiskCategory;
use serde::{Deserialize, Serialize};

/// Final outcome of the policy/identity/risk composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Auto-execute without human sign-off.
    Allow,
    /// Block the action.
    Deny,
    /// Queue behind a human approval at the traced level.
    RequireApproval,
}

impl Decision {
    /// Stable wire label used in audit summaries and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
            Decision::RequireApproval => "require_approval",
        }
    }
}

/// One evaluated check inside a decision trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceCheck {
    /// Stable check code, e.g. `policy:budget-cap` or `rate_limit:global`.
    pub code: String,
    /// Whether the check matched/triggered.
    pub matched: bool,
    /// Human-readable detail for operators.
    pub detail: String,
    /// Effect the check contributed (`deny`, `require_approval`, ...), if any.
    pub effect: Option<String>,
}

/// Ordered, human-readable record of every check that shaped a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTrace {
    /// Checks in evaluation order.
    pub checks: Vec<TraceCheck>,
    /// Raw risk score in [0, 100].
    pub risk_score: f64,
    /// Risk category derived from the score.
    pub risk_category: RiskCategory,
    /// Final decision.
    pub decision: Decision,
    /// Approval level the decision requires (meaningful for `RequireApproval`).
    pub approval_required: ApprovalLevel,
    /// One-line explanation surfaced to callers.
    pub explanation: String,
    /// Evaluation timestamp (ms since epoch).
    pub evaluated_at_ms: u64,
}

impl DecisionTrace {
    /// Append a check to the trace.
    pub fn push(
        &mut self,
        code: impl Into<String>,
        matched: bool,
        detail: impl Into<String>,
        effect: Option<&str>,
    ) {
        self.checks.push(TraceCheck {
            code: code.into(),
            matched,
            detail: detail.into(),
            effect: effect.map(str::to_string),
        });
    }
}
