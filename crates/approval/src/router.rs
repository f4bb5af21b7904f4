//! Approval routing: (category, tolerance) → level, expiry, approvers.

use arbiter_core::governance::{ApprovalLevel, RiskTolerance};
use arbiter_core::risk::RiskCategory;
use serde::{Deserialize, Serialize};

/// Routing defaults and per-level expiry windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Expiry window for standard approvals.
    pub standard_expiry_ms: u64,
    /// Expiry window for elevated approvals.
    pub elevated_expiry_ms: u64,
    /// Expiry window for mandatory approvals.
    pub mandatory_expiry_ms: u64,
    /// Approvers used when the identity delegates none.
    pub default_approvers: Vec<String>,
    /// Last-resort approver.
    pub fallback_approver: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            standard_expiry_ms: 86_400_000,
            elevated_expiry_ms: 43_200_000,
            mandatory_expiry_ms: 14_400_000,
            default_approvers: Vec::new(),
            fallback_approver: None,
        }
    }
}

/// The routing outcome the orchestrator builds a request from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedApproval {
    /// Required approval level.
    pub level: ApprovalLevel,
    /// Approvers in resolution order (identity, then config defaults).
    pub approvers: Vec<String>,
    /// Fallback approver, if configured.
    pub fallback_approver: Option<String>,
    /// Absolute expiry deadline (ms since epoch).
    pub expires_at_ms: u64,
    /// True when no approver was reachable and the level was escalated to
    /// mandatory; the orchestrator denies such envelopes.
    pub escalated_no_approvers: bool,
}

/// Route a scored action. Approver resolution order: the identity's
/// delegated approvers, then config defaults, then the fallback. When the
/// level requires a human and nobody is reachable, escalate to mandatory
/// with an empty list and let the caller deny.
pub fn route(
    category: RiskCategory,
    tolerance: &RiskTolerance,
    delegated_approvers: &[String],
    config: &RoutingConfig,
    now_ms: u64,
) -> RoutedApproval {
    let mut level = tolerance.level_for(category);
    let approvers: Vec<String> = if delegated_approvers.is_empty() {
        config.default_approvers.clone()
    } else {
        delegated_approvers.to_vec()
    };

    let mut escalated_no_approvers = false;
    if level != ApprovalLevel::None && approvers.is_empty() && config.fallback_approver.is_none() {
        level = ApprovalLevel::Mandatory;
        escalated_no_approvers = true;
    }

    let window_ms = match level {
        ApprovalLevel::None => 0,
        ApprovalLevel::Standard => config.standard_expiry_ms,
        ApprovalLevel::Elevated => config.elevated_expiry_ms,
        ApprovalLevel::Mandatory => config.mandatory_expiry_ms,
    };

    RoutedApproval {
        level,
        approvers,
        fallback_approver: config.fallback_approver.clone(),
        expires_at_ms: now_ms.saturating_add(window_ms),
        escalated_no_approvers,
    }
}
