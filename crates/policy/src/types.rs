//! Policy records.

use crate::condition::Rule;
use arbiter_core::governance::ApprovalLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Effect a matching policy contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    /// Terminal: permit and stop evaluating.
    Allow,
    /// Terminal: block and stop evaluating.
    Deny,
    /// Raise the approval floor and continue.
    RequireApproval,
    /// Merge parameter overrides and continue.
    Transform,
}

/// A stored governance policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Policy id (unique; breaks priority ties deterministically).
    pub id: String,
    /// Ascending application order; lower evaluates first.
    pub priority: i32,
    /// Inactive policies are skipped.
    pub active: bool,
    /// Cartridge the policy applies to; `None` applies to all.
    pub cartridge_id: Option<String>,
    /// Organization the policy applies to; `None` applies to all.
    pub organization_id: Option<String>,
    /// Matching condition tree.
    pub rule: Rule,
    /// Effect when the rule matches.
    pub effect: PolicyEffect,
    /// Approval floor for `require_approval` policies. Defaults to standard.
    pub approval_requirement: Option<ApprovalLevel>,
    /// Parameter overrides for `transform` policies (object-merged).
    pub transform: Option<JsonValue>,
    /// Operator-facing description, quoted in decision traces.
    pub description: Option<String>,
}

impl Policy {
    /// Whether the policy applies to the given cartridge/org pair.
    pub fn applies_to(&self, cartridge_id: &str, organization_id: &str) -> bool {
        self.active
            && self.cartridge_id.as_deref().map_or(true, |c| c == cartridge_id)
            && self.organization_id.as_deref().map_or(true, |o| o == organization_id)
    }
}

/// Sort policies into deterministic application order.
pub(crate) fn sort_for_application(policies: &mut [Policy]) {
    policies.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
}
