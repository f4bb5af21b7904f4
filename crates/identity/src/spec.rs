//! Identity spec types: the per-principal governance baseline.

use arbiter_core::governance::{ApprovalLevel, GovernanceProfile, RiskTolerance};
use arbiter_core::risk::RiskCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Spend ceilings in whole dollars. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SpendLimits {
    /// Ceiling for a single action.
    pub per_action_usd: Option<f64>,
    /// Daily ceiling, accounted in fixed UTC-day windows at evaluation time.
    pub daily_usd: Option<f64>,
}

impl SpendLimits {
    /// The more restrictive of two limit sets: per-field minimum of non-null.
    pub fn restrict(self, other: Self) -> Self {
        Self {
            per_action_usd: min_opt(self.per_action_usd, other.per_action_usd),
            daily_usd: min_opt(self.daily_usd, other.daily_usd),
        }
    }

    /// The more permissive of two limit sets: per-field maximum, where a null
    /// (unlimited) side wins outright.
    pub fn extend(self, other: Self) -> Self {
        Self {
            per_action_usd: max_opt(self.per_action_usd, other.per_action_usd),
            daily_usd: max_opt(self.daily_usd, other.daily_usd),
        }
    }
}

fn min_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        _ => None, // either side unlimited
    }
}

/// Per-category tolerance override; unset categories keep the seeded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ToleranceOverride {
    /// Override for low-risk actions.
    pub low: Option<ApprovalLevel>,
    /// Override for medium-risk actions.
    pub medium: Option<ApprovalLevel>,
    /// Override for high-risk actions.
    pub high: Option<ApprovalLevel>,
    /// Override for critical-risk actions.
    pub critical: Option<ApprovalLevel>,
}

impl ToleranceOverride {
    /// Override for a given category, if set.
    pub fn level_for(&self, category: RiskCategory) -> Option<ApprovalLevel> {
        match category {
            RiskCategory::Low => self.low,
            RiskCategory::Medium => self.medium,
            RiskCategory::High => self.high,
            RiskCategory::Critical => self.critical,
        }
    }

    /// Apply the set categories onto a full tolerance.
    pub fn apply(&self, base: &mut RiskTolerance) {
        for c in RiskCategory::ALL {
            if let Some(level) = self.level_for(c) {
                base.set_level(c, level);
            }
        }
    }
}

/// Per-principal (or per-org-default) governance baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySpec {
    /// Spec id.
    pub id: String,
    /// Principal this spec governs.
    pub principal_id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Preset seeding the tolerance before spec values and overlays.
    /// Defaults to `guarded` when unset.
    pub governance_profile: Option<GovernanceProfile>,
    /// Per-category tolerance overrides on top of the preset.
    pub risk_tolerance: ToleranceOverride,
    /// Spend ceilings applying across all cartridges.
    pub global_spend_limits: SpendLimits,
    /// Spend ceilings per cartridge id; composed with the global ones.
    pub cartridge_spend_limits: BTreeMap<String, SpendLimits>,
    /// Action types this principal may never take.
    pub forbidden_behaviors: Vec<String>,
    /// Action types trusted to run without approval.
    pub trust_behaviors: Vec<String>,
    /// Approver principals delegated for this identity, in routing order.
    pub delegated_approvers: Vec<String>,
}

impl IdentitySpec {
    /// A minimal spec with the guarded default posture.
    pub fn guarded(
        id: impl Into<String>,
        principal_id: impl Into<String>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            principal_id: principal_id.into(),
            organization_id: organization_id.into(),
            governance_profile: Some(GovernanceProfile::Guarded),
            risk_tolerance: ToleranceOverride::default(),
            global_spend_limits: SpendLimits::default(),
            cartridge_spend_limits: BTreeMap::new(),
            forbidden_behaviors: Vec::new(),
            trust_behaviors: Vec::new(),
            delegated_approvers: Vec::new(),
        }
    }
}
