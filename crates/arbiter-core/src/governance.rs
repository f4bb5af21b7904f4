//! Approval levels, governance profiles, and risk tolerance mappings.

use crate::risk::RiskCategory;
use serde::{Deserialize, Serialize};

/// Human-approval requirement attached to a decision. Ordered by strictness:
/// `None < Standard < Elevated < Mandatory`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    /// No human sign-off required.
    #[default]
    None,
    /// A single approver within the standard expiry window.
    Standard,
    /// A single approver within a shortened expiry window.
    Elevated,
    /// The strictest level; shortest expiry.
    Mandatory,
}

impl ApprovalLevel {
    /// Stable wire label used in audit summaries and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalLevel::None => "none",
            ApprovalLevel::Standard => "standard",
            ApprovalLevel::Elevated => "elevated",
            ApprovalLevel::Mandatory => "mandatory",
        }
    }
}

/// Preset bundles of risk-tolerance defaults, from most permissive to frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceProfile {
    /// Log-only: every action auto-executes with a governance note.
    Observe,
    /// The default posture: low risk flows, medium and above needs sign-off.
    Guarded,
    /// Everything above low risk requires elevated or mandatory sign-off.
    Strict,
    /// All actions require mandatory sign-off. Used by emergency halt.
    Locked,
}

/// Required approval level per risk category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskTolerance {
    /// Requirement for low-risk actions.
    pub low: ApprovalLevel,
    /// Requirement for medium-risk actions.
    pub medium: ApprovalLevel,
    /// Requirement for high-risk actions.
    pub high: ApprovalLevel,
    /// Requirement for critical-risk actions.
    pub critical: ApprovalLevel,
}

impl RiskTolerance {
    /// Uniform tolerance at a single level.
    pub fn uniform(level: ApprovalLevel) -> Self {
        Self { low: level, medium: level, high: level, critical: level }
    }

    /// Requirement for a given category.
    pub fn level_for(&self, category: RiskCategory) -> ApprovalLevel {
        match category {
            RiskCategory::Low => self.low,
            RiskCategory::Medium => self.medium,
            RiskCategory::High => self.high,
            RiskCategory::Critical => self.critical,
        }
    }

    /// Replace the requirement for a given category.
    pub fn set_level(&mut self, category: RiskCategory, level: ApprovalLevel) {
        match category {
            RiskCategory::Low => self.low = level,
            RiskCategory::Medium => self.medium = level,
            RiskCategory::High => self.high = level,
            RiskCategory::Critical => self.critical = level,
        }
    }
}

impl GovernanceProfile {
    /// Tolerance preset seeded before base-spec values and overlays compose.
    pub fn preset_tolerance(self) -> RiskTolerance {
        match self {
            GovernanceProfile::Observe => RiskTolerance::uniform(ApprovalLevel::None),
            GovernanceProfile::Guarded => RiskTolerance {
                low: ApprovalLevel::None,
                medium: ApprovalLevel::Standard,
                high: ApprovalLevel::Elevated,
                critical: ApprovalLevel::Mandatory,
            },
            GovernanceProfile::Strict => RiskTolerance {
                low: ApprovalLevel::Standard,
                medium: ApprovalLevel::Elevated,
                high: ApprovalLevel::Mandatory,
                critical: ApprovalLevel::Mandatory,
            },
            GovernanceProfile::Locked => RiskTolerance::uniform(ApprovalLevel::Mandatory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_by_strictness() {
        assert!(ApprovalLevel::None < ApprovalLevel::Standard);
        assert!(ApprovalLevel::Standard < ApprovalLevel::Elevated);
        assert!(ApprovalLevel::Elevated < ApprovalLevel::Mandatory);
    }

    #[test]
    fn locked_preset_is_uniformly_mandatory() {
        let t = GovernanceProfile::Locked.preset_tolerance();
        for c in RiskCategory::ALL {
            assert_eq!(t.level_for(c), ApprovalLevel::Mandatory);
        }
    }

    #[test]
    fn guarded_preset_escalates_with_category() {
        let t = GovernanceProfile::Guarded.preset_tolerance();
        assert_eq!(t.level_for(RiskCategory::Low), ApprovalLevel::None);
        assert_eq!(t.level_for(RiskCategory::Medium), ApprovalLevel::Standard);
        assert_eq!(t.level_for(RiskCategory::Critical), ApprovalLevel::Mandatory);
    }
}
