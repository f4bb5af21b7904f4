//! Risk vocabulary: categories, cartridge-supplied risk inputs.

use serde::{Deserialize, Serialize};

/// Scored risk category; the monotone cut over the raw score. The boundary
/// values are scorer configuration (`RiskThresholds`), not fixed here; the
/// defaults cut at 20 / 60 / 85.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    /// Raw score below the low/medium boundary (default: below 20).
    Low,
    /// Raw score between the low/medium and medium/high boundaries
    /// (default: [20, 60)).
    Medium,
    /// Raw score between the medium/high and high/critical boundaries
    /// (default: [60, 85)).
    High,
    /// Raw score at or above the high/critical boundary (default: 85+).
    Critical,
}

impl RiskCategory {
    /// All categories in ascending order.
    pub const ALL: [RiskCategory; 4] =
        [RiskCategory::Low, RiskCategory::Medium, RiskCategory::High, RiskCategory::Critical];

    /// Stable wire label used in audit entries and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            RiskCategory::Low => "low",
            RiskCategory::Medium => "medium",
            RiskCategory::High => "high",
            RiskCategory::Critical => "critical",
        }
    }
}

/// Cartridge-declared inherent risk of an action type, before exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaseRisk {
    /// No inherent risk (read-adjacent mutations).
    #[default]
    None,
    /// Minor, easily corrected.
    Low,
    /// Noticeable external effect.
    Medium,
    /// Significant external effect.
    High,
    /// Severe or irreversible external effect.
    Critical,
}

/// Whether an executed action can be reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Reversibility {
    /// A full undo recipe exists.
    Full,
    /// Partially reversible.
    #[default]
    Partial,
    /// Cannot be undone.
    None,
}

/// Financial and blast-radius exposure of an action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Exposure {
    /// Dollars put at risk by executing the action.
    pub dollars_at_risk: f64,
    /// Count of entities the action touches.
    pub blast_radius: u32,
}

/// Situational sensitivity flags supplied by the cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Sensitivity {
    /// The target entity is in a volatile state.
    pub entity_volatile: bool,
    /// The target is still in a learning/ramp-up phase.
    pub learning_phase: bool,
    /// The target was modified recently by another actor.
    pub recently_modified: bool,
}

/// Full risk input a cartridge supplies for one candidate action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskInput {
    /// Inherent risk of the action type.
    pub base_risk: BaseRisk,
    /// Financial/blast-radius exposure.
    pub exposure: Exposure,
    /// Reversibility of the action.
    pub reversibility: Reversibility,
    /// Situational sensitivity flags.
    pub sensitivity: Sensitivity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_order() {
        assert!(RiskCategory::Low < RiskCategory::Critical);
        assert_eq!(RiskCategory::ALL.len(), 4);
    }

    #[test]
    fn wire_labels_are_snake_case() {
        let s = serde_json::to_string(&RiskCategory::Medium).unwrap();
        assert_eq!(s, "\"medium\"");
        let b = serde_json::to_string(&BaseRisk::None).unwrap();
        assert_eq!(b, "\"none\"");
    }
}
