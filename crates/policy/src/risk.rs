//! Risk scorer: cartridge-supplied risk input → numeric score and category.
//!
//! Pure and deterministic for a given configuration. Each contribution is
//! reported as a factor so the decision trace can show its arithmetic.

use arbiter_core::risk::{BaseRisk, Reversibility, RiskCategory, RiskInput};
use serde::{Deserialize, Serialize};

/// Weight configuration. Defaults produce the broker's seed behavior:
/// a bare `high` base risk lands at 56, inside the medium band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskWeights {
    /// Points for a `low` base risk.
    pub base_low: f64,
    /// Points for a `medium` base risk.
    pub base_medium: f64,
    /// Points for a `high` base risk.
    pub base_high: f64,
    /// Points for a `critical` base risk.
    pub base_critical: f64,
    /// Dollars at risk per point contributed.
    pub dollars_per_point: f64,
    /// Cap on the dollar contribution.
    pub dollars_cap: f64,
    /// Points per entity in the blast radius.
    pub per_entity: f64,
    /// Cap on the blast-radius contribution.
    pub blast_cap: f64,
    /// Points for partial reversibility.
    pub partial_reversibility: f64,
    /// Points for no reversibility.
    pub no_reversibility: f64,
    /// Points per set sensitivity flag (volatile, learning, recent).
    pub volatile_entity: f64,
    /// Points when the target is in a learning phase.
    pub learning_phase: f64,
    /// Points when the target was recently modified.
    pub recently_modified: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            base_low: 8.0,
            base_medium: 30.0,
            base_high: 56.0,
            base_critical: 80.0,
            dollars_per_point: 50.0,
            dollars_cap: 25.0,
            per_entity: 2.0,
            blast_cap: 10.0,
            partial_reversibility: 8.0,
            no_reversibility: 15.0,
            volatile_entity: 5.0,
            learning_phase: 4.0,
            recently_modified: 3.0,
        }
    }
}

/// Category boundaries: a fixed monotone cut over the raw score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Scores below this are low.
    pub low_below: f64,
    /// Scores below this (and not low) are medium.
    pub medium_below: f64,
    /// Scores below this (and not medium) are high; the rest are critical.
    pub high_below: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self { low_below: 20.0, medium_below: 60.0, high_below: 85.0 }
    }
}

/// One score contribution, kept for the decision trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Factor code, e.g. `base_risk` or `dollars_at_risk`.
    pub code: String,
    /// Points contributed.
    pub points: f64,
    /// Human-readable arithmetic.
    pub detail: String,
}

/// Scoring outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Raw score clamped to [0, 100].
    pub raw_score: f64,
    /// Category from the monotone cut.
    pub category: RiskCategory,
    /// Contributions in evaluation order.
    pub factors: Vec<RiskFactor>,
}

/// Score one risk input.
pub fn score(input: &RiskInput, weights: &RiskWeights, thresholds: &RiskThresholds) -> RiskAssessment {
    let mut factors = Vec::new();
    let mut total = 0.0;

    let base = match input.base_risk {
        BaseRisk::None => 0.0,
        BaseRisk::Low => weights.base_low,
        BaseRisk::Medium => weights.base_medium,
        BaseRisk::High => weights.base_high,
        BaseRisk::Critical => weights.base_critical,
    };
    total += base;
    factors.push(RiskFactor {
        code: "base_risk".into(),
        points: base,
        detail: format!("base risk {:?} contributes {}", input.base_risk, base),
    });

    let dollars = (input.exposure.dollars_at_risk / weights.dollars_per_point)
        .clamp(0.0, weights.dollars_cap);
    total += dollars;
    factors.push(RiskFactor {
        code: "dollars_at_risk".into(),
        points: dollars,
        detail: format!("${} at risk contributes {:.1}", input.exposure.dollars_at_risk, dollars),
    });

    let blast = (f64::from(input.exposure.blast_radius) * weights.per_entity)
        .clamp(0.0, weights.blast_cap);
    total += blast;
    factors.push(RiskFactor {
        code: "blast_radius".into(),
        points: blast,
        detail: format!("{} entities contribute {:.1}", input.exposure.blast_radius, blast),
    });

    let reversibility = match input.reversibility {
        Reversibility::Full => 0.0,
        Reversibility::Partial => weights.partial_reversibility,
        Reversibility::None => weights.no_reversibility,
    };
    total += reversibility;
    factors.push(RiskFactor {
        code: "reversibility".into(),
        points: reversibility,
        detail: format!("reversibility {:?} contributes {}", input.reversibility, reversibility),
    });

    let mut sensitivity = 0.0;
    if input.sensitivity.entity_volatile {
        sensitivity += weights.volatile_entity;
    }
    if input.sensitivity.learning_phase {
        sensitivity += weights.learning_phase;
    }
    if input.sensitivity.recently_modified {
        sensitivity += weights.recently_modified;
    }
    total += sensitivity;
    factors.push(RiskFactor {
        code: "sensitivity".into(),
        points: sensitivity,
        detail: format!("sensitivity flags contribute {}", sensitivity),
    });

    let raw_score = total.clamp(0.0, 100.0);
    let category = if raw_score < thresholds.low_below {
        RiskCategory::Low
    } else if raw_score < thresholds.medium_below {
        RiskCategory::Medium
    } else if raw_score < thresholds.high_below {
        RiskCategory::High
    } else {
        RiskCategory::Critical
    };

    RiskAssessment { raw_score, category, factors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_core::risk::{Exposure, Sensitivity};

    fn input(base: BaseRisk) -> RiskInput {
        RiskInput {
            base_risk: base,
            exposure: Exposure::default(),
            reversibility: Reversibility::Full,
            sensitivity: Sensitivity::default(),
        }
    }

    #[test]
    fn low_base_small_exposure_scores_low() {
        let mut i = input(BaseRisk::Low);
        i.exposure = Exposure { dollars_at_risk: 10.0, blast_radius: 1 };
        let a = score(&i, &RiskWeights::default(), &RiskThresholds::default());
        assert!(a.raw_score < 20.0, "score {}", a.raw_score);
        assert_eq!(a.category, RiskCategory::Low);
    }

    #[test]
    fn bare_high_base_lands_medium_at_56() {
        let a = score(&input(BaseRisk::High), &RiskWeights::default(), &RiskThresholds::default());
        assert!((a.raw_score - 56.0).abs() < 1e-9);
        assert_eq!(a.category, RiskCategory::Medium);
    }

    #[test]
    fn critical_base_with_irreversibility_is_critical() {
        let mut i = input(BaseRisk::Critical);
        i.reversibility = Reversibility::None;
        let a = score(&i, &RiskWeights::default(), &RiskThresholds::default());
        assert_eq!(a.category, RiskCategory::Critical);
    }

    #[test]
    fn score_is_clamped_and_deterministic() {
        let mut i = input(BaseRisk::Critical);
        i.exposure = Exposure { dollars_at_risk: 1e9, blast_radius: 10_000 };
        i.reversibility = Reversibility::None;
        i.sensitivity =
            Sensitivity { entity_volatile: true, learning_phase: true, recently_modified: true };
        let a = score(&i, &RiskWeights::default(), &RiskThresholds::default());
        let b = score(&i, &RiskWeights::default(), &RiskThresholds::default());
        assert!(a.raw_score <= 100.0);
        assert_eq!(a.raw_score, b.raw_score);
    }

    #[test]
    fn factors_sum_to_raw_score() {
        let mut i = input(BaseRisk::Medium);
        i.exposure = Exposure { dollars_at_risk: 500.0, blast_radius: 3 };
        let a = score(&i, &RiskWeights::default(), &RiskThresholds::default());
        let sum: f64 = a.factors.iter().map(|f| f.points).sum();
        assert!((sum - a.raw_score).abs() < 1e-9);
    }
}
