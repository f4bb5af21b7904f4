//! Per-(principal, action-type) competence ledger.
//!
//! Successes, failures, and rollbacks mutate the stored record; decay is
//! applied lazily at read time and never persisted, so two consecutive reads
//! without events observe the same stored record.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};

const MS_PER_DAY: u64 = 86_400_000;

/// Scoring knobs. Defaults match the broker's seed configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompetenceConfig {
    /// Points added per success.
    pub success_points: f64,
    /// Extra points per consecutive success step.
    pub bonus_per_step: f64,
    /// Cap on the consecutive-success bonus.
    pub bonus_cap: f64,
    /// Points removed per failure.
    pub failure_points: f64,
    /// Points removed per rollback.
    pub rollback_points: f64,
    /// Lower score bound.
    pub floor: f64,
    /// Upper score bound.
    pub ceiling: f64,
    /// Score a fresh record starts at.
    pub initial_score: f64,
    /// Score required for promotion.
    pub promotion_score: f64,
    /// Successes required for promotion.
    pub promotion_min_successes: u64,
    /// Score below which demotion triggers.
    pub demotion_score: f64,
    /// Read-time decay per idle day.
    pub decay_per_day: f64,
}

impl Default for CompetenceConfig {
    fn default() -> Self {
        Self {
            success_points: 2.0,
            bonus_per_step: 0.5,
            bonus_cap: 5.0,
            failure_points: 10.0,
            rollback_points: 15.0,
            floor: 0.0,
            ceiling: 100.0,
            initial_score: 50.0,
            promotion_score: 80.0,
            promotion_min_successes: 10,
            demotion_score: 30.0,
            decay_per_day: 2.0,
        }
    }
}

/// Kind of event appended to a record's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetenceEventKind {
    /// An execution succeeded.
    Success,
    /// An execution failed terminally.
    Failure,
    /// An executed action was rolled back.
    Rollback,
    /// The record crossed the promotion threshold.
    Promotion,
    /// The record fell below the demotion threshold.
    Demotion,
}

/// One history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetenceEvent {
    /// Event kind.
    pub kind: CompetenceEventKind,
    /// Event time (ms since epoch).
    pub at_ms: u64,
    /// Stored score after the event.
    pub score_after: f64,
}

/// Stored reliability record for one (principal, action type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetenceRecord {
    /// Principal the record tracks.
    pub principal_id: String,
    /// Action type the record tracks.
    pub action_type: String,
    /// Lifetime successes.
    pub success_count: u64,
    /// Lifetime failures.
    pub failure_count: u64,
    /// Lifetime rollbacks.
    pub rollback_count: u64,
    /// Current unbroken success streak.
    pub consecutive_successes: u64,
    /// Stored score in [floor, ceiling]. Decay applies only at read.
    pub score: f64,
    /// Last event time.
    pub last_activity_at_ms: u64,
    /// Baseline for read-time decay.
    pub last_decay_applied_at_ms: u64,
    /// Event history, oldest first.
    pub history: Vec<CompetenceEvent>,
}

impl CompetenceRecord {
    /// A fresh record seeded at the configured initial score.
    pub fn new(
        principal_id: impl Into<String>,
        action_type: impl Into<String>,
        config: &CompetenceConfig,
        now_ms: u64,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            action_type: action_type.into(),
            success_count: 0,
            failure_count: 0,
            rollback_count: 0,
            consecutive_successes: 0,
            score: config.initial_score,
            last_activity_at_ms: now_ms,
            last_decay_applied_at_ms: now_ms,
            history: Vec::new(),
        }
    }
}

/// Threshold crossing emitted by a mutation; the caller audits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompetenceSignal {
    /// Crossed the promotion threshold upward.
    Promoted,
    /// Fell below the demotion threshold.
    Demoted,
}

/// Read-time view with decay applied (never persisted).
#[derive(Debug, Clone, Copy)]
pub struct CompetenceView {
    /// Score after lazy decay.
    pub effective_score: f64,
    /// Whether the principal has earned auto-trust for the action.
    pub should_trust: bool,
    /// Whether the record sits below the demotion threshold.
    pub below_demotion: bool,
}

/// Pure scoring engine over competence records.
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    config: CompetenceConfig,
}

impl Tracker {
    /// Build a tracker with explicit knobs.
    pub fn new(config: CompetenceConfig) -> Self {
        Self { config }
    }

    /// The configured knobs.
    pub fn config(&self) -> &CompetenceConfig {
        &self.config
    }

    /// Record a success; returns a promotion signal on upward crossing.
    pub fn record_success(
        &self,
        rec: &mut CompetenceRecord,
        now_ms: u64,
    ) -> Option<CompetenceSignal> {
        let cfg = &self.config;
        let was_promoted = self.qualifies_for_promotion(rec);
        rec.success_count += 1;
        rec.consecutive_successes += 1;
        let bonus = (rec.consecutive_successes as f64 * cfg.bonus_per_step).min(cfg.bonus_cap);
        rec.score = (rec.score + cfg.success_points + bonus).min(cfg.ceiling);
        self.touch(rec, CompetenceEventKind::Success, now_ms);
        if !was_promoted && self.qualifies_for_promotion(rec) {
            rec.history.push(CompetenceEvent {
                kind: CompetenceEventKind::Promotion,
                at_ms: now_ms,
                score_after: rec.score,
            });
            return Some(CompetenceSignal::Promoted);
        }
        None
    }

    /// Record a terminal failure; returns a demotion signal on downward crossing.
    pub fn record_failure(
        &self,
        rec: &mut CompetenceRecord,
        now_ms: u64,
    ) -> Option<CompetenceSignal> {
        rec.failure_count += 1;
        self.penalize(rec, self.config.failure_points, CompetenceEventKind::Failure, now_ms)
    }

    /// Record a rollback of a previously-executed action.
    pub fn record_rollback(
        &self,
        rec: &mut CompetenceRecord,
        now_ms: u64,
    ) -> Option<CompetenceSignal> {
        rec.rollback_count += 1;
        self.penalize(rec, self.config.rollback_points, CompetenceEventKind::Rollback, now_ms)
    }

    fn penalize(
        &self,
        rec: &mut CompetenceRecord,
        points: f64,
        kind: CompetenceEventKind,
        now_ms: u64,
    ) -> Option<CompetenceSignal> {
        let was_below = rec.score < self.config.demotion_score;
        rec.consecutive_successes = 0;
        rec.score = (rec.score - points).max(self.config.floor);
        self.touch(rec, kind, now_ms);
        if !was_below && rec.score < self.config.demotion_score {
            rec.history.push(CompetenceEvent {
                kind: CompetenceEventKind::Demotion,
                at_ms: now_ms,
                score_after: rec.score,
            });
            return Some(CompetenceSignal::Demoted);
        }
        None
    }

    fn touch(&self, rec: &mut CompetenceRecord, kind: CompetenceEventKind, now_ms: u64) {
        rec.last_activity_at_ms = now_ms;
        rec.last_decay_applied_at_ms = now_ms;
        rec.history.push(CompetenceEvent { kind, at_ms: now_ms, score_after: rec.score });
    }

    /// Read-time adjustment with lazy decay. The record is not mutated.
    pub fn view(&self, rec: &CompetenceRecord, now_ms: u64) -> CompetenceView {
        let cfg = &self.config;
        let idle_days = now_ms.saturating_sub(rec.last_decay_applied_at_ms) / MS_PER_DAY;
        let effective_score =
            (rec.score - idle_days as f64 * cfg.decay_per_day).max(cfg.floor);
        CompetenceView {
            effective_score,
            should_trust: effective_score >= cfg.promotion_score
                && rec.success_count >= cfg.promotion_min_successes,
            below_demotion: effective_score < cfg.demotion_score,
        }
    }

    fn qualifies_for_promotion(&self, rec: &CompetenceRecord) -> bool {
        rec.score >= self.config.promotion_score
            && rec.success_count >= self.config.promotion_min_successes
    }
}
