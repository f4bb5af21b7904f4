//! Role overlays: conditional modifiers on top of a base identity spec.

use crate::spec::{SpendLimits, ToleranceOverride};
use arbiter_core::risk::RiskCategory;
use chrono::{DateTime, FixedOffset, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Whether an overlay tightens or loosens the base identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayMode {
    /// Takes the more restrictive of each field.
    Restrict,
    /// Takes the more permissive of each field.
    Extend,
}

/// Recurring activation window: listed weekdays, [start_hour, end_hour) in
/// the overlay's fixed-offset timezone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Active weekdays.
    pub days: Vec<Weekday>,
    /// Inclusive start hour (0-23).
    pub start_hour: u32,
    /// Exclusive end hour (1-24).
    pub end_hour: u32,
    /// Timezone as minutes east of UTC.
    pub utc_offset_minutes: i32,
}

impl TimeWindow {
    /// Whether `now_ms` falls inside the window.
    pub fn contains(&self, now_ms: u64) -> bool {
        let Some(offset) = FixedOffset::east_opt(self.utc_offset_minutes * 60) else {
            return false;
        };
        let Some(utc) = DateTime::<Utc>::from_timestamp_millis(now_ms as i64) else {
            return false;
        };
        let local = utc.with_timezone(&offset);
        let weekday = chrono::Datelike::weekday(&local);
        self.days.contains(&weekday)
            && local.hour() >= self.start_hour
            && local.hour() < self.end_hour
    }
}

/// Conditions gating an overlay; all present conditions must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OverlayConditions {
    /// Only active for these cartridges.
    pub cartridge_ids: Option<Vec<String>>,
    /// Only active for these risk categories.
    pub risk_categories: Option<Vec<RiskCategory>>,
    /// Only active inside this recurring window.
    pub time_window: Option<TimeWindow>,
}

/// Field overrides an active overlay contributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OverlayOverrides {
    /// Per-category tolerance overrides, merged per the overlay mode.
    pub risk_tolerance: ToleranceOverride,
    /// Spend ceilings, merged per the overlay mode.
    pub spend_limits: Option<SpendLimits>,
    /// Behaviors added to the forbidden set (restrict mode).
    pub add_forbidden_behaviors: Vec<String>,
    /// Behaviors added to the trust set (extend mode).
    pub add_trust_behaviors: Vec<String>,
    /// Behaviors removed from the trust set (either mode).
    pub remove_trust_behaviors: Vec<String>,
}

/// A conditional modifier applied on top of the base identity spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleOverlay {
    /// Overlay id.
    pub id: String,
    /// Tighten or loosen.
    pub mode: OverlayMode,
    /// Ascending application order; lower applies first.
    pub priority: i32,
    /// Inactive overlays never apply.
    pub active: bool,
    /// Activation conditions; all present conditions must hold.
    pub conditions: OverlayConditions,
    /// Field overrides.
    pub overrides: OverlayOverrides,
}

impl RoleOverlay {
    /// Whether this overlay activates for the given request context.
    pub fn activates(
        &self,
        cartridge_id: Option<&str>,
        risk_category: Option<RiskCategory>,
        now_ms: u64,
    ) -> bool {
        if !self.active {
            return false;
        }
        if let Some(ids) = &self.conditions.cartridge_ids {
            match cartridge_id {
                Some(c) if ids.iter().any(|i| i == c) => {}
                _ => return false,
            }
        }
        if let Some(cats) = &self.conditions.risk_categories {
            match risk_category {
                Some(c) if cats.contains(&c) => {}
                _ => return false,
            }
        }
        if let Some(window) = &self.conditions.time_window {
            if !window.contains(now_ms) {
                return false;
            }
        }
        true
    }
}
