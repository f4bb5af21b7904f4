//! Effective-identity resolution.

use crate::overlay::{OverlayMode, RoleOverlay};
use crate::spec::{IdentitySpec, SpendLimits};
use arbiter_core::governance::{GovernanceProfile, RiskTolerance};
use arbiter_core::risk::RiskCategory;
use std::collections::BTreeSet;

/// Request context the resolver evaluates overlay conditions against.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// Cartridge the candidate action targets.
    pub cartridge_id: Option<String>,
    /// Risk category of the candidate action, when already scored.
    pub risk_category: Option<RiskCategory>,
    /// Evaluation time (ms since epoch).
    pub now_ms: u64,
}

/// Per-action trust adjustment derived from the competence tracker.
#[derive(Debug, Clone)]
pub struct CompetenceAdjustment {
    /// Action type the adjustment concerns.
    pub action_type: String,
    /// Whether the principal has earned auto-trust for it.
    pub should_trust: bool,
}

/// The composed identity a single evaluation runs against.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    /// Principal the identity belongs to.
    pub principal_id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Profile the tolerance was seeded from.
    pub governance_profile: GovernanceProfile,
    /// Effective per-category approval requirements.
    pub effective_risk_tolerance: RiskTolerance,
    /// Effective spend ceilings (global composed with per-cartridge).
    pub effective_spend_limits: SpendLimits,
    /// Effective forbidden action types.
    pub effective_forbidden_behaviors: BTreeSet<String>,
    /// Effective trusted action types.
    pub effective_trust_behaviors: BTreeSet<String>,
    /// Approvers in routing order.
    pub delegated_approvers: Vec<String>,
    /// Ids of the overlays that applied, in application order.
    pub active_overlays: Vec<String>,
}

/// Compose profile preset, base spec, and active overlays into the identity
/// in effect for one evaluation. Pure; overlays never mutate the spec.
pub fn resolve_identity(
    spec: &IdentitySpec,
    overlays: &[RoleOverlay],
    ctx: &ResolveContext,
) -> ResolvedIdentity {
    let profile = spec.governance_profile.unwrap_or(GovernanceProfile::Guarded);

    // Seed: preset, then base-spec per-category overrides.
    let mut tolerance = profile.preset_tolerance();
    spec.risk_tolerance.apply(&mut tolerance);

    // Base spend: global restricted by the target cartridge's own limits.
    let mut spend = spec.global_spend_limits;
    if let Some(cartridge_id) = &ctx.cartridge_id {
        if let Some(limits) = spec.cartridge_spend_limits.get(cartridge_id) {
            spend = spend.restrict(*limits);
        }
    }

    let mut forbidden: BTreeSet<String> = spec.forbidden_behaviors.iter().cloned().collect();
    let mut trust: BTreeSet<String> = spec.trust_behaviors.iter().cloned().collect();

    // Overlays in ascending priority; ties broken by id for determinism.
    let mut applicable: Vec<&RoleOverlay> = overlays
        .iter()
        .filter(|o| o.activates(ctx.cartridge_id.as_deref(), ctx.risk_category, ctx.now_ms))
        .collect();
    applicable.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

    let mut active_overlays = Vec::with_capacity(applicable.len());
    for overlay in applicable {
        active_overlays.push(overlay.id.clone());
        let ov = &overlay.overrides;
        match overlay.mode {
            OverlayMode::Restrict => {
                for c in RiskCategory::ALL {
                    if let Some(level) = ov.risk_tolerance.level_for(c) {
                        let current = tolerance.level_for(c);
                        tolerance.set_level(c, current.max(level));
                    }
                }
                if let Some(limits) = ov.spend_limits {
                    spend = spend.restrict(limits);
                }
                forbidden.extend(ov.add_forbidden_behaviors.iter().cloned());
                for b in &ov.remove_trust_behaviors {
                    trust.remove(b);
                }
            }
            OverlayMode::Extend => {
                for c in RiskCategory::ALL {
                    if let Some(level) = ov.risk_tolerance.level_for(c) {
                        let current = tolerance.level_for(c);
                        tolerance.set_level(c, current.min(level));
                    }
                }
                if let Some(limits) = ov.spend_limits {
                    spend = spend.extend(limits);
                }
                trust.extend(ov.add_trust_behaviors.iter().cloned());
                for b in &ov.remove_trust_behaviors {
                    trust.remove(b);
                }
            }
        }
    }

    ResolvedIdentity {
        principal_id: spec.principal_id.clone(),
        organization_id: spec.organization_id.clone(),
        governance_profile: profile,
        effective_risk_tolerance: tolerance,
        effective_spend_limits: spend,
        effective_forbidden_behaviors: forbidden,
        effective_trust_behaviors: trust,
        delegated_approvers: spec.delegated_approvers.clone(),
        active_overlays,
    }
}

impl ResolvedIdentity {
    /// Fold competence-earned trust into the identity. A trusted action is
    /// added only when it is neither forbidden nor already trusted.
    pub fn apply_competence_adjustments(&mut self, adjustments: &[CompetenceAdjustment]) {
        for adj in adjustments {
            if adj.should_trust
                && !self.effective_forbidden_behaviors.contains(&adj.action_type)
                && !self.effective_trust_behaviors.contains(&adj.action_type)
            {
                self.effective_trust_behaviors.insert(adj.action_type.clone());
            }
        }
    }
}
