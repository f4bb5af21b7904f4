//! The policy evaluation pipeline.

use crate::condition::EvalContext;
use crate::risk::RiskAssessment;
use crate::types::{sort_for_application, Policy, PolicyEffect};
use arbiter_core::decision::{Decision, DecisionTrace};
use arbiter_core::governance::ApprovalLevel;
use guardrail::{GuardrailSpec, GuardrailStore, RateLimitEntry, RateLimitRule};
use identity::ResolvedIdentity;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

const DAY_MS: u64 = 86_400_000;

/// Engine knobs.
#[derive(Debug, Clone)]
pub struct PolicyEngineConfig {
    /// Deny when no policy matches (the safe default).
    pub default_decision_deny: bool,
    /// Broker-wide rate limit applied on top of cartridge guardrails.
    pub global_rate_limit: Option<RateLimitRule>,
}

impl Default for PolicyEngineConfig {
    fn default() -> Self {
        Self { default_decision_deny: true, global_rate_limit: None }
    }
}

/// The candidate action under evaluation.
#[derive(Debug, Clone)]
pub struct CandidateAction {
    /// Namespaced action type.
    pub action_type: String,
    /// Parameters; transforms may rewrite them during evaluation.
    pub parameters: JsonValue,
}

/// Everything one evaluation needs beyond the candidate itself.
pub struct EvaluationRequest<'a> {
    /// Resolved identity in effect.
    pub identity: &'a ResolvedIdentity,
    /// Cartridge-enriched metadata, flattened into the context.
    pub metadata: &'a serde_json::Map<String, JsonValue>,
    /// Cartridge the action targets.
    pub cartridge_id: &'a str,
    /// Cartridge-declared guardrails.
    pub guardrails: &'a GuardrailSpec,
    /// Shared guardrail state.
    pub store: &'a dyn GuardrailStore,
    /// Policies for (cartridge, org), globals included.
    pub policies: &'a [Policy],
    /// Risk assessment for the candidate.
    pub assessment: &'a RiskAssessment,
    /// Resolved external entity ids the action touches.
    pub entity_ids: &'a [String],
    /// Dollars the action puts at risk (spend-limit check).
    pub dollars_at_risk: f64,
    /// Evaluation time (ms since epoch).
    pub now_ms: u64,
}

/// Evaluation output: the trace plus the post-transform parameters.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    /// Full decision trace (decision, approval level, checks, risk).
    pub trace: DecisionTrace,
    /// Parameters after transform policies ran.
    pub parameters: JsonValue,
}

/// Deterministic, fail-closed policy engine.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    config: PolicyEngineConfig,
}

impl PolicyEngine {
    /// Build an engine with explicit knobs.
    pub fn new(config: PolicyEngineConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline for one candidate action.
    ///
    /// Rate-limit counters are written only after the final decision is
    /// allow or require-approval; a denied proposal never consumes quota.
    pub async fn evaluate(
        &self,
        action: CandidateAction,
        req: EvaluationRequest<'_>,
    ) -> EvaluationOutcome {
        let mut trace = DecisionTrace {
            checks: Vec::new(),
            risk_score: req.assessment.raw_score,
            risk_category: req.assessment.category,
            decision: Decision::Deny,
            approval_required: ApprovalLevel::None,
            explanation: String::new(),
            evaluated_at_ms: req.now_ms,
        };
        let mut parameters = action.parameters;
        let action_type = action.action_type;

        let mut applicable: Vec<Policy> = req
            .policies
            .iter()
            .filter(|p| p.applies_to(req.cartridge_id, &req.identity.organization_id))
            .cloned()
            .collect();
        sort_for_application(&mut applicable);

        let identity_fields = [
            ("principal_id", json!(req.identity.principal_id)),
            ("organization_id", json!(req.identity.organization_id)),
            ("governance_profile", json!(format!("{:?}", req.identity.governance_profile).to_lowercase())),
        ];
        let context_fields = [
            ("cartridge_id", json!(req.cartridge_id)),
            ("risk_category", json!(req.assessment.category.as_str())),
        ];
        let mut ctx = EvalContext::build(
            &action_type,
            &parameters,
            req.metadata,
            &identity_fields,
            &context_fields,
        );

        // Phase 1: policies in priority order. First terminal effect wins;
        // require_approval raises the floor; transform rewrites parameters
        // so later policies observe the new values.
        let mut terminal: Option<Decision> = None;
        let mut floor = ApprovalLevel::None;
        let mut deny_reason: Option<String> = None;
        for policy in &applicable {
            let matched = policy.rule.matches(&ctx);
            let code = format!("policy:{}", policy.id);
            let detail = policy
                .description
                .clone()
                .unwrap_or_else(|| format!("priority {} {:?}", policy.priority, policy.effect));
            if !matched {
                trace.push(code, false, detail, None);
                continue;
            }
            match policy.effect {
                PolicyEffect::Allow => {
                    trace.push(code, true, detail, Some("allow"));
                    terminal = Some(Decision::Allow);
                    break;
                }
                PolicyEffect::Deny => {
                    trace.push(code, true, detail, Some("deny"));
                    deny_reason = Some(format!("policy '{}' denies {}", policy.id, action_type));
                    terminal = Some(Decision::Deny);
                    break;
                }
                PolicyEffect::RequireApproval => {
                    let level = policy.approval_requirement.unwrap_or(ApprovalLevel::Standard);
                    floor = floor.max(level);
                    trace.push(code, true, detail, Some("require_approval"));
                }
                PolicyEffect::Transform => {
                    if let Some(JsonValue::Object(overrides)) = &policy.transform {
                        if let Some(target) = parameters.as_object_mut() {
                            for (k, v) in overrides {
                                target.insert(k.clone(), v.clone());
                            }
                        }
                        ctx = EvalContext::build(
                            &action_type,
                            &parameters,
                            req.metadata,
                            &identity_fields,
                            &context_fields,
                        );
                    }
                    trace.push(code, true, detail, Some("transform"));
                }
            }
        }

        if terminal.is_none() && self.config.default_decision_deny {
            trace.push(
                "policy:default",
                true,
                "no policy matched; the default decision is deny",
                Some("deny"),
            );
            deny_reason = Some(format!("no policy allows {}", action_type));
            terminal = Some(Decision::Deny);
        }

        let mut denied = matches!(terminal, Some(Decision::Deny));

        // Phase 2: identity checks. Forbidden behaviors trump everything,
        // including an explicit policy allow.
        if req.identity.effective_forbidden_behaviors.contains(&action_type) {
            trace.push(
                "identity:forbidden_behavior",
                true,
                format!("'{}' is on the identity's forbidden list", action_type),
                Some("deny"),
            );
            deny_reason =
                Some(format!("'{}' is forbidden for this principal", action_type));
            denied = true;
        } else {
            trace.push(
                "identity:forbidden_behavior",
                false,
                "action is not on the forbidden list",
                None,
            );
        }
        let trusted = req.identity.effective_trust_behaviors.contains(&action_type);
        trace.push(
            "identity:trust_behavior",
            trusted,
            if trusted {
                "action is trusted; approval requirement downgrades to none"
            } else {
                "action is not on the trusted list"
            },
            trusted.then_some("downgrade"),
        );

        // Phase 3: spend limits. The per-action ceiling gates this call on
        // its own; the daily ceiling accounts accumulated dollars in fixed
        // UTC-day windows through the guardrail store and, like the rate
        // limits, consumes budget only after the final decision lets the
        // action through.
        let limits = req.identity.effective_spend_limits;
        if let Some(limit) = limits.per_action_usd {
            if req.dollars_at_risk > limit {
                trace.push(
                    "spend_limit:per_action",
                    true,
                    format!("${} at risk exceeds the ${} per-action limit", req.dollars_at_risk, limit),
                    Some("deny"),
                );
                deny_reason = Some(format!(
                    "${} at risk exceeds the ${} per-action spend limit",
                    req.dollars_at_risk, limit
                ));
                denied = true;
            }
        }
        let mut pending_spend: Option<(String, RateLimitEntry)> = None;
        if let Some(limit) = limits.daily_usd {
            let window_start = req.now_ms - req.now_ms % DAY_MS;
            let key = format!("sp:{}:{}", req.cartridge_id, req.identity.principal_id);
            let spent = req
                .store
                .get_rate_limits(&[key.clone()], req.now_ms)
                .await
                .remove(&key)
                .filter(|e| e.window_start_ms == window_start)
                .map_or(0, |e| e.count);
            if f64::from(spent) + req.dollars_at_risk > limit {
                trace.push(
                    "spend_limit:daily",
                    true,
                    format!(
                        "${} already at risk today; ${} more breaks the ${} daily limit",
                        spent, req.dollars_at_risk, limit
                    ),
                    Some("deny"),
                );
                deny_reason = Some(format!(
                    "daily spend limit of ${} exhausted (${} already at risk today)",
                    limit, spent
                ));
                denied = true;
            } else {
                trace.push(
                    "spend_limit:daily",
                    false,
                    format!("${}/{} consumed in the current day", spent, limit),
                    None,
                );
                pending_spend = Some((
                    key,
                    RateLimitEntry {
                        count: spent + req.dollars_at_risk.max(0.0).ceil() as u32,
                        window_start_ms: window_start,
                    },
                ));
            }
        }

        // Phase 4: rate limits (cartridge rules + broker-wide), fixed window.
        let mut rate_rules: Vec<RateLimitRule> = req
            .guardrails
            .rate_limits
            .iter()
            .filter(|r| r.scope == action_type || r.scope == "global")
            .cloned()
            .collect();
        if let Some(global) = &self.config.global_rate_limit {
            rate_rules.push(global.clone());
        }
        let mut pending_increments: Vec<(String, RateLimitEntry, u64)> = Vec::new();
        for rule in &rate_rules {
            if rule.window_ms == 0 {
                continue;
            }
            let window_start = req.now_ms - req.now_ms % rule.window_ms;
            let key = format!("rl:{}:{}", req.cartridge_id, rule.scope);
            let current = req
                .store
                .get_rate_limits(&[key.clone()], req.now_ms)
                .await
                .remove(&key)
                .filter(|e| e.window_start_ms == window_start)
                .map_or(0, |e| e.count);
            if current >= rule.max {
                trace.push(
                    format!("rate_limit:{}", rule.scope),
                    true,
                    format!("{}/{} used in the current window", current, rule.max),
                    Some("deny"),
                );
                deny_reason = Some(format!(
                    "rate limit for '{}' exhausted ({} per {}ms)",
                    rule.scope, rule.max, rule.window_ms
                ));
                denied = true;
            } else {
                trace.push(
                    format!("rate_limit:{}", rule.scope),
                    false,
                    format!("{}/{} used in the current window", current, rule.max),
                    None,
                );
                pending_increments.push((
                    key,
                    RateLimitEntry { count: current + 1, window_start_ms: window_start },
                    rule.window_ms,
                ));
            }
        }

        // Phase 5: cooldowns per (action type, entity).
        for rule in req.guardrails.cooldowns.iter().filter(|c| c.action_type == action_type) {
            for entity in req.entity_ids {
                let key = format!("cd:{}:{}:{}", req.cartridge_id, action_type, entity);
                let last = req
                    .store
                    .get_cooldowns(&[key.clone()], req.now_ms)
                    .await
                    .remove(&key);
                match last {
                    Some(ts) if req.now_ms.saturating_sub(ts) < rule.cooldown_ms => {
                        trace.push(
                            format!("cooldown:{}", entity),
                            true,
                            format!(
                                "last execution {}ms ago, cooldown is {}ms",
                                req.now_ms.saturating_sub(ts),
                                rule.cooldown_ms
                            ),
                            Some("deny"),
                        );
                        deny_reason =
                            Some(format!("'{}' is cooling down after a recent change", entity));
                        denied = true;
                    }
                    _ => {
                        trace.push(
                            format!("cooldown:{}", entity),
                            false,
                            "no recent execution inside the cooldown window",
                            None,
                        );
                    }
                }
            }
        }

        // Phase 6: protected entities.
        let protected: Vec<&str> = req
            .entity_ids
            .iter()
            .map(String::as_str)
            .chain(ctx.string_values())
            .filter(|v| req.guardrails.protected_entities.iter().any(|p| p == v))
            .collect();
        if protected.is_empty() {
            trace.push("protected_entities", false, "no protected entity touched", None);
        } else {
            trace.push(
                "protected_entities",
                true,
                format!("touches protected entities: {}", protected.join(", ")),
                Some("deny"),
            );
            deny_reason = Some(format!("'{}' is a protected entity", protected[0]));
            denied = true;
        }

        // Final composition.
        if denied {
            trace.decision = Decision::Deny;
            trace.approval_required = ApprovalLevel::None;
            trace.explanation = deny_reason.unwrap_or_else(|| "denied by policy".into());
        } else {
            let tolerance_level =
                req.identity.effective_risk_tolerance.level_for(req.assessment.category);
            let mut required = tolerance_level.max(floor);
            if trusted {
                required = ApprovalLevel::None;
            }
            trace.approval_required = required;
            if required == ApprovalLevel::None {
                trace.decision = Decision::Allow;
                trace.explanation = format!(
                    "allowed: {} risk within tolerance",
                    req.assessment.category.as_str()
                );
            } else {
                trace.decision = Decision::RequireApproval;
                trace.explanation = format!(
                    "requires {} approval ({} risk, score {:.0})",
                    required.as_str(),
                    req.assessment.category.as_str(),
                    req.assessment.raw_score
                );
            }
            for (key, entry, ttl) in pending_increments {
                req.store.set_rate_limit(&key, entry, ttl, req.now_ms).await;
            }
            if let Some((key, entry)) = pending_spend {
                req.store.set_rate_limit(&key, entry, DAY_MS, req.now_ms).await;
            }
        }
        debug!(
            action = %action_type,
            decision = trace.decision.as_str(),
            level = trace.approval_required.as_str(),
            "policy evaluation complete"
        );
        EvaluationOutcome { trace, parameters }
    }
}
