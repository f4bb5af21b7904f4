use arbiter_core::decision::Decision;
use arbiter_core::governance::ApprovalLevel;
use arbiter_core::risk::{BaseRisk, Exposure, Reversibility, RiskInput, Sensitivity};
use guardrail::{CooldownRule, GuardrailSpec, GuardrailStore, InMemoryGuardrailStore, RateLimitRule};
use identity::{resolve_identity, IdentitySpec, ResolveContext, ResolvedIdentity};
use policy::risk::{score, RiskAssessment, RiskThresholds, RiskWeights};
use policy::{
    CandidateAction, Composition, EvaluationRequest, Operator, Policy, PolicyEffect, PolicyEngine,
    Rule,
};
use serde_json::{json, Value as JsonValue};

fn leaf(field: &str, operator: Operator, value: JsonValue) -> Rule {
    Rule::Leaf { field: field.into(), operator, value }
}

fn policy(id: &str, priority: i32, rule: Rule, effect: PolicyEffect) -> Policy {
    Policy {
        id: id.into(),
        priority,
        active: true,
        cartridge_id: None,
        organization_id: None,
        rule,
        effect,
        approval_requirement: None,
        transform: None,
        description: None,
    }
}

fn allow_ads(priority: i32) -> Policy {
    policy(
        "allow-ads",
        priority,
        leaf("action_type", Operator::Prefix, json!("ads.")),
        PolicyEffect::Allow,
    )
}

fn base_identity() -> ResolvedIdentity {
    resolve_identity(
        &IdentitySpec::guarded("spec-t", "agent-t", "org-t"),
        &[],
        &ResolveContext::default(),
    )
}

fn low_assessment() -> RiskAssessment {
    score(
        &RiskInput {
            base_risk: BaseRisk::Low,
            exposure: Exposure { dollars_at_risk: 10.0, blast_radius: 1 },
            reversibility: Reversibility::Full,
            sensitivity: Sensitivity::default(),
        },
        &RiskWeights::default(),
        &RiskThresholds::default(),
    )
}

struct Fixture {
    engine: PolicyEngine,
    store: InMemoryGuardrailStore,
    identity: ResolvedIdentity,
    guardrails: GuardrailSpec,
    assessment: RiskAssessment,
    metadata: serde_json::Map<String, JsonValue>,
    entity_ids: Vec<String>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            engine: PolicyEngine::default(),
            store: InMemoryGuardrailStore::new(),
            identity: base_identity(),
            guardrails: GuardrailSpec::default(),
            assessment: low_assessment(),
            metadata: serde_json::Map::new(),
            entity_ids: vec!["camp_123".into()],
        }
    }

    async fn eval(&self, policies: &[Policy], now_ms: u64) -> policy::EvaluationOutcome {
        self.engine
            .evaluate(
                CandidateAction {
                    action_type: "ads.campaign.pause".into(),
                    parameters: json!({"campaignId": "camp_123"}),
                },
                EvaluationRequest {
                    identity: &self.identity,
                    metadata: &self.metadata,
                    cartridge_id: "ads-spend",
                    guardrails: &self.guardrails,
                    store: &self.store,
                    policies,
                    assessment: &self.assessment,
                    entity_ids: &self.entity_ids,
                    dollars_at_risk: 10.0,
                    now_ms,
                },
            )
            .await
    }
}

#[tokio::test]
async fn no_matching_policy_defaults_to_deny() {
    let fx = Fixture::new();
    let out = fx.eval(&[], 1_000).await;
    assert_eq!(out.trace.decision, Decision::Deny);
    assert!(out.trace.explanation.contains("no policy allows"));
}

#[tokio::test]
async fn first_terminal_effect_wins_in_priority_order() {
    let fx = Fixture::new();
    let policies = vec![
        policy(
            "deny-late",
            20,
            leaf("action_type", Operator::Prefix, json!("ads.")),
            PolicyEffect::Deny,
        ),
        allow_ads(10),
    ];
    let out = fx.eval(&policies, 1_000).await;
    assert_eq!(out.trace.decision, Decision::Allow);
    // The deny at priority 20 was never reached.
    assert!(!out.trace.checks.iter().any(|c| c.code == "policy:deny-late"));
}

#[tokio::test]
async fn priority_ties_break_by_id() {
    let fx = Fixture::new();
    let policies = vec![
        policy(
            "b-deny",
            10,
            leaf("action_type", Operator::Prefix, json!("ads.")),
            PolicyEffect::Deny,
        ),
        policy(
            "a-allow",
            10,
            leaf("action_type", Operator::Prefix, json!("ads.")),
            PolicyEffect::Allow,
        ),
    ];
    let out = fx.eval(&policies, 1_000).await;
    assert_eq!(out.trace.decision, Decision::Allow);
}

#[tokio::test]
async fn require_approval_raises_floor_and_continues() {
    let fx = Fixture::new();
    let mut gate = policy(
        "gate-ads",
        5,
        leaf("action_type", Operator::Prefix, json!("ads.")),
        PolicyEffect::RequireApproval,
    );
    gate.approval_requirement = Some(ApprovalLevel::Elevated);
    let policies = vec![gate, allow_ads(10)];
    let out = fx.eval(&policies, 1_000).await;
    // Low risk tolerates none, but the policy floor holds.
    assert_eq!(out.trace.decision, Decision::RequireApproval);
    assert_eq!(out.trace.approval_required, ApprovalLevel::Elevated);
}

#[tokio::test]
async fn transform_rewrites_parameters_for_later_policies() {
    let fx = Fixture::new();
    let mut clamp = policy(
        "clamp-limit",
        5,
        leaf("action_type", Operator::Prefix, json!("ads.")),
        PolicyEffect::Transform,
    );
    clamp.transform = Some(json!({"limit": 100}));
    let policies = vec![
        clamp,
        // This allow only matches the transformed parameters.
        policy(
            "allow-clamped",
            10,
            Rule::Composite {
                composition: Composition::And,
                children: vec![
                    leaf("action_type", Operator::Prefix, json!("ads.")),
                    leaf("parameters.limit", Operator::Eq, json!(100)),
                ],
            },
            PolicyEffect::Allow,
        ),
    ];
    let out = fx.eval(&policies, 1_000).await;
    assert_eq!(out.trace.decision, Decision::Allow);
    assert_eq!(out.parameters["limit"], json!(100));
    assert_eq!(out.parameters["campaignId"], json!("camp_123"));
}

#[tokio::test]
async fn forbidden_behavior_overrides_policy_allow() {
    let mut fx = Fixture::new();
    let mut spec = IdentitySpec::guarded("spec-t", "agent-t", "org-t");
    spec.forbidden_behaviors = vec!["ads.campaign.pause".into()];
    fx.identity = resolve_identity(&spec, &[], &ResolveContext::default());
    let out = fx.eval(&[allow_ads(10)], 1_000).await;
    assert_eq!(out.trace.decision, Decision::Deny);
    assert!(out.trace.explanation.contains("forbidden"));
}

#[tokio::test]
async fn trust_behavior_downgrades_required_approval() {
    let mut fx = Fixture::new();
    let mut spec = IdentitySpec::guarded("spec-t", "agent-t", "org-t");
    spec.trust_behaviors = vec!["ads.campaign.pause".into()];
    fx.identity = resolve_identity(&spec, &[], &ResolveContext::default());
    let mut gate = policy(
        "gate-ads",
        5,
        leaf("action_type", Operator::Prefix, json!("ads.")),
        PolicyEffect::RequireApproval,
    );
    gate.approval_requirement = Some(ApprovalLevel::Mandatory);
    let out = fx.eval(&[gate, allow_ads(10)], 1_000).await;
    assert_eq!(out.trace.decision, Decision::Allow);
    assert_eq!(out.trace.approval_required, ApprovalLevel::None);
}

#[tokio::test]
async fn rate_limit_denies_after_exhaustion_and_denies_consume_nothing() {
    let mut fx = Fixture::new();
    fx.guardrails.rate_limits = vec![RateLimitRule {
        scope: "ads.campaign.pause".into(),
        max: 2,
        window_ms: 60_000,
    }];
    let policies = vec![allow_ads(10)];
    assert_eq!(fx.eval(&policies, 1_000).await.trace.decision, Decision::Allow);
    assert_eq!(fx.eval(&policies, 2_000).await.trace.decision, Decision::Allow);
    let third = fx.eval(&policies, 3_000).await;
    assert_eq!(third.trace.decision, Decision::Deny);
    assert!(third.trace.explanation.contains("rate limit"));
    // The denied attempt consumed nothing: a fresh window admits again.
    let next_window = fx.eval(&policies, 61_000).await;
    assert_eq!(next_window.trace.decision, Decision::Allow);
}

#[tokio::test]
async fn cooldown_blocks_recent_entities() {
    let mut fx = Fixture::new();
    fx.guardrails.cooldowns =
        vec![CooldownRule { action_type: "ads.campaign.pause".into(), cooldown_ms: 30_000 }];
    fx.store
        .set_cooldown("cd:ads-spend:ads.campaign.pause:camp_123", 10_000, 30_000, 10_000)
        .await;
    let blocked = fx.eval(&[allow_ads(10)], 20_000).await;
    assert_eq!(blocked.trace.decision, Decision::Deny);
    assert!(blocked.trace.explanation.contains("cooling down"));
    let after = fx.eval(&[allow_ads(10)], 45_000).await;
    assert_eq!(after.trace.decision, Decision::Allow);
}

#[tokio::test]
async fn protected_entities_deny() {
    let mut fx = Fixture::new();
    fx.guardrails.protected_entities = vec!["camp_123".into()];
    let out = fx.eval(&[allow_ads(10)], 1_000).await;
    assert_eq!(out.trace.decision, Decision::Deny);
    assert!(out.trace.explanation.contains("protected"));
}

#[tokio::test]
async fn spend_limit_denies_oversized_actions() {
    let mut fx = Fixture::new();
    let mut spec = IdentitySpec::guarded("spec-t", "agent-t", "org-t");
    spec.global_spend_limits =
        identity::SpendLimits { per_action_usd: Some(5.0), daily_usd: None };
    fx.identity = resolve_identity(&spec, &[], &ResolveContext::default());
    let out = fx.eval(&[allow_ads(10)], 1_000).await;
    assert_eq!(out.trace.decision, Decision::Deny);
    assert!(out.trace.explanation.contains("spend limit"));
}

#[tokio::test]
async fn daily_spend_limit_accumulates_across_calls() {
    let mut fx = Fixture::new();
    let mut spec = IdentitySpec::guarded("spec-t", "agent-t", "org-t");
    spec.global_spend_limits =
        identity::SpendLimits { per_action_usd: None, daily_usd: Some(25.0) };
    fx.identity = resolve_identity(&spec, &[], &ResolveContext::default());
    let policies = vec![allow_ads(10)];
    // Each call puts $10 at risk; the third would break the $25 ceiling.
    assert_eq!(fx.eval(&policies, 1_000).await.trace.decision, Decision::Allow);
    assert_eq!(fx.eval(&policies, 2_000).await.trace.decision, Decision::Allow);
    let third = fx.eval(&policies, 3_000).await;
    assert_eq!(third.trace.decision, Decision::Deny);
    assert!(third.trace.explanation.contains("daily spend limit"));
    // The denied attempt consumed nothing, and a fresh day opens a fresh
    // window.
    let next_day = fx.eval(&policies, 86_400_000 + 1_000).await;
    assert_eq!(next_day.trace.decision, Decision::Allow);
}

#[tokio::test]
async fn inactive_and_mismatched_policies_are_skipped() {
    let fx = Fixture::new();
    let mut inactive = allow_ads(10);
    inactive.active = false;
    let mut other_org = allow_ads(20);
    other_org.id = "allow-other-org".into();
    other_org.organization_id = Some("org-other".into());
    let out = fx.eval(&[inactive, other_org], 1_000).await;
    assert_eq!(out.trace.decision, Decision::Deny);
}
