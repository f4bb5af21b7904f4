//! The broker: end-to-end proposal → decision → approval → execution → audit.

use crate::config::{BrokerConfig, ExecutionMode};
use crate::error::BrokerError;
use crate::idempotency::IdempotencyStore;
use crate::notify::{NotificationPayload, Notifier};
use crate::queue::ExecuteJob;
use approval::{
    approve as machine_approve, expire as machine_expire, is_expired, patch as machine_patch,
    reject as machine_reject, resolve_delegation_chain, ApprovalRequest, ApprovalStatus,
    ChainOptions, QuorumRule, RoutingConfig,
};
use arbiter_core::clock::Clock;
use arbiter_core::decision::Decision;
use arbiter_core::envelope::{ActionEnvelope, EnvelopeStatus, Proposal, ResolvedEntity};
use arbiter_core::execute::ExecuteResult;
use arbiter_core::governance::{ApprovalLevel, GovernanceProfile};
use arbiter_core::ids::next_monotonic_id;
use audit_log::{event, AuditDraft, AuditLedger, VisibilityLevel};
use cartridge::{
    CartridgeContext, CartridgeError, CartridgeRegistry, EntityResolution, ExecutionTokens,
    GuardedCartridge, HealthState, HealthStatus, Interceptor, RegistryError,
};
use competence::{CompetenceRecord, CompetenceSignal, Tracker};
use guardrail::GuardrailStore;
use identity::{
    resolve_identity, CompetenceAdjustment, IdentitySpec, ResolveContext, ResolvedIdentity,
};
use once_cell::sync::Lazy;
use policy::risk::{score, RiskAssessment, RiskThresholds, RiskWeights};
use policy::{CandidateAction, EvaluationRequest, Policy, PolicyCache, PolicyEngine};
use regex::Regex;
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use storage::{
    ApprovalStore, CompetenceStore, EnvelopeStore, IdentityStore, PolicyStore, StorageError,
};
use telemetry::PipelineMetrics;
use tokio::sync::mpsc;
use tracing::{info, info_span, instrument, warn};

static TRANSIENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ETIMEDOUT|ECONNREFUSED|rate limit").expect("transient pattern"));

fn is_transient(message: &str) -> bool {
    TRANSIENT.is_match(message)
}

/// One external entity reference in a proposal.
#[derive(Debug, Clone)]
pub struct EntityRef {
    /// Raw reference the caller supplied (id, name, handle).
    pub input_ref: String,
    /// Entity type the cartridge should resolve it as.
    pub entity_type: String,
}

/// Input to [`Broker::resolve_and_propose`].
#[derive(Debug, Clone)]
pub struct ProposeRequest {
    /// Namespaced action type.
    pub action_type: String,
    /// Action parameters.
    pub parameters: JsonValue,
    /// Proposing principal.
    pub principal_id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Target cartridge; inferred from the action prefix when omitted.
    pub cartridge_id: Option<String>,
    /// Entity references to resolve before evaluation.
    pub entity_refs: Vec<EntityRef>,
    /// Caller-supplied evidence for the trace.
    pub evidence: Vec<String>,
    /// Caller confidence in [0, 1].
    pub confidence: f64,
    /// Correlation trace id.
    pub trace_id: Option<String>,
    /// Idempotency key; same key inside the window replays the first response.
    pub idempotency_key: Option<String>,
    /// Approval floor imposed by an undo recipe.
    pub approval_floor: Option<ApprovalLevel>,
    /// Emergency-halt override: bypass the approval queue, never the denies.
    pub override_approval: bool,
    /// Parent link for synthesized undo proposals.
    pub parent_envelope_id: Option<String>,
}

impl ProposeRequest {
    /// Minimal request for one action.
    pub fn new(
        action_type: impl Into<String>,
        parameters: JsonValue,
        principal_id: impl Into<String>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            parameters,
            principal_id: principal_id.into(),
            organization_id: organization_id.into(),
            cartridge_id: None,
            entity_refs: Vec::new(),
            evidence: Vec::new(),
            confidence: 1.0,
            trace_id: None,
            idempotency_key: None,
            approval_floor: None,
            override_approval: false,
            parent_envelope_id: None,
        }
    }
}

/// Value-level outcome of a proposal. Denials and clarifications are data,
/// not errors.
#[derive(Debug, Clone)]
pub enum ProposeOutcome {
    /// An entity reference resolved to nothing; no envelope was created.
    NotFound {
        /// Why nothing matched.
        explanation: String,
    },
    /// An entity reference was ambiguous; no envelope was created.
    NeedsClarification {
        /// Question for the caller.
        question: String,
    },
    /// Denied by governance; the envelope records the trace.
    Denied {
        /// The denied envelope.
        envelope: ActionEnvelope,
        /// One-line explanation.
        explanation: String,
    },
    /// Queued behind a human approval.
    PendingApproval {
        /// The pending envelope.
        envelope: ActionEnvelope,
        /// The routed approval request.
        approval: ApprovalRequest,
    },
    /// Cleared for execution. In inline mode the envelope already carries
    /// the execution result; in queue mode a job was enqueued.
    Approved {
        /// The envelope after dispatch.
        envelope: ActionEnvelope,
    },
}

/// Approver response action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    /// Approve the bound payload.
    Approve,
    /// Reject it.
    Reject,
    /// Approve with an equal-canonical-form payload patch.
    Patch,
}

impl ResponseAction {
    fn as_str(self) -> &'static str {
        match self {
            ResponseAction::Approve => "approve",
            ResponseAction::Reject => "reject",
            ResponseAction::Patch => "patch",
        }
    }
}

/// Input to [`Broker::respond_to_approval`].
#[derive(Debug, Clone)]
pub struct RespondRequest {
    /// What the approver decided.
    pub action: ResponseAction,
    /// Responding principal.
    pub responded_by: String,
    /// Patched payload (patch responses only).
    pub patch_value: Option<JsonValue>,
    /// Binding hash the approver confirmed, when supplied.
    pub binding_hash: Option<String>,
    /// Approval-state version the responder observed.
    pub expected_version: u64,
}

/// Outcome of an approval response.
#[derive(Debug, Clone)]
pub enum RespondOutcome {
    /// Approved; the envelope was dispatched per the execution mode.
    Approved {
        /// The envelope after dispatch.
        envelope: ActionEnvelope,
    },
    /// A quorum entry landed but the threshold is not met yet.
    QuorumPending {
        /// Distinct approvals so far.
        approvals_so_far: u32,
        /// Approvals required.
        required: u32,
    },
    /// Rejected; the envelope is denied.
    Rejected {
        /// The denied envelope.
        envelope: ActionEnvelope,
    },
    /// Patched and approved; the envelope was dispatched.
    Patched {
        /// The envelope after dispatch.
        envelope: ActionEnvelope,
    },
    /// The window had already elapsed; the envelope expired.
    Expired {
        /// The expired envelope.
        envelope: ActionEnvelope,
    },
}

/// Per-cartridge health report.
#[derive(Debug, Clone)]
pub struct CartridgeHealth {
    /// Cartridge id.
    pub cartridge_id: String,
    /// Probe result (synthesized `disconnected` on timeout).
    pub status: HealthStatus,
}

/// Outcome of an emergency halt.
#[derive(Debug, Clone)]
pub struct HaltOutcome {
    /// Organization now locked.
    pub organization_id: String,
    /// Envelopes proposed to pause active entities.
    pub pause_envelope_ids: Vec<String>,
    /// Targets that could not be paused.
    pub failures: Vec<String>,
}

/// The execution-governance broker.
pub struct Broker {
    pub(crate) config: BrokerConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) envelopes: Arc<dyn EnvelopeStore>,
    pub(crate) policies: Arc<dyn PolicyStore>,
    pub(crate) identities: Arc<dyn IdentityStore>,
    pub(crate) approvals: Arc<dyn ApprovalStore>,
    pub(crate) competence: Arc<dyn CompetenceStore>,
    pub(crate) ledger: Arc<dyn AuditLedger>,
    pub(crate) registry: Arc<CartridgeRegistry>,
    pub(crate) guardrail_store: Arc<dyn GuardrailStore>,
    pub(crate) engine: PolicyEngine,
    pub(crate) policy_cache: Arc<PolicyCache>,
    pub(crate) risk_weights: RiskWeights,
    pub(crate) risk_thresholds: RiskThresholds,
    pub(crate) routing: RoutingConfig,
    pub(crate) tracker: Tracker,
    pub(crate) tokens: ExecutionTokens,
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) idempotency: Arc<dyn IdempotencyStore>,
    pub(crate) metrics: PipelineMetrics,
    pub(crate) queue_tx: OnceLock<mpsc::Sender<ExecuteJob>>,
    pub(crate) chain_checkpoint: Mutex<(usize, Option<String>)>,
}

impl Broker {
    /// In-process metrics registry.
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// The audit ledger (read access for verification and tests).
    pub fn ledger(&self) -> &Arc<dyn AuditLedger> {
        &self.ledger
    }

    /// The envelope store.
    pub fn envelopes(&self) -> &Arc<dyn EnvelopeStore> {
        &self.envelopes
    }

    /// The approval store.
    pub fn approvals(&self) -> &Arc<dyn ApprovalStore> {
        &self.approvals
    }

    /// The identity store.
    pub fn identities(&self) -> &Arc<dyn IdentityStore> {
        &self.identities
    }

    /// The cartridge registry.
    pub fn registry(&self) -> &Arc<CartridgeRegistry> {
        &self.registry
    }

    /// Broker configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Competence record for (principal, action type), when one exists.
    pub async fn competence_record(
        &self,
        principal_id: &str,
        action_type: &str,
    ) -> Result<Option<CompetenceRecord>, BrokerError> {
        Ok(self.competence.get(principal_id, action_type).await?)
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    fn guarded(&self, inner: Arc<dyn cartridge::Cartridge>) -> GuardedCartridge {
        GuardedCartridge::new(inner, self.interceptors.clone(), self.tokens.clone())
    }

    async fn audit(&self, draft: AuditDraft) -> Result<audit_log::AuditEntry, BrokerError> {
        let entry = self.ledger.append(draft).await?;
        self.metrics.audit_appended();
        Ok(entry)
    }

    /// Insert or replace a policy, invalidating the cache.
    pub async fn upsert_policy(&self, policy: Policy) -> Result<(), BrokerError> {
        self.policies.upsert(policy).await?;
        self.policy_cache.clear();
        Ok(())
    }

    /// Load a YAML policy-seed file and upsert every policy in it.
    /// Returns how many were loaded.
    pub async fn load_policy_seeds<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<usize, BrokerError> {
        let seeds = policy::load_policy_file(path).map_err(BrokerError::Validation)?;
        let count = seeds.len();
        for policy in seeds {
            self.policies.upsert(policy).await?;
        }
        self.policy_cache.clear();
        Ok(count)
    }

    /// Delete a policy, invalidating the cache.
    pub async fn delete_policy(&self, id: &str) -> Result<bool, BrokerError> {
        let removed = self.policies.delete(id).await?;
        self.policy_cache.clear();
        Ok(removed)
    }

    async fn policies_for(
        &self,
        cartridge_id: &str,
        organization_id: &str,
    ) -> Result<Vec<Policy>, BrokerError> {
        let now = self.now();
        if let Some(cached) = self.policy_cache.get(cartridge_id, organization_id, now) {
            return Ok(cached);
        }
        let fetched = self.policies.for_scope(cartridge_id, organization_id).await?;
        self.policy_cache.put(cartridge_id, organization_id, fetched.clone(), now);
        Ok(fetched)
    }

    fn expiry_window_ms(&self, level: ApprovalLevel) -> u64 {
        match level {
            ApprovalLevel::None => 0,
            ApprovalLevel::Standard => self.config.approval_expiry_standard_ms,
            ApprovalLevel::Elevated => self.config.approval_expiry_elevated_ms,
            ApprovalLevel::Mandatory => self.config.approval_expiry_mandatory_ms,
        }
    }

    async fn resolve_identity_for(
        &self,
        principal_id: &str,
        organization_id: &str,
        cartridge_id: &str,
        assessment: &RiskAssessment,
        action_type: &str,
        now: u64,
    ) -> Result<ResolvedIdentity, BrokerError> {
        let mut spec = self
            .identities
            .spec_for_principal(principal_id)
            .await?
            .unwrap_or_else(|| {
                IdentitySpec::guarded(
                    format!("spec-{}", principal_id),
                    principal_id,
                    organization_id,
                )
            });
        if let Some(profile) = self.identities.organization_profile(organization_id).await? {
            spec.governance_profile = Some(profile);
        }
        let overlays = self.identities.overlays_for_principal(principal_id).await?;
        let mut identity = resolve_identity(
            &spec,
            &overlays,
            &ResolveContext {
                cartridge_id: Some(cartridge_id.to_string()),
                risk_category: Some(assessment.category),
                now_ms: now,
            },
        );
        if let Some(record) = self.competence.get(principal_id, action_type).await? {
            let view = self.tracker.view(&record, now);
            identity.apply_competence_adjustments(&[CompetenceAdjustment {
                action_type: action_type.to_string(),
                should_trust: view.should_trust,
            }]);
        }
        Ok(identity)
    }

    /// Resolve, evaluate, and route one proposed action.
    #[instrument(skip_all, fields(action = %request.action_type, principal = %request.principal_id))]
    pub async fn resolve_and_propose(
        &self,
        request: ProposeRequest,
    ) -> Result<ProposeOutcome, BrokerError> {
        if request.action_type.trim().is_empty() {
            return Err(BrokerError::Validation("action_type must be non-empty".into()));
        }
        if !request.parameters.is_object() {
            return Err(BrokerError::Validation("parameters must be a JSON object".into()));
        }
        let now = self.now();

        if let Some(key) = &request.idempotency_key {
            if let Some(cached) = self.idempotency.get(key, now).await {
                info!(key = %key, "idempotent replay");
                return Ok(cached);
            }
        }

        // 1. Cartridge lookup or inference.
        let cartridge_id = match &request.cartridge_id {
            Some(id) => id.clone(),
            None => self.registry.infer_for_action(&request.action_type).map_err(|e| match e {
                RegistryError::NoMatch(p) => BrokerError::CannotInferCartridge(p),
                RegistryError::Ambiguous(p) => BrokerError::CannotInferCartridge(p),
                other => BrokerError::Registry(other),
            })?,
        };
        let inner = self
            .registry
            .get(&cartridge_id)
            .ok_or_else(|| BrokerError::UnknownCartridge(cartridge_id.clone()))?;
        self.registry
            .validate_parameters(&cartridge_id, &request.action_type, &request.parameters)
            .map_err(|e| match e {
                CartridgeError::InvalidParameters(m) => BrokerError::Validation(m),
                CartridgeError::UnknownAction(a) => {
                    BrokerError::Validation(format!("unknown action type '{}'", a))
                }
                other => BrokerError::Cartridge(other),
            })?;

        // 2. Entity resolution; not-found and ambiguity return as data.
        let mut resolved_entities: Vec<ResolvedEntity> = Vec::new();
        if !request.entity_refs.is_empty() {
            if let Some(resolver) = inner.entity_resolver() {
                for entity_ref in &request.entity_refs {
                    match resolver
                        .resolve_entity(&entity_ref.input_ref, &entity_ref.entity_type)
                        .await?
                    {
                        EntityResolution::Resolved(e) => resolved_entities.push(e),
                        EntityResolution::NotFound { explanation } => {
                            self.metrics.proposal("not_found");
                            return Ok(ProposeOutcome::NotFound { explanation });
                        }
                        EntityResolution::Ambiguous { question, mut alternatives } => {
                            if alternatives.len() == 1 {
                                resolved_entities.push(alternatives.remove(0));
                            } else {
                                self.metrics.proposal("needs_clarification");
                                return Ok(ProposeOutcome::NeedsClarification { question });
                            }
                        }
                    }
                }
            } else {
                // No resolver capability: references pass through as ids.
                resolved_entities.extend(request.entity_refs.iter().map(|r| ResolvedEntity {
                    entity_type: r.entity_type.clone(),
                    input_ref: r.input_ref.clone(),
                    resolved_id: r.input_ref.clone(),
                    display_name: r.input_ref.clone(),
                    confidence: 1.0,
                }));
            }
        }

        // 3. Context enrichment through the guarded wrapper.
        let guarded = self.guarded(Arc::clone(&inner));
        let base_ctx = CartridgeContext::new(
            &request.principal_id,
            &request.organization_id,
            request.trace_id.clone(),
        );
        let (enriched_ctx, parameters) = guarded
            .enrich_context(&request.action_type, request.parameters.clone(), &base_ctx)
            .await?;

        // 4. Risk input and score.
        let risk_input =
            guarded.risk_input(&request.action_type, &parameters, &enriched_ctx).await?;
        let assessment = {
            let _span = info_span!("risk.score", action = %request.action_type).entered();
            score(&risk_input, &self.risk_weights, &self.risk_thresholds)
        };

        // 5. Effective identity (overlays + competence).
        let identity = self
            .resolve_identity_for(
                &request.principal_id,
                &request.organization_id,
                &cartridge_id,
                &assessment,
                &request.action_type,
                now,
            )
            .await?;

        // 6. Policy evaluation.
        let policies = self.policies_for(&cartridge_id, &request.organization_id).await?;
        let guardrails = inner.guardrails();
        let entity_ids: Vec<String> =
            resolved_entities.iter().map(|e| e.resolved_id.clone()).collect();
        let eval_started = Instant::now();
        let evaluation = self
            .engine
            .evaluate(
                CandidateAction {
                    action_type: request.action_type.clone(),
                    parameters: parameters.clone(),
                },
                EvaluationRequest {
                    identity: &identity,
                    metadata: &enriched_ctx.metadata,
                    cartridge_id: &cartridge_id,
                    guardrails: &guardrails,
                    store: self.guardrail_store.as_ref(),
                    policies: &policies,
                    assessment: &assessment,
                    entity_ids: &entity_ids,
                    dollars_at_risk: risk_input.exposure.dollars_at_risk,
                    now_ms: now,
                },
            )
            .await;
        self.metrics.policy_eval_ms(eval_started.elapsed().as_millis() as u64);

        let mut trace = evaluation.trace;
        let final_parameters = evaluation.parameters;

        // Approval floor (undo recipes), observe mode, emergency override.
        if trace.decision != Decision::Deny {
            if let Some(floor) = request.approval_floor {
                if floor > trace.approval_required {
                    trace.push(
                        "undo:approval_floor",
                        true,
                        format!("undo recipe imposes a {} floor", floor.as_str()),
                        Some("require_approval"),
                    );
                    trace.approval_required = floor;
                    trace.decision = Decision::RequireApproval;
                }
            }
            if identity.governance_profile == GovernanceProfile::Observe {
                trace.push(
                    "governance:observe_mode",
                    true,
                    "observe profile auto-executes; decision recorded as a governance note",
                    Some("downgrade"),
                );
                trace.approval_required = ApprovalLevel::None;
                trace.decision = Decision::Allow;
            }
            if request.override_approval && trace.decision == Decision::RequireApproval {
                trace.push(
                    "governance:emergency_override",
                    true,
                    "approval bypassed by emergency override",
                    Some("override"),
                );
                trace.approval_required = ApprovalLevel::None;
                trace.decision = Decision::Allow;
            }
        }

        // 7. Envelope assembly.
        let proposal = Proposal {
            id: format!("act-{}", next_monotonic_id()),
            action_type: request.action_type.clone(),
            parameters: final_parameters.clone(),
            evidence: request.evidence.clone(),
            confidence: request.confidence,
        };
        let mut envelope = ActionEnvelope::new_proposed(
            &request.principal_id,
            &request.organization_id,
            &cartridge_id,
            proposal,
            request.trace_id.clone(),
            now,
        );
        envelope.resolved_entities = resolved_entities;
        envelope.parent_envelope_id = request.parent_envelope_id.clone();
        let explanation = trace.explanation.clone();
        let category = trace.risk_category;
        let decision = trace.decision;
        let required = trace.approval_required;
        envelope.decision_trace = Some(trace);

        let outcome = match decision {
            Decision::Deny => {
                envelope
                    .transition(EnvelopeStatus::Denied, now)
                    .map_err(|e| BrokerError::InvalidState(e.to_string()))?;
                let entry = self
                    .audit(
                        AuditDraft::new(
                            event::ACTION_DENIED,
                            "agent",
                            &request.principal_id,
                            "envelope",
                            &envelope.id,
                            &explanation,
                        )
                        .snapshot(json!({"action_type": request.action_type, "parameters": final_parameters}))
                        .envelope(&envelope.id)
                        .organization(&request.organization_id)
                        .trace(&envelope.trace_id)
                        .risk(category),
                    )
                    .await?;
                envelope.audit_entry_ids.push(entry.id);
                self.envelopes.create(envelope.clone()).await?;
                self.metrics.proposal("denied");
                ProposeOutcome::Denied { envelope, explanation }
            }
            Decision::RequireApproval => {
                let routed = approval::route(
                    category,
                    &identity.effective_risk_tolerance,
                    &identity.delegated_approvers,
                    &self.routing,
                    now,
                );
                self.create_pending_approval(
                    envelope,
                    &request,
                    &cartridge_id,
                    &final_parameters,
                    category,
                    required,
                    routed,
                    now,
                )
                .await?
            }
            Decision::Allow => {
                envelope
                    .transition(EnvelopeStatus::Approved, now)
                    .map_err(|e| BrokerError::InvalidState(e.to_string()))?;
                let entry = self
                    .audit(
                        AuditDraft::new(
                            event::ACTION_PROPOSED,
                            "agent",
                            &request.principal_id,
                            "envelope",
                            &envelope.id,
                            &explanation,
                        )
                        .snapshot(json!({"action_type": request.action_type, "parameters": final_parameters}))
                        .envelope(&envelope.id)
                        .organization(&request.organization_id)
                        .trace(&envelope.trace_id)
                        .risk(category),
                    )
                    .await?;
                envelope.audit_entry_ids.push(entry.id);
                self.envelopes.create(envelope.clone()).await?;
                self.metrics.proposal("approved");
                let envelope = self.dispatch_approved(envelope).await?;
                ProposeOutcome::Approved { envelope }
            }
        };

        if let Some(key) = &request.idempotency_key {
            self.idempotency.put(key, outcome.clone(), now).await;
        }
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_pending_approval(
        &self,
        mut envelope: ActionEnvelope,
        request: &ProposeRequest,
        cartridge_id: &str,
        parameters: &JsonValue,
        category: arbiter_core::risk::RiskCategory,
        required: ApprovalLevel,
        routed: approval::RoutedApproval,
        now: u64,
    ) -> Result<ProposeOutcome, BrokerError> {
        // The routed level reflects the tolerance (with the empty-approver
        // escalation); policy floors can only raise it further.
        let mut level = required.max(routed.level);
        let mut approvers = routed.approvers;
        let mut no_approver_reachable = routed.escalated_no_approvers;
        if approvers.is_empty() {
            match &self.routing.fallback_approver {
                Some(fallback) => approvers.push(fallback.clone()),
                None if !no_approver_reachable => {
                    level = ApprovalLevel::Mandatory;
                    no_approver_reachable = true;
                }
                None => {}
            }
        }

        if no_approver_reachable && self.config.deny_when_no_approvers {
            let explanation = format!(
                "{} approval required but no approver is reachable (missing approvers)",
                required.as_str()
            );
            envelope
                .transition(EnvelopeStatus::Denied, now)
                .map_err(|e| BrokerError::InvalidState(e.to_string()))?;
            if let Some(trace) = envelope.decision_trace.as_mut() {
                trace.decision = Decision::Deny;
                trace.explanation = explanation.clone();
                trace.push("approval:no_approvers", true, explanation.clone(), Some("deny"));
            }
            let entry = self
                .audit(
                    AuditDraft::new(
                        event::ACTION_DENIED,
                        "agent",
                        &request.principal_id,
                        "envelope",
                        &envelope.id,
                        &explanation,
                    )
                    .envelope(&envelope.id)
                    .organization(&request.organization_id)
                    .trace(&envelope.trace_id)
                    .risk(category),
                )
                .await?;
            envelope.audit_entry_ids.push(entry.id);
            self.envelopes.create(envelope.clone()).await?;
            self.metrics.proposal("denied");
            return Ok(ProposeOutcome::Denied { envelope, explanation });
        }

        let expires_at = now.saturating_add(self.expiry_window_ms(level));
        let quorum = if level == ApprovalLevel::Mandatory {
            self.config.mandatory_quorum.map(|required| QuorumRule { required })
        } else {
            None
        };
        let summary = format!(
            "{} on {} ({} risk)",
            request.action_type,
            envelope
                .resolved_entities
                .first()
                .map_or_else(|| "unresolved target".to_string(), |e| e.display_name.clone()),
            category.as_str()
        );
        let action_id = envelope.primary_proposal().map(|p| p.id.clone()).unwrap_or_default();
        let (approval_request, state) = ApprovalRequest::create(
            action_id,
            &envelope.id,
            &request.organization_id,
            summary,
            category,
            level,
            &request.action_type,
            parameters,
            &request.principal_id,
            cartridge_id,
            approvers,
            self.routing.fallback_approver.clone(),
            expires_at,
            quorum,
            now,
        );

        envelope
            .transition(EnvelopeStatus::PendingApproval, now)
            .map_err(|e| BrokerError::InvalidState(e.to_string()))?;
        envelope.approval_request_ids.push(approval_request.id.clone());

        let proposed = self
            .audit(
                AuditDraft::new(
                    event::ACTION_PROPOSED,
                    "agent",
                    &request.principal_id,
                    "envelope",
                    &envelope.id,
                    format!("{} awaiting {} approval", request.action_type, level.as_str()),
                )
                .snapshot(json!({"action_type": request.action_type, "parameters": parameters}))
                .envelope(&envelope.id)
                .organization(&request.organization_id)
                .trace(&envelope.trace_id)
                .risk(category),
            )
            .await?;
        envelope.audit_entry_ids.push(proposed.id);
        let created = self
            .audit(
                AuditDraft::new(
                    event::APPROVAL_CREATED,
                    "system",
                    "approval-router",
                    "approval",
                    &approval_request.id,
                    &approval_request.summary,
                )
                .snapshot(json!({
                    "level": level.as_str(),
                    "approvers": approval_request.approvers,
                    "expires_at_ms": expires_at,
                }))
                .envelope(&envelope.id)
                .organization(&request.organization_id)
                .trace(&envelope.trace_id)
                .risk(category)
                .visibility(VisibilityLevel::Governance),
            )
            .await?;
        envelope.audit_entry_ids.push(created.id);

        self.envelopes.create(envelope.clone()).await?;
        self.approvals.create(approval_request.clone(), state).await?;
        self.metrics.proposal("pending_approval");
        self.metrics.approval_created(level.as_str());

        let payload = NotificationPayload {
            approval_id: approval_request.id.clone(),
            envelope_id: envelope.id.clone(),
            summary: approval_request.summary.clone(),
            risk_category: category,
            binding_hash: approval_request.binding_hash.clone(),
            expires_at_ms: expires_at,
            approvers: approval_request.approvers.clone(),
        };
        if let Err(e) = self.notifier.notify(&payload).await {
            warn!(approval = %approval_request.id, error = %e, "approver notification failed");
        }

        Ok(ProposeOutcome::PendingApproval { envelope, approval: approval_request })
    }

    async fn dispatch_approved(
        &self,
        envelope: ActionEnvelope,
    ) -> Result<ActionEnvelope, BrokerError> {
        match self.config.execution_mode {
            ExecutionMode::Inline => match self.execute_approved(&envelope.id).await {
                Ok(env) => Ok(env),
                Err(BrokerError::TransientExecution(msg)) => {
                    // Inline mode has no retry queue; transient becomes terminal.
                    let env = self.envelopes.get(&envelope.id).await?;
                    self.mark_failed(env, None, format!("transient failure, no queue: {}", msg))
                        .await
                }
                Err(e) => Err(e),
            },
            ExecutionMode::Queue => {
                let tx = self.queue_tx.get().ok_or(BrokerError::QueueUnavailable)?;
                let job = ExecuteJob {
                    envelope_id: envelope.id.clone(),
                    enqueued_at: chrono::Utc::now().to_rfc3339(),
                    trace_id: Some(envelope.trace_id.clone()),
                };
                tx.send(job).await.map_err(|_| BrokerError::QueueUnavailable)?;
                Ok(envelope)
            }
        }
    }

    /// Respond to a pending approval.
    #[instrument(skip_all, fields(approval = %approval_id, responder = %response.responded_by))]
    pub async fn respond_to_approval(
        &self,
        approval_id: &str,
        response: RespondRequest,
    ) -> Result<RespondOutcome, BrokerError> {
        let (request, mut state) = self
            .approvals
            .get(approval_id)
            .await?
            .ok_or_else(|| BrokerError::UnknownApproval(approval_id.to_string()))?;
        let envelope = self.envelopes.get(&request.envelope_id).await?;
        let action_type = envelope
            .primary_proposal()
            .map(|p| p.action_type.clone())
            .unwrap_or_default();
        let now = self.now();

        // Authorization: listed approver, fallback, or delegation chain.
        let listed = request.approvers.iter().any(|a| a == &response.responded_by)
            || request.fallback_approver.as_deref() == Some(response.responded_by.as_str());
        if !listed {
            let rules = self.identities.delegation_rules().await?;
            let resolution = resolve_delegation_chain(
                &response.responded_by,
                &request.approvers,
                &rules,
                &ChainOptions::at(now).with_required_scope(action_type.clone()),
            );
            if !resolution.authorized {
                return Err(BrokerError::UnauthorizedApprover(response.responded_by));
            }
            info!(
                responder = %response.responded_by,
                chain = ?resolution.chain,
                "delegated approval response"
            );
        }

        // Lazy expiry beats any response that arrives late.
        if is_expired(&state, now) {
            let observed = state.version;
            machine_expire(&mut state, observed, now)?;
            self.approvals.update_state(state, observed).await?;
            let envelope = self.expire_envelope(&request, now).await?;
            return Ok(RespondOutcome::Expired { envelope });
        }

        let observed = response.expected_version;
        let status = match response.action {
            ResponseAction::Approve => machine_approve(
                &request,
                &mut state,
                &response.responded_by,
                response.binding_hash.as_deref(),
                observed,
                now,
            )?,
            ResponseAction::Reject => machine_reject(
                &request,
                &mut state,
                &response.responded_by,
                response.binding_hash.as_deref(),
                observed,
                now,
            )?,
            ResponseAction::Patch => {
                let patch_value = response
                    .patch_value
                    .clone()
                    .ok_or_else(|| BrokerError::Validation("patch requires a payload".into()))?;
                machine_patch(
                    &request,
                    &mut state,
                    &response.responded_by,
                    patch_value,
                    &action_type,
                    &envelope.principal_id,
                    &envelope.cartridge_id,
                    observed,
                    now,
                )?
            }
        };
        let quorum_progress = state.quorum.clone();
        self.approvals.update_state(state, observed).await?;
        self.metrics.approval_responded(response.action.as_str());
        self.audit(
            AuditDraft::new(
                event::APPROVAL_RESPONDED,
                "user",
                &response.responded_by,
                "approval",
                &request.id,
                format!("{} by {}", response.action.as_str(), response.responded_by),
            )
            .snapshot(json!({"status": status.as_str()}))
            .envelope(&request.envelope_id)
            .organization(&request.organization_id)
            .risk(request.risk_category)
            .visibility(VisibilityLevel::Governance),
        )
        .await?;

        match status {
            ApprovalStatus::Pending => {
                let progress = quorum_progress.expect("quorum state present while pending");
                Ok(RespondOutcome::QuorumPending {
                    approvals_so_far: progress.entries.len() as u32,
                    required: progress.required,
                })
            }
            ApprovalStatus::Approved | ApprovalStatus::Patched => {
                let mut envelope = self.envelopes.get(&request.envelope_id).await?;
                let observed_env = envelope.version;
                envelope
                    .transition(EnvelopeStatus::Approved, now)
                    .map_err(|e| BrokerError::InvalidState(e.to_string()))?;
                self.envelopes.update(envelope.clone(), observed_env).await?;
                let envelope = self.dispatch_approved(envelope).await?;
                if status == ApprovalStatus::Patched {
                    Ok(RespondOutcome::Patched { envelope })
                } else {
                    Ok(RespondOutcome::Approved { envelope })
                }
            }
            ApprovalStatus::Rejected => {
                let mut envelope = self.envelopes.get(&request.envelope_id).await?;
                let observed_env = envelope.version;
                envelope
                    .transition(EnvelopeStatus::Denied, now)
                    .map_err(|e| BrokerError::InvalidState(e.to_string()))?;
                let entry = self
                    .audit(
                        AuditDraft::new(
                            event::ACTION_DENIED,
                            "user",
                            &response.responded_by,
                            "envelope",
                            &envelope.id,
                            format!("rejected by {}", response.responded_by),
                        )
                        .envelope(&envelope.id)
                        .organization(&request.organization_id)
                        .risk(request.risk_category),
                    )
                    .await?;
                envelope.audit_entry_ids.push(entry.id);
                self.envelopes.update(envelope.clone(), observed_env).await?;
                Ok(RespondOutcome::Rejected { envelope })
            }
            ApprovalStatus::Expired => {
                let envelope = self.expire_envelope(&request, now).await?;
                Ok(RespondOutcome::Expired { envelope })
            }
        }
    }

    async fn expire_envelope(
        &self,
        request: &ApprovalRequest,
        now: u64,
    ) -> Result<ActionEnvelope, BrokerError> {
        let mut envelope = self.envelopes.get(&request.envelope_id).await?;
        if envelope.status == EnvelopeStatus::PendingApproval {
            let observed = envelope.version;
            envelope
                .transition(EnvelopeStatus::Expired, now)
                .map_err(|e| BrokerError::InvalidState(e.to_string()))?;
            let entry = self
                .audit(
                    AuditDraft::new(
                        event::ACTION_APPROVAL_EXPIRED,
                        "system",
                        "approval-expiry",
                        "envelope",
                        &envelope.id,
                        format!("approval {} expired unanswered", request.id),
                    )
                    .envelope(&envelope.id)
                    .organization(&request.organization_id)
                    .risk(request.risk_category),
                )
                .await?;
            envelope.audit_entry_ids.push(entry.id);
            self.envelopes.update(envelope.clone(), observed).await?;
        }
        Ok(envelope)
    }

    /// Execute an approved envelope through the guarded cartridge.
    ///
    /// Transient failures (`ETIMEDOUT` / `ECONNREFUSED` / rate-limit text)
    /// re-raise so the queue retries; terminal failures mark the envelope
    /// `failed`. The execution permit is released on every path.
    #[instrument(skip_all, fields(envelope = %envelope_id))]
    pub async fn execute_approved(
        &self,
        envelope_id: &str,
    ) -> Result<ActionEnvelope, BrokerError> {
        let mut envelope = self.envelopes.get(envelope_id).await?;
        let now = self.now();
        match envelope.status {
            EnvelopeStatus::Approved => {
                let observed = envelope.version;
                envelope
                    .transition(EnvelopeStatus::Executing, now)
                    .map_err(|e| BrokerError::InvalidState(e.to_string()))?;
                self.envelopes.update(envelope.clone(), observed).await?;
            }
            EnvelopeStatus::Executing => {}
            other => {
                return Err(BrokerError::InvalidState(format!(
                    "cannot execute envelope in status {}",
                    other.as_str()
                )))
            }
        }

        let proposal = envelope
            .primary_proposal()
            .cloned()
            .ok_or_else(|| BrokerError::Validation("envelope has no proposal".into()))?;
        let inner = self
            .registry
            .get(&envelope.cartridge_id)
            .ok_or_else(|| BrokerError::UnknownCartridge(envelope.cartridge_id.clone()))?;
        let guarded = self.guarded(Arc::clone(&inner));
        let ctx = CartridgeContext::new(
            &envelope.principal_id,
            &envelope.organization_id,
            Some(envelope.trace_id.clone()),
        );

        let token = self.tokens.begin();
        guarded.bind_token(&token);
        let started = Instant::now();
        let exec_result = guarded
            .execute(&proposal.action_type, proposal.parameters.clone(), &ctx)
            .await;
        guarded.unbind_token();
        self.tokens.end(&token);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics.execute_ms(elapsed_ms);

        match exec_result {
            Ok(result) if result.success => {
                self.finish_success(envelope, &proposal, result, &inner).await
            }
            Ok(result) => {
                let message = result
                    .partial_failures
                    .iter()
                    .map(|f| f.error.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                if is_transient(&message) {
                    Err(BrokerError::TransientExecution(message))
                } else {
                    self.mark_failed(envelope, Some(result), message).await
                }
            }
            Err(CartridgeError::DirectExecutionForbidden) => {
                // Invariant breach; never downgraded to a failed envelope.
                Err(BrokerError::Cartridge(CartridgeError::DirectExecutionForbidden))
            }
            Err(e) => {
                let message = e.to_string();
                if is_transient(&message) {
                    Err(BrokerError::TransientExecution(message))
                } else {
                    self.mark_failed(envelope, None, message).await
                }
            }
        }
    }

    async fn finish_success(
        &self,
        mut envelope: ActionEnvelope,
        proposal: &Proposal,
        result: ExecuteResult,
        inner: &Arc<dyn cartridge::Cartridge>,
    ) -> Result<ActionEnvelope, BrokerError> {
        let now = self.now();
        let observed = envelope.version;
        envelope.execution_results.push(result.clone());
        envelope
            .transition(EnvelopeStatus::Executed, now)
            .map_err(|e| BrokerError::InvalidState(e.to_string()))?;

        let category = envelope.decision_trace.as_ref().map(|t| t.risk_category);
        let mut draft = AuditDraft::new(
            event::ACTION_EXECUTED,
            "agent",
            &envelope.principal_id,
            "envelope",
            &envelope.id,
            &result.summary,
        )
        .snapshot(json!({
            "action_type": proposal.action_type,
            "external_refs": result.external_refs,
            "duration_ms": result.duration_ms,
            "rollback_available": result.rollback_available,
        }))
        .envelope(&envelope.id)
        .organization(&envelope.organization_id)
        .trace(&envelope.trace_id);
        if let Some(c) = category {
            draft = draft.risk(c);
        }
        let entry = self.audit(draft).await?;
        envelope.audit_entry_ids.push(entry.id);
        self.envelopes.update(envelope.clone(), observed).await?;
        self.metrics.execution(true);

        // Cooldowns arm on successful execution.
        let guardrails = inner.guardrails();
        for rule in guardrails.cooldowns.iter().filter(|c| c.action_type == proposal.action_type)
        {
            for entity in &envelope.resolved_entities {
                let key = format!(
                    "cd:{}:{}:{}",
                    envelope.cartridge_id, proposal.action_type, entity.resolved_id
                );
                self.guardrail_store.set_cooldown(&key, now, rule.cooldown_ms, now).await;
            }
        }

        // Competence success for the executing principal.
        self.record_competence(
            &envelope.principal_id,
            &proposal.action_type,
            CompetenceEvent::Success,
            &envelope.organization_id,
        )
        .await?;

        // An executed undo rolls back its parent.
        if let Some(parent_id) = envelope.parent_envelope_id.clone() {
            self.roll_back_parent(&parent_id, &envelope).await?;
        }

        Ok(envelope)
    }

    async fn roll_back_parent(
        &self,
        parent_id: &str,
        child: &ActionEnvelope,
    ) -> Result<(), BrokerError> {
        let now = self.now();
        let mut parent = match self.envelopes.get(parent_id).await {
            Ok(p) => p,
            Err(StorageError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if parent.status != EnvelopeStatus::Executed {
            return Ok(());
        }
        let observed = parent.version;
        parent
            .transition(EnvelopeStatus::RolledBack, now)
            .map_err(|e| BrokerError::InvalidState(e.to_string()))?;
        let entry = self
            .audit(
                AuditDraft::new(
                    event::ACTION_ROLLED_BACK,
                    "agent",
                    &child.principal_id,
                    "envelope",
                    &parent.id,
                    format!("reversed by undo envelope {}", child.id),
                )
                .envelope(&parent.id)
                .organization(&parent.organization_id)
                .trace(&parent.trace_id),
            )
            .await?;
        parent.audit_entry_ids.push(entry.id);
        self.envelopes.update(parent.clone(), observed).await?;

        // The rollback counts against the original action's competence.
        if let Some(original) = parent.primary_proposal() {
            let action_type = original.action_type.clone();
            self.record_competence(
                &parent.principal_id,
                &action_type,
                CompetenceEvent::Rollback,
                &parent.organization_id,
            )
            .await?;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        mut envelope: ActionEnvelope,
        result: Option<ExecuteResult>,
        reason: String,
    ) -> Result<ActionEnvelope, BrokerError> {
        let now = self.now();
        let observed = envelope.version;
        if let Some(result) = result {
            envelope.execution_results.push(result);
        }
        envelope
            .transition(EnvelopeStatus::Failed, now)
            .map_err(|e| BrokerError::InvalidState(e.to_string()))?;
        let action_type = envelope
            .primary_proposal()
            .map(|p| p.action_type.clone())
            .unwrap_or_default();
        let entry = self
            .audit(
                AuditDraft::new(
                    event::ACTION_FAILED,
                    "agent",
                    &envelope.principal_id,
                    "envelope",
                    &envelope.id,
                    &reason,
                )
                .snapshot(json!({"action_type": action_type, "error": reason}))
                .envelope(&envelope.id)
                .organization(&envelope.organization_id)
                .trace(&envelope.trace_id),
            )
            .await?;
        envelope.audit_entry_ids.push(entry.id);
        self.envelopes.update(envelope.clone(), observed).await?;
        self.metrics.execution(false);
        self.record_competence(
            &envelope.principal_id,
            &action_type,
            CompetenceEvent::Failure,
            &envelope.organization_id,
        )
        .await?;
        Ok(envelope)
    }

    async fn record_competence(
        &self,
        principal_id: &str,
        action_type: &str,
        kind: CompetenceEvent,
        organization_id: &str,
    ) -> Result<(), BrokerError> {
        let now = self.now();
        let mut record = match self.competence.get(principal_id, action_type).await? {
            Some(r) => r,
            None => CompetenceRecord::new(principal_id, action_type, self.tracker.config(), now),
        };
        let signal = match kind {
            CompetenceEvent::Success => self.tracker.record_success(&mut record, now),
            CompetenceEvent::Failure => self.tracker.record_failure(&mut record, now),
            CompetenceEvent::Rollback => self.tracker.record_rollback(&mut record, now),
        };
        let score_after = record.score;
        self.competence.put(record).await?;
        match signal {
            Some(CompetenceSignal::Promoted) => {
                self.audit(
                    AuditDraft::new(
                        event::COMPETENCE_PROMOTED,
                        "system",
                        "competence-tracker",
                        "competence",
                        format!("{}:{}", principal_id, action_type),
                        format!("{} promoted on {}", principal_id, action_type),
                    )
                    .snapshot(json!({"score": score_after}))
                    .organization(organization_id)
                    .visibility(VisibilityLevel::Governance),
                )
                .await?;
            }
            Some(CompetenceSignal::Demoted) => {
                self.audit(
                    AuditDraft::new(
                        event::COMPETENCE_DEMOTED,
                        "system",
                        "competence-tracker",
                        "competence",
                        format!("{}:{}", principal_id, action_type),
                        format!("{} demoted on {}", principal_id, action_type),
                    )
                    .snapshot(json!({"score": score_after}))
                    .organization(organization_id)
                    .visibility(VisibilityLevel::Governance),
                )
                .await?;
            }
            None => {}
        }
        Ok(())
    }

    /// Synthesize and propose the reverse of an executed envelope.
    #[instrument(skip_all, fields(envelope = %envelope_id))]
    pub async fn request_undo(&self, envelope_id: &str) -> Result<ProposeOutcome, BrokerError> {
        let envelope = self.envelopes.get(envelope_id).await?;
        if envelope.status != EnvelopeStatus::Executed {
            return Err(BrokerError::UndoUnavailable(format!(
                "envelope is {}, not executed",
                envelope.status.as_str()
            )));
        }
        let recipe = envelope
            .execution_results
            .iter()
            .rev()
            .find_map(|r| r.undo_recipe.clone())
            .ok_or_else(|| BrokerError::UndoUnavailable("no undo recipe recorded".into()))?;
        let now = self.now();
        if recipe.undo_expires_at_ms < now {
            return Err(BrokerError::UndoUnavailable("undo recipe expired".into()));
        }

        // Undo-of-undo is allowed; runaway chains are not.
        let mut depth = 1u32;
        let mut cursor = envelope.parent_envelope_id.clone();
        while let Some(parent_id) = cursor {
            depth += 1;
            if depth > self.config.undo_chain_max_depth {
                return Err(BrokerError::UndoChainTooDeep(self.config.undo_chain_max_depth));
            }
            cursor = self.envelopes.get(&parent_id).await?.parent_envelope_id;
        }

        let mut request = ProposeRequest::new(
            recipe.reverse_action_type.clone(),
            recipe.reverse_parameters.clone(),
            envelope.principal_id.clone(),
            envelope.organization_id.clone(),
        );
        request.cartridge_id = Some(envelope.cartridge_id.clone());
        request.trace_id = Some(envelope.trace_id.clone());
        request.approval_floor = Some(recipe.undo_approval_required);
        request.parent_envelope_id = Some(envelope.id.clone());
        request.entity_refs = envelope
            .resolved_entities
            .iter()
            .map(|e| EntityRef {
                input_ref: e.resolved_id.clone(),
                entity_type: e.entity_type.clone(),
            })
            .collect();
        self.resolve_and_propose(request).await
    }

    /// Lock an organization and pause its active effectful entities.
    #[instrument(skip_all, fields(org = %organization_id))]
    pub async fn emergency_halt(
        &self,
        organization_id: &str,
        actor_id: &str,
    ) -> Result<HaltOutcome, BrokerError> {
        self.identities
            .set_organization_profile(organization_id, GovernanceProfile::Locked)
            .await?;
        self.audit(
            AuditDraft::new(
                event::EMERGENCY_HALT,
                "user",
                actor_id,
                "organization",
                organization_id,
                format!("organization {} locked by emergency halt", organization_id),
            )
            .organization(organization_id)
            .visibility(VisibilityLevel::Security),
        )
        .await?;

        let mut pause_envelope_ids = Vec::new();
        let mut failures = Vec::new();
        for cartridge_id in self.registry.ids() {
            let Some(inner) = self.registry.get(&cartridge_id) else { continue };
            let Some(searcher) = inner.entity_searcher() else { continue };
            let targets = match searcher.search_active_entities(organization_id).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(cartridge = %cartridge_id, error = %e, "halt search failed");
                    failures.push(format!("{}: {}", cartridge_id, e));
                    continue;
                }
            };
            for target in targets {
                let mut request = ProposeRequest::new(
                    target.action_type.clone(),
                    target.parameters.clone(),
                    actor_id,
                    organization_id,
                );
                request.cartridge_id = Some(cartridge_id.clone());
                request.override_approval = true;
                match self.resolve_and_propose(request).await {
                    Ok(ProposeOutcome::Approved { envelope }) => {
                        pause_envelope_ids.push(envelope.id);
                    }
                    Ok(ProposeOutcome::Denied { explanation, .. }) => {
                        failures.push(format!("{}: {}", target.entity_id, explanation));
                    }
                    Ok(_) => failures.push(format!("{}: unexpected outcome", target.entity_id)),
                    Err(e) => failures.push(format!("{}: {}", target.entity_id, e)),
                }
            }
        }
        Ok(HaltOutcome {
            organization_id: organization_id.to_string(),
            pause_envelope_ids,
            failures,
        })
    }

    /// Probe every registered cartridge with the configured timeout.
    pub async fn health(&self) -> Vec<CartridgeHealth> {
        let timeout = std::time::Duration::from_millis(self.config.health_check_timeout_ms);
        let mut out = Vec::new();
        for cartridge_id in self.registry.ids() {
            let Some(inner) = self.registry.get(&cartridge_id) else { continue };
            let status = match tokio::time::timeout(timeout, inner.health_check()).await {
                Ok(status) => status,
                Err(_) => HealthStatus {
                    status: HealthState::Disconnected,
                    latency_ms: self.config.health_check_timeout_ms,
                    error: Some("health check timed out".into()),
                    capabilities: Vec::new(),
                },
            };
            out.push(CartridgeHealth { cartridge_id, status });
        }
        out
    }

    /// Expire stale pending approvals. Returns how many expired.
    pub async fn expire_stale_approvals(&self) -> Result<usize, BrokerError> {
        let pending = self.approvals.list_pending(None).await?;
        let now = self.now();
        let mut expired = 0usize;
        for (request, mut state) in pending {
            if !is_expired(&state, now) {
                continue;
            }
            let observed = state.version;
            if machine_expire(&mut state, observed, now).is_err() {
                continue;
            }
            match self.approvals.update_state(state, observed).await {
                Ok(()) => {}
                Err(StorageError::StaleVersion { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
            self.expire_envelope(&request, now).await?;
            expired += 1;
        }
        Ok(expired)
    }

    /// Re-verify the ledger from the last checkpoint. Returns whether the
    /// checked prefix is intact; a break is audited and counted, writes
    /// continue either way.
    pub async fn verify_ledger(&self) -> Result<bool, BrokerError> {
        let (start, preceding) = {
            let guard = self.chain_checkpoint.lock().expect("checkpoint lock poisoned");
            (guard.0, guard.1.clone())
        };
        let tail = self.ledger.entries_from(start).await?;
        let verdict = audit_log::verify_chain(&tail, preceding.as_deref());
        if verdict.valid {
            if let Some(last) = tail.last() {
                let mut guard = self.chain_checkpoint.lock().expect("checkpoint lock poisoned");
                *guard = (start + tail.len(), Some(last.entry_hash.clone()));
            }
            return Ok(true);
        }
        let broken_at = start + verdict.broken_at.unwrap_or(0);
        self.metrics.chain_break();
        warn!(broken_at, "audit chain verification failed");
        self.audit(
            AuditDraft::new(
                event::CHAIN_BROKEN,
                "system",
                "chain-verify",
                "ledger",
                "audit-chain",
                format!("hash chain broken at entry index {}", broken_at),
            )
            .snapshot(json!({"broken_at": broken_at}))
            .visibility(VisibilityLevel::Security),
        )
        .await?;
        Ok(false)
    }
}

enum CompetenceEvent {
    Success,
    Failure,
    Rollback,
}
