//! Broker assembly. Defaults are fully in-memory, which is also the
//! degraded bootstrap mode when a configured backing store is unreachable.

use crate::broker::Broker;
use crate::config::BrokerConfig;
use crate::idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
use crate::notify::{NoopNotifier, Notifier};
use arbiter_core::clock::{Clock, SystemClock};
use audit_log::{AuditLedger, InMemoryLedger, Redactor};
use cartridge::{CartridgeRegistry, ExecutionTokens, Interceptor};
use competence::{CompetenceConfig, Tracker};
use guardrail::{GuardrailStore, InMemoryGuardrailStore};
use policy::risk::{RiskThresholds, RiskWeights};
use policy::{PolicyCache, PolicyEngine, PolicyEngineConfig};
use std::sync::{Arc, Mutex, OnceLock};
use storage::{
    ApprovalStore, CompetenceStore, EnvelopeStore, IdentityStore, InMemoryApprovalStore,
    InMemoryCompetenceStore, InMemoryEnvelopeStore, InMemoryIdentityStore, InMemoryPolicyStore,
    PolicyStore,
};
use telemetry::PipelineMetrics;

/// Step-wise broker assembly with in-memory defaults.
pub struct BrokerBuilder {
    config: BrokerConfig,
    clock: Option<Arc<dyn Clock>>,
    envelopes: Option<Arc<dyn EnvelopeStore>>,
    policies: Option<Arc<dyn PolicyStore>>,
    identities: Option<Arc<dyn IdentityStore>>,
    approvals: Option<Arc<dyn ApprovalStore>>,
    competence: Option<Arc<dyn CompetenceStore>>,
    ledger: Option<Arc<dyn AuditLedger>>,
    guardrail_store: Option<Arc<dyn GuardrailStore>>,
    registry: Option<Arc<CartridgeRegistry>>,
    notifier: Option<Arc<dyn Notifier>>,
    idempotency: Option<Arc<dyn IdempotencyStore>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl BrokerBuilder {
    /// Start from a configuration.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            clock: None,
            envelopes: None,
            policies: None,
            identities: None,
            approvals: None,
            competence: None,
            ledger: None,
            guardrail_store: None,
            registry: None,
            notifier: None,
            idempotency: None,
            interceptors: Vec::new(),
        }
    }

    /// Substitute the clock (virtual clocks drive expiry tests).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Substitute the envelope store.
    pub fn envelopes(mut self, store: Arc<dyn EnvelopeStore>) -> Self {
        self.envelopes = Some(store);
        self
    }

    /// Substitute the policy store.
    pub fn policies(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.policies = Some(store);
        self
    }

    /// Substitute the identity store.
    pub fn identities(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identities = Some(store);
        self
    }

    /// Substitute the approval store.
    pub fn approvals(mut self, store: Arc<dyn ApprovalStore>) -> Self {
        self.approvals = Some(store);
        self
    }

    /// Substitute the competence store.
    pub fn competence(mut self, store: Arc<dyn CompetenceStore>) -> Self {
        self.competence = Some(store);
        self
    }

    /// Substitute the audit ledger.
    pub fn ledger(mut self, ledger: Arc<dyn AuditLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Substitute the guardrail state store.
    pub fn guardrail_store(mut self, store: Arc<dyn GuardrailStore>) -> Self {
        self.guardrail_store = Some(store);
        self
    }

    /// Share a cartridge registry.
    pub fn registry(mut self, registry: Arc<CartridgeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Substitute the approver notifier.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Substitute the idempotency backend.
    pub fn idempotency(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = Some(store);
        self
    }

    /// Add an execution interceptor.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Assemble the broker and wire cache invalidation to registry changes.
    pub fn build(self) -> Arc<Broker> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let redactor = Redactor::with_extra_patterns(&config.audit_redaction_patterns)
            .unwrap_or_else(|_| Redactor::builtin());
        let ledger = self
            .ledger
            .unwrap_or_else(|| Arc::new(InMemoryLedger::new(redactor, Arc::clone(&clock))));
        let registry = self.registry.unwrap_or_else(|| Arc::new(CartridgeRegistry::new()));
        let policy_cache = Arc::new(PolicyCache::new(config.policy_cache_ttl_ms));
        {
            let cache = Arc::clone(&policy_cache);
            registry.subscribe(move |cartridge_id| cache.invalidate_cartridge(cartridge_id));
        }
        let engine = PolicyEngine::new(PolicyEngineConfig {
            default_decision_deny: true,
            global_rate_limit: config.global_rate_limit(),
        });
        let tracker = Tracker::new(CompetenceConfig {
            decay_per_day: config.competence_decay_per_day,
            ..CompetenceConfig::default()
        });
        let routing = config.routing();
        let idempotency = self
            .idempotency
            .unwrap_or_else(|| Arc::new(InMemoryIdempotencyStore::new(config.idempotency_window_ms)));

        Arc::new(Broker {
            config,
            clock,
            envelopes: self.envelopes.unwrap_or_else(|| Arc::new(InMemoryEnvelopeStore::new())),
            policies: self.policies.unwrap_or_else(|| Arc::new(InMemoryPolicyStore::new())),
            identities: self.identities.unwrap_or_else(|| Arc::new(InMemoryIdentityStore::new())),
            approvals: self.approvals.unwrap_or_else(|| Arc::new(InMemoryApprovalStore::new())),
            competence: self
                .competence
                .unwrap_or_else(|| Arc::new(InMemoryCompetenceStore::new())),
            ledger,
            registry,
            guardrail_store: self
                .guardrail_store
                .unwrap_or_else(|| Arc::new(InMemoryGuardrailStore::new())),
            engine,
            policy_cache,
            risk_weights: RiskWeights::default(),
            risk_thresholds: RiskThresholds::default(),
            routing,
            tracker,
            tokens: ExecutionTokens::new(),
            interceptors: self.interceptors,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
            idempotency,
            metrics: PipelineMetrics::new(),
            queue_tx: OnceLock::new(),
            chain_checkpoint: Mutex::new((0, None)),
        })
    }
}

impl Broker {
    /// A fully in-memory broker (tests, degraded bootstrap).
    pub fn in_memory(config: BrokerConfig) -> Arc<Broker> {
        BrokerBuilder::new(config).build()
    }
}
