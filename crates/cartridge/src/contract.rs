//! The cartridge trait and its capability interfaces.

use crate::manifest::CartridgeManifest;
use arbiter_core::envelope::ResolvedEntity;
use arbiter_core::execute::ExecuteResult;
use arbiter_core::risk::RiskInput;
use async_trait::async_trait;
use guardrail::GuardrailSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Errors surfaced by cartridge calls.
#[derive(Debug, Error)]
pub enum CartridgeError {
    /// The external system is unreachable or refused the call.
    #[error("cartridge unavailable: {0}")]
    Unavailable(String),
    /// The action type is not in the manifest.
    #[error("unknown action type: {0}")]
    UnknownAction(String),
    /// Parameters failed manifest schema validation.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// `execute` was called without a bound, active execution permit.
    #[error("direct execution forbidden: no active execution permit")]
    DirectExecutionForbidden,
    /// Any other cartridge-internal failure.
    #[error("cartridge failure: {0}")]
    Internal(String),
}

/// Per-call context handed to cartridge methods. Enrichment returns a new
/// context with more metadata; nothing is patched in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CartridgeContext {
    /// Proposing principal.
    pub principal_id: String,
    /// Owning organization.
    pub organization_id: String,
    /// Correlation trace id.
    pub trace_id: Option<String>,
    /// Cartridge-enriched metadata, flattened into policy evaluation.
    pub metadata: serde_json::Map<String, JsonValue>,
}

impl CartridgeContext {
    /// Fresh context for one proposal.
    pub fn new(
        principal_id: impl Into<String>,
        organization_id: impl Into<String>,
        trace_id: Option<String>,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            organization_id: organization_id.into(),
            trace_id,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Outcome of resolving one external entity reference.
#[derive(Debug, Clone)]
pub enum EntityResolution {
    /// Unambiguous match.
    Resolved(ResolvedEntity),
    /// No match; the explanation goes back to the caller as data.
    NotFound {
        /// Why nothing matched.
        explanation: String,
    },
    /// Multiple plausible matches; the question goes back to the caller.
    Ambiguous {
        /// Clarifying question for the caller.
        question: String,
        /// Candidates, highest confidence first.
        alternatives: Vec<ResolvedEntity>,
    },
}

/// Connection health of a cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Fully reachable.
    Connected,
    /// Reachable with elevated latency or partial capability.
    Degraded,
    /// Unreachable.
    Disconnected,
}

/// Health-check report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Connection state.
    pub status: HealthState,
    /// Probe latency.
    pub latency_ms: u64,
    /// Error text when degraded or disconnected.
    pub error: Option<String>,
    /// Capability names currently served.
    pub capabilities: Vec<String>,
}

/// Optional capability: resolving caller-supplied entity references.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Resolve one reference of the given entity type.
    async fn resolve_entity(
        &self,
        input_ref: &str,
        entity_type: &str,
    ) -> Result<EntityResolution, CartridgeError>;
}

/// One active entity the emergency-halt loop should pause.
#[derive(Debug, Clone)]
pub struct HaltTarget {
    /// External entity id.
    pub entity_id: String,
    /// Action type that pauses it.
    pub action_type: String,
    /// Parameters for the pause proposal.
    pub parameters: JsonValue,
}

/// Optional capability: enumerating active effectful entities, used by the
/// emergency-halt search-and-propose loop.
#[async_trait]
pub trait EntitySearcher: Send + Sync {
    /// Currently-active entities with the action that pauses each.
    async fn search_active_entities(
        &self,
        organization_id: &str,
    ) -> Result<Vec<HaltTarget>, CartridgeError>;
}

/// A pluggable integration with one external system.
///
/// Optional capabilities are exposed through explicit accessors rather than
/// runtime probing; the default accessors advertise nothing.
#[async_trait]
pub trait Cartridge: Send + Sync {
    /// Static manifest.
    fn manifest(&self) -> &CartridgeManifest;

    /// One-time initialization with connection context.
    async fn initialize(&self, ctx: &CartridgeContext) -> Result<(), CartridgeError> {
        let _ = ctx;
        Ok(())
    }

    /// Enrich the call context with external state (entity status, spend,
    /// pacing). Returns a new context.
    async fn enrich_context(
        &self,
        action_type: &str,
        parameters: &JsonValue,
        ctx: &CartridgeContext,
    ) -> Result<CartridgeContext, CartridgeError>;

    /// Risk input for one candidate action.
    async fn risk_input(
        &self,
        action_type: &str,
        parameters: &JsonValue,
        ctx: &CartridgeContext,
    ) -> Result<RiskInput, CartridgeError>;

    /// Execute the external mutation. Reversible actions return an undo
    /// recipe on the result. Only reachable through [`crate::GuardedCartridge`].
    async fn execute(
        &self,
        action_type: &str,
        parameters: &JsonValue,
        ctx: &CartridgeContext,
    ) -> Result<ExecuteResult, CartridgeError>;

    /// Guardrails the policy engine enforces for this cartridge.
    fn guardrails(&self) -> GuardrailSpec {
        GuardrailSpec::default()
    }

    /// Probe the external connection.
    async fn health_check(&self) -> HealthStatus;

    /// Entity-resolution capability, when supported.
    fn entity_resolver(&self) -> Option<&dyn EntityResolver> {
        None
    }

    /// Active-entity search capability, when supported.
    fn entity_searcher(&self) -> Option<&dyn EntitySearcher> {
        None
    }
}
