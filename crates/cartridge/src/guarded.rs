//! Guarded cartridge wrapper: execution permits and the interceptor chain.

use crate::contract::{Cartridge, CartridgeContext, CartridgeError};
use arbiter_core::execute::ExecuteResult;
use arbiter_core::ids::new_execution_token;
use arbiter_core::risk::RiskInput;
use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Process-wide set of live execution permits. The orchestrator mints one
/// per execution; anything without one cannot drive a guarded cartridge.
#[derive(Clone, Default)]
pub struct ExecutionTokens {
    inner: Arc<DashSet<String>>,
}

impl ExecutionTokens {
    /// Fresh empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint and register a permit.
    pub fn begin(&self) -> String {
        let token = new_execution_token();
        self.inner.insert(token.clone());
        token
    }

    /// Retire a permit. Idempotent.
    pub fn end(&self, token: &str) {
        self.inner.remove(token);
    }

    /// Whether a permit is live.
    pub fn is_active(&self, token: &str) -> bool {
        self.inner.contains(token)
    }
}

/// Gate outcome from a `before_execute` interceptor.
#[derive(Debug, Clone)]
pub enum Gate {
    /// Continue with (possibly transformed) parameters.
    Proceed(JsonValue),
    /// Stop; the reason lands in the synthetic failed result.
    Veto {
        /// Operator-facing veto reason.
        reason: String,
    },
}

/// Hooks running around each guarded execution phase. All default to no-ops.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Transform parameters before context enrichment.
    async fn before_enrich(
        &self,
        action_type: &str,
        parameters: JsonValue,
        ctx: &CartridgeContext,
    ) -> Result<JsonValue, CartridgeError> {
        let _ = (action_type, ctx);
        Ok(parameters)
    }

    /// Gate the execution; a veto produces a synthetic failed result.
    async fn before_execute(
        &self,
        action_type: &str,
        parameters: JsonValue,
        ctx: &CartridgeContext,
    ) -> Result<Gate, CartridgeError> {
        let _ = (action_type, ctx);
        Ok(Gate::Proceed(parameters))
    }

    /// Transform the result (attach or scrub undo recipes, redact refs).
    async fn after_execute(
        &self,
        action_type: &str,
        parameters: &JsonValue,
        result: ExecuteResult,
        ctx: &CartridgeContext,
    ) -> Result<ExecuteResult, CartridgeError> {
        let _ = (action_type, parameters, ctx);
        Ok(result)
    }
}

/// Wraps a cartridge so that execution is only reachable with a bound, live
/// permit, with interceptors applied around every phase.
pub struct GuardedCartridge {
    inner: Arc<dyn Cartridge>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    tokens: ExecutionTokens,
    bound: Mutex<Option<String>>,
}

impl GuardedCartridge {
    /// Wrap a cartridge with an interceptor chain and the shared permit set.
    pub fn new(
        inner: Arc<dyn Cartridge>,
        interceptors: Vec<Arc<dyn Interceptor>>,
        tokens: ExecutionTokens,
    ) -> Self {
        Self { inner, interceptors, tokens, bound: Mutex::new(None) }
    }

    /// The wrapped cartridge's manifest.
    pub fn manifest(&self) -> &crate::CartridgeManifest {
        self.inner.manifest()
    }

    /// The wrapped cartridge, for capability accessors and read paths.
    pub fn inner(&self) -> &Arc<dyn Cartridge> {
        &self.inner
    }

    /// Attach a permit ahead of `execute`.
    pub fn bind_token(&self, token: &str) {
        *self.bound.lock().expect("token lock poisoned") = Some(token.to_string());
    }

    /// Detach the permit. Callers do this on every exit path.
    pub fn unbind_token(&self) {
        *self.bound.lock().expect("token lock poisoned") = None;
    }

    /// Run `before_enrich` interceptors, then the cartridge's enrichment.
    /// Returns the enriched context and the (possibly transformed) parameters.
    pub async fn enrich_context(
        &self,
        action_type: &str,
        parameters: JsonValue,
        ctx: &CartridgeContext,
    ) -> Result<(CartridgeContext, JsonValue), CartridgeError> {
        let mut params = parameters;
        for interceptor in &self.interceptors {
            params = interceptor.before_enrich(action_type, params, ctx).await?;
        }
        let enriched = self.inner.enrich_context(action_type, &params, ctx).await?;
        Ok((enriched, params))
    }

    /// Risk input pass-through (read path, no permit needed).
    pub async fn risk_input(
        &self,
        action_type: &str,
        parameters: &JsonValue,
        ctx: &CartridgeContext,
    ) -> Result<RiskInput, CartridgeError> {
        self.inner.risk_input(action_type, parameters, ctx).await
    }

    /// Execute through the guard: permit check, `before_execute` gate,
    /// cartridge call, `after_execute` transforms.
    pub async fn execute(
        &self,
        action_type: &str,
        parameters: JsonValue,
        ctx: &CartridgeContext,
    ) -> Result<ExecuteResult, CartridgeError> {
        let bound = self.bound.lock().expect("token lock poisoned").clone();
        let authorized = bound.as_deref().map_or(false, |t| self.tokens.is_active(t));
        if !authorized {
            warn!(action_type, cartridge = %self.inner.manifest().id, "execute without permit");
            return Err(CartridgeError::DirectExecutionForbidden);
        }

        let mut params = parameters;
        for interceptor in &self.interceptors {
            match interceptor.before_execute(action_type, params, ctx).await? {
                Gate::Proceed(p) => params = p,
                Gate::Veto { reason } => return Ok(ExecuteResult::vetoed(reason)),
            }
        }

        let mut result = self.inner.execute(action_type, &params, ctx).await?;
        for interceptor in &self.interceptors {
            result = interceptor.after_execute(action_type, &params, result, ctx).await?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ActionSpec, CartridgeManifest};
    use arbiter_core::risk::BaseRisk;
    use serde_json::json;

    struct Echo {
        manifest: CartridgeManifest,
    }

    impl Echo {
        fn new() -> Self {
            Self {
                manifest: CartridgeManifest {
                    id: "echo".into(),
                    name: "Echo".into(),
                    version: "1.0.0".into(),
                    actions: vec![ActionSpec {
                        action_type: "echo.say".into(),
                        name: "Say".into(),
                        description: String::new(),
                        parameters_schema: json!({"type": "object"}),
                        base_risk_category: BaseRisk::Low,
                        reversible: false,
                    }],
                    required_connections: vec![],
                },
            }
        }
    }

    #[async_trait]
    impl Cartridge for Echo {
        fn manifest(&self) -> &CartridgeManifest {
            &self.manifest
        }

        async fn enrich_context(
            &self,
            _action_type: &str,
            _parameters: &JsonValue,
            ctx: &CartridgeContext,
        ) -> Result<CartridgeContext, CartridgeError> {
            Ok(ctx.clone())
        }

        async fn risk_input(
            &self,
            _action_type: &str,
            _parameters: &JsonValue,
            _ctx: &CartridgeContext,
        ) -> Result<RiskInput, CartridgeError> {
            Ok(RiskInput::default())
        }

        async fn execute(
            &self,
            _action_type: &str,
            parameters: &JsonValue,
            _ctx: &CartridgeContext,
        ) -> Result<ExecuteResult, CartridgeError> {
            Ok(ExecuteResult {
                success: true,
                summary: format!("echoed {}", parameters),
                external_refs: vec![],
                rollback_available: false,
                partial_failures: vec![],
                duration_ms: 1,
                undo_recipe: None,
            })
        }

        async fn health_check(&self) -> crate::HealthStatus {
            crate::HealthStatus {
                status: crate::HealthState::Connected,
                latency_ms: 1,
                error: None,
                capabilities: vec![],
            }
        }
    }

    struct UpperCaser;

    #[async_trait]
    impl Interceptor for UpperCaser {
        async fn before_execute(
            &self,
            _action_type: &str,
            parameters: JsonValue,
            _ctx: &CartridgeContext,
        ) -> Result<Gate, CartridgeError> {
            let mut p = parameters;
            if let Some(JsonValue::String(s)) = p.get_mut("text") {
                *s = s.to_uppercase();
            }
            Ok(Gate::Proceed(p))
        }
    }

    struct DenyAll;

    #[async_trait]
    impl Interceptor for DenyAll {
        async fn before_execute(
            &self,
            _action_type: &str,
            _parameters: JsonValue,
            _ctx: &CartridgeContext,
        ) -> Result<Gate, CartridgeError> {
            Ok(Gate::Veto { reason: "blocked by test".into() })
        }
    }

    fn ctx() -> CartridgeContext {
        CartridgeContext::new("agent-1", "org-1", None)
    }

    #[tokio::test]
    async fn execute_without_permit_is_forbidden() {
        let guarded =
            GuardedCartridge::new(Arc::new(Echo::new()), vec![], ExecutionTokens::new());
        let err = guarded.execute("echo.say", json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, CartridgeError::DirectExecutionForbidden));
    }

    #[tokio::test]
    async fn bound_live_permit_allows_execution() {
        let tokens = ExecutionTokens::new();
        let guarded = GuardedCartridge::new(Arc::new(Echo::new()), vec![], tokens.clone());
        let token = tokens.begin();
        guarded.bind_token(&token);
        let result = guarded.execute("echo.say", json!({}), &ctx()).await.unwrap();
        assert!(result.success);
        guarded.unbind_token();
        tokens.end(&token);
        // A retired permit no longer authorizes anything.
        guarded.bind_token(&token);
        let err = guarded.execute("echo.say", json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, CartridgeError::DirectExecutionForbidden));
    }

    #[tokio::test]
    async fn interceptor_transforms_parameters() {
        let tokens = ExecutionTokens::new();
        let guarded = GuardedCartridge::new(
            Arc::new(Echo::new()),
            vec![Arc::new(UpperCaser)],
            tokens.clone(),
        );
        let token = tokens.begin();
        guarded.bind_token(&token);
        let result =
            guarded.execute("echo.say", json!({"text": "quiet"}), &ctx()).await.unwrap();
        assert!(result.summary.contains("QUIET"));
    }

    #[tokio::test]
    async fn veto_produces_synthetic_failure() {
        let tokens = ExecutionTokens::new();
        let guarded =
            GuardedCartridge::new(Arc::new(Echo::new()), vec![Arc::new(DenyAll)], tokens.clone());
        let token = tokens.begin();
        guarded.bind_token(&token);
        let result = guarded.execute("echo.say", json!({}), &ctx()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.partial_failures[0].error, "blocked by test");
    }
}
