//! Telemetry: JSON structured logging and in-process pipeline metrics.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Telemetry setup errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// OTel pipeline setup failed.
    #[error("otel setup failed: {0}")]
    Otel(String),
}

/// Initialize structured logging (JSON) with env filter.
/// Set RUST_LOG, e.g., "info,policy=debug".
pub fn init_json_logging() {
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Initialize OpenTelemetry metrics (optional; behind `otel` feature).
#[cfg(feature = "otel")]
pub mod metrics {
    //! OTel metric instruments for the governance pipeline.
    use super::TelemetryError;
    use once_cell::sync::OnceCell;
    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Meter, Unit};
    use opentelemetry::KeyValue;

    static METRICS_INIT: OnceCell<()> = OnceCell::new();

    fn init_metrics_from_env() -> Result<(), TelemetryError> {
        let provider = opentelemetry_otlp::new_pipeline()
            .metrics(opentelemetry_sdk::runtime::Tokio)
            .with_exporter(opentelemetry_otlp::new_exporter().http())
            .build()
            .map_err(|e| TelemetryError::Otel(e.to_string()))?;
        global::set_meter_provider(provider);
        Ok(())
    }

    fn ensure_metrics_provider() {
        let _ = METRICS_INIT.get_or_init(|| {
            let _ = init_metrics_from_env();
        });
    }

    /// Pipeline counters exported over OTLP.
    #[derive(Clone)]
    pub struct PipelineInstruments {
        proposals: Counter<u64>,
        executions: Counter<u64>,
        audit_appends: Counter<u64>,
    }

    impl PipelineInstruments {
        /// Count one proposal with its outcome label.
        pub fn proposal(&self, outcome: &'static str) {
            self.proposals.add(1, &[KeyValue::new("outcome", outcome)]);
        }
        /// Count one execution with its success label.
        pub fn execution(&self, success: bool) {
            self.executions.add(1, &[KeyValue::new("success", success)]);
        }
        /// Count one audit append.
        pub fn audit_append(&self) {
            self.audit_appends.add(1, &[]);
        }
    }

    /// Build (and lazily initialize) the pipeline instruments.
    pub fn init_pipeline_instruments() -> PipelineInstruments {
        ensure_metrics_provider();
        let meter: Meter = global::meter("arbiter.pipeline");
        PipelineInstruments {
            proposals: meter
                .u64_counter("arbiter.proposals.total")
                .with_description("Proposals by outcome")
                .init(),
            executions: meter
                .u64_counter("arbiter.executions.total")
                .with_description("Executions by success")
                .with_unit(Unit::new("1"))
                .init(),
            audit_appends: meter
                .u64_counter("arbiter.audit.appended.total")
                .with_description("Audit entries appended")
                .init(),
        }
    }
}

/// In-process pipeline metrics: counters keyed by `{name, label}` plus
/// simple duration histograms. Low-cardinality by construction; intended
/// for tests and local observability.
#[derive(Clone, Default)]
pub struct PipelineMetrics {
    counters: Arc<Mutex<HashMap<String, u64>>>,
    durations: Arc<Mutex<HashMap<&'static str, Vec<u64>>>>,
}

impl PipelineMetrics {
    /// Fresh empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn inc(&self, name: &str, label: &str) {
        let mut g = self.counters.lock().expect("metrics lock poisoned");
        *g.entry(format!("{}:{}", name, label)).or_insert(0) += 1;
    }

    /// Count one proposal by outcome (`approved`, `pending_approval`,
    /// `denied`, `not_found`, `needs_clarification`).
    pub fn proposal(&self, outcome: &str) {
        self.inc("proposals_total", outcome);
    }

    /// Count one approval creation by level.
    pub fn approval_created(&self, level: &str) {
        self.inc("approvals_created_total", level);
    }

    /// Count one approval response by action.
    pub fn approval_responded(&self, action: &str) {
        self.inc("approvals_responded_total", action);
    }

    /// Count one execution by success.
    pub fn execution(&self, success: bool) {
        self.inc("executions_total", if success { "true" } else { "false" });
    }

    /// Count one audit append.
    pub fn audit_appended(&self) {
        self.inc("audit_appended_total", "");
    }

    /// Count one detected audit-chain break.
    pub fn chain_break(&self) {
        self.inc("chain_breaks_total", "");
    }

    /// Record a policy-evaluation duration.
    pub fn policy_eval_ms(&self, ms: u64) {
        self.observe("policy_eval_ms", ms);
    }

    /// Record an execution duration.
    pub fn execute_ms(&self, ms: u64) {
        self.observe("execute_ms", ms);
    }

    /// Record a queue-wait duration.
    pub fn queue_wait_ms(&self, ms: u64) {
        self.observe("queue_wait_ms", ms);
    }

    fn observe(&self, name: &'static str, ms: u64) {
        let mut g = self.durations.lock().expect("metrics lock poisoned");
        g.entry(name).or_default().push(ms);
    }

    /// Read a counter for `{name, label}`.
    pub fn counter(&self, name: &str, label: &str) -> u64 {
        let key = format!("{}:{}", name, label);
        self.counters.lock().expect("metrics lock poisoned").get(&key).copied().unwrap_or(0)
    }

    /// Sample count of a duration histogram.
    pub fn duration_samples(&self, name: &str) -> usize {
        self.durations
            .lock()
            .expect("metrics lock poisoned")
            .get(name)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_by_label() {
        let m = PipelineMetrics::new();
        m.proposal("approved");
        m.proposal("approved");
        m.proposal("denied");
        assert_eq!(m.counter("proposals_total", "approved"), 2);
        assert_eq!(m.counter("proposals_total", "denied"), 1);
        assert_eq!(m.counter("proposals_total", "expired"), 0);
    }

    #[test]
    fn durations_record_samples() {
        let m = PipelineMetrics::new();
        m.policy_eval_ms(3);
        m.policy_eval_ms(5);
        m.execute_ms(40);
        assert_eq!(m.duration_samples("policy_eval_ms"), 2);
        assert_eq!(m.duration_samples("execute_ms"), 1);
        assert_eq!(m.duration_samples("queue_wait_ms"), 0);
    }

    #[test]
    fn execution_counter_uses_success_label() {
        let m = PipelineMetrics::new();
        m.execution(true);
        m.execution(false);
        m.execution(true);
        assert_eq!(m.counter("executions_total", "true"), 2);
        assert_eq!(m.counter("executions_total", "false"), 1);
    }
}
