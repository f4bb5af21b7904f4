//! Broker configuration, sourced from the environment.

use guardrail::RateLimitRule;

/// How approved envelopes reach execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Execute inside the proposing task.
    Inline,
    /// Hand off to the durable execution queue.
    Queue,
}

/// All broker knobs. `from_env` reads the documented variables and falls
/// back to the defaults below.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Policy-cache TTL (`POLICY_CACHE_TTL_MS`).
    pub policy_cache_ttl_ms: u64,
    /// Broker-wide rate limit (`RATE_LIMIT_MAX` / `RATE_LIMIT_WINDOW_MS`).
    pub rate_limit_max: Option<u32>,
    /// Window for the broker-wide rate limit.
    pub rate_limit_window_ms: u64,
    /// Standard approval window (`APPROVAL_EXPIRY_STANDARD_MS`).
    pub approval_expiry_standard_ms: u64,
    /// Elevated approval window (`APPROVAL_EXPIRY_ELEVATED_MS`).
    pub approval_expiry_elevated_ms: u64,
    /// Mandatory approval window (`APPROVAL_EXPIRY_MANDATORY_MS`).
    pub approval_expiry_mandatory_ms: u64,
    /// Deny envelopes whose approval has no reachable approver
    /// (`DENY_WHEN_NO_APPROVERS`).
    pub deny_when_no_approvers: bool,
    /// Inline or queued execution (`EXECUTION_MODE`).
    pub execution_mode: ExecutionMode,
    /// Queue worker count (`QUEUE_CONCURRENCY`).
    pub queue_concurrency: usize,
    /// Queue attempts per job (`QUEUE_MAX_ATTEMPTS`).
    pub queue_max_attempts: u32,
    /// Exponential backoff base for queue retries.
    pub queue_backoff_base_ms: u64,
    /// Competence decay per idle day (`COMPETENCE_DECAY_PER_DAY`).
    pub competence_decay_per_day: f64,
    /// Idempotency cache window (`IDEMPOTENCY_WINDOW_MS`).
    pub idempotency_window_ms: u64,
    /// Extra audit redaction regexes (`AUDIT_REDACTION_PATTERNS`, comma-separated).
    pub audit_redaction_patterns: Vec<String>,
    /// Approvers used when an identity delegates none.
    pub default_approvers: Vec<String>,
    /// Last-resort approver.
    pub fallback_approver: Option<String>,
    /// Quorum size for mandatory-level approvals, when set.
    pub mandatory_quorum: Option<u32>,
    /// Maximum undo parent-link depth.
    pub undo_chain_max_depth: u32,
    /// Per-cartridge health-check timeout.
    pub health_check_timeout_ms: u64,
    /// Approval-expiry scan interval.
    pub expiry_scan_interval_ms: u64,
    /// Ledger re-verification interval.
    pub chain_verify_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            policy_cache_ttl_ms: 60_000,
            rate_limit_max: None,
            rate_limit_window_ms: 60_000,
            approval_expiry_standard_ms: 86_400_000,
            approval_expiry_elevated_ms: 43_200_000,
            approval_expiry_mandatory_ms: 14_400_000,
            deny_when_no_approvers: true,
            execution_mode: ExecutionMode::Inline,
            queue_concurrency: 5,
            queue_max_attempts: 3,
            queue_backoff_base_ms: 2_000,
            competence_decay_per_day: 2.0,
            idempotency_window_ms: 300_000,
            audit_redaction_patterns: Vec::new(),
            default_approvers: Vec::new(),
            fallback_approver: None,
            mandatory_quorum: None,
            undo_chain_max_depth: 5,
            health_check_timeout_ms: 3_000,
            expiry_scan_interval_ms: 60_000,
            chain_verify_interval_ms: 86_400_000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

impl BrokerConfig {
    /// Read configuration from the environment over the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<u64>("POLICY_CACHE_TTL_MS") {
            cfg.policy_cache_ttl_ms = v;
        }
        cfg.rate_limit_max = env_parse::<u32>("RATE_LIMIT_MAX");
        if let Some(v) = env_parse::<u64>("RATE_LIMIT_WINDOW_MS") {
            cfg.rate_limit_window_ms = v;
        }
        if let Some(v) = env_parse::<u64>("APPROVAL_EXPIRY_STANDARD_MS") {
            cfg.approval_expiry_standard_ms = v;
        }
        if let Some(v) = env_parse::<u64>("APPROVAL_EXPIRY_ELEVATED_MS") {
            cfg.approval_expiry_elevated_ms = v;
        }
        if let Some(v) = env_parse::<u64>("APPROVAL_EXPIRY_MANDATORY_MS") {
            cfg.approval_expiry_mandatory_ms = v;
        }
        if let Some(v) = env_parse::<bool>("DENY_WHEN_NO_APPROVERS") {
            cfg.deny_when_no_approvers = v;
        }
        if let Ok(mode) = std::env::var("EXECUTION_MODE") {
            cfg.execution_mode = match mode.as_str() {
                "queue" => ExecutionMode::Queue,
                _ => ExecutionMode::Inline,
            };
        }
        if let Some(v) = env_parse::<usize>("QUEUE_CONCURRENCY") {
            cfg.queue_concurrency = v.max(1);
        }
        if let Some(v) = env_parse::<u32>("QUEUE_MAX_ATTEMPTS") {
            cfg.queue_max_attempts = v.max(1);
        }
        if let Some(v) = env_parse::<f64>("COMPETENCE_DECAY_PER_DAY") {
            cfg.competence_decay_per_day = v;
        }
        if let Some(v) = env_parse::<u64>("IDEMPOTENCY_WINDOW_MS") {
            cfg.idempotency_window_ms = v;
        }
        if let Ok(patterns) = std::env::var("AUDIT_REDACTION_PATTERNS") {
            cfg.audit_redaction_patterns = patterns
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        cfg
    }

    /// The broker-wide rate-limit rule, when configured.
    pub fn global_rate_limit(&self) -> Option<RateLimitRule> {
        self.rate_limit_max.map(|max| RateLimitRule {
            scope: "global".into(),
            max,
            window_ms: self.rate_limit_window_ms,
        })
    }

    /// Routing configuration derived from the expiry and approver knobs.
    pub fn routing(&self) -> approval::RoutingConfig {
        approval::RoutingConfig {
            standard_expiry_ms: self.approval_expiry_standard_ms,
            elevated_expiry_ms: self.approval_expiry_elevated_ms,
            mandatory_expiry_ms: self.approval_expiry_mandatory_ms,
            default_approvers: self.default_approvers.clone(),
            fallback_approver: self.fallback_approver.clone(),
        }
    }
}
