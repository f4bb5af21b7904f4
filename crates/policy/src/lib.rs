//! Arbiter governance policy engine.
//!
//! This crate provides a deterministic, fail-closed policy engine used to
//! guard proposed actions. The security baseline is deny-on-silence: if no
//! policy matches a candidate action, the decision defaults to Deny.
//!
//! Precedence and determinism:
//! 1) Policies apply in ascending priority (ties broken by id sort)
//! 2) The first matching terminal effect (allow | deny) wins
//! 3) `require_approval` raises the approval floor and evaluation continues
//! 4) `transform` merges parameter overrides and evaluation continues; later
//!    policies observe the transformed parameters
//! 5) Identity checks (forbidden/trust), rate limits, cooldowns, and
//!    protected entities run independently of policy matches
//!
//! Every check contributes a line to the decision trace, so operators can
//! reconstruct exactly why an action was allowed, queued, or denied.

#![deny(unsafe_code)]

mod cache;
mod condition;
mod engine;
mod file;
pub mod risk;
mod types;

pub use cache::PolicyCache;
pub use condition::{flatten_value, Composition, EvalContext, Operator, Rule};
pub use engine::{
    CandidateAction, EvaluationOutcome, EvaluationRequest, PolicyEngine, PolicyEngineConfig,
};
pub use file::load_policy_file;
pub use types::{Policy, PolicyEffect};
