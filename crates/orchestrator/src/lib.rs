//! Arbiter lifecycle orchestrator.
//!
//! The broker sits between agent callers and external effectful systems.
//! Every mutating call arrives as a proposal; the broker resolves entities,
//! enriches context through the target cartridge, resolves the effective
//! identity, scores risk, evaluates policy, and either auto-executes, queues
//! behind a human approval, or denies. Executions run through the guarded
//! cartridge wrapper under a minted permit, and every decision lands on the
//! hash-chained audit ledger.

#![deny(unsafe_code)]

mod broker;
mod builder;
mod config;
mod error;
mod idempotency;
mod jobs;
mod notify;
mod queue;

pub use broker::{
    Broker, CartridgeHealth, EntityRef, HaltOutcome, ProposeOutcome, ProposeRequest,
    RespondOutcome, RespondRequest, ResponseAction,
};
pub use builder::BrokerBuilder;
pub use config::{BrokerConfig, ExecutionMode};
pub use error::BrokerError;
pub use idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
pub use jobs::{start_chain_verify_job, start_expiry_job, JobHandle};
pub use notify::{NoopNotifier, NotificationPayload, Notifier};
pub use queue::{DeadLetter, ExecuteJob, ExecutionQueue};
