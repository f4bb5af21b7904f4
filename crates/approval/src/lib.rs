//! Approval routing and the payload-bound approval state machine.
//!
//! Requests are immutable and carry a binding hash over the exact payload
//! they authorize; responses re-verify it, so a silently mutated payload can
//! never ride an existing approval. State transitions happen only from
//! `pending`, bump an optimistic version, and serialize concurrent responders
//! by rejecting stale writers.

#![deny(unsafe_code)]

mod delegation;
mod machine;
mod request;
mod router;

pub use delegation::{
    narrow_scope, resolve_delegation_chain, scope_covers, ChainOptions, DelegationResolution,
    DelegationRule,
};
pub use machine::{approve, expire, is_expired, patch, reject, ApprovalError};
pub use request::{
    binding_hash, ApprovalRequest, ApprovalState, ApprovalStatus, ExpiredBehavior, QuorumEntry,
    QuorumProgress, QuorumRule,
};
pub use router::{route, RoutedApproval, RoutingConfig};
