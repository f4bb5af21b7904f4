//! Storage traits and in-memory implementations.
//!
//! All stores are async so implementations can sit on a shared database;
//! the in-memory versions back tests and the degraded bootstrap mode. Writes
//! that race are serialized by optimistic version checks: writers supply the
//! version they observed and stale writers get a conflict error.

#![deny(unsafe_code)]

mod error;
mod memory;
mod traits;

pub use error::StorageError;
pub use memory::{
    InMemoryApprovalStore, InMemoryCompetenceStore, InMemoryEnvelopeStore, InMemoryIdentityStore,
    InMemoryPolicyStore,
};
pub use traits::{
    ApprovalStore, CompetenceStore, EnvelopeFilter, EnvelopeStore, IdentityStore, PolicyStore,
};
