//! Cartridge contract and guarded execution.
//!
//! A cartridge is the only legal mutation surface toward an external system.
//! The broker never calls a cartridge's `execute` directly: it mints an
//! execution permit, binds it to a [`GuardedCartridge`], and the guard
//! enforces the permit plus the interceptor chain. Anything else fails with
//! `direct-execution-forbidden` — an invariant breach, not a user error.

#![deny(unsafe_code)]

mod contract;
mod guarded;
mod manifest;
mod registry;

pub use contract::{
    Cartridge, CartridgeContext, CartridgeError, EntityResolution, EntityResolver, EntitySearcher,
    HaltTarget, HealthState, HealthStatus,
};
pub use guarded::{ExecutionTokens, Gate, GuardedCartridge, Interceptor};
pub use manifest::{ActionSpec, CartridgeManifest};
pub use registry::{CartridgeRegistry, RegistryError};
