//! Arbiter core primitives and shared governance types.

#![deny(unsafe_code)]

/// Version of the Arbiter core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod canon;
pub mod clock;
pub mod decision;
pub mod envelope;
pub mod execute;
pub mod governance;
pub mod ids;
pub mod principal;
pub mod risk;
