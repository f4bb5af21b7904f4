//! Storage errors.

use thiserror::Error;

/// Errors emitted by the store traits.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested record does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Record kind (envelope, approval, ...).
        kind: &'static str,
        /// Record id.
        id: String,
    },
    /// Optimistic concurrency conflict: the writer observed an older version.
    #[error("stale version on {kind} '{id}': expected {expected}, found {found}")]
    StaleVersion {
        /// Record kind.
        kind: &'static str,
        /// Record id.
        id: String,
        /// Version the writer supplied.
        expected: u64,
        /// Version actually stored.
        found: u64,
    },
    /// Backend failure (connectivity, serialization).
    #[error("storage backend error: {0}")]
    Backend(String),
}
