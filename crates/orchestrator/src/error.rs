//! Broker errors.

use thiserror::Error;

/// Errors surfaced by broker operations. Value-level outcomes (denied,
/// clarification, not-found) are not errors; they flow as data.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Malformed request; nothing was created.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The named cartridge is not registered.
    #[error("unknown cartridge: {0}")]
    UnknownCartridge(String),
    /// No unique cartridge serves the action type.
    #[error("cannot infer cartridge: {0}")]
    CannotInferCartridge(String),
    /// The approval id does not exist.
    #[error("unknown approval: {0}")]
    UnknownApproval(String),
    /// The responder is neither a listed approver nor delegated one.
    #[error("approver '{0}' is not authorized for this approval")]
    UnauthorizedApprover(String),
    /// Approval-layer failure (stale version, binding mismatch, ...).
    #[error(transparent)]
    Approval(#[from] approval::ApprovalError),
    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] storage::StorageError),
    /// Cartridge failure not classified as transient.
    #[error(transparent)]
    Cartridge(#[from] cartridge::CartridgeError),
    /// Audit ledger failure.
    #[error(transparent)]
    Audit(#[from] audit_log::AuditError),
    /// Registry failure (version conflicts, inference).
    #[error(transparent)]
    Registry(#[from] cartridge::RegistryError),
    /// Transient execution failure; the queue retries these.
    #[error("transient execution failure: {0}")]
    TransientExecution(String),
    /// The envelope has no usable undo recipe.
    #[error("undo unavailable: {0}")]
    UndoUnavailable(String),
    /// The undo parent chain reached the depth ceiling.
    #[error("undo chain too deep (limit {0})")]
    UndoChainTooDeep(u32),
    /// The operation does not apply to the envelope's current status.
    #[error("invalid envelope state: {0}")]
    InvalidState(String),
    /// The execution queue is not running.
    #[error("execution queue unavailable")]
    QueueUnavailable,
}
