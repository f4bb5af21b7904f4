//! Hash-chained, tamper-evident audit ledger.
//!
//! Every governance decision and execution appends exactly one entry. Entries
//! are sealed under a writer lock: the ledger reads the current last entry
//! hash, links it as `previous_entry_hash`, and computes `entry_hash` as the
//! SHA-256 of the canonical JSON of the entry minus `entry_hash`. The sequence
//! forms an unbroken chain; `verify_chain` detects any byte of tampering.
//!
//! Snapshots pass through redaction before sealing, so secrets never enter
//! the hash input. Redacted field paths are recorded on the entry itself.

#![deny(unsafe_code)]

mod entry;
mod ledger;
mod redact;

pub use entry::{AuditDraft, AuditEntry, VisibilityLevel};
pub use ledger::{verify_chain, AuditError, AuditLedger, ChainVerdict, InMemoryLedger};
pub use redact::Redactor;

/// Stable event-type labels appended by the broker.
pub mod event {
    /// A proposal entered governance.
    pub const ACTION_PROPOSED: &str = "action.proposed";
    /// A proposal was denied by policy or approval response.
    pub const ACTION_DENIED: &str = "action.denied";
    /// An approved action executed successfully.
    pub const ACTION_EXECUTED: &str = "action.executed";
    /// An approved action failed terminally.
    pub const ACTION_FAILED: &str = "action.failed";
    /// A pending approval elapsed and its envelope expired.
    pub const ACTION_APPROVAL_EXPIRED: &str = "action.approval_expired";
    /// An executed action was reversed by its undo envelope.
    pub const ACTION_ROLLED_BACK: &str = "action.rolled_back";
    /// An approval request was created and routed.
    pub const APPROVAL_CREATED: &str = "approval.created";
    /// An approver responded (approve/reject/patch).
    pub const APPROVAL_RESPONDED: &str = "approval.responded";
    /// A principal's competence crossed the promotion threshold.
    pub const COMPETENCE_PROMOTED: &str = "competence.promoted";
    /// A principal's competence fell below the demotion threshold.
    pub const COMPETENCE_DEMOTED: &str = "competence.demoted";
    /// The periodic verifier found a broken chain link.
    pub const CHAIN_BROKEN: &str = "audit.chain_broken";
    /// An organization was moved to the locked governance profile.
    pub const EMERGENCY_HALT: &str = "governance.emergency_halt";
}
