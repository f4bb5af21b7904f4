//! ID utilities: monotonic ids, entity-prefixed ids, and trace ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a new monotonic identifier (starts at 1).
pub fn next_monotonic_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Milliseconds since UNIX epoch (for timestamps).
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

/// Opaque trace identifier (UUID v4 string).
pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fresh envelope identifier.
pub fn new_envelope_id() -> String {
    format!("env-{}", Uuid::new_v4())
}

/// Fresh approval-request identifier.
pub fn new_approval_id() -> String {
    format!("apr-{}", Uuid::new_v4())
}

/// Fresh audit-entry identifier (ordered by the monotonic counter).
pub fn new_audit_id() -> String {
    format!("aud-{}", next_monotonic_id())
}

/// Fresh execution-permit token. Opaque; uniqueness is the only contract.
pub fn new_execution_token() -> String {
    format!("exec-{}", Uuid::new_v4())
}
