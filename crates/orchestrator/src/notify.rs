//! Approver notification: best-effort, injected, opaque to the core.

use arbiter_core::risk::RiskCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Payload handed to the external notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Approval request id.
    pub approval_id: String,
    /// Envelope the approval gates.
    pub envelope_id: String,
    /// Human-readable summary.
    pub summary: String,
    /// Risk category of the gated action.
    pub risk_category: RiskCategory,
    /// Binding hash the approver should confirm.
    pub binding_hash: String,
    /// Expiry deadline (ms since epoch).
    pub expires_at_ms: u64,
    /// Approvers to reach.
    pub approvers: Vec<String>,
}

/// Delivery channel for approval notifications. Failures are logged, never
/// propagated; a missed ping must not fail the proposal.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification.
    async fn notify(&self, payload: &NotificationPayload) -> Result<(), String>;
}

/// Default notifier: drops everything.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _payload: &NotificationPayload) -> Result<(), String> {
        Ok(())
    }
}
