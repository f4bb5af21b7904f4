//! Periodic jobs: approval expiry and ledger re-verification.

use crate::broker::Broker;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Handle over a periodic job. Stopping waits for the in-flight scan.
pub struct JobHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl JobHandle {
    /// Signal the job to stop and wait for its current iteration.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

/// Start the approval-expiry scan at the configured interval.
pub fn start_expiry_job(broker: Arc<Broker>) -> JobHandle {
    let interval_ms = broker.config().expiry_scan_interval_ms;
    let (stop, mut stop_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    match broker.expire_stale_approvals().await {
                        Ok(0) => {}
                        Ok(n) => info!(expired = n, "expired stale approvals"),
                        Err(e) => warn!(error = %e, "approval expiry scan failed"),
                    }
                }
            }
        }
    });
    JobHandle { stop, handle }
}

/// Start periodic ledger re-verification from the last checkpoint.
pub fn start_chain_verify_job(broker: Arc<Broker>) -> JobHandle {
    let interval_ms = broker.config().chain_verify_interval_ms;
    let (stop, mut stop_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    match broker.verify_ledger().await {
                        Ok(true) => {}
                        Ok(false) => warn!("audit chain verification found a break"),
                        Err(e) => warn!(error = %e, "chain verification failed to run"),
                    }
                }
            }
        }
    });
    JobHandle { stop, handle }
}
