//! Durable execution queue: N workers, exponential retry on transient
//! failures, dead-letter capture after exhaustion.

use crate::broker::Broker;
use crate::error::BrokerError;
use arbiter_core::envelope::EnvelopeStatus;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One queued execution job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteJob {
    /// Envelope to execute.
    pub envelope_id: String,
    /// Enqueue time (ISO-8601).
    pub enqueued_at: String,
    /// Correlation trace id.
    pub trace_id: Option<String>,
}

/// A job that exhausted its attempts, preserved for inspection.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The failed job.
    pub job: ExecuteJob,
    /// Last error text.
    pub error: String,
    /// When the job was abandoned (ms since epoch).
    pub failed_at_ms: u64,
}

/// Handle over the worker pool.
pub struct ExecutionQueue {
    tx: mpsc::Sender<ExecuteJob>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    stop: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl ExecutionQueue {
    /// Start the worker pool and wire the broker's queue sender.
    pub fn start(broker: Arc<Broker>) -> ExecutionQueue {
        let concurrency = broker.config.queue_concurrency.max(1);
        let (tx, rx) = mpsc::channel::<ExecuteJob>(256);
        let rx = Arc::new(AsyncMutex::new(rx));
        let (stop, stop_rx) = watch::channel(false);
        let dead_letters = Arc::new(Mutex::new(Vec::new()));

        let mut workers = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency {
            let broker = Arc::clone(&broker);
            let rx = Arc::clone(&rx);
            let dead_letters = Arc::clone(&dead_letters);
            let mut stop_rx = stop_rx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = tokio::select! {
                        _ = stop_rx.changed() => break,
                        job = async { rx.lock().await.recv().await } => match job {
                            Some(job) => job,
                            None => break,
                        },
                    };
                    process_job(&broker, &dead_letters, worker_id, job).await;
                }
            }));
        }

        let _ = broker.queue_tx.set(tx.clone());
        ExecutionQueue { tx, dead_letters, stop, workers }
    }

    /// Enqueue a job directly (the broker does this in queue mode).
    pub async fn enqueue(&self, job: ExecuteJob) -> Result<(), BrokerError> {
        self.tx.send(job).await.map_err(|_| BrokerError::QueueUnavailable)
    }

    /// Jobs that exhausted their attempts.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().expect("dead-letter lock poisoned").clone()
    }

    /// Signal the workers to stop and wait for them to finish their
    /// current job.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn process_job(
    broker: &Arc<Broker>,
    dead_letters: &Arc<Mutex<Vec<DeadLetter>>>,
    worker_id: usize,
    job: ExecuteJob,
) {
    if let Ok(enqueued) = chrono::DateTime::parse_from_rfc3339(&job.enqueued_at) {
        let waited = chrono::Utc::now().signed_duration_since(enqueued);
        broker.metrics().queue_wait_ms(waited.num_milliseconds().max(0) as u64);
    }

    let max_attempts = broker.config.queue_max_attempts.max(1);
    let base_backoff = broker.config.queue_backoff_base_ms;
    let mut last_error = String::new();
    for attempt in 1..=max_attempts {
        // Pre-flight re-check: another task may have finished the envelope.
        if attempt > 1 {
            match broker.envelopes().get(&job.envelope_id).await {
                Ok(env)
                    if !matches!(
                        env.status,
                        EnvelopeStatus::Approved | EnvelopeStatus::Executing
                    ) =>
                {
                    info!(worker = worker_id, envelope = %job.envelope_id, status = env.status.as_str(), "skipping retried job");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(worker = worker_id, envelope = %job.envelope_id, error = %e, "re-check failed");
                    return;
                }
            }
        }
        match broker.execute_approved(&job.envelope_id).await {
            Ok(envelope) => {
                info!(worker = worker_id, envelope = %job.envelope_id, status = envelope.status.as_str(), "job finished");
                return;
            }
            Err(BrokerError::TransientExecution(message)) => {
                warn!(worker = worker_id, envelope = %job.envelope_id, attempt, error = %message, "transient failure");
                last_error = message;
                if attempt < max_attempts {
                    let delay = base_backoff.saturating_mul(1 << (attempt - 1));
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
            }
            Err(e) => {
                // Terminal: the broker already marked the envelope; no retry.
                warn!(worker = worker_id, envelope = %job.envelope_id, error = %e, "terminal failure");
                return;
            }
        }
    }
    dead_letters.lock().expect("dead-letter lock poisoned").push(DeadLetter {
        job,
        error: last_error,
        failed_at_ms: arbiter_core::ids::now_ms(),
    });
}
