//! Idempotency cache: same key within the window returns the first
//! successful response. Reads are never cached.

use crate::broker::ProposeOutcome;
use async_trait::async_trait;
use dashmap::DashMap;

/// Pluggable idempotency backend (in-memory here; external KV elsewhere).
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Cached outcome for `key`, if inside the window.
    async fn get(&self, key: &str, now_ms: u64) -> Option<ProposeOutcome>;

    /// Cache the first successful outcome for `key`.
    async fn put(&self, key: &str, outcome: ProposeOutcome, now_ms: u64);
}

/// In-memory idempotency cache with per-entry expiry.
pub struct InMemoryIdempotencyStore {
    entries: DashMap<String, (ProposeOutcome, u64)>,
    window_ms: u64,
}

impl InMemoryIdempotencyStore {
    /// Build a cache with the given window.
    pub fn new(window_ms: u64) -> Self {
        Self { entries: DashMap::new(), window_ms }
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str, now_ms: u64) -> Option<ProposeOutcome> {
        let entry = self.entries.get(key)?;
        if now_ms.saturating_sub(entry.1) >= self.window_ms {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.0.clone())
    }

    async fn put(&self, key: &str, outcome: ProposeOutcome, now_ms: u64) {
        self.entries.insert(key.to_string(), (outcome, now_ms));
    }
}
