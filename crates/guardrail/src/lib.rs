//! Shared guardrail state: fixed-window rate-limit counters and cooldown
//! timestamps, both TTL'd. Entries past their TTL are treated as absent.

#![deny(unsafe_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One fixed-window counter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Actions counted inside the current window.
    pub count: u32,
    /// Window start (ms since epoch, floored to the window size).
    pub window_start_ms: u64,
}

/// A cartridge-declared rate limit. Scope is an action type or `global`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitRule {
    /// Scope key (`global` or an action type).
    pub scope: String,
    /// Maximum actions per window.
    pub max: u32,
    /// Fixed window size in ms.
    pub window_ms: u64,
}

/// A cartridge-declared cooldown between mutations of one entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CooldownRule {
    /// Action type the cooldown applies to.
    pub action_type: String,
    /// Minimum gap between executions against the same entity.
    pub cooldown_ms: u64,
}

/// Guardrails a cartridge declares for the policy engine to enforce.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct GuardrailSpec {
    /// Fixed-window rate limits.
    pub rate_limits: Vec<RateLimitRule>,
    /// Per-entity cooldowns.
    pub cooldowns: Vec<CooldownRule>,
    /// Entity ids no action may touch.
    pub protected_entities: Vec<String>,
}

/// Storage contract for guardrail state. In-process by default; a shared KV
/// with native TTL serves multi-process deployments.
#[async_trait]
pub trait GuardrailStore: Send + Sync {
    /// Live rate-limit entries for the given scope keys.
    async fn get_rate_limits(
        &self,
        scope_keys: &[String],
        now_ms: u64,
    ) -> HashMap<String, RateLimitEntry>;

    /// Write a rate-limit entry with a TTL.
    async fn set_rate_limit(&self, scope_key: &str, entry: RateLimitEntry, ttl_ms: u64, now_ms: u64);

    /// Live cooldown stamps (last-execution ms) for the given entity keys.
    async fn get_cooldowns(&self, entity_keys: &[String], now_ms: u64) -> HashMap<String, u64>;

    /// Write a cooldown stamp with a TTL.
    async fn set_cooldown(&self, entity_key: &str, ts_ms: u64, ttl_ms: u64, now_ms: u64);
}

#[derive(Debug, Clone, Copy)]
struct Expiring<T> {
    value: T,
    expires_at_ms: u64,
}

/// In-process guardrail store with per-entry expiry.
#[derive(Default)]
pub struct InMemoryGuardrailStore {
    rate_limits: DashMap<String, Expiring<RateLimitEntry>>,
    cooldowns: DashMap<String, Expiring<u64>>,
}

impl InMemoryGuardrailStore {
    /// Fresh empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GuardrailStore for InMemoryGuardrailStore {
    async fn get_rate_limits(
        &self,
        scope_keys: &[String],
        now_ms: u64,
    ) -> HashMap<String, RateLimitEntry> {
        let mut out = HashMap::new();
        for key in scope_keys {
            if let Some(e) = self.rate_limits.get(key) {
                if e.expires_at_ms > now_ms {
                    out.insert(key.clone(), e.value);
                }
            }
        }
        out
    }

    async fn set_rate_limit(
        &self,
        scope_key: &str,
        entry: RateLimitEntry,
        ttl_ms: u64,
        now_ms: u64,
    ) {
        self.rate_limits.insert(
            scope_key.to_string(),
            Expiring { value: entry, expires_at_ms: now_ms.saturating_add(ttl_ms) },
        );
    }

    async fn get_cooldowns(&self, entity_keys: &[String], now_ms: u64) -> HashMap<String, u64> {
        let mut out = HashMap::new();
        for key in entity_keys {
            if let Some(e) = self.cooldowns.get(key) {
                if e.expires_at_ms > now_ms {
                    out.insert(key.clone(), e.value);
                }
            }
        }
        out
    }

    async fn set_cooldown(&self, entity_key: &str, ts_ms: u64, ttl_ms: u64, now_ms: u64) {
        self.cooldowns.insert(
            entity_key.to_string(),
            Expiring { value: ts_ms, expires_at_ms: now_ms.saturating_add(ttl_ms) },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limit_roundtrip() {
        let store = InMemoryGuardrailStore::new();
        let entry = RateLimitEntry { count: 3, window_start_ms: 60_000 };
        store.set_rate_limit("ads.campaign.pause", entry, 10_000, 60_500).await;
        let got = store.get_rate_limits(&["ads.campaign.pause".into()], 61_000).await;
        assert_eq!(got.get("ads.campaign.pause"), Some(&entry));
    }

    #[tokio::test]
    async fn expired_entries_are_absent() {
        let store = InMemoryGuardrailStore::new();
        store
            .set_rate_limit("global", RateLimitEntry { count: 1, window_start_ms: 0 }, 1_000, 0)
            .await;
        store.set_cooldown("campaign:camp_1", 0, 1_000, 0).await;
        assert!(store.get_rate_limits(&["global".into()], 2_000).await.is_empty());
        assert!(store.get_cooldowns(&["campaign:camp_1".into()], 2_000).await.is_empty());
    }

    #[tokio::test]
    async fn cooldown_roundtrip() {
        let store = InMemoryGuardrailStore::new();
        store.set_cooldown("campaign:camp_1", 5_000, 30_000, 5_000).await;
        let got = store.get_cooldowns(&["campaign:camp_1".into()], 6_000).await;
        assert_eq!(got.get("campaign:camp_1"), Some(&5_000));
    }
}
