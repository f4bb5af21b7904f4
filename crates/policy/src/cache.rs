//! Policy cache keyed by (cartridge, organization) with TTL and explicit
//! invalidation on policy CRUD or registry change.

use crate::types::Policy;
use dashmap::DashMap;

#[derive(Clone)]
struct CachedSet {
    policies: Vec<Policy>,
    fetched_at_ms: u64,
}

/// TTL'd per-(cartridge, org) policy cache.
pub struct PolicyCache {
    entries: DashMap<(String, String), CachedSet>,
    ttl_ms: u64,
}

impl PolicyCache {
    /// Build a cache with the given TTL.
    pub fn new(ttl_ms: u64) -> Self {
        Self { entries: DashMap::new(), ttl_ms }
    }

    /// Fresh entry lookup; expired entries read as absent.
    pub fn get(&self, cartridge_id: &str, organization_id: &str, now_ms: u64) -> Option<Vec<Policy>> {
        let key = (cartridge_id.to_string(), organization_id.to_string());
        let entry = self.entries.get(&key)?;
        if now_ms.saturating_sub(entry.fetched_at_ms) >= self.ttl_ms {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.policies.clone())
    }

    /// Store a freshly-fetched set.
    pub fn put(
        &self,
        cartridge_id: &str,
        organization_id: &str,
        policies: Vec<Policy>,
        now_ms: u64,
    ) {
        self.entries.insert(
            (cartridge_id.to_string(), organization_id.to_string()),
            CachedSet { policies, fetched_at_ms: now_ms },
        );
    }

    /// Drop entries for one cartridge (registry change notification).
    pub fn invalidate_cartridge(&self, cartridge_id: &str) {
        self.entries.retain(|(c, _), _| c != cartridge_id);
    }

    /// Drop everything (policy CRUD).
    pub fn clear(&self) {
        self.entries.clear();
    }
}
