//! Response cache storage.
//!
//! Holds rendered response payloads keyed by request fingerprint. Entries
//! are never trusted on read: each hit is validated against the freshness
//! ledger, the global flush boundary, and its TTL, and evicted when stale.

use std::sync::RwLock;
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;

use crate::application::ledger::LedgerSnapshot;
use crate::domain::types::Dimension;

use super::config::CacheConfig;
use super::keys::{RequestKey, request_fingerprint};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT_TOTAL: &str = "spola_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "spola_cache_miss_total";
const METRIC_CACHE_STALE_EVICT_TOTAL: &str = "spola_cache_stale_evict_total";
const METRIC_CACHE_BYPASS_TOTAL: &str = "spola_cache_bypass_total";

/// The data dimensions a catalog-derived response depends on.
pub const DATA_DIMENSIONS: [Dimension; 4] = [
    Dimension::Tag,
    Dimension::Category,
    Dimension::Attribute,
    Dimension::AttributeTerm,
];

#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub content_type: String,
    pub body: Bytes,
    /// Unix seconds at which the payload was generated.
    pub created_at: i64,
}

pub struct ResponseStore {
    entries: RwLock<LruCache<RequestKey, CachedPayload>>,
    ttl: Duration,
}

impl ResponseStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.response_limit_non_zero())),
            ttl: config.ttl(),
        }
    }

    /// Fetch a payload, validating it against the current freshness state.
    ///
    /// A payload is served only when every check passes:
    /// - it is younger than the TTL,
    /// - it was created at or after the global flush boundary,
    /// - no data dimension was touched at or after its creation,
    /// - its own request fingerprint was not force-expired under `hashes`.
    pub fn get(
        &self,
        key: &RequestKey,
        snapshot: &LedgerSnapshot,
        last_flush_time: i64,
        now: i64,
    ) -> Option<CachedPayload> {
        let cached = rw_write(&self.entries, SOURCE, "get").get(key).cloned();
        let Some(payload) = cached else {
            counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
            return None;
        };

        if self.is_stale(key, &payload, snapshot, last_flush_time, now) {
            rw_write(&self.entries, SOURCE, "get.evict").pop(key);
            counter!(METRIC_CACHE_STALE_EVICT_TOTAL).increment(1);
            counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
            return None;
        }

        counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
        Some(payload)
    }

    fn is_stale(
        &self,
        key: &RequestKey,
        payload: &CachedPayload,
        snapshot: &LedgerSnapshot,
        last_flush_time: i64,
        now: i64,
    ) -> bool {
        if now.saturating_sub(payload.created_at) > self.ttl.as_secs() as i64 {
            return true;
        }
        if payload.created_at < last_flush_time {
            return true;
        }
        // A touch in the same second as creation counts as stale.
        if let Some(touched) = snapshot.max_for(&DATA_DIMENSIONS)
            && touched >= payload.created_at
        {
            return true;
        }
        if let Some(touched) = snapshot.last_touched(Dimension::Hashes, &request_fingerprint(key))
            && touched >= payload.created_at
        {
            return true;
        }
        false
    }

    /// Store a payload. Non-public requests bypass the shared cache
    /// entirely so partial or role-specific data is never shared.
    pub fn save(&self, key: RequestKey, payload: CachedPayload, is_public: bool) {
        if !is_public {
            counter!(METRIC_CACHE_BYPASS_TOTAL).increment(1);
            return;
        }
        rw_write(&self.entries, SOURCE, "save").put(key, payload);
    }

    pub fn invalidate_all(&self) {
        rw_write(&self.entries, SOURCE, "invalidate_all").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::ActorRole;

    fn store() -> ResponseStore {
        ResponseStore::new(&CacheConfig::default())
    }

    fn key(path: &str) -> RequestKey {
        RequestKey::new(ActorRole::Public, path, &[])
    }

    fn payload(created_at: i64) -> CachedPayload {
        CachedPayload {
            content_type: "application/json".to_string(),
            body: Bytes::from_static(b"{}"),
            created_at,
        }
    }

    #[test]
    fn fresh_payload_round_trips() {
        let store = store();
        let snapshot = LedgerSnapshot::default();
        let key = key("/api/v1/fingerprints");

        store.save(key.clone(), payload(1_000), true);
        let hit = store.get(&key, &snapshot, 0, 1_010);
        assert!(hit.is_some());
    }

    #[test]
    fn non_public_save_is_bypassed() {
        let store = store();
        let key = key("/api/v1/fingerprints");
        store.save(key.clone(), payload(1_000), false);
        assert!(store.is_empty());
    }

    #[test]
    fn flush_boundary_rejects_older_payloads() {
        let store = store();
        let snapshot = LedgerSnapshot::default();
        let key = key("/api/v1/fingerprints");

        store.save(key.clone(), payload(1_000), true);
        assert!(store.get(&key, &snapshot, 1_001, 1_010).is_none());
        // Stale entries are evicted, not just skipped.
        assert!(store.is_empty());
    }

    #[test]
    fn dimension_touch_invalidates() {
        let store = store();
        let key = key("/api/v1/fingerprints");
        store.save(key.clone(), payload(1_000), true);

        let mut snapshot = LedgerSnapshot::default();
        snapshot
            .dimensions
            .entry("tag".to_string())
            .or_default()
            .insert("sale".to_string(), 1_005);

        assert!(store.get(&key, &snapshot, 0, 1_010).is_none());
    }

    #[test]
    fn touch_before_creation_does_not_invalidate() {
        let store = store();
        let key = key("/api/v1/fingerprints");
        store.save(key.clone(), payload(1_000), true);

        let mut snapshot = LedgerSnapshot::default();
        snapshot
            .dimensions
            .entry("tag".to_string())
            .or_default()
            .insert("sale".to_string(), 900);

        assert!(store.get(&key, &snapshot, 0, 1_010).is_some());
    }

    #[test]
    fn hashes_dimension_targets_a_single_fingerprint() {
        let store = store();
        let poisoned = key("/api/v1/fingerprints");
        let healthy = key("/api/v1/status");
        store.save(poisoned.clone(), payload(1_000), true);
        store.save(healthy.clone(), payload(1_000), true);

        let mut snapshot = LedgerSnapshot::default();
        snapshot
            .dimensions
            .entry("hashes".to_string())
            .or_default()
            .insert(request_fingerprint(&poisoned), 1_005);

        assert!(store.get(&poisoned, &snapshot, 0, 1_010).is_none());
        assert!(store.get(&healthy, &snapshot, 0, 1_010).is_some());
    }

    #[test]
    fn ttl_expires_entries() {
        let store = ResponseStore::new(&CacheConfig {
            ttl_seconds: 10,
            ..Default::default()
        });
        let snapshot = LedgerSnapshot::default();
        let key = key("/api/v1/fingerprints");

        store.save(key.clone(), payload(1_000), true);
        assert!(store.get(&key, &snapshot, 0, 1_009).is_some());
        assert!(store.get(&key, &snapshot, 0, 1_011).is_none());
    }

    #[test]
    fn invalidate_all_clears_everything() {
        let store = store();
        store.save(key("/a"), payload(1_000), true);
        store.save(key("/b"), payload(1_000), true);
        assert_eq!(store.len(), 2);
        store.invalidate_all();
        assert!(store.is_empty());
    }
}
