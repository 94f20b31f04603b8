//! Spola response cache.
//!
//! Cached payloads are keyed by request fingerprint (actor role + normalized
//! filter/sort parameters) and validated on every read against the freshness
//! ledger and the forward-only global flush boundary. A small generated
//! manifest lets non-privileged clients self-invalidate without a round
//! trip.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! response_limit = 500
//! ttl_seconds = 900
//! flush_interval_minutes = 60
//! ```

mod config;
mod flush;
mod keys;
mod lock;
mod manifest;
mod middleware;
mod store;

pub use config::CacheConfig;
pub use flush::{FLUSH_OPTION_KEY, FlushClock, FlushState};
pub use keys::{ActorRole, RequestKey, hash_params, hash_value, request_fingerprint};
pub use manifest::build_manifest;
pub use middleware::{CacheHttpState, response_cache_layer};
pub use store::{CachedPayload, DATA_DIMENSIONS, ResponseStore};

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;

use spola_api_types::CacheManifest;

use crate::application::ledger::FreshnessLedger;
use crate::application::repos::{ConfigStore, RepoError};
use crate::domain::types::Dimension;

/// High-level cache facade combining the response store, the freshness
/// ledger, and the flush clock.
pub struct CacheService {
    config: CacheConfig,
    store: ResponseStore,
    ledger: Arc<FreshnessLedger>,
    flush: FlushClock,
}

impl CacheService {
    pub fn new(
        config: CacheConfig,
        ledger: Arc<FreshnessLedger>,
        config_store: Arc<dyn ConfigStore>,
    ) -> Self {
        let flush = FlushClock::new(config_store, config.flush_interval().as_secs() as i64);
        let store = ResponseStore::new(&config);
        Self {
            config,
            store,
            ledger,
            flush,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Validated read: a payload is returned only when it survives every
    /// freshness check.
    pub async fn get(&self, key: &RequestKey) -> Result<Option<CachedPayload>, RepoError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let snapshot = self.ledger.snapshot().await?;
        let flush = self.flush.state().await?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Ok(self.store.get(key, &snapshot, flush.last_flush_time, now))
    }

    pub fn save(&self, key: RequestKey, payload: CachedPayload, is_public: bool) {
        if !self.is_enabled() {
            return;
        }
        self.store.save(key, payload, is_public);
    }

    /// Advance the global flush boundary, drop the in-process store, and
    /// reset the ledger so it never outlives the cache it protected.
    pub async fn flush(&self) -> Result<i64, RepoError> {
        let advanced = self.flush.flush().await?;
        self.ledger.reset(None).await?;
        self.store.invalidate_all();
        info!(last_flush_time = advanced, "response cache flushed");
        Ok(advanced)
    }

    /// Targeted bypass for a single computed response discovered to be
    /// wrong: recorded under the reserved `hashes` dimension so that exact
    /// request fingerprint is never served from any cache level again.
    pub async fn flush_for(&self, fingerprint: &str) -> Result<(), RepoError> {
        self.ledger.touch(Dimension::Hashes, fingerprint).await
    }

    pub async fn manifest(&self) -> Result<CacheManifest, RepoError> {
        let flush = self.flush.state().await?;
        let snapshot = self.ledger.snapshot().await?;
        Ok(build_manifest(&flush, &snapshot))
    }

    /// Clear all cache state (subsystem reset/uninstall).
    pub async fn reset(&self) -> Result<(), RepoError> {
        self.flush.reset().await?;
        self.store.invalidate_all();
        Ok(())
    }
}
