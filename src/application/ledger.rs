//! Freshness ledger: per-dimension "last touched" timestamps.
//!
//! The ledger is a small JSON map persisted in the configuration store.
//! Writers read-merge-write through a versioned conditional write so that
//! concurrent touches to unrelated keys are not lost; after the retry budget
//! the write degrades to last-writer-wins, which only ever records a
//! slightly-too-early timestamp and therefore more cache turnover, never a
//! correctness violation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::application::repos::{ConfigStore, RepoError};
use crate::domain::types::Dimension;

pub const LEDGER_OPTION_KEY: &str = "spola.freshness_ledger";

const CAS_RETRY_LIMIT: usize = 4;

/// A point-in-time copy of the ledger. Timestamps are unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(flatten)]
    pub dimensions: BTreeMap<String, BTreeMap<String, i64>>,
}

impl LedgerSnapshot {
    pub fn last_touched(&self, dimension: Dimension, key: &str) -> Option<i64> {
        self.dimensions
            .get(dimension.as_str())
            .and_then(|keys| keys.get(key))
            .copied()
    }

    /// Latest touch across every key of the given dimensions.
    pub fn max_for(&self, dimensions: &[Dimension]) -> Option<i64> {
        dimensions
            .iter()
            .filter_map(|dimension| {
                self.dimensions
                    .get(dimension.as_str())
                    .and_then(|keys| keys.values().max())
            })
            .max()
            .copied()
    }

    /// Latest touch across the whole ledger.
    pub fn max_any(&self) -> Option<i64> {
        self.dimensions
            .values()
            .filter_map(|keys| keys.values().max())
            .max()
            .copied()
    }

    fn merge(&mut self, dimension: Dimension, key: &str, at: i64) {
        let entry = self
            .dimensions
            .entry(dimension.as_str().to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert(at);
        // Monotonic: later timestamps dominate, earlier ones are ignored.
        if *entry < at {
            *entry = at;
        }
    }
}

pub struct FreshnessLedger {
    store: Arc<dyn ConfigStore>,
}

impl FreshnessLedger {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Record that `key` in `dimension` was touched now.
    pub async fn touch(&self, dimension: Dimension, key: &str) -> Result<(), RepoError> {
        self.touch_many([(dimension, key.to_string())]).await
    }

    /// Record several touches in a single read-merge-write round trip.
    ///
    /// Batching matters: a product save touches every tag/category/attribute
    /// it was associated with on either side of the write, and merging them
    /// one at a time would multiply conflict windows.
    pub async fn touch_many(
        &self,
        entries: impl IntoIterator<Item = (Dimension, String)>,
    ) -> Result<(), RepoError> {
        let entries: Vec<(Dimension, String)> = entries.into_iter().collect();
        if entries.is_empty() {
            return Ok(());
        }
        let at = OffsetDateTime::now_utc().unix_timestamp();

        for _ in 0..CAS_RETRY_LIMIT {
            let current = self.store.get_versioned(LEDGER_OPTION_KEY).await?;
            let (mut snapshot, expected) = match &current {
                Some(versioned) => (parse_snapshot(&versioned.value), Some(versioned.version)),
                None => (LedgerSnapshot::default(), None),
            };

            for (dimension, key) in &entries {
                snapshot.merge(*dimension, key, at);
            }

            let serialized = serialize_snapshot(&snapshot)?;
            if self
                .store
                .set_versioned(LEDGER_OPTION_KEY, &serialized, expected)
                .await?
            {
                debug!(touched = entries.len(), at, "freshness ledger updated");
                return Ok(());
            }
        }

        // Retry budget exhausted: fall back to last-writer-wins. Accepted
        // relaxation, see §5 of the concurrency notes.
        warn!(
            touched = entries.len(),
            "freshness ledger CAS retries exhausted, writing unconditionally"
        );
        let mut snapshot = self.snapshot().await?;
        for (dimension, key) in &entries {
            snapshot.merge(*dimension, key, at);
        }
        self.store
            .set(LEDGER_OPTION_KEY, &serialize_snapshot(&snapshot)?)
            .await
    }

    pub async fn snapshot(&self) -> Result<LedgerSnapshot, RepoError> {
        Ok(self
            .store
            .get(LEDGER_OPTION_KEY)
            .await?
            .map(|value| parse_snapshot(&value))
            .unwrap_or_default())
    }

    /// Drop one dimension, or the whole ledger when `dimension` is `None`.
    ///
    /// Invoked when the global flush timestamp advances so a stale ledger
    /// never outlives the cache it protects.
    pub async fn reset(&self, dimension: Option<Dimension>) -> Result<(), RepoError> {
        match dimension {
            None => self.store.delete(LEDGER_OPTION_KEY).await,
            Some(dimension) => {
                for _ in 0..CAS_RETRY_LIMIT {
                    let Some(versioned) = self.store.get_versioned(LEDGER_OPTION_KEY).await?
                    else {
                        return Ok(());
                    };
                    let mut snapshot = parse_snapshot(&versioned.value);
                    if snapshot.dimensions.remove(dimension.as_str()).is_none() {
                        return Ok(());
                    }
                    let serialized = serialize_snapshot(&snapshot)?;
                    if self
                        .store
                        .set_versioned(LEDGER_OPTION_KEY, &serialized, Some(versioned.version))
                        .await?
                    {
                        return Ok(());
                    }
                }
                warn!(
                    dimension = dimension.as_str(),
                    "ledger reset CAS retries exhausted, key left for next writer"
                );
                Ok(())
            }
        }
    }
}

fn parse_snapshot(value: &str) -> LedgerSnapshot {
    serde_json::from_str(value).unwrap_or_else(|err| {
        // A corrupt ledger only means extra cache turnover; start fresh.
        warn!(error = %err, "freshness ledger unreadable, starting empty");
        LedgerSnapshot::default()
    })
}

fn serialize_snapshot(snapshot: &LedgerSnapshot) -> Result<String, RepoError> {
    serde_json::to_string(snapshot).map_err(RepoError::from_persistence)
}
