//! Global flush boundary.
//!
//! `last_flush_time` is the cache validity horizon: payloads generated
//! before it are stale everywhere, including CDN-level caches that only see
//! the published manifest. The boundary only ever moves forward.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::application::repos::{ConfigStore, RepoError};

pub const FLUSH_OPTION_KEY: &str = "spola.cache_flush";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushState {
    /// Interval in seconds between scheduled flush boundaries.
    pub interval_secs: i64,
    /// Unix seconds of the last flush.
    pub last_flush_time: i64,
}

impl FlushState {
    /// Compute the advanced boundary for a flush happening at `now`.
    ///
    /// The result moves forward by at least one full interval and the next
    /// scheduled boundary (`result + interval`) is always in the future
    /// relative to `now`. Interval changes mid-cycle are corrected forward
    /// only: the boundary never moves backward.
    pub fn advanced(&self, now: i64) -> i64 {
        let interval = self.interval_secs.max(1);
        let candidate = self.last_flush_time.saturating_add(interval);
        candidate.max(now).max(self.last_flush_time)
    }
}

pub struct FlushClock {
    store: Arc<dyn ConfigStore>,
    interval_secs: i64,
}

impl FlushClock {
    pub fn new(store: Arc<dyn ConfigStore>, interval_secs: i64) -> Self {
        Self {
            store,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Current flush state, reconciling a configured interval change with
    /// the persisted one (forward-only: the stored boundary is kept as-is).
    pub async fn state(&self) -> Result<FlushState, RepoError> {
        let stored: Option<FlushState> = self
            .store
            .get(FLUSH_OPTION_KEY)
            .await?
            .and_then(|value| serde_json::from_str(&value).ok());

        Ok(match stored {
            Some(state) => FlushState {
                interval_secs: self.interval_secs,
                last_flush_time: state.last_flush_time,
            },
            None => FlushState {
                interval_secs: self.interval_secs,
                last_flush_time: 0,
            },
        })
    }

    /// Advance the flush boundary. Returns the new `last_flush_time`.
    pub async fn flush(&self) -> Result<i64, RepoError> {
        self.flush_at(OffsetDateTime::now_utc().unix_timestamp()).await
    }

    pub(crate) async fn flush_at(&self, now: i64) -> Result<i64, RepoError> {
        let state = self.state().await?;
        let advanced = state.advanced(now);
        if advanced < state.last_flush_time {
            // advanced() guarantees this cannot happen; guard anyway so a
            // bad clock can never un-flush.
            warn!(
                advanced,
                last = state.last_flush_time,
                "flush would move backward, keeping current boundary"
            );
            return Ok(state.last_flush_time);
        }

        let next = FlushState {
            interval_secs: self.interval_secs,
            last_flush_time: advanced,
        };
        let serialized = serde_json::to_string(&next).map_err(RepoError::from_persistence)?;
        self.store.set(FLUSH_OPTION_KEY, &serialized).await?;
        info!(last_flush_time = advanced, "cache flush boundary advanced");
        Ok(advanced)
    }

    pub async fn reset(&self) -> Result<(), RepoError> {
        self.store.delete(FLUSH_OPTION_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::MemoryConfigStore;

    #[test]
    fn advanced_moves_at_least_one_interval() {
        let state = FlushState {
            interval_secs: 600,
            last_flush_time: 1_000,
        };
        // Flush shortly after the last one: still a full interval forward.
        assert_eq!(state.advanced(1_100), 1_600);
        // Flush long after: lands on now so the next boundary is future.
        assert_eq!(state.advanced(50_000), 50_000);
    }

    #[test]
    fn shrinking_then_growing_interval_never_moves_backward() {
        let mut state = FlushState {
            interval_secs: 3_600,
            last_flush_time: 10_000,
        };
        let after_first = state.advanced(10_100);
        assert_eq!(after_first, 13_600);

        // Operator shrinks the interval mid-cycle.
        state.interval_secs = 60;
        state.last_flush_time = after_first;
        let after_shrink = state.advanced(10_200);
        assert!(after_shrink >= after_first);

        // And grows it again.
        state.interval_secs = 7_200;
        state.last_flush_time = after_shrink;
        let after_grow = state.advanced(10_300);
        assert!(after_grow >= after_shrink);
    }

    #[tokio::test]
    async fn flush_persists_and_is_monotonic() {
        let store = Arc::new(MemoryConfigStore::default());
        let clock = FlushClock::new(store.clone(), 600);

        let first = clock.flush_at(1_000).await.unwrap();
        assert!(first >= 1_000);

        let second = clock.flush_at(1_010).await.unwrap();
        assert!(second > first);

        // A clock that jumped backwards cannot un-flush.
        let third = clock.flush_at(0).await.unwrap();
        assert!(third >= second);

        let state = clock.state().await.unwrap();
        assert_eq!(state.last_flush_time, third);
    }

    #[tokio::test]
    async fn interval_change_is_reconciled_forward_only() {
        let store = Arc::new(MemoryConfigStore::default());
        let wide = FlushClock::new(store.clone(), 3_600);
        let boundary = wide.flush_at(10_000).await.unwrap();

        // The same store read through a narrower clock keeps the boundary.
        let narrow = FlushClock::new(store, 60);
        let state = narrow.state().await.unwrap();
        assert_eq!(state.last_flush_time, boundary);
        assert_eq!(state.interval_secs, 60);

        let advanced = narrow.flush_at(10_050).await.unwrap();
        assert!(advanced >= boundary);
    }
}
