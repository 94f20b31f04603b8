//! Cache configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_RESPONSE_LIMIT: usize = 500;
const DEFAULT_TTL_SECONDS: u64 = 900;
const DEFAULT_FLUSH_INTERVAL_MINUTES: u64 = 60;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Response cache behaviour, from `spola.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the shared response cache.
    pub enabled: bool,
    /// Maximum cached responses.
    pub response_limit: usize,
    /// Per-entry time-to-live in seconds.
    pub ttl_seconds: u64,
    /// Global flush interval in minutes.
    pub flush_interval_minutes: u64,
    /// Largest response body the cache will hold.
    pub max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            response_limit: DEFAULT_RESPONSE_LIMIT,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            flush_interval_minutes: DEFAULT_FLUSH_INTERVAL_MINUTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl CacheConfig {
    pub fn response_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.response_limit).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_minutes.max(1) * 60)
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            response_limit: settings.response_limit,
            ttl_seconds: settings.ttl_seconds,
            flush_interval_minutes: settings.flush_interval_minutes,
            max_body_bytes: settings.max_body_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.response_limit, 500);
        assert_eq!(config.ttl_seconds, 900);
        assert_eq!(config.flush_interval_minutes, 60);
    }

    #[test]
    fn zero_limit_clamps_to_one() {
        let config = CacheConfig {
            response_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.response_limit_non_zero().get(), 1);
    }

    #[test]
    fn zero_flush_interval_clamps_to_one_minute() {
        let config = CacheConfig {
            flush_interval_minutes: 0,
            ..Default::default()
        };
        assert_eq!(config.flush_interval(), Duration::from_secs(60));
    }
}
