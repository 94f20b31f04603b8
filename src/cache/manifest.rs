//! Cache manifest generation.
//!
//! The manifest is the externally-readable summary of freshness: CDN-facing
//! clients fetch it and decide locally whether a cached copy predates the
//! flush boundary or a per-dimension touch, without a server round trip.

use spola_api_types::CacheManifest;

use crate::application::ledger::LedgerSnapshot;

use super::flush::FlushState;

pub fn build_manifest(flush: &FlushState, snapshot: &LedgerSnapshot) -> CacheManifest {
    CacheManifest {
        flush_interval: (flush.interval_secs.max(60) / 60) as u64,
        last_flush_time: flush.last_flush_time,
        per_field_last_touched: snapshot.dimensions.clone(),
    }
}
