//! Spola keeps a remote search backend synchronized with a product catalog.
//!
//! The core pieces:
//!
//! - **Fingerprint engine** ([`application::fingerprint`]): deterministic
//!   content digests over a whitelisted, canonically-ordered projection.
//! - **Freshness ledger** ([`application::ledger`]): per-dimension
//!   last-touched timestamps behind a read-merge-write store.
//! - **Batch scheduler** ([`application::batch`]): bounded, resumable
//!   recomputation of missing fingerprints.
//! - **Change dispatcher** ([`application::dispatcher`]): catalog mutation
//!   events → invalidations, feed entries, delivery wake-ups.
//! - **Response cache** ([`cache`]): payloads validated per read against the
//!   ledger and a forward-only flush boundary, plus the published manifest.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
