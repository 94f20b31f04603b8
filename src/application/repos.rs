//! Repository traits describing persistence adapters.
//!
//! The catalog system-of-record, the small key-value configuration store,
//! the durable feed buffer, and the job queue are all consumed through these
//! narrow interfaces; the core never talks to storage directly.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{
    AttributeRecord, FeedEntryRecord, ProductRecord, ProductTaxonomy, TermRecord,
};
use crate::domain::types::{EntityKind, JobType, TermKind};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Outcome of clearing a product's sync state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearedSyncState {
    /// True when the feed-handled marker was set before clearing, i.e. the
    /// entity had previously been delivered downstream.
    pub feed_was_handled: bool,
}

/// Read/write access to the product side of the catalog.
#[async_trait]
pub trait ProductsRepo: Send + Sync {
    async fn find_product(&self, id: Uuid) -> Result<Option<ProductRecord>, RepoError>;

    /// Products lacking a fingerprint, in insertion (id) order.
    ///
    /// The ordering is fixed rather than recomputed per call so selection
    /// cost stays bounded on huge catalogs; the "lacking a fingerprint"
    /// predicate is the batch scheduler's only checkpoint.
    async fn list_unfingerprinted(&self, limit: u32) -> Result<Vec<ProductRecord>, RepoError>;

    async fn set_fingerprint(
        &self,
        id: Uuid,
        digest: &str,
        computed_at: OffsetDateTime,
    ) -> Result<(), RepoError>;

    /// Clear the fingerprint and the feed-handled marker in one write,
    /// reporting whether the marker was present.
    async fn clear_sync_state(&self, id: Uuid) -> Result<ClearedSyncState, RepoError>;

    async fn set_feed_handled(&self, id: Uuid, handled: bool) -> Result<(), RepoError>;

    /// `(id, fingerprint)` pairs for published products after `after`,
    /// ordered by id, up to `limit`.
    async fn list_published_fingerprints(
        &self,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<(Uuid, String)>, RepoError>;

    async fn count_published(&self) -> Result<u64, RepoError>;

    async fn count_fingerprinted(&self) -> Result<u64, RepoError>;

    /// Current taxonomy memberships of a product.
    async fn taxonomy_for(&self, product_id: Uuid) -> Result<ProductTaxonomy, RepoError>;

    /// Products associated with the given term.
    async fn products_with_term(
        &self,
        kind: TermKind,
        term_id: Uuid,
    ) -> Result<Vec<Uuid>, RepoError>;
}

/// Read access to the taxonomy side of the catalog.
#[async_trait]
pub trait TaxonomyRepo: Send + Sync {
    async fn find_term(&self, id: Uuid) -> Result<Option<TermRecord>, RepoError>;

    async fn find_attribute(&self, id: Uuid) -> Result<Option<AttributeRecord>, RepoError>;

    async fn terms_for_attribute(&self, attribute_id: Uuid) -> Result<Vec<TermRecord>, RepoError>;
}

/// A value read from the configuration store together with its row version,
/// used for optimistic conditional writes.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue {
    pub value: String,
    pub version: i64,
}

/// The small persistent key-value configuration store owned by the host
/// platform, made explicit and injected into every component.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RepoError>;

    async fn get_versioned(&self, key: &str) -> Result<Option<VersionedValue>, RepoError>;

    /// Unconditional write (last-writer-wins).
    async fn set(&self, key: &str, value: &str) -> Result<(), RepoError>;

    /// Conditional write: succeeds only if the stored version still matches
    /// `expected_version` (`None` = the key must not exist yet). Returns
    /// false on conflict.
    async fn set_versioned(
        &self,
        key: &str,
        value: &str,
        expected_version: Option<i64>,
    ) -> Result<bool, RepoError>;

    async fn delete(&self, key: &str) -> Result<(), RepoError>;
}

/// Durable queue of entity deltas awaiting delivery to the remote backend.
#[async_trait]
pub trait FeedBufferRepo: Send + Sync {
    async fn enqueue(
        &self,
        entity_kind: EntityKind,
        entity_id: Uuid,
        deleted: bool,
    ) -> Result<i64, RepoError>;

    /// Oldest pending entries first.
    async fn list_pending(&self, limit: u32) -> Result<Vec<FeedEntryRecord>, RepoError>;

    /// Acknowledge an entry and prune any earlier entry for the same key it
    /// supersedes.
    async fn acknowledge(&self, entry_id: i64) -> Result<(), RepoError>;

    async fn record_attempt(&self, entry_id: i64) -> Result<(), RepoError>;

    async fn pending_count(&self) -> Result<u64, RepoError>;

    async fn oldest_enqueued_at(&self) -> Result<Option<OffsetDateTime>, RepoError>;

    async fn clear(&self) -> Result<(), RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewJobRecord {
    pub job_type: JobType,
    pub payload: Value,
    pub run_at: OffsetDateTime,
    pub max_attempts: i32,
    pub priority: i32,
}

/// Access to the background job queue.
#[async_trait]
pub trait JobsRepo: Send + Sync {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<String, RepoError>;
}
