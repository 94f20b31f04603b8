//! Outbound delivery: drains the durable feed buffer into the remote search
//! backend.
//!
//! Delivery failures never block local fingerprint computation; an entry is
//! acknowledged only after the remote accepted it, so the buffer is the
//! durable source of truth for undelivered work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use spola_api_types::{
    ApiEntityKind, DeltaOp, DeltaPayload, TaxonomyChange, TaxonomyNotification,
};

use crate::application::repos::{FeedBufferRepo, ProductsRepo, RepoError};
use crate::domain::entities::FeedEntryRecord;
use crate::domain::types::EntityKind;

const METRIC_FEED_PENDING: &str = "spola_feed_pending";
const METRIC_DELIVERY_FAIL_TOTAL: &str = "spola_delivery_fail_total";
const METRIC_DELIVERY_MS: &str = "spola_delivery_ms";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("remote backend rejected delivery: {0}")]
    Remote(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Narrow interface to the remote backend's ingestion API. The receiver is
/// idempotent: the same delta delivered twice is harmless.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn push_delta(&self, delta: &DeltaPayload) -> Result<(), DeliveryError>;

    async fn notify_taxonomy(
        &self,
        notification: &TaxonomyNotification,
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Entries retained for retry after a remote failure.
    pub failed: usize,
    /// Entries skipped because their fingerprint is not computed yet.
    pub skipped: usize,
}

pub struct DeliveryService {
    feed: Arc<dyn FeedBufferRepo>,
    products: Arc<dyn ProductsRepo>,
    remote: Arc<dyn RemoteBackend>,
    /// Entries pending beyond this window raise an operator-visible warning.
    warn_after: Duration,
}

impl DeliveryService {
    pub fn new(
        feed: Arc<dyn FeedBufferRepo>,
        products: Arc<dyn ProductsRepo>,
        remote: Arc<dyn RemoteBackend>,
        warn_after: Duration,
    ) -> Self {
        Self {
            feed,
            products,
            remote,
            warn_after,
        }
    }

    /// Deliver up to `limit` pending entries, oldest first.
    #[instrument(skip(self))]
    pub async fn deliver_pending(&self, limit: u32) -> Result<DeliveryReport, RepoError> {
        let started_at = Instant::now();
        let entries = self.feed.list_pending(limit).await?;
        let mut report = DeliveryReport::default();

        for entry in &entries {
            match self.deliver_entry(entry).await {
                Ok(Delivered::Acknowledged) => {
                    self.feed.acknowledge(entry.id).await?;
                    report.delivered += 1;
                }
                Ok(Delivered::NotReady) => {
                    report.skipped += 1;
                }
                Err(DeliveryError::Repo(err)) => return Err(err),
                Err(DeliveryError::Remote(message)) => {
                    self.feed.record_attempt(entry.id).await?;
                    counter!(METRIC_DELIVERY_FAIL_TOTAL).increment(1);
                    report.failed += 1;

                    let age = OffsetDateTime::now_utc() - entry.enqueued_at;
                    if age >= self.warn_after {
                        warn!(
                            entry_id = entry.id,
                            entity_kind = entry.entity_kind.as_str(),
                            entity_id = %entry.entity_id,
                            pending_for_secs = age.whole_seconds(),
                            error = %message,
                            "feed entry stuck beyond delivery warning window"
                        );
                    }
                }
            }
        }

        let pending = self.feed.pending_count().await?;
        gauge!(METRIC_FEED_PENDING).set(pending as f64);
        histogram!(METRIC_DELIVERY_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        info!(
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            pending,
            "feed delivery pass finished"
        );

        Ok(report)
    }

    async fn deliver_entry(&self, entry: &FeedEntryRecord) -> Result<Delivered, DeliveryError> {
        match entry.entity_kind {
            EntityKind::Product => self.deliver_product(entry).await,
            kind => {
                let notification = TaxonomyNotification {
                    concept: api_kind(kind),
                    term_id: entry.entity_id,
                    change: if entry.deleted {
                        TaxonomyChange::Deleted
                    } else {
                        TaxonomyChange::Updated
                    },
                };
                self.remote.notify_taxonomy(&notification).await?;
                Ok(Delivered::Acknowledged)
            }
        }
    }

    async fn deliver_product(&self, entry: &FeedEntryRecord) -> Result<Delivered, DeliveryError> {
        if entry.deleted {
            self.remote
                .push_delta(&DeltaPayload {
                    entity_kind: ApiEntityKind::Product,
                    entity_id: entry.entity_id,
                    op: DeltaOp::Delete,
                    fingerprint: None,
                })
                .await?;
            return Ok(Delivered::Acknowledged);
        }

        let Some(product) = self.products.find_product(entry.entity_id).await? else {
            // Vanished since enqueue: deliver the tombstone instead.
            self.remote
                .push_delta(&DeltaPayload {
                    entity_kind: ApiEntityKind::Product,
                    entity_id: entry.entity_id,
                    op: DeltaOp::Delete,
                    fingerprint: None,
                })
                .await?;
            return Ok(Delivered::Acknowledged);
        };

        let Some(fingerprint) = product.fingerprint else {
            // Fingerprint not computed yet; leave the entry for the next
            // pass after the batch scheduler catches up.
            return Ok(Delivered::NotReady);
        };

        self.remote
            .push_delta(&DeltaPayload {
                entity_kind: ApiEntityKind::Product,
                entity_id: entry.entity_id,
                op: DeltaOp::Upsert,
                fingerprint: Some(fingerprint),
            })
            .await?;
        self.products
            .set_feed_handled(entry.entity_id, true)
            .await?;
        Ok(Delivered::Acknowledged)
    }
}

enum Delivered {
    Acknowledged,
    NotReady,
}

fn api_kind(kind: EntityKind) -> ApiEntityKind {
    match kind {
        EntityKind::Product => ApiEntityKind::Product,
        EntityKind::Tag => ApiEntityKind::Tag,
        EntityKind::Category => ApiEntityKind::Category,
        EntityKind::Attribute => ApiEntityKind::Attribute,
        EntityKind::AttributeTerm => ApiEntityKind::AttributeTerm,
    }
}
