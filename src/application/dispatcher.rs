//! Change dispatcher: turns catalog mutation events into freshness touches,
//! fingerprint invalidations, feed buffer entries, and delivery wake-ups.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::batch::BatchScheduler;
use crate::application::events::{EventBus, PublishedEvent, SyncEvent, SyncEventHandler};
use crate::application::ledger::FreshnessLedger;
use crate::application::repos::{
    FeedBufferRepo, JobsRepo, NewJobRecord, ProductsRepo, RepoError, TaxonomyRepo,
};
use crate::domain::entities::ProductTaxonomy;
use crate::domain::types::{Dimension, EntityKind, JobType, TermKind};

const DELIVERY_WAKE_MAX_ATTEMPTS: i32 = 5;

pub struct ChangeDispatcher {
    products: Arc<dyn ProductsRepo>,
    taxonomy: Arc<dyn TaxonomyRepo>,
    ledger: Arc<FreshnessLedger>,
    feed: Arc<dyn FeedBufferRepo>,
    scheduler: Arc<BatchScheduler>,
    jobs: Arc<dyn JobsRepo>,
}

impl ChangeDispatcher {
    pub fn new(
        products: Arc<dyn ProductsRepo>,
        taxonomy: Arc<dyn TaxonomyRepo>,
        ledger: Arc<FreshnessLedger>,
        feed: Arc<dyn FeedBufferRepo>,
        scheduler: Arc<BatchScheduler>,
        jobs: Arc<dyn JobsRepo>,
    ) -> Self {
        Self {
            products,
            taxonomy,
            ledger,
            feed,
            scheduler,
            jobs,
        }
    }

    /// Subscribe the dispatcher to every mutation event on the bus.
    pub fn wire(self: &Arc<Self>, bus: &EventBus) {
        bus.subscribe_all(self.clone() as Arc<dyn SyncEventHandler>);
    }

    async fn touch_memberships(
        &self,
        before: &ProductTaxonomy,
        after: &ProductTaxonomy,
    ) -> Result<(), RepoError> {
        // Union of both sides of the write: removals are detected, not just
        // additions.
        let touches: Vec<(Dimension, String)> = before
            .union(after)
            .map(|(kind, term_id)| (Dimension::from(kind), term_id.to_string()))
            .collect();
        self.ledger.touch_many(touches).await
    }

    async fn invalidate_product(&self, id: Uuid) -> Result<(), RepoError> {
        let cleared = self.products.clear_sync_state(id).await?;
        self.feed.enqueue(EntityKind::Product, id, false).await?;
        if cleared.feed_was_handled {
            // Previously delivered: wake delivery now rather than waiting
            // for its timer.
            self.wake_delivery().await?;
        }
        self.scheduler.mark_dirty().await
    }

    async fn wake_delivery(&self) -> Result<(), RepoError> {
        self.jobs
            .enqueue_job(NewJobRecord {
                job_type: JobType::DeliverFeed,
                payload: serde_json::json!({}),
                run_at: OffsetDateTime::now_utc(),
                max_attempts: DELIVERY_WAKE_MAX_ATTEMPTS,
                priority: 0,
            })
            .await?;
        debug!("delivery job woken");
        Ok(())
    }

    /// Structural taxonomy change: touch, queue the sweep, and feed the
    /// concept-level notification downstream.
    async fn term_changed(
        &self,
        kind: TermKind,
        term_id: Uuid,
        deleted: bool,
    ) -> Result<(), RepoError> {
        self.ledger
            .touch(Dimension::from(kind), &term_id.to_string())
            .await?;
        self.scheduler.record_pending_sweep(kind, term_id).await?;
        self.feed
            .enqueue(EntityKind::from(kind), term_id, deleted)
            .await?;
        Ok(())
    }

    async fn attribute_changed(&self, id: Uuid, deleted: bool) -> Result<(), RepoError> {
        self.ledger
            .touch(Dimension::Attribute, &id.to_string())
            .await?;
        // The attribute's terms are what products are actually associated
        // with; sweep each of them.
        for term in self.taxonomy.terms_for_attribute(id).await? {
            self.scheduler
                .record_pending_sweep(TermKind::AttributeTerm, term.id)
                .await?;
        }
        self.feed
            .enqueue(EntityKind::Attribute, id, deleted)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SyncEventHandler for ChangeDispatcher {
    async fn handle(&self, published: &PublishedEvent) -> Result<(), RepoError> {
        info!(
            event_id = %published.id,
            event_kind = ?published.event.kind(),
            "dispatching catalog mutation"
        );

        match &published.event {
            SyncEvent::ProductSaved { id, before, after } => {
                self.touch_memberships(before, after).await?;
                self.invalidate_product(*id).await
            }
            SyncEvent::ProductDeleted { id, memberships } => {
                self.touch_memberships(memberships, &ProductTaxonomy::default())
                    .await?;
                self.feed.enqueue(EntityKind::Product, *id, true).await?;
                // The tombstone should reach the remote promptly.
                self.wake_delivery().await?;
                self.scheduler.mark_dirty().await
            }
            SyncEvent::TermSaved { kind, term_id } => {
                self.term_changed(*kind, *term_id, false).await
            }
            SyncEvent::TermDeleted { kind, term_id } => {
                self.term_changed(*kind, *term_id, true).await
            }
            SyncEvent::AttributeUpdated { id } => self.attribute_changed(*id, false).await,
            SyncEvent::AttributeDeleted { id } => self.attribute_changed(*id, true).await,
            SyncEvent::TermMetaChanged { kind, term_id } => {
                self.term_changed(*kind, *term_id, false).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fingerprint::FingerprintEngine;
    use crate::application::testing::{
        MemoryCatalog, MemoryConfigStore, MemoryFeedBuffer, MemoryJobsRepo, sample_product,
        sample_term,
    };
    use crate::domain::types::BatchStatus;

    struct Fixture {
        catalog: Arc<MemoryCatalog>,
        feed: Arc<MemoryFeedBuffer>,
        jobs: Arc<MemoryJobsRepo>,
        ledger: Arc<FreshnessLedger>,
        scheduler: Arc<BatchScheduler>,
        bus: EventBus,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(MemoryCatalog::default());
        let store = Arc::new(MemoryConfigStore::default());
        let feed = Arc::new(MemoryFeedBuffer::default());
        let jobs = Arc::new(MemoryJobsRepo::default());
        let ledger = Arc::new(FreshnessLedger::new(store.clone()));
        let engine = Arc::new(FingerprintEngine::new(catalog.clone(), catalog.clone()));
        let scheduler = Arc::new(BatchScheduler::new(
            catalog.clone(),
            engine,
            store,
            jobs.clone(),
            feed.clone(),
            25,
        ));

        let dispatcher = Arc::new(ChangeDispatcher::new(
            catalog.clone(),
            catalog.clone(),
            ledger.clone(),
            feed.clone(),
            scheduler.clone(),
            jobs.clone(),
        ));
        let bus = EventBus::new();
        dispatcher.wire(&bus);

        Fixture {
            catalog,
            feed,
            jobs,
            ledger,
            scheduler,
            bus,
        }
    }

    #[tokio::test]
    async fn removing_a_tag_touches_it_and_refingerprints_the_product() {
        let fx = fixture();

        let tag_a = sample_term(TermKind::Tag, "a");
        let tag_b = sample_term(TermKind::Tag, "b");
        fx.catalog.insert_term(tag_a.clone());
        fx.catalog.insert_term(tag_b.clone());

        let product = sample_product("p");
        let product_id = product.id;
        fx.catalog.insert_product(product);
        fx.catalog.set_taxonomy(
            product_id,
            ProductTaxonomy::new([(TermKind::Tag, tag_a.id), (TermKind::Tag, tag_b.id)]),
        );

        // First scan: compute H1.
        fx.scheduler.run_batch().await.unwrap();
        let h1 = fx.catalog.fingerprint_of(product_id).unwrap();

        // Remove tag b: the write happened in the system-of-record; the
        // event carries the memberships before and after.
        let before = ProductTaxonomy::new([(TermKind::Tag, tag_a.id), (TermKind::Tag, tag_b.id)]);
        let after = ProductTaxonomy::new([(TermKind::Tag, tag_a.id)]);
        fx.catalog.set_taxonomy(product_id, after.clone());
        fx.bus
            .publish(SyncEvent::ProductSaved {
                id: product_id,
                before,
                after,
            })
            .await
            .unwrap();

        // The removed tag was touched even though it is no longer attached.
        let snapshot = fx.ledger.snapshot().await.unwrap();
        assert!(
            snapshot
                .last_touched(Dimension::Tag, &tag_b.id.to_string())
                .is_some()
        );

        // The fingerprint was cleared and recomputes to a different digest.
        assert!(fx.catalog.fingerprint_of(product_id).is_none());
        fx.scheduler.run_batch().await.unwrap();
        let h2 = fx.catalog.fingerprint_of(product_id).unwrap();
        assert_ne!(h1, h2);
    }

    #[tokio::test]
    async fn product_save_enqueues_feed_entry_and_resets_progress() {
        let fx = fixture();
        let product = sample_product("p");
        let product_id = product.id;
        fx.catalog.insert_product(product);

        // Drain the scan so progress reaches Complete first.
        fx.scheduler.run_batch().await.unwrap();
        fx.scheduler.run_batch().await.unwrap();
        assert_eq!(
            fx.scheduler.progress().await.unwrap().status,
            BatchStatus::Complete
        );

        fx.bus
            .publish(SyncEvent::ProductSaved {
                id: product_id,
                before: ProductTaxonomy::default(),
                after: ProductTaxonomy::default(),
            })
            .await
            .unwrap();

        let entries = fx.feed.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_kind, EntityKind::Product);
        assert!(!entries[0].deleted);
        assert_eq!(
            fx.scheduler.progress().await.unwrap().status,
            BatchStatus::Scheduled
        );
    }

    #[tokio::test]
    async fn redirtying_a_delivered_product_wakes_delivery() {
        let fx = fixture();
        let product = sample_product("p");
        let product_id = product.id;
        fx.catalog.insert_product(product);
        fx.catalog.set_feed_handled(product_id, true).await.unwrap();

        fx.bus
            .publish(SyncEvent::ProductSaved {
                id: product_id,
                before: ProductTaxonomy::default(),
                after: ProductTaxonomy::default(),
            })
            .await
            .unwrap();

        let wakes: Vec<_> = fx
            .jobs
            .enqueued()
            .into_iter()
            .filter(|j| j.job_type == JobType::DeliverFeed)
            .collect();
        assert_eq!(wakes.len(), 1);
        assert!(!fx.catalog.feed_handled(product_id));
    }

    #[tokio::test]
    async fn undelivered_product_does_not_wake_delivery() {
        let fx = fixture();
        let product = sample_product("p");
        let product_id = product.id;
        fx.catalog.insert_product(product);

        fx.bus
            .publish(SyncEvent::ProductSaved {
                id: product_id,
                before: ProductTaxonomy::default(),
                after: ProductTaxonomy::default(),
            })
            .await
            .unwrap();

        assert!(
            fx.jobs
                .enqueued()
                .iter()
                .all(|j| j.job_type != JobType::DeliverFeed)
        );
    }

    #[tokio::test]
    async fn term_deletion_records_sweep_and_tombstone() {
        let fx = fixture();
        let term = sample_term(TermKind::Category, "tools");
        fx.catalog.insert_term(term.clone());

        fx.bus
            .publish(SyncEvent::TermDeleted {
                kind: TermKind::Category,
                term_id: term.id,
            })
            .await
            .unwrap();

        let sweeps = fx.scheduler.pending_sweeps().await.unwrap();
        assert_eq!(sweeps.len(), 1);
        assert_eq!(sweeps[0].term_id, term.id);

        let entries = fx.feed.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_kind, EntityKind::Category);
        assert!(entries[0].deleted);

        let snapshot = fx.ledger.snapshot().await.unwrap();
        assert!(
            snapshot
                .last_touched(Dimension::Category, &term.id.to_string())
                .is_some()
        );
    }

    #[tokio::test]
    async fn attribute_update_sweeps_its_terms() {
        let fx = fixture();
        let attribute_id = Uuid::new_v4();
        let mut term = sample_term(TermKind::AttributeTerm, "red");
        term.attribute_id = Some(attribute_id);
        fx.catalog.insert_term(term.clone());

        fx.bus
            .publish(SyncEvent::AttributeUpdated { id: attribute_id })
            .await
            .unwrap();

        let sweeps = fx.scheduler.pending_sweeps().await.unwrap();
        assert_eq!(sweeps.len(), 1);
        assert_eq!(sweeps[0].kind, TermKind::AttributeTerm);
        assert_eq!(sweeps[0].term_id, term.id);

        let snapshot = fx.ledger.snapshot().await.unwrap();
        assert!(
            snapshot
                .last_touched(Dimension::Attribute, &attribute_id.to_string())
                .is_some()
        );
    }

    #[tokio::test]
    async fn product_deletion_feeds_a_tombstone_and_wakes_delivery() {
        let fx = fixture();
        let product = sample_product("gone");
        let product_id = product.id;
        fx.catalog.insert_product(product);
        fx.catalog.remove_product(product_id);

        fx.bus
            .publish(SyncEvent::ProductDeleted {
                id: product_id,
                memberships: ProductTaxonomy::default(),
            })
            .await
            .unwrap();

        let entries = fx.feed.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].deleted);
        assert!(
            fx.jobs
                .enqueued()
                .iter()
                .any(|j| j.job_type == JobType::DeliverFeed)
        );
    }
}
