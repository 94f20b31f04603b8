//! End-to-end pipeline test over in-memory collaborators: mutation event →
//! ledger touch + invalidation → batch recompute → feed delivery → manifest.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use spola::application::batch::{BatchOutcome, BatchScheduler};
use spola::application::delivery::{DeliveryError, DeliveryService, RemoteBackend};
use spola::application::dispatcher::ChangeDispatcher;
use spola::application::events::{EventBus, SyncEvent};
use spola::application::fingerprint::FingerprintEngine;
use spola::application::ledger::FreshnessLedger;
use spola::application::repos::{
    ClearedSyncState, ConfigStore, FeedBufferRepo, JobsRepo, NewJobRecord, ProductsRepo,
    RepoError, TaxonomyRepo, VersionedValue,
};
use spola::cache::{ActorRole, CacheConfig, CacheService, CachedPayload, RequestKey};
use spola::domain::entities::{
    AttributeRecord, FeedEntryRecord, ProductRecord, ProductTaxonomy, TermRecord,
};
use spola::domain::types::{
    BatchStatus, Dimension, EntityKind, ProductStatus, StockStatus, TermKind,
};

use spola_api_types::{DeltaOp, DeltaPayload, TaxonomyNotification};

#[derive(Default)]
struct Harness {
    products: Mutex<BTreeMap<Uuid, ProductRecord>>,
    taxonomy: Mutex<BTreeMap<Uuid, ProductTaxonomy>>,
    terms: Mutex<BTreeMap<Uuid, TermRecord>>,
    options: Mutex<BTreeMap<String, (String, i64)>>,
    feed: Mutex<Vec<FeedEntryRecord>>,
    feed_next_id: AtomicUsize,
    jobs: Mutex<Vec<NewJobRecord>>,
    deltas: Mutex<Vec<DeltaPayload>>,
    notifications: Mutex<Vec<TaxonomyNotification>>,
}

impl Harness {
    fn insert_product(&self, name: &str) -> Uuid {
        let now = OffsetDateTime::now_utc();
        let id = Uuid::new_v4();
        self.products.lock().unwrap().insert(
            id,
            ProductRecord {
                id,
                sku: format!("SKU-{name}"),
                slug: name.to_string(),
                name: name.to_string(),
                description: String::new(),
                short_description: String::new(),
                status: ProductStatus::Published,
                regular_price_cents: Some(999),
                sale_price_cents: None,
                stock_status: StockStatus::InStock,
                stock_quantity: Some(1),
                image_urls: vec![],
                metadata: serde_json::json!({}),
                fingerprint: None,
                fingerprint_computed_at: None,
                feed_handled: false,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    fn insert_term(&self, kind: TermKind, slug: &str) -> Uuid {
        let now = OffsetDateTime::now_utc();
        let id = Uuid::new_v4();
        self.terms.lock().unwrap().insert(
            id,
            TermRecord {
                id,
                kind,
                slug: slug.to_string(),
                name: slug.to_string(),
                parent_id: None,
                attribute_id: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    fn fingerprint_of(&self, id: Uuid) -> Option<String> {
        self.products
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|p| p.fingerprint.clone())
    }
}

#[async_trait]
impl ProductsRepo for Harness {
    async fn find_product(&self, id: Uuid) -> Result<Option<ProductRecord>, RepoError> {
        Ok(self.products.lock().unwrap().get(&id).cloned())
    }

    async fn list_unfingerprinted(&self, limit: u32) -> Result<Vec<ProductRecord>, RepoError> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.fingerprint.is_none())
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn set_fingerprint(
        &self,
        id: Uuid,
        digest: &str,
        computed_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        let mut products = self.products.lock().unwrap();
        let product = products.get_mut(&id).ok_or(RepoError::NotFound)?;
        product.fingerprint = Some(digest.to_string());
        product.fingerprint_computed_at = Some(computed_at);
        Ok(())
    }

    async fn clear_sync_state(&self, id: Uuid) -> Result<ClearedSyncState, RepoError> {
        let mut products = self.products.lock().unwrap();
        let Some(product) = products.get_mut(&id) else {
            return Ok(ClearedSyncState::default());
        };
        let feed_was_handled = product.feed_handled;
        product.fingerprint = None;
        product.fingerprint_computed_at = None;
        product.feed_handled = false;
        Ok(ClearedSyncState { feed_was_handled })
    }

    async fn set_feed_handled(&self, id: Uuid, handled: bool) -> Result<(), RepoError> {
        let mut products = self.products.lock().unwrap();
        let product = products.get_mut(&id).ok_or(RepoError::NotFound)?;
        product.feed_handled = handled;
        Ok(())
    }

    async fn list_published_fingerprints(
        &self,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<(Uuid, String)>, RepoError> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.status == ProductStatus::Published)
            .filter(|p| after.map(|cursor| p.id > cursor).unwrap_or(true))
            .filter_map(|p| p.fingerprint.clone().map(|f| (p.id, f)))
            .take(limit as usize)
            .collect())
    }

    async fn count_published(&self) -> Result<u64, RepoError> {
        Ok(self.products.lock().unwrap().len() as u64)
    }

    async fn count_fingerprinted(&self) -> Result<u64, RepoError> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.fingerprint.is_some())
            .count() as u64)
    }

    async fn taxonomy_for(&self, product_id: Uuid) -> Result<ProductTaxonomy, RepoError> {
        Ok(self
            .taxonomy
            .lock()
            .unwrap()
            .get(&product_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn products_with_term(
        &self,
        kind: TermKind,
        term_id: Uuid,
    ) -> Result<Vec<Uuid>, RepoError> {
        Ok(self
            .taxonomy
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, taxonomy)| taxonomy.memberships.contains(&(kind, term_id)))
            .map(|(id, _)| *id)
            .collect())
    }
}

#[async_trait]
impl TaxonomyRepo for Harness {
    async fn find_term(&self, id: Uuid) -> Result<Option<TermRecord>, RepoError> {
        Ok(self.terms.lock().unwrap().get(&id).cloned())
    }

    async fn find_attribute(&self, _id: Uuid) -> Result<Option<AttributeRecord>, RepoError> {
        Ok(None)
    }

    async fn terms_for_attribute(
        &self,
        _attribute_id: Uuid,
    ) -> Result<Vec<TermRecord>, RepoError> {
        Ok(vec![])
    }
}

#[async_trait]
impl ConfigStore for Harness {
    async fn get(&self, key: &str) -> Result<Option<String>, RepoError> {
        Ok(self
            .options
            .lock()
            .unwrap()
            .get(key)
            .map(|(value, _)| value.clone()))
    }

    async fn get_versioned(&self, key: &str) -> Result<Option<VersionedValue>, RepoError> {
        Ok(self
            .options
            .lock()
            .unwrap()
            .get(key)
            .map(|(value, version)| VersionedValue {
                value: value.clone(),
                version: *version,
            }))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), RepoError> {
        let mut options = self.options.lock().unwrap();
        let version = options.get(key).map(|(_, v)| v + 1).unwrap_or(1);
        options.insert(key.to_string(), (value.to_string(), version));
        Ok(())
    }

    async fn set_versioned(
        &self,
        key: &str,
        value: &str,
        expected_version: Option<i64>,
    ) -> Result<bool, RepoError> {
        let mut options = self.options.lock().unwrap();
        let current = options.get(key).map(|(_, v)| *v);
        if current != expected_version {
            return Ok(false);
        }
        let next = current.map(|v| v + 1).unwrap_or(1);
        options.insert(key.to_string(), (value.to_string(), next));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), RepoError> {
        self.options.lock().unwrap().remove(key);
        Ok(())
    }
}

#[async_trait]
impl FeedBufferRepo for Harness {
    async fn enqueue(
        &self,
        entity_kind: EntityKind,
        entity_id: Uuid,
        deleted: bool,
    ) -> Result<i64, RepoError> {
        let id = self.feed_next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        self.feed.lock().unwrap().push(FeedEntryRecord {
            id,
            entity_kind,
            entity_id,
            deleted,
            enqueued_at: OffsetDateTime::now_utc(),
            attempts: 0,
        });
        Ok(id)
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<FeedEntryRecord>, RepoError> {
        Ok(self
            .feed
            .lock()
            .unwrap()
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn acknowledge(&self, entry_id: i64) -> Result<(), RepoError> {
        let mut feed = self.feed.lock().unwrap();
        let Some(acknowledged) = feed.iter().find(|e| e.id == entry_id).cloned() else {
            return Ok(());
        };
        feed.retain(|e| {
            e.id > entry_id
                || !(e.entity_kind == acknowledged.entity_kind
                    && e.entity_id == acknowledged.entity_id)
        });
        Ok(())
    }

    async fn record_attempt(&self, entry_id: i64) -> Result<(), RepoError> {
        let mut feed = self.feed.lock().unwrap();
        if let Some(entry) = feed.iter_mut().find(|e| e.id == entry_id) {
            entry.attempts += 1;
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, RepoError> {
        Ok(self.feed.lock().unwrap().len() as u64)
    }

    async fn oldest_enqueued_at(&self) -> Result<Option<OffsetDateTime>, RepoError> {
        Ok(self.feed.lock().unwrap().iter().map(|e| e.enqueued_at).min())
    }

    async fn clear(&self) -> Result<(), RepoError> {
        self.feed.lock().unwrap().clear();
        Ok(())
    }
}

#[async_trait]
impl JobsRepo for Harness {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<String, RepoError> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job);
        Ok(format!("job-{}", jobs.len()))
    }
}

#[async_trait]
impl RemoteBackend for Harness {
    async fn push_delta(&self, delta: &DeltaPayload) -> Result<(), DeliveryError> {
        self.deltas.lock().unwrap().push(delta.clone());
        Ok(())
    }

    async fn notify_taxonomy(
        &self,
        notification: &TaxonomyNotification,
    ) -> Result<(), DeliveryError> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct Pipeline {
    harness: Arc<Harness>,
    scheduler: Arc<BatchScheduler>,
    delivery: DeliveryService,
    cache: CacheService,
    ledger: Arc<FreshnessLedger>,
    bus: EventBus,
}

fn pipeline() -> Pipeline {
    let harness = Arc::new(Harness::default());
    let engine = Arc::new(FingerprintEngine::new(harness.clone(), harness.clone()));
    let ledger = Arc::new(FreshnessLedger::new(harness.clone()));
    let scheduler = Arc::new(BatchScheduler::new(
        harness.clone(),
        engine,
        harness.clone(),
        harness.clone(),
        harness.clone(),
        25,
    ));
    let delivery = DeliveryService::new(
        harness.clone(),
        harness.clone(),
        harness.clone(),
        Duration::from_secs(3600),
    );
    let cache = CacheService::new(CacheConfig::default(), ledger.clone(), harness.clone());

    let dispatcher = Arc::new(ChangeDispatcher::new(
        harness.clone(),
        harness.clone(),
        ledger.clone(),
        harness.clone(),
        scheduler.clone(),
        harness.clone(),
    ));
    let bus = EventBus::new();
    dispatcher.wire(&bus);

    Pipeline {
        harness,
        scheduler,
        delivery,
        cache,
        ledger,
        bus,
    }
}

#[tokio::test]
async fn mutation_flows_through_to_remote_delivery() {
    let p = pipeline();
    let tag_sale = p.harness.insert_term(TermKind::Tag, "sale");
    let tag_new = p.harness.insert_term(TermKind::Tag, "new");
    let product = p.harness.insert_product("anvil");
    p.harness.taxonomy.lock().unwrap().insert(
        product,
        ProductTaxonomy::new([(TermKind::Tag, tag_sale), (TermKind::Tag, tag_new)]),
    );

    // Initial scan computes H1.
    while p.scheduler.run_batch().await.unwrap() != BatchOutcome::Complete {}
    let h1 = p.harness.fingerprint_of(product).unwrap();

    // The save removed one tag.
    let before = ProductTaxonomy::new([(TermKind::Tag, tag_sale), (TermKind::Tag, tag_new)]);
    let after = ProductTaxonomy::new([(TermKind::Tag, tag_sale)]);
    p.harness
        .taxonomy
        .lock()
        .unwrap()
        .insert(product, after.clone());
    p.bus
        .publish(SyncEvent::ProductSaved {
            id: product,
            before,
            after,
        })
        .await
        .unwrap();

    // The removed tag was touched; the fingerprint was invalidated.
    let snapshot = p.ledger.snapshot().await.unwrap();
    assert!(
        snapshot
            .last_touched(Dimension::Tag, &tag_new.to_string())
            .is_some()
    );
    assert!(p.harness.fingerprint_of(product).is_none());

    // The next scan recomputes a different digest.
    while p.scheduler.run_batch().await.unwrap() != BatchOutcome::Complete {}
    let h2 = p.harness.fingerprint_of(product).unwrap();
    assert_ne!(h1, h2);

    // Delivery pushes the delta and acknowledges the buffer entry.
    let report = p.delivery.deliver_pending(10).await.unwrap();
    assert_eq!(report.delivered, 1);
    let deltas = p.harness.deltas.lock().unwrap();
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].op, DeltaOp::Upsert);
    assert_eq!(deltas[0].fingerprint.as_deref(), Some(h2.as_str()));
    drop(deltas);
    assert_eq!(p.harness.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn term_deletion_sweeps_and_notifies() {
    let p = pipeline();
    let tag = p.harness.insert_term(TermKind::Tag, "clearance");
    let product = p.harness.insert_product("hammer");
    p.harness
        .taxonomy
        .lock()
        .unwrap()
        .insert(product, ProductTaxonomy::new([(TermKind::Tag, tag)]));

    while p.scheduler.run_batch().await.unwrap() != BatchOutcome::Complete {}
    assert!(p.harness.fingerprint_of(product).is_some());

    p.bus
        .publish(SyncEvent::TermDeleted {
            kind: TermKind::Tag,
            term_id: tag,
        })
        .await
        .unwrap();

    // The sweep expands the term change into a product invalidation.
    let invalidated = p.scheduler.run_sweep().await.unwrap();
    assert_eq!(invalidated, 1);
    assert!(p.harness.fingerprint_of(product).is_none());

    // Delivery emits the structural notification for the term.
    p.delivery.deliver_pending(10).await.unwrap();
    let notifications = p.harness.notifications.lock().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].term_id, tag);
}

#[tokio::test]
async fn cached_responses_go_stale_after_a_touch() {
    let p = pipeline();
    let key = RequestKey::new(ActorRole::Public, "/api/v1/fingerprints", &[]);

    let mut payload = CachedPayload {
        content_type: "application/json".to_string(),
        body: bytes::Bytes::from_static(b"{}"),
        created_at: OffsetDateTime::now_utc().unix_timestamp() - 5,
    };
    payload.created_at -= 1;
    p.cache.save(key.clone(), payload, true);
    assert!(p.cache.get(&key).await.unwrap().is_some());

    // A catalog mutation touches a dimension; the payload predates it.
    p.bus
        .publish(SyncEvent::TermSaved {
            kind: TermKind::Category,
            term_id: Uuid::new_v4(),
        })
        .await
        .unwrap();

    assert!(p.cache.get(&key).await.unwrap().is_none());

    // The manifest reflects the touch for client-side self-invalidation.
    let manifest = p.cache.manifest().await.unwrap();
    assert_eq!(manifest.per_field_last_touched["category"].len(), 1);
}

#[tokio::test]
async fn batch_progress_survives_interruption() {
    let p = pipeline();
    for i in 0..60 {
        p.harness.insert_product(&format!("p{i}"));
    }

    // Two ticks process 50; "interruption" is simply stopping here.
    p.scheduler.run_batch().await.unwrap();
    p.scheduler.run_batch().await.unwrap();
    let progress = p.scheduler.progress().await.unwrap();
    assert_eq!(progress.processed_count, 50);
    assert_eq!(progress.status, BatchStatus::Scheduled);

    // Resume: only the remaining ten are processed.
    let outcome = p.scheduler.run_batch().await.unwrap();
    assert_eq!(
        outcome,
        BatchOutcome::Processed {
            fingerprinted: 10,
            failed: 0
        }
    );
    assert_eq!(
        p.scheduler.run_batch().await.unwrap(),
        BatchOutcome::Complete
    );
    let progress = p.scheduler.progress().await.unwrap();
    assert_eq!(progress.processed_count, 60);
    assert_eq!(progress.status, BatchStatus::Complete);
}
