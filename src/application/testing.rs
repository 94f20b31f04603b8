//! In-memory fakes for the repository traits, shared across unit tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    ClearedSyncState, ConfigStore, FeedBufferRepo, JobsRepo, NewJobRecord, ProductsRepo,
    RepoError, TaxonomyRepo, VersionedValue,
};
use crate::domain::entities::{
    AttributeRecord, FeedEntryRecord, ProductRecord, ProductTaxonomy, TermRecord,
};
use crate::domain::types::{EntityKind, ProductStatus, StockStatus, TermKind};

#[derive(Default)]
pub struct MemoryConfigStore {
    entries: Mutex<BTreeMap<String, (String, i64)>>,
    fail_cas: AtomicUsize,
    cas_attempts: AtomicUsize,
}

impl MemoryConfigStore {
    /// Make the next `count` conditional writes report a conflict.
    pub fn fail_next_cas(&self, count: usize) {
        self.fail_cas.store(count, Ordering::SeqCst);
    }

    pub fn cas_attempts(&self) -> usize {
        self.cas_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RepoError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(key)
            .map(|(value, _)| value.clone()))
    }

    async fn get_versioned(&self, key: &str) -> Result<Option<VersionedValue>, RepoError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(key)
            .map(|(value, version)| VersionedValue {
                value: value.clone(),
                version: *version,
            }))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), RepoError> {
        let mut entries = self.entries.lock().unwrap();
        let version = entries.get(key).map(|(_, v)| v + 1).unwrap_or(1);
        entries.insert(key.to_string(), (value.to_string(), version));
        Ok(())
    }

    async fn set_versioned(
        &self,
        key: &str,
        value: &str,
        expected_version: Option<i64>,
    ) -> Result<bool, RepoError> {
        self.cas_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_cas
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(false);
        }

        let mut entries = self.entries.lock().unwrap();
        let current = entries.get(key).map(|(_, version)| *version);
        if current != expected_version {
            return Ok(false);
        }
        let next = current.map(|v| v + 1).unwrap_or(1);
        entries.insert(key.to_string(), (value.to_string(), next));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), RepoError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// In-memory catalog implementing both `ProductsRepo` and `TaxonomyRepo`.
#[derive(Default)]
pub struct MemoryCatalog {
    products: Mutex<BTreeMap<Uuid, ProductRecord>>,
    taxonomy: Mutex<BTreeMap<Uuid, ProductTaxonomy>>,
    terms: Mutex<BTreeMap<Uuid, TermRecord>>,
    attributes: Mutex<BTreeMap<Uuid, AttributeRecord>>,
}

impl MemoryCatalog {
    pub fn insert_product(&self, product: ProductRecord) {
        self.products.lock().unwrap().insert(product.id, product);
    }

    pub fn insert_term(&self, term: TermRecord) {
        self.terms.lock().unwrap().insert(term.id, term);
    }

    pub fn insert_attribute(&self, attribute: AttributeRecord) {
        self.attributes
            .lock()
            .unwrap()
            .insert(attribute.id, attribute);
    }

    pub fn set_taxonomy(&self, product_id: Uuid, taxonomy: ProductTaxonomy) {
        self.taxonomy.lock().unwrap().insert(product_id, taxonomy);
    }

    pub fn fingerprint_of(&self, id: Uuid) -> Option<String> {
        self.products
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|p| p.fingerprint.clone())
    }

    pub fn feed_handled(&self, id: Uuid) -> bool {
        self.products
            .lock()
            .unwrap()
            .get(&id)
            .map(|p| p.feed_handled)
            .unwrap_or(false)
    }

    pub fn remove_product(&self, id: Uuid) -> Option<ProductRecord> {
        self.products.lock().unwrap().remove(&id)
    }
}

pub fn sample_product(name: &str) -> ProductRecord {
    let now = OffsetDateTime::now_utc();
    ProductRecord {
        id: Uuid::new_v4(),
        sku: format!("SKU-{name}"),
        slug: slug::slugify(name),
        name: name.to_string(),
        description: format!("{name} description"),
        short_description: String::new(),
        status: ProductStatus::Published,
        regular_price_cents: Some(1_000),
        sale_price_cents: None,
        stock_status: StockStatus::InStock,
        stock_quantity: Some(5),
        image_urls: vec![],
        metadata: serde_json::json!({}),
        fingerprint: None,
        fingerprint_computed_at: None,
        feed_handled: false,
        created_at: now,
        updated_at: now,
    }
}

pub fn sample_term(kind: TermKind, slug_text: &str) -> TermRecord {
    let now = OffsetDateTime::now_utc();
    TermRecord {
        id: Uuid::new_v4(),
        kind,
        slug: slug_text.to_string(),
        name: slug_text.to_string(),
        parent_id: None,
        attribute_id: None,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl ProductsRepo for MemoryCatalog {
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
        Ok(self
            .products
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.status == ProductStatus::Published)
            .count() as u64)
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
impl TaxonomyRepo for MemoryCatalog {
    async fn find_term(&self, id: Uuid) -> Result<Option<TermRecord>, RepoError> {
        Ok(self.terms.lock().unwrap().get(&id).cloned())
    }

    async fn find_attribute(&self, id: Uuid) -> Result<Option<AttributeRecord>, RepoError> {
        Ok(self.attributes.lock().unwrap().get(&id).cloned())
    }

    async fn terms_for_attribute(&self, attribute_id: Uuid) -> Result<Vec<TermRecord>, RepoError> {
        Ok(self
            .terms
            .lock()
            .unwrap()
            .values()
            .filter(|term| term.attribute_id == Some(attribute_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryFeedBuffer {
    entries: Mutex<Vec<FeedEntryRecord>>,
    next_id: AtomicUsize,
}

impl MemoryFeedBuffer {
    pub fn entries(&self) -> Vec<FeedEntryRecord> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedBufferRepo for MemoryFeedBuffer {
    async fn enqueue(
        &self,
        entity_kind: EntityKind,
        entity_id: Uuid,
        deleted: bool,
    ) -> Result<i64, RepoError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        self.entries.lock().unwrap().push(FeedEntryRecord {
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
            .entries
            .lock()
            .unwrap()
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn acknowledge(&self, entry_id: i64) -> Result<(), RepoError> {
        let mut entries = self.entries.lock().unwrap();
        let Some(acknowledged) = entries.iter().find(|e| e.id == entry_id).cloned() else {
            return Ok(());
        };
        entries.retain(|e| {
            e.id > entry_id
                || !(e.entity_kind == acknowledged.entity_kind
                    && e.entity_id == acknowledged.entity_id)
        });
        Ok(())
    }

    async fn record_attempt(&self, entry_id: i64) -> Result<(), RepoError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == entry_id) {
            entry.attempts += 1;
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, RepoError> {
        Ok(self.entries.lock().unwrap().len() as u64)
    }

    async fn oldest_enqueued_at(&self) -> Result<Option<OffsetDateTime>, RepoError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.enqueued_at)
            .min())
    }

    async fn clear(&self) -> Result<(), RepoError> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryJobsRepo {
    jobs: Mutex<Vec<NewJobRecord>>,
}

impl MemoryJobsRepo {
    pub fn enqueued(&self) -> Vec<NewJobRecord> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobsRepo for MemoryJobsRepo {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<String, RepoError> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job);
        Ok(format!("job-{}", jobs.len()))
    }
}
