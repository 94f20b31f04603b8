//! Batch scheduler: walks the catalog in bounded batches, resumably,
//! recomputing missing fingerprints without blocking the host process.
//!
//! There is no separate checkpoint: selection is always "products lacking a
//! fingerprint, in insertion order", so a run that crashes mid-batch simply
//! leaves some entities unfingerprinted and the next tick picks them up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::application::fingerprint::{FingerprintEngine, FingerprintError};
use crate::application::repos::{
    ConfigStore, FeedBufferRepo, JobsRepo, NewJobRecord, ProductsRepo, RepoError,
};
use crate::domain::types::{BatchStatus, EntityKind, JobType, TermKind};

pub const PROGRESS_OPTION_KEY: &str = "spola.batch_progress";
pub const SWEEP_OPTION_KEY: &str = "spola.taxonomy_sweep";

const METRIC_BATCH_TOTAL: &str = "spola_fingerprint_batch_total";
const METRIC_FINGERPRINT_FAIL_TOTAL: &str = "spola_fingerprint_fail_total";
const METRIC_BATCH_MS: &str = "spola_batch_ms";

/// Retry allowance for queued batch jobs while the scan is incomplete; the
/// wide window mitigates host-scheduler timeouts mid-scan.
const WIDE_MAX_ATTEMPTS: i32 = 10;
/// Narrow retry allowance once the scan has completed.
const NARROW_MAX_ATTEMPTS: i32 = 3;

const DEDUPE_LOCK_TTL: Duration = Duration::from_secs(60);
const SWEEP_CAS_RETRY_LIMIT: usize = 4;

/// Persistent batch progress state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchProgress {
    pub status: BatchStatus,
    pub processed_count: u64,
    pub batch_count: u64,
    pub last_product_id: Option<Uuid>,
    pub last_batch_ids: Vec<Uuid>,
    /// True while a queued one-shot batch job is pending. Checked via this
    /// state, not via queue-side duplicate suppression, so re-entrant
    /// triggers collapse.
    pub pending_job: bool,
}

/// A taxonomy-level change known to affect some products, exact set not yet
/// computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSweep {
    pub kind: TermKind,
    pub term_id: Uuid,
}

/// Outcome of a single batch tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Another run already holds the dedupe lock.
    Skipped,
    /// A non-empty batch was processed; backlog may remain.
    Processed { fingerprinted: usize, failed: usize },
    /// The selection came back empty: the scan is complete.
    Complete,
}

/// Short-lived in-process lock keyed by job name, collapsing duplicate
/// triggers from overlapping requests.
pub struct DedupeLock {
    held: Mutex<HashMap<&'static str, Instant>>,
    ttl: Duration,
}

impl DedupeLock {
    pub fn new(ttl: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Try to take the named lock; expired holders are evicted first.
    pub fn acquire(&self, name: &'static str) -> bool {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| {
            warn!(name, "dedupe lock mutex poisoned, recovering");
            poisoned.into_inner()
        });
        let now = Instant::now();
        held.retain(|_, taken_at| now.duration_since(*taken_at) < self.ttl);
        if held.contains_key(name) {
            return false;
        }
        held.insert(name, now);
        true
    }

    pub fn release(&self, name: &'static str) {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name);
    }
}

impl Default for DedupeLock {
    fn default() -> Self {
        Self::new(DEDUPE_LOCK_TTL)
    }
}

pub struct BatchScheduler {
    products: Arc<dyn ProductsRepo>,
    engine: Arc<FingerprintEngine>,
    store: Arc<dyn ConfigStore>,
    jobs: Arc<dyn JobsRepo>,
    feed: Arc<dyn FeedBufferRepo>,
    batch_size: u32,
    lock: DedupeLock,
}

impl BatchScheduler {
    pub fn new(
        products: Arc<dyn ProductsRepo>,
        engine: Arc<FingerprintEngine>,
        store: Arc<dyn ConfigStore>,
        jobs: Arc<dyn JobsRepo>,
        feed: Arc<dyn FeedBufferRepo>,
        batch_size: u32,
    ) -> Self {
        Self {
            products,
            engine,
            store,
            jobs,
            feed,
            batch_size,
            lock: DedupeLock::default(),
        }
    }

    pub async fn progress(&self) -> Result<BatchProgress, RepoError> {
        Ok(self
            .store
            .get(PROGRESS_OPTION_KEY)
            .await?
            .and_then(|value| serde_json::from_str(&value).ok())
            .unwrap_or_default())
    }

    async fn save_progress(&self, progress: &BatchProgress) -> Result<(), RepoError> {
        let serialized = serde_json::to_string(progress).map_err(RepoError::from_persistence)?;
        self.store.set(PROGRESS_OPTION_KEY, &serialized).await
    }

    /// Transition to `Scheduled` and enqueue exactly one pending batch job.
    pub async fn mark_dirty(&self) -> Result<(), RepoError> {
        let mut progress = self.progress().await?;
        let was_complete = progress.status == BatchStatus::Complete;
        progress.status = BatchStatus::Scheduled;

        if !progress.pending_job {
            progress.pending_job = true;
            self.save_progress(&progress).await?;
            let max_attempts = if was_complete {
                NARROW_MAX_ATTEMPTS
            } else {
                WIDE_MAX_ATTEMPTS
            };
            self.jobs
                .enqueue_job(NewJobRecord {
                    job_type: JobType::FingerprintBatch,
                    payload: serde_json::json!({}),
                    run_at: OffsetDateTime::now_utc(),
                    max_attempts,
                    priority: 0,
                })
                .await?;
            debug!(max_attempts, "batch job enqueued");
        } else {
            self.save_progress(&progress).await?;
            debug!("batch job already pending, trigger collapsed");
        }

        Ok(())
    }

    /// Execute one bounded batch. Idempotent under at-least-once execution.
    #[instrument(skip(self))]
    pub async fn run_batch(&self) -> Result<BatchOutcome, RepoError> {
        if !self.lock.acquire("fingerprint_batch") {
            debug!("duplicate batch trigger, skipping");
            return Ok(BatchOutcome::Skipped);
        }
        let outcome = self.run_batch_locked().await;
        self.lock.release("fingerprint_batch");
        outcome
    }

    async fn run_batch_locked(&self) -> Result<BatchOutcome, RepoError> {
        let started_at = Instant::now();
        let mut progress = self.progress().await?;
        progress.status = BatchStatus::Running;
        progress.pending_job = false;
        self.save_progress(&progress).await?;

        let batch = self.products.list_unfingerprinted(self.batch_size).await?;
        if batch.is_empty() {
            progress.status = BatchStatus::Complete;
            self.save_progress(&progress).await?;
            info!(
                processed_count = progress.processed_count,
                batch_count = progress.batch_count,
                "fingerprint scan complete"
            );
            return Ok(BatchOutcome::Complete);
        }

        let mut fingerprinted = 0usize;
        let mut failed = 0usize;
        let mut batch_ids = Vec::with_capacity(batch.len());

        for product in &batch {
            match self.engine.fingerprint(product.id).await {
                Ok(digest) => {
                    self.products
                        .set_fingerprint(product.id, &digest, OffsetDateTime::now_utc())
                        .await?;
                    batch_ids.push(product.id);
                    fingerprinted += 1;
                }
                Err(FingerprintError::NoData) => {
                    // Entity vanished between selection and processing; leave
                    // it unfingerprinted so the next batch retries it.
                    counter!(METRIC_FINGERPRINT_FAIL_TOTAL).increment(1);
                    warn!(product_id = %product.id, "entity unresolvable, skipped");
                    failed += 1;
                }
                Err(FingerprintError::Repo(err)) => return Err(err),
            }
        }

        progress.processed_count += fingerprinted as u64;
        progress.batch_count += 1;
        progress.last_product_id = batch_ids.last().copied().or(progress.last_product_id);
        progress.last_batch_ids = batch_ids;
        // Ready to be re-triggered: a non-empty batch never assumes it
        // cleared the backlog.
        progress.status = BatchStatus::Scheduled;
        self.save_progress(&progress).await?;

        counter!(METRIC_BATCH_TOTAL).increment(1);
        histogram!(METRIC_BATCH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        info!(
            fingerprinted,
            failed,
            processed_count = progress.processed_count,
            batch_count = progress.batch_count,
            "fingerprint batch processed"
        );

        Ok(BatchOutcome::Processed {
            fingerprinted,
            failed,
        })
    }

    /// Record a taxonomy-level change whose affected-entity set is expensive
    /// to compute eagerly. Consumed by [`run_sweep`](Self::run_sweep).
    pub async fn record_pending_sweep(
        &self,
        kind: TermKind,
        term_id: Uuid,
    ) -> Result<(), RepoError> {
        for _ in 0..SWEEP_CAS_RETRY_LIMIT {
            let current = self.store.get_versioned(SWEEP_OPTION_KEY).await?;
            let (mut pending, expected) = match &current {
                Some(versioned) => (
                    parse_sweeps(&versioned.value),
                    Some(versioned.version),
                ),
                None => (Vec::new(), None),
            };
            let entry = PendingSweep { kind, term_id };
            if pending.contains(&entry) {
                return Ok(());
            }
            pending.push(entry);
            let serialized =
                serde_json::to_string(&pending).map_err(RepoError::from_persistence)?;
            if self
                .store
                .set_versioned(SWEEP_OPTION_KEY, &serialized, expected)
                .await?
            {
                return Ok(());
            }
        }
        warn!(kind = kind.as_str(), %term_id, "sweep CAS retries exhausted, writing unconditionally");
        let mut pending = self.pending_sweeps().await?;
        let entry = PendingSweep { kind, term_id };
        if !pending.contains(&entry) {
            pending.push(entry);
        }
        let serialized = serde_json::to_string(&pending).map_err(RepoError::from_persistence)?;
        self.store.set(SWEEP_OPTION_KEY, &serialized).await
    }

    pub async fn pending_sweeps(&self) -> Result<Vec<PendingSweep>, RepoError> {
        Ok(self
            .store
            .get(SWEEP_OPTION_KEY)
            .await?
            .map(|value| parse_sweeps(&value))
            .unwrap_or_default())
    }

    /// Expand pending taxonomy sweeps into per-entity invalidations.
    ///
    /// Runs on a faster cadence than the batch tick: it only clears sync
    /// state and re-dirties the scan, leaving the recompute to the batches.
    #[instrument(skip(self))]
    pub async fn run_sweep(&self) -> Result<usize, RepoError> {
        let pending = self.pending_sweeps().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut invalidated = 0usize;
        for sweep in &pending {
            let affected = self
                .products
                .products_with_term(sweep.kind, sweep.term_id)
                .await?;
            for product_id in affected {
                self.products.clear_sync_state(product_id).await?;
                // The recomputed delta must reach the remote as well.
                self.feed
                    .enqueue(EntityKind::Product, product_id, false)
                    .await?;
                invalidated += 1;
            }
        }

        self.store.delete(SWEEP_OPTION_KEY).await?;
        if invalidated > 0 {
            self.mark_dirty().await?;
        }
        info!(sweeps = pending.len(), invalidated, "taxonomy sweep expanded");
        Ok(invalidated)
    }

    /// Clear all scheduler state (subsystem reset/uninstall).
    pub async fn reset(&self) -> Result<(), RepoError> {
        self.store.delete(PROGRESS_OPTION_KEY).await?;
        self.store.delete(SWEEP_OPTION_KEY).await
    }
}

fn parse_sweeps(value: &str) -> Vec<PendingSweep> {
    serde_json::from_str(value).unwrap_or_else(|err| {
        warn!(error = %err, "pending sweep list unreadable, starting empty");
        Vec::new()
    })
}
