//! Fingerprint batch and taxonomy sweep jobs.
//!
//! The batch tick runs on a cron cadence and executes one bounded batch per
//! firing; queued one-shot batch jobs give mutation paths an immediate run.
//! The sweep tick runs on a faster cadence and expands taxonomy-level
//! changes into per-entity invalidations.

use apalis::prelude::{Data, Error as ApalisError};
use apalis_cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{info, warn};

use crate::application::batch::BatchOutcome;
use crate::domain::types::BatchStatus;

use super::context::{JobWorkerContext, job_failed};

/// Payload for queued one-shot batch runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FingerprintBatchJobPayload {}

pub async fn process_fingerprint_batch_job(
    _payload: FingerprintBatchJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    run_one_batch(&context).await
}

/// Marker struct for the cron-triggered batch tick.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron.
#[derive(Default, Debug, Clone)]
pub struct BatchTickJob;

impl From<chrono::DateTime<chrono::Utc>> for BatchTickJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

pub async fn process_batch_tick_job(
    _job: BatchTickJob,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let progress = context.scheduler.progress().await.map_err(job_failed)?;
    if progress.status == BatchStatus::Complete {
        return Ok(());
    }
    run_one_batch(&context).await
}

async fn run_one_batch(context: &JobWorkerContext) -> Result<(), ApalisError> {
    match context.scheduler.run_batch().await.map_err(job_failed)? {
        BatchOutcome::Skipped => {}
        BatchOutcome::Processed {
            fingerprinted,
            failed,
        } => {
            info!(fingerprinted, failed, "batch job processed a batch");
        }
        BatchOutcome::Complete => {
            info!("batch job found the scan complete");
        }
    }
    Ok(())
}

/// Cron schedule for the batch tick: every five minutes.
pub fn batch_tick_schedule() -> Schedule {
    Schedule::from_str("0 */5 * * * *").expect("Invalid cron expression for batch_tick")
}

/// Marker struct for the cron-triggered taxonomy sweep.
#[derive(Default, Debug, Clone)]
pub struct TaxonomySweepJob;

impl From<chrono::DateTime<chrono::Utc>> for TaxonomySweepJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

pub async fn process_taxonomy_sweep_job(
    _job: TaxonomySweepJob,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    match context.scheduler.run_sweep().await {
        Ok(0) => {}
        Ok(invalidated) => {
            info!(invalidated, "taxonomy sweep invalidated products");
        }
        Err(err) => {
            warn!(error = %err, "taxonomy sweep failed, retrying next tick");
        }
    }
    Ok(())
}

/// Cron schedule for the taxonomy sweep: every minute, deliberately faster
/// than the batch tick so "something changed" expands into "which entities"
/// ahead of the next recompute.
pub fn taxonomy_sweep_schedule() -> Schedule {
    Schedule::from_str("0 * * * * *").expect("Invalid cron expression for taxonomy_sweep")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedules_parse_correctly() {
        let upcoming: Vec<_> = batch_tick_schedule().upcoming(chrono::Utc).take(2).collect();
        assert_eq!(upcoming.len(), 2);

        let upcoming: Vec<_> = taxonomy_sweep_schedule()
            .upcoming(chrono::Utc)
            .take(2)
            .collect();
        assert_eq!(upcoming.len(), 2);
    }
}
