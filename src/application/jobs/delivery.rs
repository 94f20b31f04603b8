//! Feed delivery jobs.
//!
//! A cron tick drains the feed buffer on a regular cadence; queued one-shot
//! jobs let the dispatcher wake delivery immediately when a previously
//! delivered entity is re-dirtied.

use apalis::prelude::{Data, Error as ApalisError};
use apalis_cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

use super::context::{JobWorkerContext, job_failed};

/// Payload for queued one-shot delivery runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliverFeedJobPayload {}

pub async fn process_deliver_feed_job(
    _payload: DeliverFeedJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    deliver_once(&context).await
}

/// Marker struct for the cron-triggered delivery tick.
#[derive(Default, Debug, Clone)]
pub struct DeliveryTickJob;

impl From<chrono::DateTime<chrono::Utc>> for DeliveryTickJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

pub async fn process_delivery_tick_job(
    _job: DeliveryTickJob,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    deliver_once(&context).await
}

async fn deliver_once(context: &JobWorkerContext) -> Result<(), ApalisError> {
    let report = context
        .delivery
        .deliver_pending(context.delivery_batch_limit)
        .await
        .map_err(job_failed)?;
    if report.delivered > 0 || report.failed > 0 {
        info!(
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "delivery job finished"
        );
    }
    Ok(())
}

/// Cron schedule for the delivery tick: every two minutes.
pub fn delivery_tick_schedule() -> Schedule {
    Schedule::from_str("30 */2 * * * *").expect("Invalid cron expression for delivery_tick")
}
