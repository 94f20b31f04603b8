mod batch;
mod context;
mod delivery;

pub use batch::{
    BatchTickJob, FingerprintBatchJobPayload, TaxonomySweepJob, batch_tick_schedule,
    process_batch_tick_job, process_fingerprint_batch_job, process_taxonomy_sweep_job,
    taxonomy_sweep_schedule,
};
pub use context::{JobWorkerContext, job_failed};
pub use delivery::{
    DeliverFeedJobPayload, DeliveryTickJob, delivery_tick_schedule, process_deliver_feed_job,
    process_delivery_tick_job,
};
