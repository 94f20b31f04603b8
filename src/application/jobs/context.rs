use std::sync::Arc;

use apalis::prelude::Error as ApalisError;

use crate::application::{batch::BatchScheduler, delivery::DeliveryService};

/// Shared context passed to job workers so they can reach the sync services.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub scheduler: Arc<BatchScheduler>,
    pub delivery: Arc<DeliveryService>,
    /// Maximum feed entries drained per delivery pass.
    pub delivery_batch_limit: u32,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
