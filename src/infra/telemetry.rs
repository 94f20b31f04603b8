use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "spola_fingerprint_batch_total",
            Unit::Count,
            "Total number of fingerprint batches processed."
        );
        describe_counter!(
            "spola_fingerprint_fail_total",
            Unit::Count,
            "Total number of entities whose resolution failed during fingerprinting."
        );
        describe_histogram!(
            "spola_batch_ms",
            Unit::Milliseconds,
            "Fingerprint batch latency in milliseconds."
        );
        describe_counter!(
            "spola_cache_hit_total",
            Unit::Count,
            "Total number of response-cache hits."
        );
        describe_counter!(
            "spola_cache_miss_total",
            Unit::Count,
            "Total number of response-cache misses."
        );
        describe_counter!(
            "spola_cache_stale_evict_total",
            Unit::Count,
            "Total number of cached responses evicted as stale on read."
        );
        describe_counter!(
            "spola_cache_bypass_total",
            Unit::Count,
            "Total number of responses kept out of the shared cache."
        );
        describe_gauge!(
            "spola_feed_pending",
            Unit::Count,
            "Current number of feed buffer entries awaiting delivery."
        );
        describe_counter!(
            "spola_delivery_fail_total",
            Unit::Count,
            "Total number of failed deliveries to the remote backend."
        );
        describe_histogram!(
            "spola_delivery_ms",
            Unit::Milliseconds,
            "Feed delivery pass latency in milliseconds."
        );
    });
}
