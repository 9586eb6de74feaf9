use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_CACHE_BYPASS_TOTAL, METRIC_CACHE_COMPUTE_MS, METRIC_CACHE_CORRUPT_TOTAL,
    METRIC_CACHE_FLIGHT_SHARED_TOTAL, METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL,
    METRIC_TAG_PURGE_TOTAL, METRIC_VERSION_BUMP_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};
use crate::infra::revalidate::{METRIC_REVALIDATE_FAILURE_TOTAL, METRIC_REVALIDATE_SUCCESS_TOTAL};

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
            METRIC_CACHE_HIT_TOTAL,
            Unit::Count,
            "Total number of cache reads answered from the store."
        );
        describe_counter!(
            METRIC_CACHE_MISS_TOTAL,
            Unit::Count,
            "Total number of cache reads that found no entry."
        );
        describe_counter!(
            METRIC_CACHE_CORRUPT_TOTAL,
            Unit::Count,
            "Total number of cached entries that failed to decode and were recomputed."
        );
        describe_counter!(
            METRIC_CACHE_BYPASS_TOTAL,
            Unit::Count,
            "Total number of cache reads skipped by an explicit revalidate."
        );
        describe_counter!(
            METRIC_CACHE_FLIGHT_SHARED_TOTAL,
            Unit::Count,
            "Total number of misses served by another caller's in-flight compute."
        );
        describe_histogram!(
            METRIC_CACHE_COMPUTE_MS,
            Unit::Milliseconds,
            "Latency of compute functions run on a cache miss, in milliseconds."
        );
        describe_counter!(
            METRIC_TAG_PURGE_TOTAL,
            Unit::Count,
            "Total number of tag purges that deleted at least one entry."
        );
        describe_counter!(
            METRIC_VERSION_BUMP_TOTAL,
            Unit::Count,
            "Total number of namespace version bumps."
        );
        describe_counter!(
            METRIC_REVALIDATE_SUCCESS_TOTAL,
            Unit::Count,
            "Total number of revalidation webhooks accepted by the front-end."
        );
        describe_counter!(
            METRIC_REVALIDATE_FAILURE_TOTAL,
            Unit::Count,
            "Total number of revalidation webhooks that failed."
        );
    });
}
