use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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
            "popcache_ranking_hit_total",
            Unit::Count,
            "Total number of ranking reads served from the sorted-set store."
        );
        describe_counter!(
            "popcache_ranking_miss_total",
            Unit::Count,
            "Total number of first-page ranking reads that found the key cold."
        );
        describe_counter!(
            "popcache_ranking_deep_miss_total",
            Unit::Count,
            "Total number of cold ranking reads past the first page."
        );
        describe_histogram!(
            "popcache_recompute_ms",
            Unit::Milliseconds,
            "Latency of rebuilding a ranking from the source of record."
        );
        describe_counter!(
            "popcache_persist_failed_total",
            Unit::Count,
            "Total number of recomputed rankings that could not be persisted."
        );
    });
}
