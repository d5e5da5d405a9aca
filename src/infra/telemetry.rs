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

/// Register descriptions for every metric the cache emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "softcache_hit_total",
            Unit::Count,
            "Total number of reads served from a fresh entry."
        );
        describe_counter!(
            "softcache_stale_total",
            Unit::Count,
            "Total number of reads served from a soft-expired entry."
        );
        describe_counter!(
            "softcache_miss_total",
            Unit::Count,
            "Total number of reads that found no entry, labelled by refresh mode."
        );
        describe_counter!(
            "softcache_refresh_total",
            Unit::Count,
            "Total number of fetch attempts, labelled by outcome."
        );
        describe_counter!(
            "softcache_trigger_dispatch_total",
            Unit::Count,
            "Total number of wake-up calls fired at the trigger endpoint."
        );
        describe_counter!(
            "softcache_trigger_ignored_total",
            Unit::Count,
            "Total number of wake-up calls ignored, labelled by reason."
        );
        describe_histogram!(
            "softcache_fetch_ms",
            Unit::Milliseconds,
            "Fetch handler latency in milliseconds."
        );
    });
}
