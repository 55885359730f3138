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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "cachegate_response_hit_total",
            Unit::Count,
            "Total number of cached responses served."
        );
        describe_counter!(
            "cachegate_response_miss_total",
            Unit::Count,
            "Total number of cacheable requests forwarded to the handler."
        );
        describe_counter!(
            "cachegate_response_bypass_total",
            Unit::Count,
            "Total number of requests served uncached after a failed lookup."
        );
        describe_counter!(
            "cachegate_store_write_failed_total",
            Unit::Count,
            "Total number of failed background write-backs."
        );
        describe_counter!(
            "cachegate_invalidation_total",
            Unit::Count,
            "Total number of pattern deletes, labelled by outcome."
        );
        describe_histogram!(
            "cachegate_warm_ms",
            Unit::Milliseconds,
            "Cache warming run latency in milliseconds."
        );
    });
}
