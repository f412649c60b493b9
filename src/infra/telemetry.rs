use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::bootstrap::metric_names;
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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

/// Register descriptions for every metric the cache emits. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            metric_names::CACHE_HIT,
            Unit::Count,
            "Total number of revision lookups served from the cache."
        );
        describe_counter!(
            metric_names::CACHE_MISS,
            Unit::Count,
            "Total number of revision lookups that started a fetch."
        );
        describe_counter!(
            metric_names::CACHE_JOIN,
            Unit::Count,
            "Total number of revision lookups that joined an in-flight fetch."
        );
        describe_histogram!(
            metric_names::FETCH_MS,
            Unit::Milliseconds,
            "Revision fetch latency in milliseconds."
        );
        describe_counter!(
            metric_names::FETCH_FAILED,
            Unit::Count,
            "Total number of failed or timed-out revision fetches."
        );
        describe_counter!(
            metric_names::INVALIDATION,
            Unit::Count,
            "Total number of invalidation messages that cleared a project cache."
        );
        describe_counter!(
            metric_names::PREWARM_FAILED,
            Unit::Count,
            "Total number of prewarm fetches that failed after an invalidation."
        );
        describe_counter!(
            metric_names::SUBSCRIPTION_SETUP_FAILED,
            Unit::Count,
            "Total number of invalidation subscriptions that could not be established."
        );
        describe_counter!(
            metric_names::ACK_FAILED,
            Unit::Count,
            "Total number of invalidation messages whose acknowledgement failed."
        );
        describe_counter!(
            metric_names::RENDER_FAILED,
            Unit::Count,
            "Total number of bootstrap documents that failed to render."
        );
    });
}
