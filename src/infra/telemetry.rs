use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::jobs::{
    METRIC_JOBS_CLAIMED, METRIC_JOBS_COMPLETED, METRIC_JOBS_FAILED, METRIC_JOBS_RECOVERED,
};
use crate::application::template::METRIC_RENDER_MS;
use crate::config::{LogFormat, LoggingSettings};

use super::{engine::METRIC_CONVERT_MS, error::InfraError};

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
            METRIC_JOBS_CLAIMED,
            Unit::Count,
            "Total number of jobs claimed by workers."
        );
        describe_counter!(
            METRIC_JOBS_COMPLETED,
            Unit::Count,
            "Total number of jobs that reached COMPLETED."
        );
        describe_counter!(
            METRIC_JOBS_FAILED,
            Unit::Count,
            "Total number of jobs failed by their handler."
        );
        describe_counter!(
            METRIC_JOBS_RECOVERED,
            Unit::Count,
            "Total number of jobs failed by the stale-claim sweep."
        );
        describe_histogram!(
            METRIC_RENDER_MS,
            Unit::Milliseconds,
            "Template substitution latency in milliseconds."
        );
        describe_histogram!(
            METRIC_CONVERT_MS,
            Unit::Milliseconds,
            "External PDF conversion latency in milliseconds."
        );
    });
}
