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
            "portalbake_builds_total",
            Unit::Count,
            "Build runs started, labelled by terminal status."
        );
        describe_histogram!(
            "portalbake_build_duration_ms",
            Unit::Milliseconds,
            "Wall-clock duration of a full bake-and-publish run."
        );
        describe_counter!(
            "portalbake_uploads_total",
            Unit::Count,
            "Objects uploaded to the store across all builds."
        );
        describe_counter!(
            "portalbake_upload_failures_total",
            Unit::Count,
            "Individual object uploads that failed."
        );
        describe_counter!(
            "portalbake_invalidations_total",
            Unit::Count,
            "CDN invalidations issued."
        );
        describe_counter!(
            "portalbake_drafts_created_total",
            Unit::Count,
            "Draft pages created from ingested feed entries."
        );
        describe_counter!(
            "portalbake_ingest_duplicates_total",
            Unit::Count,
            "Feed entries skipped because their slug already exists."
        );
        describe_histogram!(
            "portalbake_warm_duration_ms",
            Unit::Milliseconds,
            "Duration of a sitemap cache-warm pass."
        );
    });
}
