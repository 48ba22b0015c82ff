//! Logging and metric setup for processes embedding the cache.
//!
//! The cache itself only emits `tracing` events (plan rebuilds, cleaner
//! passes, poisoned-lock recovery) and `dcache_*` metrics. A host that has no
//! subscriber of its own calls [`init`] once with the `[logging]` settings from
//! [`crate::config::load`]; hosts that already install one only need
//! [`describe_metrics`] so their recorder knows the units of each series.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
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
        .map_err(|err| TelemetryError::Install(err.to_string()))
}

/// Register descriptions for every metric the cache emits. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "dcache_plan_hit_total",
            Unit::Count,
            "Total number of fetches served by an up-to-date query plan."
        );
        describe_counter!(
            "dcache_plan_rebuild_total",
            Unit::Count,
            "Total number of query plans built or rebuilt after the key set changed."
        );
        describe_counter!(
            "dcache_plan_evicted_total",
            Unit::Count,
            "Total number of idle query plans reclaimed."
        );
        describe_counter!(
            "dcache_notification_total",
            Unit::Count,
            "Total number of notification sets built, by kind."
        );
        describe_counter!(
            "dcache_lock_poisoned_total",
            Unit::Count,
            "Total number of poisoned cache locks recovered."
        );
        describe_gauge!(
            "dcache_entries",
            Unit::Count,
            "Current number of entries held in memory, by model type."
        );
        describe_histogram!(
            "dcache_plan_rebuild_ms",
            Unit::Milliseconds,
            "Query plan rebuild latency in milliseconds."
        );
    });
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::*;

    #[test]
    fn second_install_reports_error() {
        let settings = LoggingSettings {
            level: LevelFilter::WARN,
            format: LogFormat::Compact,
        };
        let _ = init(&settings);

        let err = init(&settings).expect_err("global subscriber already set");
        assert!(err.to_string().contains("failed to install tracing subscriber"));
    }

    #[test]
    fn metric_descriptions_are_idempotent() {
        describe_metrics();
        describe_metrics();
        assert!(METRIC_DESCRIPTIONS.is_completed());
    }
}
