//! Process-level logging and metrics bootstrap.
//!
//! ```rust,no_run
//! use correlate_core::config::CorrelateConfig;
//! use correlate_runtime::telemetry;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CorrelateConfig::from_env()?;
//! let recorder = telemetry::init(&config.observability)?;
//! # Ok(())
//! # }
//! ```

use crate::metrics::{MetricsError, MetricsRecorder};
use correlate_core::config::ObservabilityConfig;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors from [`init`]
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The log level is not a valid filter directive
    #[error("Invalid log filter {filter:?}: {reason}")]
    Filter {
        /// The rejected directive
        filter: String,
        /// Parser message
        reason: String,
    },

    /// A global tracing subscriber is already set
    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),

    /// The metrics recorder could not be installed
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Build the log filter for `config`
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] if the level does not parse.
pub fn log_filter(config: &ObservabilityConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::Filter {
        filter: config.log_level.clone(),
        reason: e.to_string(),
    })
}

/// Install the global fmt subscriber and, if enabled, the metrics recorder
///
/// Call once at startup. The returned recorder renders nothing when
/// `metrics_enabled` is off.
///
/// # Errors
///
/// Returns error if the filter is invalid, a subscriber is already set, or
/// the metrics recorder fails to install.
pub fn init(config: &ObservabilityConfig) -> Result<MetricsRecorder, TelemetryError> {
    let filter = log_filter(config)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    let mut recorder = MetricsRecorder::new();
    if config.metrics_enabled {
        recorder.install()?;
    }

    tracing::info!(
        log_level = %config.log_level,
        metrics_enabled = config.metrics_enabled,
        "Telemetry initialized"
    );
    Ok(recorder)
}
