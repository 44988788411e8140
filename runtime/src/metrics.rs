//! Prometheus metrics for observability and monitoring.
//!
//! The core emits counters through the `metrics` facade whether or not a
//! recorder is installed. This module describes them and installs a
//! Prometheus recorder so they can be rendered for scraping:
//!
//! - `join.submitted`, `join.pending`, `join.ready`: fragments by outcome
//! - `join.unexpected_topic`: fragments whose topic is not expected
//! - `join.expired`: groups that timed out before completing
//! - `join.pending_groups`: groups in progress, sampled by the sweeper
//! - `join.sweep_duration_seconds`: time spent in one sweep
//! - `ttl_store.purged`, `ttl_store.expired_on_read`: store expirations
//!
//! # Example
//!
//! ```rust,no_run
//! use correlate_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // Serve this from whatever endpoint the host exposes
//! let text = recorder.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Process-wide Prometheus recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that is not installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder globally.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// Only one recorder can be installed per process. If another one already
    /// is (e.g., in tests), this logs a warning, returns `Ok(())` and leaves
    /// [`render`](Self::render) returning `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.000_01, 0.000_1, 0.001, 0.01, 0.1, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                register_metrics();
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this recorder was not the one installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Join
    describe_counter!(
        "join.submitted",
        Unit::Count,
        "Fragments submitted to a join"
    );
    describe_counter!(
        "join.pending",
        Unit::Count,
        "Fragments accepted while their group is still incomplete"
    );
    describe_counter!(
        "join.ready",
        Unit::Count,
        "Groups completed with every expected topic"
    );
    describe_counter!(
        "join.unexpected_topic",
        Unit::Count,
        "Fragments whose topic is not in the expected set"
    );
    describe_counter!(
        "join.expired",
        Unit::Count,
        "Groups discarded after the group timeout"
    );
    describe_gauge!(
        "join.pending_groups",
        Unit::Count,
        "Groups currently waiting for fragments"
    );
    describe_histogram!(
        "join.sweep_duration_seconds",
        Unit::Seconds,
        "Time taken by one expiry sweep"
    );

    // TTL store
    describe_counter!(
        "ttl_store.purged",
        Unit::Count,
        "Entries removed by an eager purge"
    );
    describe_counter!(
        "ttl_store.expired_on_read",
        Unit::Count,
        "Entries found expired and removed on access"
    );
}
