//! Periodic expiry of incomplete groups.
//!
//! The aggregator drops an expired group lazily when its id is touched again.
//! Ids that are never touched again would stay in memory until something
//! calls [`Aggregator::sweep_expired`]; the [`Sweeper`] does that on an
//! interval and forwards each expired group to a channel so the dispatcher
//! can report the timeout upstream.
//!
//! # Example
//!
//! ```no_run
//! use correlate_core::config::JoinConfig;
//! use correlate_core::join::Aggregator;
//! use correlate_runtime::sweeper::Sweeper;
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = JoinConfig::new(["request", "response"]);
//! config.group_timeout_secs = Some(30);
//! let join = Arc::new(Aggregator::<String, String, String>::from_config(&config)?);
//!
//! let (handle, mut expired) = Sweeper::spawn(Arc::clone(&join), Duration::from_secs(5));
//! if let Some(group) = expired.recv().await {
//!     tracing::warn!(id = %group.correlation_id, "request timed out");
//! }
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use correlate_core::environment::Clock;
use correlate_core::join::{Aggregator, ExpiredGroup};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Smallest sweep period; `tokio::time::interval` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Spawns sweep tasks
#[derive(Debug, Clone, Copy)]
pub struct Sweeper;

impl Sweeper {
    /// Sweep `join` every `period` on the current tokio runtime
    ///
    /// The first sweep runs immediately. Expired groups are sent on the
    /// returned channel; if the receiver is dropped, sweeping continues and
    /// the reports are discarded.
    pub fn spawn<I, T, P, C>(
        join: Arc<Aggregator<I, T, P, C>>,
        period: Duration,
    ) -> (SweeperHandle, mpsc::UnboundedReceiver<ExpiredGroup<I, T>>)
    where
        I: Eq + Hash + Clone + Debug + Send + 'static,
        T: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        P: Send + 'static,
        C: Clock + 'static,
    {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let period = period.max(MIN_PERIOD);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(period = ?period, "Group sweeper started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let started = Instant::now();
                        let expired = join.sweep_expired();
                        metrics::histogram!("join.sweep_duration_seconds")
                            .record(started.elapsed().as_secs_f64());
                        if !expired.is_empty() {
                            tracing::info!(count = expired.len(), "Swept expired groups");
                        }
                        for group in expired {
                            // Receiver gone: keep sweeping, drop the report
                            let _ = report_tx.send(group);
                        }

                        // Intentional cast for metrics - group counts are far below 2^53
                        #[allow(clippy::cast_precision_loss)]
                        metrics::gauge!("join.pending_groups").set(join.pending_groups() as f64);
                    }
                }
            }

            tracing::info!("Group sweeper stopped");
        });

        (
            SweeperHandle {
                shutdown: Some(shutdown_tx),
                task,
            },
            report_rx,
        )
    }
}

/// Handle to a running sweep task
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) also stops
/// the task, without waiting for it.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweep task and wait for it to finish
    ///
    /// # Errors
    ///
    /// Returns error if the task panicked or was cancelled.
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await
    }

    /// Whether the task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
