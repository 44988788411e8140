//! # Correlate Runtime
//!
//! The imperative shell around `correlate-core`.
//!
//! This crate provides:
//!
//! - [`message::InboundMessage`]: the fragment record handed over by a
//!   dispatcher (correlation id, topic, opaque JSON payload)
//! - [`node::JoinNode`]: turns each inbound message into one join submission
//!   and answers "still waiting" silently instead of as a failure
//! - [`sweeper::Sweeper`]: an optional tokio task that expires incomplete
//!   groups on an interval
//! - [`metrics`]: descriptions for the counters emitted by the core, and a
//!   Prometheus recorder
//! - [`telemetry::init`]: installs logging and metrics from
//!   `ObservabilityConfig`
//!
//! ## Example
//!
//! ```
//! use correlate_core::config::JoinConfig;
//! use correlate_runtime::node::JoinNode;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let node = JoinNode::from_config(&JoinConfig::new(["left", "right"]))?;
//!
//! let waiting = node.handle(json!({"_msgid": "m1", "topic": "right", "payload": 2}))?;
//! assert_eq!(waiting, None);
//!
//! let ready = node.handle(json!({"_msgid": "m1", "topic": "left", "payload": 1}))?;
//! assert_eq!(ready, Some(vec![json!(1), json!(2)]));
//! # Ok(())
//! # }
//! ```

/// Inbound message shape
pub mod message;

/// Prometheus metrics for observability
pub mod metrics;

/// Dispatcher-facing join adapter
pub mod node;

/// Background expiry of incomplete groups
pub mod sweeper;

/// Logging and metrics bootstrap
pub mod telemetry;

/// Error types for the runtime
pub mod error {
    use correlate_core::JoinError;
    use thiserror::Error;

    /// Errors surfaced to the dispatcher
    ///
    /// Waiting for more fragments is never one of these; it is reported as
    /// `Ok(None)`.
    #[derive(Error, Debug)]
    pub enum DispatchError {
        /// The message does not have the expected fragment shape
        #[error("Invalid inbound message: {0}")]
        InvalidMessage(#[from] serde_json::Error),

        /// The join rejected the fragment
        #[error("Join failed: {0}")]
        Join(#[from] JoinError),

        /// The work function failed on a completed join
        #[error("Work failed: {0}")]
        Work(#[source] anyhow::Error),
    }
}

pub use error::DispatchError;
pub use message::InboundMessage;
pub use node::JoinNode;
pub use sweeper::{Sweeper, SweeperHandle};
