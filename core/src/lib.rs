//! # Correlate Core
//!
//! Time-bounded state for correlating asynchronously arriving message fragments.
//!
//! This crate provides two building blocks:
//!
//! - [`ttl::TtlStore`]: a thread-safe key/value map whose entries carry an
//!   expiration time. Expired entries become invisible immediately and are
//!   physically removed either lazily (on `get`) or eagerly (on `len`,
//!   `keys`, `values`, `items`).
//! - [`join::Aggregator`]: a barrier that groups payloads by correlation id and
//!   topic, and releases them in a fixed topic order once every expected topic
//!   has arrived. Until then it answers [`join::JoinOutcome::Pending`], which is
//!   a normal result and not an error.
//!
//! ## Architecture Principles
//!
//! - Synchronous, call-and-return operations; one mutex per instance
//! - Time is injected through the [`environment::Clock`] trait
//! - Typed results: waiting is a value, failures are [`error`] enums
//!
//! ## Example
//!
//! ```
//! use correlate_core::join::{Aggregator, JoinOutcome};
//!
//! # fn main() -> Result<(), correlate_core::error::JoinError> {
//! let join: Aggregator<&str, &str, i32> = Aggregator::new(["a", "b", "c"])?;
//!
//! assert_eq!(join.submit("req-1", "a", 1)?, JoinOutcome::Pending);
//! assert_eq!(join.submit("req-1", "c", 3)?, JoinOutcome::Pending);
//! assert_eq!(join.submit("req-1", "b", 2)?, JoinOutcome::Ready(vec![1, 2, 3]));
//! # Ok(())
//! # }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Duration, Utc};

/// Configuration for stores and aggregators
pub mod config;

/// Error types for the store and the aggregator
pub mod error;

/// Correlation aggregator (join / barrier)
pub mod join;

/// TTL-expiring associative store
pub mod ttl;

/// Environment module - Dependency injection traits
///
/// Every time-dependent operation reads "now" through a [`Clock`](environment::Clock),
/// so tests can substitute a deterministic clock for the wall clock.
pub mod environment {
    use chrono::{DateTime, Utc};
    use std::sync::Arc;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    impl<C: Clock + ?Sized> Clock for Arc<C> {
        fn now(&self) -> DateTime<Utc> {
            (**self).now()
        }
    }

    impl<C: Clock + ?Sized> Clock for &C {
        fn now(&self) -> DateTime<Utc> {
            (**self).now()
        }
    }
}

pub use environment::{Clock, SystemClock};
pub use error::{ConfigError, JoinError, StoreError};
pub use join::{Aggregator, ExpiredGroup, JoinOutcome};
pub use ttl::TtlStore;
