//! # Correlate Testing
//!
//! Testing utilities for TTL stores and join aggregators.
//!
//! This crate provides:
//! - Deterministic clocks implementing [`Clock`]
//! - A tracing subscriber bootstrap for test output
//!
//! ## Example
//!
//! ```
//! use correlate_core::ttl::TtlStore;
//! use correlate_core::{Duration, StoreError};
//! use correlate_testing::ManualClock;
//!
//! let clock = ManualClock::starting_at_test_epoch();
//! let store = TtlStore::with_clock(Some(Duration::seconds(5)), clock.clone());
//!
//! store.insert("k", 1);
//! clock.advance(Duration::seconds(6));
//! assert_eq!(store.get("k"), Err(StoreError::NotFound));
//! ```

use chrono::{DateTime, Utc};
use correlate_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::{Duration, TimeZone};
    use std::sync::{Arc, Mutex, PoisonError};

    /// 2025-01-01 00:00:00 UTC, the starting point of every test clock
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_689_600, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use correlate_testing::mocks::FixedClock;
    /// use correlate_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock moved forward by the test
    ///
    /// Clones share the same time, so a test can hand one clone to a store or
    /// aggregator and keep another to advance it.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Create a manual clock starting at [`test_epoch`]
        #[must_use]
        pub fn starting_at_test_epoch() -> Self {
            Self::new(test_epoch())
        }

        /// Move the clock forward (or backward, with a negative duration)
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }
}

/// Tracing setup for tests
pub mod tracing_support {
    use tracing_subscriber::EnvFilter;

    /// Install a fmt subscriber writing through the test harness
    ///
    /// Honors `RUST_LOG`, defaulting to `debug`. Safe to call from every
    /// test; only the first call installs the subscriber.
    pub fn init_test_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::{test_clock, test_epoch, FixedClock, ManualClock};
pub use tracing_support::init_test_tracing;
