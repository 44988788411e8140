//! Error taxonomy for the TTL store, the join aggregator and configuration.
//!
//! Waiting for more fragments is not represented here: the aggregator reports
//! it as [`JoinOutcome::Pending`](crate::join::JoinOutcome::Pending).

use thiserror::Error;

/// Errors returned by [`TtlStore`](crate::ttl::TtlStore) operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The key is absent, or present but already expired
    ///
    /// Routine and recoverable; callers branch on it.
    #[error("key not found or expired")]
    NotFound,
}

/// Errors produced while building or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The expected topic list is empty
    #[error("expected topics cannot be empty")]
    EmptyTopics,

    /// A topic appears more than once in the expected topic list
    #[error("duplicate expected topic: {0}")]
    DuplicateTopic(String),

    /// A configuration value is out of range
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),

    /// An environment override could not be parsed
    #[error("invalid value for environment variable {name}: {value}")]
    InvalidEnvVar {
        /// Variable name
        name: String,
        /// Raw value that failed to parse
        value: String,
    },

    /// The configuration file is not valid TOML for the expected schema
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration file could not be read
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by [`Aggregator`](crate::join::Aggregator) operations
#[derive(Error, Debug)]
pub enum JoinError {
    /// No complete group exists for the correlation id
    ///
    /// Returned by `peek` when the group is absent or an expected topic has
    /// not arrived yet.
    #[error("no complete group for correlation id {correlation_id}")]
    NotFound {
        /// Debug rendering of the correlation id
        correlation_id: String,
    },

    /// The group outlived the configured group timeout
    #[error("group for correlation id {correlation_id} timed out")]
    Timeout {
        /// Debug rendering of the correlation id
        correlation_id: String,
    },

    /// Strict mode rejected a topic outside the expected set
    #[error("unexpected topic {topic} for correlation id {correlation_id}")]
    UnexpectedTopic {
        /// Debug rendering of the correlation id
        correlation_id: String,
        /// Debug rendering of the rejected topic
        topic: String,
    },

    /// The aggregator was constructed with an invalid topic list
    ///
    /// Fatal at setup; construction is aborted.
    #[error("invalid aggregator configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    /// The aggregator's own bookkeeping is inconsistent
    ///
    /// Indicates a bug, never a caller error. Always logged at `error` level.
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}
