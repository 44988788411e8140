//! Configuration for TTL stores and join aggregators.
//!
//! Configuration is read from TOML and may be overridden by environment
//! variables. Every section validates itself and reports problems as
//! [`ConfigError`].
//!
//! # Example
//!
//! ```
//! use correlate_core::config::CorrelateConfig;
//!
//! # fn main() -> Result<(), correlate_core::ConfigError> {
//! let config = CorrelateConfig::from_toml_str(
//!     r#"
//!     [store]
//!     default_ttl_secs = 300
//!
//!     [join]
//!     expected_topics = ["price", "stock"]
//!     group_timeout_secs = 30
//!     "#,
//! )?;
//!
//! assert_eq!(config.join.expected_topics, vec!["price", "stock"]);
//! # Ok(())
//! # }
//! ```
//!
//! # Environment overrides
//!
//! | variable | effect |
//! |----------|--------|
//! | `CORRELATE_CONFIG` | path of a TOML file to load first |
//! | `CORRELATE_EXPECTED_TOPICS` | comma-separated topic list |
//! | `CORRELATE_GROUP_TIMEOUT_SECS` | group timeout, `0` disables it |
//! | `CORRELATE_DEFAULT_TTL_SECS` | store default TTL, `0` disables it |
//! | `CORRELATE_STRICT_TOPICS` | `true`/`false` |
//! | `CORRELATE_LOG_LEVEL` | trace, debug, info, warn, error |

use crate::error::ConfigError;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

/// Convert whole seconds to a duration, `None` when out of range
fn seconds(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

/// Whether `secs` is a duration that can still be added to the current time
fn in_range(secs: u64) -> bool {
    seconds(secs).is_some_and(|ttl| Utc::now().checked_add_signed(ttl).is_some())
}

/// TTL store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Default TTL in seconds applied on insert (`None` or `0` = never expire)
    pub default_ttl_secs: Option<u64>,
}

impl StoreConfig {
    /// Validate store configuration
    ///
    /// # Errors
    ///
    /// Returns error if the default TTL does not fit a duration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(secs) = self.default_ttl_secs {
            if !in_range(secs) {
                return Err(ConfigError::InvalidValue(format!(
                    "default_ttl_secs out of range: {secs}"
                )));
            }
        }
        Ok(())
    }

    /// Default TTL as a duration
    #[must_use]
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs
            .filter(|secs| *secs > 0)
            .and_then(seconds)
    }
}

/// Join aggregator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JoinConfig {
    /// Topics that must all arrive, in output order
    pub expected_topics: Vec<String>,
    /// Seconds an incomplete group may live (`None` or `0` = unbounded)
    pub group_timeout_secs: Option<u64>,
    /// Reject topics outside `expected_topics` instead of storing them inertly
    pub strict_topics: bool,
}

impl JoinConfig {
    /// Configuration expecting `topics`, with no timeout and lenient topics
    #[must_use]
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected_topics: topics.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Validate join configuration
    ///
    /// # Errors
    ///
    /// Returns error if the topic list is empty or has duplicates, or the
    /// timeout is out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_topics(&self.expected_topics)?;
        if let Some(secs) = self.group_timeout_secs {
            if !in_range(secs) {
                return Err(ConfigError::InvalidValue(format!(
                    "group_timeout_secs out of range: {secs}"
                )));
            }
        }
        Ok(())
    }

    /// Group timeout as a duration
    #[must_use]
    pub fn group_timeout(&self) -> Option<Duration> {
        self.group_timeout_secs
            .filter(|secs| *secs > 0)
            .and_then(seconds)
    }
}

/// Check an expected topic list: non-empty and free of duplicates
///
/// # Errors
///
/// [`ConfigError::EmptyTopics`] or [`ConfigError::DuplicateTopic`]
pub fn validate_topics<T: std::fmt::Debug + Eq + std::hash::Hash>(topics: &[T]) -> Result<(), ConfigError> {
    if topics.is_empty() {
        return Err(ConfigError::EmptyTopics);
    }
    let mut seen = HashSet::with_capacity(topics.len());
    for topic in topics {
        if !seen.insert(topic) {
            return Err(ConfigError::DuplicateTopic(format!("{topic:?}")));
        }
    }
    Ok(())
}

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit metrics
    pub metrics_enabled: bool,
}

impl ObservabilityConfig {
    /// Validate observability configuration
    ///
    /// # Errors
    ///
    /// Returns error if the log level is unknown
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue(format!(
                "invalid log_level: {}. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorrelateConfig {
    /// TTL store settings
    pub store: StoreConfig,
    /// Join aggregator settings
    pub join: JoinConfig,
    /// Logging and metrics settings
    pub observability: ObservabilityConfig,
}

impl CorrelateConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns error if the document does not parse or fails validation
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Load configuration from the process environment
    ///
    /// Loads `CORRELATE_CONFIG` if set, then applies the `CORRELATE_*`
    /// overrides listed in the module docs.
    ///
    /// # Errors
    ///
    /// Returns error if the file or any override is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration using `lookup` in place of the process environment
    ///
    /// # Errors
    ///
    /// Returns error if the file or any override is invalid
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("CORRELATE_CONFIG") {
            Some(path) => {
                let source = std::fs::read_to_string(path)?;
                toml::from_str(&source)?
            }
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(topics) = lookup("CORRELATE_EXPECTED_TOPICS") {
            self.join.expected_topics = topics
                .split(',')
                .map(str::trim)
                .filter(|topic| !topic.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(secs) = parse_var(lookup, "CORRELATE_GROUP_TIMEOUT_SECS")? {
            self.join.group_timeout_secs = Some(secs);
        }
        if let Some(secs) = parse_var(lookup, "CORRELATE_DEFAULT_TTL_SECS")? {
            self.store.default_ttl_secs = Some(secs);
        }
        if let Some(strict) = parse_var(lookup, "CORRELATE_STRICT_TOPICS")? {
            self.join.strict_topics = strict;
        }
        if let Some(level) = lookup("CORRELATE_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        Ok(())
    }

    /// Validate entire configuration
    ///
    /// # Errors
    ///
    /// Returns error if any configuration section is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.join.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
                name: name.to_string(),
                value,
            })
        })
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_parse_full_document() {
        let config = CorrelateConfig::from_toml_str(
            r#"
            [store]
            default_ttl_secs = 60

            [join]
            expected_topics = ["a", "b", "c"]
            group_timeout_secs = 5
            strict_topics = true

            [observability]
            log_level = "debug"
            metrics_enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.store.default_ttl(), Some(Duration::seconds(60)));
        assert_eq!(config.join.expected_topics, vec!["a", "b", "c"]);
        assert_eq!(config.join.group_timeout(), Some(Duration::seconds(5)));
        assert!(config.join.strict_topics);
        assert_eq!(config.observability.log_level, "debug");
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn test_zero_durations_disable_expiry() {
        let config = CorrelateConfig::from_toml_str(
            r#"
            store = { default_ttl_secs = 0 }
            join = { expected_topics = ["a"], group_timeout_secs = 0 }
            "#,
        )
        .unwrap();
        assert_eq!(config.store.default_ttl(), None);
        assert_eq!(config.join.group_timeout(), None);
    }

    #[test]
    fn test_topic_validation() {
        assert!(matches!(
            JoinConfig::default().validate(),
            Err(ConfigError::EmptyTopics)
        ));
        assert!(matches!(
            JoinConfig::new(["a", "b", "a"]).validate(),
            Err(ConfigError::DuplicateTopic(t)) if t == "\"a\""
        ));
        assert!(JoinConfig::new(["a", "b"]).validate().is_ok());
    }

    #[test]
    fn test_out_of_range_timeout() {
        let mut config = JoinConfig::new(["a"]);
        config.group_timeout_secs = Some(u64::MAX);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_durations_past_the_calendar_rejected() {
        // Fits a chrono duration, but not added to the current time
        let secs = 10_000_000_000_000;

        let store = StoreConfig {
            default_ttl_secs: Some(secs),
        };
        assert!(matches!(store.validate(), Err(ConfigError::InvalidValue(_))));

        let mut join = JoinConfig::new(["a"]);
        join.group_timeout_secs = Some(secs);
        assert!(matches!(join.validate(), Err(ConfigError::InvalidValue(_))));

        let one_year = StoreConfig {
            default_ttl_secs: Some(365 * 24 * 3600),
        };
        assert!(one_year.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let config = ObservabilityConfig {
            log_level: "loud".to_string(),
            ..ObservabilityConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = CorrelateConfig::from_toml_str(
            r#"
            [join]
            expected_topics = ["a"]
            expected_topic = ["typo"]
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides() {
        let config = CorrelateConfig::from_lookup(env(&[
            ("CORRELATE_EXPECTED_TOPICS", "left, right ,"),
            ("CORRELATE_GROUP_TIMEOUT_SECS", "12"),
            ("CORRELATE_DEFAULT_TTL_SECS", "3"),
            ("CORRELATE_STRICT_TOPICS", "true"),
            ("CORRELATE_LOG_LEVEL", "warn"),
        ]))
        .unwrap();

        assert_eq!(config.join.expected_topics, vec!["left", "right"]);
        assert_eq!(config.join.group_timeout(), Some(Duration::seconds(12)));
        assert_eq!(config.store.default_ttl(), Some(Duration::seconds(3)));
        assert!(config.join.strict_topics);
        assert_eq!(config.observability.log_level, "warn");
    }

    #[test]
    fn test_env_bad_number() {
        let result = CorrelateConfig::from_lookup(env(&[
            ("CORRELATE_EXPECTED_TOPICS", "a"),
            ("CORRELATE_GROUP_TIMEOUT_SECS", "soon"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnvVar { name, .. }) if name == "CORRELATE_GROUP_TIMEOUT_SECS"
        ));
    }

    #[test]
    fn test_env_without_topics_is_invalid() {
        assert!(matches!(
            CorrelateConfig::from_lookup(env(&[])),
            Err(ConfigError::EmptyTopics)
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let result = CorrelateConfig::from_lookup(env(&[(
            "CORRELATE_CONFIG",
            "/definitely/not/here/correlate.toml",
        )]));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
