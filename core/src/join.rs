//! Correlation aggregator (join / barrier).
//!
//! Fragments of one logical request share a correlation id and are told apart
//! by topic. The [`Aggregator`] records each fragment and, once every expected
//! topic has arrived for an id, drains that group and returns the payloads in
//! the configured topic order, independent of arrival order.
//!
//! ## Pattern
//!
//! 1. Record the payload under `(correlation_id, topic)`
//! 2. Check whether every expected topic is present
//! 3. If not, answer [`JoinOutcome::Pending`]
//! 4. If so, remove the group and answer [`JoinOutcome::Ready`]
//!
//! All four steps run under one acquisition of the aggregator mutex, so two
//! threads racing on the completing fragment cannot both drain the group.
//!
//! ## Bounded lifetime
//!
//! With a group timeout, each group expires `group_timeout` after its first
//! fragment. Expired groups are dropped when their id is touched again and in
//! bulk by [`Aggregator::sweep_expired`].
//!
//! ## Example
//!
//! ```
//! use correlate_core::join::{Aggregator, JoinOutcome};
//!
//! # fn main() -> Result<(), correlate_core::JoinError> {
//! let join: Aggregator<u64, String, f64> =
//!     Aggregator::new(["bid".to_string(), "ask".to_string()])?;
//!
//! assert_eq!(join.submit(7, "ask".to_string(), 101.5)?, JoinOutcome::Pending);
//! assert_eq!(
//!     join.submit(7, "bid".to_string(), 101.0)?,
//!     JoinOutcome::Ready(vec![101.0, 101.5])
//! );
//! # Ok(())
//! # }
//! ```

use crate::config::{validate_topics, JoinConfig};
use crate::environment::{Clock, SystemClock};
use crate::error::JoinError;
use crate::ttl::{deadline, TtlMap};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome<P> {
    /// Every expected topic arrived; payloads in expected-topic order
    Ready(Vec<P>),
    /// More fragments are expected; nothing to do yet
    Pending,
}

impl<P> JoinOutcome<P> {
    /// Check if the join completed
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Check if the join is still waiting
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Convert into the ordered payloads, `None` while pending
    #[must_use]
    pub fn ready(self) -> Option<Vec<P>> {
        match self {
            Self::Ready(payloads) => Some(payloads),
            Self::Pending => None,
        }
    }
}

/// An incomplete group removed because it outlived the group timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredGroup<I, T> {
    /// Correlation id of the group
    pub correlation_id: I,
    /// When the first fragment arrived
    pub created_at: DateTime<Utc>,
    /// Expected topics that never arrived, in expected order
    pub missing_topics: Vec<T>,
}

/// Fragments recorded for one correlation id
#[derive(Debug)]
struct Group<T, P> {
    created_at: DateTime<Utc>,
    payloads: HashMap<T, P>,
}

/// Correlation aggregator
///
/// # Type Parameters
///
/// - `I`: Correlation id
/// - `T`: Topic
/// - `P`: Payload, forwarded untouched
/// - `C`: Clock used for group timestamps (wall clock by default)
///
/// Share between threads with `Arc<Aggregator<..>>`; all methods take `&self`.
pub struct Aggregator<I, T, P, C = SystemClock> {
    expected_topics: Vec<T>,
    group_timeout: Option<Duration>,
    strict_topics: bool,
    groups: Mutex<TtlMap<I, Group<T, P>>>,
    clock: C,
}

impl<I, T, P> Aggregator<I, T, P, SystemClock>
where
    I: Eq + Hash + Clone + Debug,
    T: Eq + Hash + Clone + Debug,
{
    /// Create an aggregator waiting for `expected_topics`
    ///
    /// Groups never time out and unexpected topics are stored inertly; see
    /// [`with_group_timeout`](Self::with_group_timeout) and
    /// [`with_strict_topics`](Self::with_strict_topics).
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::InvalidConfiguration`] if the topic list is empty
    /// or contains duplicates.
    pub fn new(expected_topics: impl IntoIterator<Item = T>) -> Result<Self, JoinError> {
        let expected_topics: Vec<T> = expected_topics.into_iter().collect();
        validate_topics(&expected_topics)?;
        Ok(Self {
            expected_topics,
            group_timeout: None,
            strict_topics: false,
            groups: Mutex::new(TtlMap::new(None)),
            clock: SystemClock,
        })
    }
}

impl<I, P> Aggregator<I, String, P, SystemClock>
where
    I: Eq + Hash + Clone + Debug,
{
    /// Create an aggregator from configuration
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::InvalidConfiguration`] if the configuration is invalid.
    pub fn from_config(config: &JoinConfig) -> Result<Self, JoinError> {
        config.validate()?;
        let aggregator = Self::new(config.expected_topics.iter().cloned())?
            .with_strict_topics(config.strict_topics);
        Ok(match config.group_timeout() {
            Some(timeout) => aggregator.with_group_timeout(timeout),
            None => aggregator,
        })
    }
}

impl<I, T, P, C> Aggregator<I, T, P, C>
where
    I: Eq + Hash + Clone + Debug,
    T: Eq + Hash + Clone + Debug,
    C: Clock,
{
    /// Replace the clock
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Aggregator<I, T, P, C2> {
        Aggregator {
            expected_topics: self.expected_topics,
            group_timeout: self.group_timeout,
            strict_topics: self.strict_topics,
            groups: self.groups,
            clock,
        }
    }

    /// Expire incomplete groups `timeout` after their first fragment
    ///
    /// A zero or negative timeout leaves groups unbounded.
    #[must_use]
    pub fn with_group_timeout(mut self, timeout: Duration) -> Self {
        self.group_timeout = Some(timeout).filter(|t| *t > Duration::zero());
        self
    }

    /// Reject topics outside the expected set instead of storing them
    #[must_use]
    pub const fn with_strict_topics(mut self, strict: bool) -> Self {
        self.strict_topics = strict;
        self
    }

    /// Topics a group needs, in output order
    #[must_use]
    pub fn expected_topics(&self) -> &[T] {
        &self.expected_topics
    }

    /// Configured group timeout
    #[must_use]
    pub const fn group_timeout(&self) -> Option<Duration> {
        self.group_timeout
    }

    fn lock(&self) -> MutexGuard<'_, TtlMap<I, Group<T, P>>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_complete(&self, group: &Group<T, P>) -> bool {
        self.expected_topics
            .iter()
            .all(|topic| group.payloads.contains_key(topic))
    }

    fn missing_topics(&self, group: &Group<T, P>) -> Vec<T> {
        self.expected_topics
            .iter()
            .filter(|topic| !group.payloads.contains_key(*topic))
            .cloned()
            .collect()
    }

    fn report_expired(&self, correlation_id: &I, group: &Group<T, P>) {
        metrics::counter!("join.expired").increment(1);
        tracing::warn!(
            correlation_id = ?correlation_id,
            created_at = %group.created_at,
            missing = ?self.missing_topics(group),
            "Discarding incomplete group after timeout"
        );
    }

    /// Record a fragment and release the group if it is now complete
    ///
    /// Returns [`JoinOutcome::Pending`] while expected topics are missing. On
    /// the completing fragment the whole group is removed and the payloads
    /// are returned in expected-topic order; a later submission with the same
    /// id starts a new group. A later fragment for an already present topic
    /// overwrites the earlier one.
    ///
    /// # Errors
    ///
    /// - [`JoinError::UnexpectedTopic`] in strict mode for a topic outside the
    ///   expected set
    /// - [`JoinError::InternalInvariantViolation`] if the group vanished
    ///   between the completeness check and the drain
    pub fn submit(&self, correlation_id: I, topic: T, payload: P) -> Result<JoinOutcome<P>, JoinError> {
        let now = self.clock.now();
        metrics::counter!("join.submitted").increment(1);

        if !self.expected_topics.contains(&topic) {
            metrics::counter!("join.unexpected_topic").increment(1);
            if self.strict_topics {
                tracing::warn!(correlation_id = ?correlation_id, topic = ?topic, "Rejecting unexpected topic");
                return Err(JoinError::UnexpectedTopic {
                    correlation_id: format!("{correlation_id:?}"),
                    topic: format!("{topic:?}"),
                });
            }
            tracing::debug!(correlation_id = ?correlation_id, topic = ?topic, "Storing unexpected topic; it cannot complete the group");
        }

        let mut groups = self.lock();

        if let Some(stale) = groups.take_expired(&correlation_id, now) {
            self.report_expired(&correlation_id, &stale);
        }

        let expires_at = self.group_timeout.and_then(|timeout| deadline(now, timeout));
        let group = groups.get_or_insert_with(correlation_id.clone(), expires_at, || Group {
            created_at: now,
            payloads: HashMap::new(),
        });
        group.payloads.insert(topic, payload);

        if !self.is_complete(group) {
            metrics::counter!("join.pending").increment(1);
            tracing::debug!(
                correlation_id = ?correlation_id,
                received = group.payloads.len(),
                expected = self.expected_topics.len(),
                "Join pending"
            );
            return Ok(JoinOutcome::Pending);
        }

        let group = groups.remove(&correlation_id).ok_or_else(|| {
            invariant_violation(format!(
                "drained correlation id {correlation_id:?} with no recorded group"
            ))
        })?;
        drop(groups);

        let payloads = self.ordered_payloads(&correlation_id, group)?;
        metrics::counter!("join.ready").increment(1);
        tracing::debug!(correlation_id = ?correlation_id, "Join ready");
        Ok(JoinOutcome::Ready(payloads))
    }

    fn ordered_payloads(&self, correlation_id: &I, mut group: Group<T, P>) -> Result<Vec<P>, JoinError> {
        self.expected_topics
            .iter()
            .map(|topic| {
                group.payloads.remove(topic).ok_or_else(|| {
                    invariant_violation(format!(
                        "complete group {correlation_id:?} lost topic {topic:?}"
                    ))
                })
            })
            .collect()
    }

    /// Current payloads for a complete group, without removing it
    ///
    /// # Errors
    ///
    /// - [`JoinError::NotFound`] if there is no group for the id or an
    ///   expected topic has not arrived
    /// - [`JoinError::Timeout`] if the group outlived the group timeout; the
    ///   group is discarded
    pub fn peek(&self, correlation_id: &I) -> Result<Vec<P>, JoinError>
    where
        P: Clone,
    {
        let now = self.clock.now();
        let mut groups = self.lock();

        if let Some(stale) = groups.take_expired(correlation_id, now) {
            self.report_expired(correlation_id, &stale);
            return Err(JoinError::Timeout {
                correlation_id: format!("{correlation_id:?}"),
            });
        }

        let not_found = || JoinError::NotFound {
            correlation_id: format!("{correlation_id:?}"),
        };
        let group = groups.get(correlation_id, now).map_err(|_| not_found())?;
        self.expected_topics
            .iter()
            .map(|topic| group.payloads.get(topic).cloned().ok_or_else(not_found))
            .collect()
    }

    /// Drop the group for an id regardless of its state
    ///
    /// Returns whether a group was present.
    pub fn discard(&self, correlation_id: &I) -> bool {
        let removed = self.lock().remove(correlation_id).is_some();
        if removed {
            tracing::debug!(correlation_id = ?correlation_id, "Discarded group");
        }
        removed
    }

    /// Number of groups still waiting for fragments
    ///
    /// Expired groups are not counted but stay stored, so that
    /// [`sweep_expired`](Self::sweep_expired) still reports them.
    #[must_use]
    pub fn pending_groups(&self) -> usize {
        let now = self.clock.now();
        self.lock().iter_live(now).count()
    }

    /// Remove every group that outlived the group timeout
    ///
    /// Each removed group is reported once, with the topics it was still
    /// missing.
    pub fn sweep_expired(&self) -> Vec<ExpiredGroup<I, T>> {
        let now = self.clock.now();
        let expired = self.lock().purge_expired(now);

        expired
            .into_iter()
            .map(|(correlation_id, group)| {
                self.report_expired(&correlation_id, &group);
                ExpiredGroup {
                    missing_topics: self.missing_topics(&group),
                    created_at: group.created_at,
                    correlation_id,
                }
            })
            .collect()
    }
}

fn invariant_violation(message: String) -> JoinError {
    tracing::error!(%message, "Join bookkeeping is inconsistent");
    JoinError::InternalInvariantViolation(message)
}

impl<I, T: Debug, P, C> fmt::Debug for Aggregator<I, T, P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("expected_topics", &self.expected_topics)
            .field("group_timeout", &self.group_timeout)
            .field("strict_topics", &self.strict_topics)
            .finish_non_exhaustive()
    }
}
