//! Dispatcher-facing join adapter.
//!
//! A dispatcher calls [`JoinNode::handle`] (or [`JoinNode::run`]) once per
//! inbound fragment, whether it is the first, a middle or the completing one.
//! The answer is:
//!
//! - `Ok(Some(payloads))` when the join completed, payloads in expected-topic order
//! - `Ok(None)` while fragments are still missing ("silent waiting"; the
//!   dispatcher should reply with no output and not report an error)
//! - `Err(_)` only for malformed messages, strict-mode rejections, or a failed
//!   work function
//!
//! A node built with [`JoinNode::passthrough`] has no join and hands every
//! payload straight through.

use crate::error::DispatchError;
use crate::message::InboundMessage;
use correlate_core::config::JoinConfig;
use correlate_core::environment::{Clock, SystemClock};
use correlate_core::join::{Aggregator, JoinOutcome};
use correlate_core::JoinError;
use serde_json::Value;
use std::sync::Arc;

/// Aggregator over JSON fragments keyed by message id and topic
pub type JsonAggregator<C = SystemClock> = Aggregator<String, String, Value, C>;

/// Join adapter for one processing node
pub struct JoinNode<C = SystemClock> {
    join: Option<Arc<JsonAggregator<C>>>,
}

impl JoinNode<SystemClock> {
    /// Node without a join: every message is ready on arrival
    #[must_use]
    pub const fn passthrough() -> Self {
        Self { join: None }
    }

    /// Node joining the topics named in `config`
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::InvalidConfiguration`] if the configuration is invalid.
    pub fn from_config(config: &JoinConfig) -> Result<Self, JoinError> {
        Ok(Self::new(Arc::new(Aggregator::from_config(config)?)))
    }
}

impl<C: Clock> JoinNode<C> {
    /// Node submitting into a shared aggregator
    #[must_use]
    pub const fn new(join: Arc<JsonAggregator<C>>) -> Self {
        Self { join: Some(join) }
    }

    /// The underlying aggregator, if any
    #[must_use]
    pub const fn aggregator(&self) -> Option<&Arc<JsonAggregator<C>>> {
        self.join.as_ref()
    }

    /// Submit an already extracted fragment
    ///
    /// # Errors
    ///
    /// Returns error if the aggregator rejects the fragment.
    pub fn submit(&self, message: InboundMessage) -> Result<Option<Vec<Value>>, JoinError> {
        let Some(join) = &self.join else {
            return Ok(Some(vec![message.payload]));
        };

        match join.submit(message.correlation_id, message.topic, message.payload)? {
            JoinOutcome::Ready(payloads) => Ok(Some(payloads)),
            JoinOutcome::Pending => Ok(None),
        }
    }

    /// Extract a fragment from a JSON message and submit it
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidMessage`] for a malformed message and
    /// [`DispatchError::Join`] if the aggregator rejects the fragment.
    pub fn handle(&self, message: Value) -> Result<Option<Vec<Value>>, DispatchError> {
        let message = InboundMessage::from_value(message)?;
        let correlation_id = message.correlation_id.clone();

        match self.submit(message) {
            Ok(None) => {
                tracing::debug!(correlation_id = %correlation_id, "Waiting for remaining fragments");
                Ok(None)
            }
            Ok(ready) => Ok(ready),
            Err(e) => {
                tracing::warn!(correlation_id = %correlation_id, error = %e, "Fragment rejected");
                Err(e.into())
            }
        }
    }

    /// Submit a message and run `work` on the payloads once the join completes
    ///
    /// `work` is not called while fragments are missing; the result is then
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`handle`](Self::handle), or
    /// [`DispatchError::Work`] if `work` fails.
    pub fn run<R>(
        &self,
        message: Value,
        work: impl FnOnce(Vec<Value>) -> anyhow::Result<R>,
    ) -> Result<Option<R>, DispatchError> {
        let Some(payloads) = self.handle(message)? else {
            return Ok(None);
        };
        work(payloads).map(Some).map_err(DispatchError::Work)
    }
}

impl<C> Clone for JoinNode<C> {
    fn clone(&self) -> Self {
        Self {
            join: self.join.clone(),
        }
    }
}

impl<C> std::fmt::Debug for JoinNode<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinNode")
            .field("join", &self.join)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use serde_json::json;

    fn node() -> JoinNode {
        JoinNode::from_config(&JoinConfig::new(["a", "b"])).unwrap()
    }

    #[test]
    fn test_waiting_is_silent() {
        let node = node();
        let result = node.handle(json!({"_msgid": "1", "topic": "b", "payload": "B"}));
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_completion_returns_ordered_payloads() {
        let node = node();
        node.handle(json!({"_msgid": "1", "topic": "b", "payload": "B"})).unwrap();
        let ready = node
            .handle(json!({"_msgid": "1", "topic": "a", "payload": "A"}))
            .unwrap();
        assert_eq!(ready, Some(vec![json!("A"), json!("B")]));
    }

    #[test]
    fn test_passthrough() {
        let node = JoinNode::passthrough();
        assert!(node.aggregator().is_none());
        let ready = node.handle(json!({"_msgid": "1", "payload": 5})).unwrap();
        assert_eq!(ready, Some(vec![json!(5)]));
    }

    #[test]
    fn test_malformed_message() {
        let node = node();
        let err = node.handle(json!({"topic": "a"})).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidMessage(_)));
    }

    #[test]
    fn test_strict_rejection_is_an_error() {
        let mut config = JoinConfig::new(["a", "b"]);
        config.strict_topics = true;
        let node = JoinNode::from_config(&config).unwrap();

        let err = node
            .handle(json!({"_msgid": "1", "topic": "c", "payload": 0}))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Join(JoinError::UnexpectedTopic { .. })));
    }

    #[test]
    fn test_run_calls_work_only_when_ready() {
        let node = node();
        let mut calls = 0;

        let first = node
            .run(json!({"_msgid": "7", "topic": "a", "payload": 1}), |_| {
                calls += 1;
                Ok(())
            })
            .unwrap();
        assert!(first.is_none());

        let sum = node
            .run(json!({"_msgid": "7", "topic": "b", "payload": 2}), |payloads| {
                calls += 1;
                Ok(payloads.iter().filter_map(Value::as_i64).sum::<i64>())
            })
            .unwrap();
        assert_eq!(sum, Some(3));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_run_work_failure() {
        let node = JoinNode::passthrough();
        let err = node
            .run(json!({"_msgid": "1", "payload": 1}), |_| -> anyhow::Result<()> {
                anyhow::bail!("downstream unavailable")
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::Work(_)));
        assert_eq!(err.to_string(), "Work failed: downstream unavailable");
    }

    #[test]
    fn test_clones_share_the_join() {
        let node = node();
        let other = node.clone();
        node.handle(json!({"_msgid": "1", "topic": "a", "payload": 1})).unwrap();
        let ready = other
            .handle(json!({"_msgid": "1", "topic": "b", "payload": 2}))
            .unwrap();
        assert_eq!(ready, Some(vec![json!(1), json!(2)]));
    }
}
