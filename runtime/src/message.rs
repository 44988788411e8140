//! The fragment record consumed at the dispatcher boundary.
//!
//! Messages arrive as JSON objects in the Node-RED shape: the correlation id
//! travels as `_msgid`, the fragment kind as `topic`, and `payload` is opaque.
//! Any other fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One fragment of a correlated request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Identifier shared by every fragment of the originating request
    #[serde(rename = "_msgid")]
    pub correlation_id: String,

    /// Which fragment this is
    #[serde(default)]
    pub topic: String,

    /// Forwarded untouched
    #[serde(default)]
    pub payload: Value,
}

impl InboundMessage {
    /// Create a message
    #[must_use]
    pub fn new(correlation_id: impl Into<String>, topic: impl Into<String>, payload: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            topic: topic.into(),
            payload,
        }
    }

    /// Extract a message from a JSON value
    ///
    /// # Errors
    ///
    /// Returns error if `_msgid` is missing or a field has the wrong type.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
