//! Event envelope exchanged on the bus.
//!
//! Every message that moves through skein is an [`Event`]: user input
//! from a channel adapter, synthetic work from the cron and heartbeat
//! producers, agent replies heading back out, and internal control
//! signals such as cancellation requests.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source identifier used by the cron producer.
pub const CRON_SOURCE: &str = "cron";

/// Source identifier used by the heartbeat producer.
pub const HEARTBEAT_SOURCE: &str = "heartbeat";

/// Conversation key reserved for heartbeat-triggered work.
pub const HEARTBEAT_CONVERSATION_KEY: &str = "heartbeat";

/// Metadata key marking an internal event as a cancellation request.
pub const CONTROL_KEY: &str = "control";

/// Control value for a cancellation request.
pub const CONTROL_CANCEL: &str = "cancel";

/// Event topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Work entering the agent (channel input, cron, heartbeat).
    Inbound,
    /// Agent responses heading back to a channel.
    Outbound,
    /// Control and system signals.
    Internal,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Inbound => f.write_str("inbound"),
            Topic::Outbound => f.write_str("outbound"),
            Topic::Internal => f.write_str("internal"),
        }
    }
}

/// Event body: text plus optional structured data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Human-readable text content.
    pub text: String,

    /// Structured data (tool results, status flags).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Payload {
    /// Text-only payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
        }
    }

    /// Attach structured data.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Immutable envelope published on the bus.
///
/// Outbound events always carry the `conversation_key` of the inbound
/// event that caused them; use [`Event::reply`] to build one so the key,
/// source and correlation id are copied over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id.
    pub id: String,

    /// Topic the event is published on.
    pub topic: Topic,

    /// Channel identifier, or `"cron"` / `"heartbeat"`.
    pub source: String,

    /// Groups events into a session.
    pub conversation_key: String,

    /// Event body.
    pub payload: Payload,

    /// When the event was created.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Links a response to the request that caused it.
    pub correlation_id: String,

    /// Producer-specific metadata (job ids, sender ids, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    fn new(topic: Topic, source: String, conversation_key: String, payload: Payload) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            correlation_id: id.clone(),
            id,
            topic,
            source,
            conversation_key,
            payload,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Build an inbound event. The correlation id is the event's own id.
    pub fn inbound(
        source: impl Into<String>,
        conversation_key: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            Topic::Inbound,
            source.into(),
            conversation_key.into(),
            Payload::text(text),
        )
    }

    /// Build the outbound response to `request`.
    pub fn reply(request: &Event, payload: Payload) -> Self {
        let mut event = Self::new(
            Topic::Outbound,
            request.source.clone(),
            request.conversation_key.clone(),
            payload,
        );
        event.correlation_id = request.id.clone();
        event
    }

    /// Build an internal request to cancel the active turn of a conversation.
    pub fn cancel_request(source: impl Into<String>, conversation_key: impl Into<String>) -> Self {
        let mut event = Self::new(
            Topic::Internal,
            source.into(),
            conversation_key.into(),
            Payload::text("cancel"),
        );
        event
            .metadata
            .insert(CONTROL_KEY.into(), serde_json::json!(CONTROL_CANCEL));
        event
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this is an internal cancellation request.
    pub fn is_cancel_request(&self) -> bool {
        self.topic == Topic::Internal
            && self.metadata.get(CONTROL_KEY).and_then(|v| v.as_str()) == Some(CONTROL_CANCEL)
    }
}

/// Whether a line of user input is a cancel command (`/stop` or `/cancel`).
///
/// Channel adapters use this to turn user input into
/// [`Event::cancel_request`] instead of a regular inbound event.
pub fn is_cancel_command(text: &str) -> bool {
    matches!(text.trim(), "/stop" | "/cancel")
}
