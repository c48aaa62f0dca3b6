//! The transport-agnostic `Message` envelope.
//!
//! Serialized as JSON on the WebSocket transport:
//!
//! ```json
//! {"sessionId":"…","from":"Ana","type":"TEXT","payload":{"text":"oi"},"timestamp":1700000000000}
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::SessionId;

/// Sender name used for messages synthesized by the relay itself.
pub const SERVER_SENDER: &str = "SERVER";

/// Payload key carrying the chat text of a `TEXT` message.
pub const PAYLOAD_TEXT: &str = "text";

/// Payload key carrying the human-readable reason of `ERROR` and `DISCONNECT`.
pub const PAYLOAD_MESSAGE: &str = "message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    Error,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub from: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Milliseconds since the Unix epoch.
    #[serde(default = "now_millis")]
    pub timestamp: u64,
}

impl Message {
    /// Builds a message stamped with the current wall-clock time.
    pub fn new(
        session_id: Option<SessionId>,
        from: impl Into<String>,
        message_type: MessageType,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            session_id,
            from: from.into(),
            message_type,
            payload,
            timestamp: now_millis(),
        }
    }

    pub fn text(session_id: Option<SessionId>, from: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(session_id, from, MessageType::Text, single_entry(PAYLOAD_TEXT, text.into()))
    }

    /// An `ERROR` notice from the relay.
    pub fn error(session_id: Option<SessionId>, reason: impl Into<String>) -> Self {
        Self::new(
            session_id,
            SERVER_SENDER,
            MessageType::Error,
            single_entry(PAYLOAD_MESSAGE, reason.into()),
        )
    }

    /// A `DISCONNECT` notice from the relay.
    pub fn disconnect(session_id: Option<SessionId>, reason: impl Into<String>) -> Self {
        Self::new(
            session_id,
            SERVER_SENDER,
            MessageType::Disconnect,
            single_entry(PAYLOAD_MESSAGE, reason.into()),
        )
    }

    pub fn text_content(&self) -> Option<&str> {
        self.payload.get(PAYLOAD_TEXT).and_then(Value::as_str)
    }

    pub fn notice(&self) -> Option<&str> {
        self.payload.get(PAYLOAD_MESSAGE).and_then(Value::as_str)
    }

    /// The line a plain-text peer should see for this message.
    ///
    /// `TEXT` yields `payload.text`; `ERROR` and `DISCONNECT` yield
    /// `payload.message`. A missing key yields an empty string.
    pub fn display_content(&self) -> &str {
        let content = match self.message_type {
            MessageType::Text => self.text_content(),
            MessageType::Error | MessageType::Disconnect => self.notice(),
        };
        content.unwrap_or_default()
    }
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn single_entry(key: &str, value: String) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), Value::String(value));
    map
}
