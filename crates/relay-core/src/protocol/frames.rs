//! The four frames exchanged on the legacy socket transport.

use crate::domain::message::Message;

/// Current protocol version written into every frame header.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size in bytes of the fixed frame header.
pub const HEADER_SIZE: usize = 8;

/// Largest payload a frame may declare (1 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Frame type codes carried in byte 1 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    ConnectionRequest = 0x01,
    ConnectionResponse = 0x02,
    TextMessage = 0x03,
    ShutdownNotice = 0x04,
}

impl TryFrom<u8> for FrameType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(FrameType::ConnectionRequest),
            0x02 => Ok(FrameType::ConnectionResponse),
            0x03 => Ok(FrameType::TextMessage),
            0x04 => Ok(FrameType::ShutdownNotice),
            _ => Err(()),
        }
    }
}

/// First frame a peer sends after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Session the peer would like to rejoin. Advisory only.
    pub session_id: Option<String>,
    pub client_name: String,
}

/// The relay's answer to a [`ConnectionRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionResponse {
    pub success: bool,
    pub session_id: String,
    pub reason: String,
}

impl ConnectionResponse {
    pub fn accepted(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: true,
            session_id: session_id.into(),
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: String::new(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    pub session_id: String,
    pub sender: String,
    pub content: String,
    /// Microseconds since the Unix epoch.
    pub timestamp_us: u64,
}

impl From<&Message> for TextMessage {
    /// Renders an envelope for a legacy peer. `ERROR` and `DISCONNECT`
    /// notices travel as text whose content is the notice reason.
    fn from(message: &Message) -> Self {
        Self {
            session_id: message
                .session_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            sender: message.from.clone(),
            content: message.display_content().to_string(),
            timestamp_us: message.timestamp.saturating_mul(1_000),
        }
    }
}

/// Every value that may travel on the legacy transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyFrame {
    ConnectionRequest(ConnectionRequest),
    ConnectionResponse(ConnectionResponse),
    TextMessage(TextMessage),
    /// The relay is going away; the peer should exit cleanly.
    ShutdownNotice,
}

impl LegacyFrame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            LegacyFrame::ConnectionRequest(_) => FrameType::ConnectionRequest,
            LegacyFrame::ConnectionResponse(_) => FrameType::ConnectionResponse,
            LegacyFrame::TextMessage(_) => FrameType::TextMessage,
            LegacyFrame::ShutdownNotice => FrameType::ShutdownNotice,
        }
    }

    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            LegacyFrame::ConnectionRequest(_) => "ConnectionRequest",
            LegacyFrame::ConnectionResponse(_) => "ConnectionResponse",
            LegacyFrame::TextMessage(_) => "TextMessage",
            LegacyFrame::ShutdownNotice => "ShutdownNotice",
        }
    }
}
