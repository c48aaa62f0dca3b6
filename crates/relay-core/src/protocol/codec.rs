//! Binary codec for the legacy frames.
//!
//! Wire format:
//! ```text
//! [version:1][frame_type:1][reserved:2][payload_len:4][payload:N]
//! ```
//! Header size: 8 bytes. All multi-byte integers are big-endian and strings
//! are UTF-8 behind a 4-byte length prefix.
//!
//! Payloads:
//! ```text
//! ConnectionRequest   [has_session:1][session_id:str]?[client_name:str]
//! ConnectionResponse  [success:1][session_id:str][reason:str]
//! TextMessage         [session_id:str][sender:str][content:str][timestamp_us:8]
//! ShutdownNotice      (empty)
//! ```

use thiserror::Error;

use crate::protocol::frames::{
    ConnectionRequest, ConnectionResponse, FrameType, LegacyFrame, TextMessage, HEADER_SIZE,
    MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the frame it should contain.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The frame type byte in the header is not a recognized value.
    #[error("unknown frame type: 0x{0:02X}")]
    UnknownFrameType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The header declares a payload larger than [`MAX_PAYLOAD_SIZE`].
    #[error("payload of {declared} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { declared: usize, max: usize },

    /// The payload could not be parsed (truncated field, invalid UTF-8, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl ProtocolError {
    /// Whether the stream is still aligned on a frame boundary after this
    /// error, so the reader may skip the frame and keep going.
    ///
    /// Only errors found *after* a valid header was consumed qualify.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownFrameType(_) | ProtocolError::MalformedPayload(_)
        )
    }
}

/// A validated frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw type byte; checked only when the payload is decoded.
    pub frame_type: u8,
    pub payload_len: usize,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`LegacyFrame`] into a byte vector including the 8-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the payload would exceed
/// [`MAX_PAYLOAD_SIZE`].
///
/// # Examples
///
/// ```rust
/// use relay_core::protocol::{decode_frame, encode_frame, LegacyFrame};
///
/// let bytes = encode_frame(&LegacyFrame::ShutdownNotice).unwrap();
/// let (decoded, consumed) = decode_frame(&bytes).unwrap();
/// assert_eq!(decoded, LegacyFrame::ShutdownNotice);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_frame(frame: &LegacyFrame) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(frame);
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            declared: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(frame.frame_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Validates the first [`HEADER_SIZE`] bytes of `bytes` as a frame header.
///
/// # Errors
///
/// - [`ProtocolError::InsufficientData`] if fewer than 8 bytes are given.
/// - [`ProtocolError::UnsupportedVersion`] for a foreign version byte.
/// - [`ProtocolError::PayloadTooLarge`] if the declared length is over the limit.
pub fn parse_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    // bytes[2..4] are reserved – ignored on decode

    let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            declared: payload_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    Ok(FrameHeader {
        frame_type: bytes[1],
        payload_len,
    })
}

/// Decodes one [`LegacyFrame`] from the beginning of `bytes`.
///
/// Returns the frame and the total number of bytes consumed (header +
/// payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are truncated or malformed.
pub fn decode_frame(bytes: &[u8]) -> Result<(LegacyFrame, usize), ProtocolError> {
    let header = parse_header(bytes)?;

    let total_needed = HEADER_SIZE + header.payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::InsufficientData {
            needed: total_needed,
            available: bytes.len(),
        });
    }

    let frame = decode_payload(header.frame_type, &bytes[HEADER_SIZE..total_needed])?;
    Ok((frame, total_needed))
}

/// Decodes the payload of a frame whose header carried `frame_type`.
///
/// # Errors
///
/// - [`ProtocolError::UnknownFrameType`] for an unrecognized type byte.
/// - [`ProtocolError::MalformedPayload`] if the payload does not parse.
pub fn decode_payload(frame_type: u8, payload: &[u8]) -> Result<LegacyFrame, ProtocolError> {
    let frame_type =
        FrameType::try_from(frame_type).map_err(|_| ProtocolError::UnknownFrameType(frame_type))?;

    match frame_type {
        FrameType::ConnectionRequest => {
            decode_connection_request(payload).map(LegacyFrame::ConnectionRequest)
        }
        FrameType::ConnectionResponse => {
            decode_connection_response(payload).map(LegacyFrame::ConnectionResponse)
        }
        FrameType::TextMessage => decode_text_message(payload).map(LegacyFrame::TextMessage),
        FrameType::ShutdownNotice => Ok(LegacyFrame::ShutdownNotice),
    }
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(frame: &LegacyFrame) -> Vec<u8> {
    let mut buf = Vec::new();
    match frame {
        LegacyFrame::ConnectionRequest(m) => {
            match &m.session_id {
                Some(session_id) => {
                    buf.push(0x01);
                    write_length_prefixed_string(&mut buf, session_id);
                }
                None => buf.push(0x00),
            }
            write_length_prefixed_string(&mut buf, &m.client_name);
        }
        LegacyFrame::ConnectionResponse(m) => {
            buf.push(if m.success { 0x01 } else { 0x00 });
            write_length_prefixed_string(&mut buf, &m.session_id);
            write_length_prefixed_string(&mut buf, &m.reason);
        }
        LegacyFrame::TextMessage(m) => {
            write_length_prefixed_string(&mut buf, &m.session_id);
            write_length_prefixed_string(&mut buf, &m.sender);
            write_length_prefixed_string(&mut buf, &m.content);
            buf.extend_from_slice(&m.timestamp_us.to_be_bytes());
        }
        LegacyFrame::ShutdownNotice => {} // empty payload
    }
    buf
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_connection_request(payload: &[u8]) -> Result<ConnectionRequest, ProtocolError> {
    require_len(payload, 1, "ConnectionRequest")?;
    let (session_id, offset) = match payload[0] {
        0x00 => (None, 1),
        0x01 => {
            let (id, next) = read_length_prefixed_string(payload, 1)?;
            (Some(id), next)
        }
        other => {
            return Err(ProtocolError::MalformedPayload(format!(
                "invalid has_session flag: 0x{other:02X}"
            )))
        }
    };
    let (client_name, _) = read_length_prefixed_string(payload, offset)?;
    Ok(ConnectionRequest {
        session_id,
        client_name,
    })
}

fn decode_connection_response(payload: &[u8]) -> Result<ConnectionResponse, ProtocolError> {
    require_len(payload, 1, "ConnectionResponse")?;
    let success = payload[0] != 0x00;
    let (session_id, offset) = read_length_prefixed_string(payload, 1)?;
    let (reason, _) = read_length_prefixed_string(payload, offset)?;
    Ok(ConnectionResponse {
        success,
        session_id,
        reason,
    })
}

fn decode_text_message(payload: &[u8]) -> Result<TextMessage, ProtocolError> {
    let (session_id, offset) = read_length_prefixed_string(payload, 0)?;
    let (sender, offset) = read_length_prefixed_string(payload, offset)?;
    let (content, offset) = read_length_prefixed_string(payload, offset)?;
    let timestamp_us = read_u64(payload, offset)?;
    Ok(TextMessage {
        session_id,
        sender,
        content,
        timestamp_us,
    })
}

// ── Low-level helpers ─────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    let bytes: [u8; 8] = buf
        .get(offset..offset + 8)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| {
            ProtocolError::MalformedPayload(format!(
                "need 8 bytes for u64 at offset {offset}, got {}",
                buf.len().saturating_sub(offset)
            ))
        })?;
    Ok(u64::from_be_bytes(bytes))
}

fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Reads a 4-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    let len_bytes: [u8; 4] = buf
        .get(offset..offset + 4)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| {
            ProtocolError::MalformedPayload(format!(
                "need 4 bytes for string length at offset {offset}"
            ))
        })?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let start = offset + 4;
    let raw = buf.get(start..start + len).ok_or_else(|| {
        ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        ))
    })?;
    let s = std::str::from_utf8(raw)
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
