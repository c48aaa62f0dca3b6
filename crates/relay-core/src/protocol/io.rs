//! Async frame I/O on tokio streams.
//!
//! [`read_frame`] reads exactly one header and then exactly one payload, so
//! after a recoverable error the stream is still positioned at the next frame.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::codec::{decode_payload, encode_frame, parse_header, ProtocolError};
use crate::protocol::frames::{LegacyFrame, HEADER_SIZE};

/// Errors from reading or writing whole frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed the stream cleanly between frames.
    #[error("connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl FrameError {
    /// `true` when the frame can be skipped and reading may continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Protocol(e) if e.is_recoverable())
    }
}

/// Reads one complete frame from `reader`.
///
/// # Errors
///
/// - [`FrameError::Closed`] if the stream ends before a header starts.
/// - [`FrameError::Io`] on a socket error or a stream ending mid-frame.
/// - [`FrameError::Protocol`] if the header or payload does not decode.
pub async fn read_frame<R>(reader: &mut R) -> Result<LegacyFrame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(e.into()),
    }
    let header = parse_header(&header)?;

    let mut payload = vec![0u8; header.payload_len];
    reader.read_exact(&mut payload).await?;

    Ok(decode_payload(header.frame_type, &payload)?)
}

/// Encodes `frame` and writes it to `writer`, flushing afterwards.
///
/// # Errors
///
/// Returns [`FrameError::Protocol`] if the frame is too large to encode and
/// [`FrameError::Io`] if the write fails.
pub async fn write_frame<W>(writer: &mut W, frame: &LegacyFrame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
