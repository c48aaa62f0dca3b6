//! Legacy socket protocol: frame types, the binary codec, and (with the `io`
//! feature) async frame I/O.

pub mod codec;
pub mod frames;
#[cfg(feature = "io")]
pub mod io;

pub use codec::{decode_frame, decode_payload, encode_frame, parse_header, FrameHeader, ProtocolError};
pub use frames::{
    ConnectionRequest, ConnectionResponse, FrameType, LegacyFrame, TextMessage, HEADER_SIZE,
    MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
#[cfg(feature = "io")]
pub use io::{read_frame, write_frame, FrameError};
