//! # relay-core
//!
//! Shared library for the chat relay containing the domain entities and the
//! legacy framed socket protocol.
//!
//! # Architecture overview (for beginners)
//!
//! The relay pairs an end-user "client" with a "supervisor" and forwards chat
//! messages between the two.  Peers may speak one of two transports: a
//! compact binary "legacy" protocol over plain TCP, or JSON text frames over
//! WebSocket.  Both the server and the legacy client binary depend on this
//! crate.  It defines:
//!
//! - **`domain`** – Identifiers, roles, the `Session` pairing state machine,
//!   and the transport-agnostic `Message` envelope.
//!
//! - **`protocol`** – The four legacy frames and the binary codec that turns
//!   them into bytes (8-byte header + payload) and back.  With the `io`
//!   feature enabled it also provides async helpers to read and write whole
//!   frames on a tokio stream.
//!
//! The crate itself opens no sockets and spawns no tasks.

pub mod domain;
pub mod protocol;

pub use domain::ids::{ConnectionId, Role, SessionId, TransportKind};
pub use domain::message::{Message, MessageType, SERVER_SENDER};
pub use domain::session::{Session, SessionError, SessionState};
pub use protocol::codec::{decode_frame, encode_frame, ProtocolError};
pub use protocol::frames::LegacyFrame;
