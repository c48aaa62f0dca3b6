//! Infrastructure layer for the client.
//!
//! - **`network`** – Connects to the relay, performs the handshake, and
//!   splits the socket into a reader for the listener loop and a
//!   [`RelaySender`](network::RelaySender) for stdin input.
//! - **`console`** – The terminal implementation of `ChatDisplay`.

pub mod console;
pub mod network;
