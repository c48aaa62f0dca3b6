//! relay-client library entry point.
//!
//! The client is a legacy-socket peer of the chat relay.  It connects to the
//! client or supervisor port, sends a `ConnectionRequest` with the user's
//! name, and then does two things at once:
//!
//! 1. Reads lines from stdin and sends each one as a `TextMessage`.
//! 2. Runs the listener loop, printing every `TextMessage` it receives and
//!    exiting when the server announces shutdown or the connection drops.
//!
//! The modules are exposed so that `main.rs` and the tests share one tree.

/// Application layer: the listener loop and its display port.
pub mod application;

/// Infrastructure layer: TCP link to the relay and console output.
pub mod infrastructure;
