//! Application layer use cases for the relay server.
//!
//! Nothing in this layer opens a socket.  Transports reach it through the
//! [`connection::Connection`] trait and audit storage through
//! [`message_router::AuditStore`], so every use case can be tested with
//! in-memory doubles.
//!
//! # Sub-modules
//!
//! - **`connection`** – The transport-neutral send handle and the record the
//!   registry keeps for every accepted connection.
//!
//! - **`matching_queue`** – FIFO pools of clients and supervisors waiting for
//!   a counterpart.
//!
//! - **`session_registry`** – The single owner of connections, sessions, and
//!   the matching queue.  Every mutation happens in one critical section.
//!
//! - **`message_router`** – Resolves the paired peer of a sender and delivers
//!   messages, error notices, and disconnect notifications.

pub mod connection;
pub mod matching_queue;
pub mod message_router;
pub mod session_registry;
