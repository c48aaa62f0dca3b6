//! Storage infrastructure.
//!
//! - **`config`** – Reads the TOML configuration file, falling back to
//!   defaults when the file or individual keys are missing, and validates
//!   the result before any listener is bound.
//!
//! - **`audit`** – The production [`AuditStore`]: every relayed message is
//!   written as a structured `tracing` event on the `audit` target, so it can
//!   be routed to its own sink with an `EnvFilter` directive.
//!
//! [`AuditStore`]: crate::application::message_router::AuditStore

pub mod audit;
pub mod config;
