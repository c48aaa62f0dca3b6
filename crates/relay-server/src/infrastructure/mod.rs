//! Infrastructure layer for the relay server.
//!
//! Contains the OS-facing adapters: TCP and WebSocket listeners, the
//! per-transport connection handles, the TOML configuration file, and the
//! audit sink.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `relay_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
