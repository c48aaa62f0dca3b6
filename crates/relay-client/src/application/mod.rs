//! Application layer for the client.
//!
//! - **`listener`** – The receive loop.  It turns incoming legacy frames into
//!   calls on a [`ChatDisplay`](listener::ChatDisplay) and reports why it
//!   stopped, which the binary maps to the process exit code.

pub mod listener;
