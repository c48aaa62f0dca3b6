//! Domain entities shared by the relay server and its peers.

pub mod ids;
pub mod message;
pub mod session;
