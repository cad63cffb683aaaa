//! Connection Registry Module
//!
//! Tracks connection handles by identifier, lazily establishes sockets on
//! first use, and multiplexes inbound events back to the subscriber.

pub mod manager;
pub mod types;

pub use manager::{ConnectionRegistry, RegistryStats};
pub use types::{
    ConnectionEvent, ConnectionEventKind, ConnectionHandle, ConnectionId, Payload, SendError,
};
