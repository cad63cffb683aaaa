//! WsBridge Library
//!
//! A WebSocket connection registry that sits between an application's
//! message-passing runtime and the socket layer. Handles are created
//! eagerly, sockets lazily: the underlying connection is established on the
//! first outbound send or listen request. Inbound data and close events are
//! multiplexed back to a subscriber channel, tagged with the originating
//! handle, and operations on an unknown or closed connection fail explicitly
//! rather than silently.

pub mod config;
pub mod registry;
pub mod transport;

pub use config::Config;
pub use registry::{
    ConnectionEvent, ConnectionEventKind, ConnectionHandle, ConnectionId, ConnectionRegistry,
    Payload, SendError,
};

/// Common error type for configuration and CLI plumbing
pub type Result<T> = anyhow::Result<T>;
