//! Connection Registry Types

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Unique identifier for a connection, never reused within a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Caller-visible token referencing a connection's registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub url: String,
}

impl ConnectionHandle {
    /// Create a handle for the given target URL with a fresh identifier
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::generate(),
            url: url.into(),
        }
    }
}

/// Raw frame payload, passed through unmodified in both directions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Binary(data)
    }
}

/// Event delivered to the subscriber, tagged with the originating handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub handle: ConnectionHandle,
    pub kind: ConnectionEventKind,
}

/// The two kinds of events a connection can emit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// An inbound frame arrived
    Data(Payload),
    /// The connection closed; code and reason come from the transport
    Closed { code: u16, reason: String },
}

/// Error returned when a write targets a dead or unknown connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection is closed or was never registered
    #[error("connection is closed")]
    ConnectionClosed,
}

/// Per-connection socket state. The tagged representation makes invalid
/// combinations (a listener without a socket, a live socket on a closed
/// record) unrepresentable.
#[derive(Debug)]
pub(crate) enum SocketState {
    /// No socket yet; the first send or listen creates one
    Idle,
    /// Socket task running
    Active(ActiveSocket),
    /// Terminal; the entry stays in the table as a closed marker
    Closed,
}

/// Handle to a running socket task
#[derive(Debug)]
pub(crate) struct ActiveSocket {
    /// Outbound frame queue; dropping the sender asks the task to close
    pub(crate) outbound: mpsc::UnboundedSender<Payload>,
    /// Latch set once event callbacks are attached, shared with the task
    pub(crate) events_enabled: Arc<AtomicBool>,
}

/// A registry record, shared between the registry table and the socket task
pub(crate) type SharedRecord = Arc<Mutex<SocketState>>;
