//! Connection Registry Implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::registry::types::{
    ActiveSocket, ConnectionEvent, ConnectionEventKind, ConnectionHandle, ConnectionId, Payload,
    SendError, SharedRecord, SocketState,
};
use crate::transport::{self, CLOSE_NO_STATUS};

/// Tracks connection records by identifier and owns all state transitions.
///
/// Construct one registry per process (or per test) and share it behind an
/// `Arc`. Events are pushed into the channel supplied at construction,
/// tagged with the originating handle.
pub struct ConnectionRegistry {
    config: Arc<Config>,
    records: RwLock<HashMap<ConnectionId, SharedRecord>>,
    events: mpsc::Sender<ConnectionEvent>,
}

impl ConnectionRegistry {
    /// Create a new ConnectionRegistry delivering events into the given channel
    pub fn new(config: Arc<Config>, events: mpsc::Sender<ConnectionEvent>) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Allocate a fresh identifier and an inert record for the given URL.
    ///
    /// No socket is created here; the first `send` or `listen` establishes
    /// the underlying connection.
    pub async fn create_handle(&self, url: impl Into<String>) -> ConnectionHandle {
        let handle = ConnectionHandle::new(url);

        let mut records = self.records.write().await;
        records.insert(handle.id, Arc::new(Mutex::new(SocketState::Idle)));
        debug!("Created connection handle {} for {}", handle.id, handle.url);

        handle
    }

    /// Queue a payload for transmission on the given connection.
    ///
    /// Success means the payload was enqueued, not that it was delivered.
    /// If no socket exists yet, one is created and the payload is flushed
    /// once the connection opens. Writes to a closed or unknown connection
    /// are rejected with `SendError::ConnectionClosed`.
    pub async fn send(&self, handle: &ConnectionHandle, payload: Payload) -> Result<(), SendError> {
        let Some(record) = self.lookup(handle.id).await else {
            debug!("Send on unknown connection {}", handle.id);
            return Err(SendError::ConnectionClosed);
        };

        let mut state = record.lock().await;
        match &*state {
            SocketState::Closed => return Err(SendError::ConnectionClosed),
            SocketState::Active(active) => {
                if active.outbound.send(payload).is_err() {
                    // The socket task is tearing down but has not marked the
                    // record closed yet. Enqueueing never implied delivery,
                    // so this still reports success.
                    debug!("Dropping payload for connection {}: socket is closing", handle.id);
                }
                return Ok(());
            }
            SocketState::Idle => {}
        }

        // No socket yet: create one and queue the payload so it flushes
        // once the connection opens.
        let active = self.activate(handle, &record, false);
        let _ = active.outbound.send(payload);
        *state = SocketState::Active(active);
        Ok(())
    }

    /// Attach event delivery for the given connection.
    ///
    /// Creates the socket if none exists yet. Calling this more than once is
    /// a no-op; events are delivered exactly once per inbound frame. A handle
    /// whose identifier has no backing record (in-memory state was lost, e.g.
    /// after a restart) gets a terminal closed record and a single
    /// `Closed { code: 1005 }` event; an identifier that never saw
    /// `create_handle` is indistinguishable from that case and is treated the
    /// same way.
    pub async fn listen(&self, handle: &ConnectionHandle) {
        if let Some(record) = self.lookup(handle.id).await {
            self.attach(handle, &record).await;
            return;
        }

        // No backing record: synthesize a terminal entry so later operations
        // resolve to "closed" rather than "unknown", and report the closure.
        // Re-check under the write lock so racing listeners insert (and
        // notify) only once.
        let inserted = {
            let mut records = self.records.write().await;
            match records.get(&handle.id) {
                Some(_) => None,
                None => {
                    records.insert(handle.id, Arc::new(Mutex::new(SocketState::Closed)));
                    Some(())
                }
            }
        };

        match inserted {
            Some(()) => {
                warn!("Connection {} has no backing record, reporting close", handle.id);
                self.deliver(
                    handle,
                    ConnectionEventKind::Closed {
                        code: CLOSE_NO_STATUS,
                        reason: String::new(),
                    },
                )
                .await;
            }
            None => {
                // Lost the race against another listen; that call notified.
                if let Some(record) = self.lookup(handle.id).await {
                    self.attach(handle, &record).await;
                }
            }
        }
    }

    /// Close the given connection.
    ///
    /// Always succeeds: closing an already-closed, socket-less, or unknown
    /// connection is a no-op. If a listener is attached, the close event is
    /// delivered once the transport-level close completes.
    pub async fn close(&self, handle: &ConnectionHandle) {
        let Some(record) = self.lookup(handle.id).await else {
            debug!("Close on unknown connection {}", handle.id);
            return;
        };

        let mut state = record.lock().await;
        match std::mem::replace(&mut *state, SocketState::Closed) {
            SocketState::Active(active) => {
                info!("Connection {} closed by caller", handle.id);
                // Dropping the outbound sender tells the socket task to run
                // the close handshake.
                drop(active);
            }
            SocketState::Idle => {
                debug!("Connection {} closed before any socket was created", handle.id);
            }
            SocketState::Closed => {
                debug!("Connection {} already closed", handle.id);
            }
        }
    }

    /// Get registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let records = self.records.read().await;
        let mut stats = RegistryStats {
            handles: records.len(),
            active_sockets: 0,
            closed: 0,
        };

        for record in records.values() {
            match &*record.lock().await {
                SocketState::Idle => {}
                SocketState::Active(_) => stats.active_sockets += 1,
                SocketState::Closed => stats.closed += 1,
            }
        }

        stats
    }

    /// Look up the shared record for an identifier
    async fn lookup(&self, id: ConnectionId) -> Option<SharedRecord> {
        self.records.read().await.get(&id).cloned()
    }

    /// Attach event delivery to an existing record, creating the socket if
    /// none exists. Attachment is idempotent.
    async fn attach(&self, handle: &ConnectionHandle, record: &SharedRecord) {
        let mut state = record.lock().await;
        match &*state {
            SocketState::Closed => {
                // Closure was already observable; nothing to re-deliver.
                debug!("Listen on closed connection {}", handle.id);
                return;
            }
            SocketState::Active(active) => {
                if active.events_enabled.swap(true, Ordering::SeqCst) {
                    debug!("Listener already attached on connection {}", handle.id);
                } else {
                    debug!("Listener attached on connection {}", handle.id);
                }
                return;
            }
            SocketState::Idle => {}
        }

        let active = self.activate(handle, record, true);
        *state = SocketState::Active(active);
    }

    /// Transition a record to `Active` by spawning its socket task.
    ///
    /// The transition happens synchronously under the caller-held record
    /// lock, so concurrent `send`/`listen` calls observe `Active` and cannot
    /// create a second socket for the same identifier. The actual connect
    /// runs inside the spawned task.
    fn activate(
        &self,
        handle: &ConnectionHandle,
        record: &SharedRecord,
        events_enabled: bool,
    ) -> ActiveSocket {
        info!("Opening WebSocket connection {} to {}", handle.id, handle.url);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let events_enabled = Arc::new(AtomicBool::new(events_enabled));

        transport::spawn_socket(
            handle.clone(),
            Arc::clone(record),
            self.config.transport.clone(),
            outbound_rx,
            Arc::clone(&events_enabled),
            self.events.clone(),
        );

        ActiveSocket {
            outbound: outbound_tx,
            events_enabled,
        }
    }

    /// Push an event to the subscriber, tagged with the originating handle
    async fn deliver(&self, handle: &ConnectionHandle, kind: ConnectionEventKind) {
        let event = ConnectionEvent {
            handle: handle.clone(),
            kind,
        };
        if self.events.send(event).await.is_err() {
            debug!("Event subscriber is gone, dropping event for {}", handle.id);
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub handles: usize,
    pub active_sockets: usize,
    pub closed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::time::{timeout, Duration};

    fn test_registry() -> (Arc<ConnectionRegistry>, mpsc::Receiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(16);
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(Config::default()),
            events_tx,
        ));
        (registry, events_rx)
    }

    #[tokio::test]
    async fn test_handle_identifiers_are_unique() {
        let (registry, _events_rx) = test_registry();

        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let handle = registry.create_handle("ws://localhost:9").await;
            assert!(seen.insert(handle.id), "identifier issued twice");
        }
    }

    #[tokio::test]
    async fn test_send_on_unknown_connection_fails() {
        let (registry, _events_rx) = test_registry();

        // A handle the registry never saw.
        let handle = ConnectionHandle::new("ws://localhost:9");
        let result = registry.send(&handle, Payload::from("hello")).await;
        assert_eq!(result, Err(SendError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_listen_on_unknown_connection_reports_close_once() {
        let (registry, mut events_rx) = test_registry();

        let handle = ConnectionHandle::new("ws://localhost:9");
        registry.listen(&handle).await;

        let event = events_rx.recv().await.expect("expected a close event");
        assert_eq!(event.handle, handle);
        assert_eq!(
            event.kind,
            ConnectionEventKind::Closed {
                code: 1005,
                reason: String::new(),
            }
        );

        // The synthesized record is terminal: a second listen stays silent
        // and a send is rejected.
        registry.listen(&handle).await;
        let second = timeout(Duration::from_millis(100), events_rx.recv()).await;
        assert!(second.is_err(), "no second close event expected");

        let result = registry.send(&handle, Payload::from("hello")).await;
        assert_eq!(result, Err(SendError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_close_is_always_successful() {
        let (registry, mut events_rx) = test_registry();

        // Unknown identifier.
        let unknown = ConnectionHandle::new("ws://localhost:9");
        registry.close(&unknown).await;

        // Known but never connected, closed twice.
        let handle = registry.create_handle("ws://localhost:9").await;
        registry.close(&handle).await;
        registry.close(&handle).await;

        // Closing never emits events on its own.
        let event = timeout(Duration::from_millis(100), events_rx.recv()).await;
        assert!(event.is_err(), "close must not deliver events");
    }

    #[tokio::test]
    async fn test_send_after_local_close_fails() {
        let (registry, _events_rx) = test_registry();

        let handle = registry.create_handle("ws://localhost:9").await;
        registry.close(&handle).await;

        let result = registry.send(&handle, Payload::from("hello")).await;
        assert_eq!(result, Err(SendError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_stats_reflect_record_states() {
        let (registry, _events_rx) = test_registry();

        let open = registry.create_handle("ws://localhost:9").await;
        let closed = registry.create_handle("ws://localhost:9").await;
        registry.close(&closed).await;

        let stats = registry.stats().await;
        assert_eq!(stats.handles, 2);
        assert_eq!(stats.active_sockets, 0);
        assert_eq!(stats.closed, 1);

        // Keep the idle handle alive through the assertions above.
        drop(open);
    }
}
