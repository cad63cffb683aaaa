//! WebSocket Transport Task
//!
//! One task per connection, owning the tokio-tungstenite stream. The task
//! performs the connect, pumps outbound payloads from the registry and
//! inbound frames to the subscriber, and reports the terminal close exactly
//! once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::registry::types::{
    ConnectionEvent, ConnectionEventKind, ConnectionHandle, Payload, SharedRecord, SocketState,
};

/// Close code reported when a close frame carried no status
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Close code reported when the transport failed or dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Spawn the socket task for a connection.
///
/// The task owns the receiving half of the outbound queue; the registry
/// signals a local close by dropping the sending half. On exit the task
/// marks the record closed and, if a listener is attached, delivers a single
/// close event with the transport-supplied code and reason.
pub(crate) fn spawn_socket(
    handle: ConnectionHandle,
    record: SharedRecord,
    config: TransportConfig,
    outbound: mpsc::UnboundedReceiver<Payload>,
    events_enabled: Arc<AtomicBool>,
    events: mpsc::Sender<ConnectionEvent>,
) {
    tokio::spawn(async move {
        let (code, reason) =
            run_socket(&handle, &config, outbound, &events_enabled, &events).await;

        // Mark the record closed before notifying, so a caller reacting to
        // the close event observes the terminal state.
        {
            let mut state = record.lock().await;
            *state = SocketState::Closed;
        }

        info!("WebSocket connection {} closed with code {}", handle.id, code);

        if events_enabled.load(Ordering::SeqCst) {
            let event = ConnectionEvent {
                handle: handle.clone(),
                kind: ConnectionEventKind::Closed { code, reason },
            };
            if events.send(event).await.is_err() {
                debug!("Event subscriber is gone, dropping close event for {}", handle.id);
            }
        }
    });
}

/// Run the connection to completion and return the terminal close code and reason
async fn run_socket(
    handle: &ConnectionHandle,
    config: &TransportConfig,
    mut outbound: mpsc::UnboundedReceiver<Payload>,
    events_enabled: &AtomicBool,
    events: &mpsc::Sender<ConnectionEvent>,
) -> (u16, String) {
    let ws_config = websocket_config(config);

    let (ws_stream, _response) =
        match connect_async_with_config(handle.url.as_str(), Some(ws_config), false).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(
                    "WebSocket connect to {} failed for connection {}: {}",
                    handle.url, handle.id, e
                );
                return (CLOSE_ABNORMAL, e.to_string());
            }
        };

    info!("WebSocket connection {} opened to {}", handle.id, handle.url);

    let (mut sink, mut stream) = ws_stream.split();
    let mut outbound_open = true;

    loop {
        tokio::select! {
            payload = outbound.recv(), if outbound_open => match payload {
                Some(payload) => {
                    if let Err(e) = sink.send(to_message(payload)).await {
                        // The read half will observe the failure and report it.
                        debug!("Write on connection {} failed: {}", handle.id, e);
                    }
                }
                None => {
                    // The registry dropped the queue: local close. Start the
                    // close handshake and keep reading until the peer
                    // confirms or the stream ends.
                    outbound_open = false;
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        debug!("Close handshake on connection {} failed: {}", handle.id, e);
                        return (CLOSE_ABNORMAL, String::new());
                    }
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    deliver_data(handle, events_enabled, events, Payload::Text(text.to_string()))
                        .await;
                }
                Some(Ok(Message::Binary(data))) => {
                    deliver_data(handle, events_enabled, events, Payload::Binary(data)).await;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error on connection {}: {}", handle.id, e);
                    return (CLOSE_ABNORMAL, e.to_string());
                }
                None => {
                    return (CLOSE_ABNORMAL, String::new());
                }
            },
        }
    }
}

/// Deliver an inbound frame to the subscriber, or drop it when no listener
/// has been attached yet
async fn deliver_data(
    handle: &ConnectionHandle,
    events_enabled: &AtomicBool,
    events: &mpsc::Sender<ConnectionEvent>,
    payload: Payload,
) {
    if !events_enabled.load(Ordering::SeqCst) {
        debug!(
            "Dropping inbound frame on connection {}: no listener attached",
            handle.id
        );
        return;
    }

    let event = ConnectionEvent {
        handle: handle.clone(),
        kind: ConnectionEventKind::Data(payload),
    };
    if events.send(event).await.is_err() {
        debug!("Event subscriber is gone, dropping frame for {}", handle.id);
    }
}

/// Convert an outbound payload to a wire message
fn to_message(payload: Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text.into()),
        Payload::Binary(data) => Message::Binary(data),
    }
}

/// Build the tungstenite protocol configuration from our transport settings
fn websocket_config(config: &TransportConfig) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(config.max_message_size))
        .max_frame_size(Some(config.max_frame_size))
}
