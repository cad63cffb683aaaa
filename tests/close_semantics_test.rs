//! Integration tests for close signaling and event ordering

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

use wsbridge::{
    Config, ConnectionEvent, ConnectionEventKind, ConnectionRegistry, Payload, SendError,
};

fn test_registry() -> (Arc<ConnectionRegistry>, mpsc::Receiver<ConnectionEvent>) {
    let (events_tx, events_rx) = mpsc::channel(64);
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(Config::default()),
        events_tx,
    ));
    (registry, events_rx)
}

async fn bind_server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

#[tokio::test]
async fn test_remote_close_delivers_transport_code_and_reason() {
    let (listener, url) = bind_server().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::from(4000),
            reason: "going away for the test".into(),
        }))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (registry, mut events_rx) = test_registry();
    let handle = registry.create_handle(&url).await;
    registry.listen(&handle).await;

    let event = timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("expected a close event")
        .unwrap();
    assert_eq!(event.handle, handle);
    assert_eq!(
        event.kind,
        ConnectionEventKind::Closed {
            code: 4000,
            reason: "going away for the test".to_string(),
        }
    );

    // The record is terminal: a later write is rejected.
    let result = registry.send(&handle, Payload::from("too late")).await;
    assert_eq!(result, Err(SendError::ConnectionClosed));

    // And closing it again succeeds without a duplicate event.
    registry.close(&handle).await;
    let duplicate = timeout(Duration::from_millis(300), events_rx.recv()).await;
    assert!(duplicate.is_err(), "close event was delivered twice");
}

#[tokio::test]
async fn test_events_arrive_in_transport_order() {
    let (listener, url) = bind_server().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text("one".into())).await.unwrap();
        ws.send(Message::Text("two".into())).await.unwrap();
        ws.send(Message::Binary(Bytes::from_static(b"\x07"))).await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "done".into(),
        }))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (registry, mut events_rx) = test_registry();
    let handle = registry.create_handle(&url).await;
    registry.listen(&handle).await;

    let mut kinds = Vec::new();
    for _ in 0..4 {
        let event = timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("expected four events")
            .unwrap();
        kinds.push(event.kind);
    }

    assert_eq!(
        kinds,
        vec![
            ConnectionEventKind::Data(Payload::Text("one".to_string())),
            ConnectionEventKind::Data(Payload::Text("two".to_string())),
            ConnectionEventKind::Data(Payload::Binary(Bytes::from_static(b"\x07"))),
            ConnectionEventKind::Closed {
                code: 1000,
                reason: "done".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn test_local_close_reports_exactly_once() {
    let (listener, url) = bind_server().await;
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        accepted_tx.send(()).unwrap();
        // Keep reading; tungstenite answers the close handshake for us.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (registry, mut events_rx) = test_registry();
    let handle = registry.create_handle(&url).await;
    registry.listen(&handle).await;
    accepted_rx.recv().await.unwrap();

    registry.close(&handle).await;

    let event = timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("expected a close event after the handshake")
        .unwrap();
    assert!(
        matches!(event.kind, ConnectionEventKind::Closed { .. }),
        "expected a close event, got {:?}",
        event.kind
    );

    // Closing again is a success no-op and must not re-report.
    registry.close(&handle).await;
    let duplicate = timeout(Duration::from_millis(300), events_rx.recv()).await;
    assert!(duplicate.is_err(), "close event was delivered twice");

    let result = registry.send(&handle, Payload::from("too late")).await;
    assert_eq!(result, Err(SendError::ConnectionClosed));
}

#[tokio::test]
async fn test_close_without_listener_stays_silent() {
    let (listener, url) = bind_server().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        // Drain the client's payload, then close abruptly.
        let _ = ws.next().await;
        ws.close(None).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (registry, mut events_rx) = test_registry();
    let handle = registry.create_handle(&url).await;

    // Socket created by a send; no listener is ever attached.
    registry.send(&handle, Payload::from("hi")).await.unwrap();

    // The remote close marks the record without emitting an event.
    let event = timeout(Duration::from_millis(500), events_rx.recv()).await;
    assert!(event.is_err(), "no event expected without a listener");

    // Wait for the record to reach its terminal state, then verify the
    // write contract.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if registry.send(&handle, Payload::from("probe")).await
            == Err(SendError::ConnectionClosed)
        {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "record never reached the closed state"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_connect_failure_surfaces_as_close_event() {
    // Grab a port that nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let (registry, mut events_rx) = test_registry();
    let handle = registry.create_handle(&url).await;
    registry.listen(&handle).await;

    let event = timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("expected a close event for the failed connect")
        .unwrap();
    assert_eq!(event.handle, handle);
    match event.kind {
        ConnectionEventKind::Closed { code, .. } => assert_eq!(code, 1006),
        other => panic!("expected a close event, got {:?}", other),
    }

    let result = registry.send(&handle, Payload::from("hello")).await;
    assert_eq!(result, Err(SendError::ConnectionClosed));
}
