//! Connection lifecycle integration tests: start, handshake outcomes, stop.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{HandshakeBehavior, MockHubServer, RS};
use signalr_client::{ConnectionState, HubClient, SignalRError};

/// Records every firing of the three lifecycle events.
#[derive(Default)]
struct EventLog {
    closed: Mutex<Vec<Option<String>>>,
    reconnecting: Mutex<Vec<Option<String>>>,
    reconnected: Mutex<Vec<Option<String>>>,
}

impl EventLog {
    async fn attach(log: &Arc<Self>, client: &HubClient) {
        let cloned = Arc::clone(log);
        client
            .on_closed(move |reason| cloned.closed.lock().unwrap().push(reason))
            .await;
        let cloned = Arc::clone(log);
        client
            .on_reconnecting(move |error| cloned.reconnecting.lock().unwrap().push(error))
            .await;
        let cloned = Arc::clone(log);
        client
            .on_reconnected(move |id| cloned.reconnected.lock().unwrap().push(id))
            .await;
    }

    fn is_empty(&self) -> bool {
        self.closed.lock().unwrap().is_empty()
            && self.reconnecting.lock().unwrap().is_empty()
            && self.reconnected.lock().unwrap().is_empty()
    }
}

#[tokio::test]
async fn happy_start_reaches_connected_without_events() {
    let server = MockHubServer::start().await;
    let client = HubClient::builder(server.url()).build().unwrap();
    let events = Arc::new(EventLog::default());
    EventLog::attach(&events, &client).await;

    client.start().await.unwrap();
    assert_eq!(client.state().await, ConnectionState::Connected);
    assert!(events.is_empty());

    client.stop().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn start_while_connected_is_ignored() {
    let server = MockHubServer::start().await;
    let client = HubClient::builder(server.url()).build().unwrap();

    client.start().await.unwrap();
    client.start().await.unwrap();
    assert_eq!(client.state().await, ConnectionState::Connected);

    client.stop().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn stop_sends_close_record_and_fires_closed_once() {
    let mut server = MockHubServer::start().await;
    let client = HubClient::builder(server.url()).build().unwrap();
    let events = Arc::new(EventLog::default());
    EventLog::attach(&events, &client).await;

    client.start().await.unwrap();
    client.stop().await.unwrap();

    assert_eq!(
        server.recv_frame().await.as_deref(),
        Some(format!("{{\"type\":7}}{RS}").as_str())
    );
    assert_eq!(client.state().await, ConnectionState::Disconnected);
    assert_eq!(events.closed.lock().unwrap().as_slice(), &[None]);

    // Stop after stop is a no-op and fires nothing further.
    client.stop().await.unwrap();
    assert_eq!(events.closed.lock().unwrap().len(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn stop_with_error_sends_error_close_record() {
    let mut server = MockHubServer::start().await;
    let client = HubClient::builder(server.url()).build().unwrap();
    let events = Arc::new(EventLog::default());
    EventLog::attach(&events, &client).await;

    client.start().await.unwrap();
    client.stop_with_error("going away").await.unwrap();

    assert_eq!(
        server.recv_frame().await.as_deref(),
        Some(format!("{{\"type\":7,\"error\":\"going away\"}}{RS}").as_str())
    );
    assert_eq!(
        events.closed.lock().unwrap().as_slice(),
        &[Some("going away".to_string())]
    );

    server.shutdown().await;
}

#[tokio::test]
async fn stop_while_disconnected_is_a_no_op() {
    let client = HubClient::builder("ws://127.0.0.1:1/hub").build().unwrap();
    let events = Arc::new(EventLog::default());
    EventLog::attach(&events, &client).await;

    client.stop().await.unwrap();
    assert!(events.is_empty());
    assert_eq!(client.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn transport_connect_failure_fires_closed() {
    // Nothing listens on port 1; connecting fails at the transport level.
    let client = HubClient::builder("ws://127.0.0.1:1/hub").build().unwrap();
    let events = Arc::new(EventLog::default());
    EventLog::attach(&events, &client).await;

    let result = client.start().await;
    assert!(result.is_err());
    assert_eq!(client.state().await, ConnectionState::Disconnected);
    assert_eq!(events.closed.lock().unwrap().len(), 1);
    assert!(events.closed.lock().unwrap()[0].is_some());
}

#[tokio::test]
async fn handshake_error_fails_start_without_closed_event() {
    let server =
        MockHubServer::with_handshake(HandshakeBehavior::Fail("unsupported".to_string())).await;
    let client = HubClient::builder(server.url()).build().unwrap();
    let events = Arc::new(EventLog::default());
    EventLog::attach(&events, &client).await;

    match client.start().await {
        Err(SignalRError::HandshakeFailed(message)) => assert_eq!(message, "unsupported"),
        other => panic!("expected handshake failure, got {other:?}"),
    }
    assert_eq!(client.state().await, ConnectionState::Disconnected);
    assert!(events.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn handshake_watchdog_abandons_the_attempt() {
    let server = MockHubServer::with_handshake(HandshakeBehavior::Ignore).await;
    let client = HubClient::builder(server.url())
        .with_handshake_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let before = std::time::Instant::now();
    match client.start().await {
        Err(SignalRError::HandshakeTimeout) => {}
        other => panic!("expected handshake timeout, got {other:?}"),
    }
    assert!(before.elapsed() < Duration::from_secs(5));
    assert_eq!(client.state().await, ConnectionState::Disconnected);

    server.shutdown().await;
}

#[tokio::test]
async fn client_can_start_again_after_stop() {
    let server = MockHubServer::start().await;
    let client = HubClient::builder(server.url()).build().unwrap();

    client.start().await.unwrap();
    client.stop().await.unwrap();
    client.start().await.unwrap();
    assert_eq!(client.state().await, ConnectionState::Connected);

    client.stop().await.unwrap();
    server.shutdown().await;
}
