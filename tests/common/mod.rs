//! Common test utilities for integration tests.
//!
//! Provides a scripted mock hub server: it accepts WebSocket connections,
//! answers the protocol handshake according to the configured behavior,
//! records every non-handshake frame the client sends, and pushes arbitrary
//! frames back to connected clients.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// The record separator, for building frames in tests.
pub const RS: char = '\u{1e}';

/// Appends the record separator to a JSON body.
pub fn frame(body: &str) -> String {
    format!("{body}{RS}")
}

/// How the mock server answers the protocol handshake.
pub enum HandshakeBehavior {
    /// Reply with the empty object (success).
    Succeed,
    /// Reply with a handshake error.
    Fail(String),
    /// Never reply, to exercise the handshake watchdog.
    Ignore,
}

/// Mock hub server for client testing.
pub struct MockHubServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    message_rx: mpsc::Receiver<String>,
    outbound_tx: broadcast::Sender<String>,
}

impl MockHubServer {
    /// Starts a server that completes every handshake.
    pub async fn start() -> Self {
        Self::with_handshake(HandshakeBehavior::Succeed).await
    }

    pub async fn with_handshake(behavior: HandshakeBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (message_tx, message_rx) = mpsc::channel::<String>(100);
        let (outbound_tx, _) = broadcast::channel::<String>(100);

        let accept_outbound = outbound_tx.clone();
        let behavior = Arc::new(behavior);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        tokio::spawn(serve_connection(
                            stream,
                            message_tx.clone(),
                            accept_outbound.subscribe(),
                            Arc::clone(&behavior),
                        ));
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            message_rx,
            outbound_tx,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Queues a frame for delivery to every connected client.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.outbound_tx.send(frame.into());
    }

    /// Next frame received from a client, handshake requests excluded.
    ///
    /// Returns `None` when nothing arrives within five seconds.
    pub async fn recv_frame(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Closes the listener so further connection attempts are refused.
    /// Connections already established keep running.
    pub async fn stop_accepting(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn serve_connection(
    stream: TcpStream,
    message_tx: mpsc::Sender<String>,
    mut outbound_rx: broadcast::Receiver<String>,
    behavior: Arc<HandshakeBehavior>,
) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if text.starts_with("{\"protocol\"") {
                        let reply = match &*behavior {
                            HandshakeBehavior::Succeed => frame("{}"),
                            HandshakeBehavior::Fail(error) => {
                                frame(&format!("{{\"error\":\"{error}\"}}"))
                            }
                            HandshakeBehavior::Ignore => continue,
                        };
                        if write.send(Message::Text(reply)).await.is_err() {
                            return;
                        }
                    } else {
                        let _ = message_tx.send(text).await;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {}
                Some(Err(_)) => return,
            },
            outbound = outbound_rx.recv() => match outbound {
                Ok(frame) => {
                    if write.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}
