//! Connection management.
//!
//! This module handles the WebSocket connection lifecycle:
//! - Establishing the transport and performing the protocol handshake,
//! - Reading and dispatching inbound records,
//! - Keep-alive, server-timeout watchdog and the reconnect schedule,
//! - Graceful shutdown.

mod events;
mod handlers;
mod liveness;
pub(crate) mod manager;
pub mod registry;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::error::SignalRError;
use crate::protocol::{JsonCodec, Message, HANDSHAKE_REQUEST};

pub use handlers::InvocationArguments;

/// The state of a hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection is active.
    Disconnected,
    /// Connection and handshake are in progress.
    Connecting,
    /// Connection lost, running the reconnect schedule.
    Reconnecting,
    /// Connection is active.
    Connected,
}

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
pub(crate) type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// An established transport session (write half).
///
/// Produced by [`Connection::establish`] once the handshake has completed;
/// the read half goes to the manager's reader task.
pub(crate) struct Connection {
    writer: WsWriter,
}

impl Connection {
    /// Opens the transport, sends the handshake and waits for the reply.
    ///
    /// Records that arrived in the same transport message as the handshake
    /// reply are returned so the caller can route them through normal
    /// dispatch. The wait is bounded by the configured handshake timeout.
    pub(crate) async fn establish(
        config: &HubConfig,
    ) -> Result<(Self, WsReader, Vec<Message>), SignalRError> {
        info!(url = %config.url, "connecting to SignalR hub");
        let request = config.client_request()?;
        let connector = config.tls_connector()?;
        let (mut ws_stream, _) =
            connect_async_tls_with_config(request, None, false, connector).await?;

        ws_stream
            .send(WsMessage::Text(
                String::from_utf8_lossy(HANDSHAKE_REQUEST).into_owned(),
            ))
            .await?;
        debug!("handshake sent");

        let watchdog = tokio::time::sleep(config.handshake_timeout);
        tokio::pin!(watchdog);

        let leftover = loop {
            tokio::select! {
                message = ws_stream.next() => match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        let records = JsonCodec::split_records(text.as_bytes());
                        let Some((reply, rest)) = records.split_first() else {
                            continue;
                        };
                        if let Some(error) = JsonCodec::parse_handshake_response(reply)? {
                            return Err(SignalRError::HandshakeFailed(error));
                        }
                        info!("handshake completed");
                        break rest
                            .iter()
                            .filter_map(|record| match JsonCodec::parse(record) {
                                Ok(message) => Some(message),
                                Err(e) => {
                                    warn!(error = %e, "failed to parse record after handshake reply");
                                    None
                                }
                            })
                            .collect();
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        warn!("ignoring binary frame during handshake");
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        return Err(SignalRError::HandshakeFailed(format!(
                            "connection closed: {reason}"
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(SignalRError::WebSocket(e)),
                    None => {
                        return Err(SignalRError::HandshakeFailed(
                            "connection closed".to_string(),
                        ))
                    }
                },
                _ = &mut watchdog => return Err(SignalRError::HandshakeTimeout),
            }
        };

        let (writer, reader) = ws_stream.split();
        Ok((Self { writer }, reader, leftover))
    }

    /// Sends one already-delimited record as a text frame.
    pub(crate) async fn send_record(&mut self, record: Vec<u8>) -> Result<(), SignalRError> {
        let text = String::from_utf8_lossy(&record).into_owned();
        self.writer.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    /// Closes the write half of the transport.
    pub(crate) async fn close(&mut self) {
        if let Err(e) = self.writer.close().await {
            debug!(error = %e, "error closing transport");
        }
    }
}
