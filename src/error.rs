use thiserror::Error;

/// Errors that can occur in the SignalR client.
#[derive(Error, Debug)]
pub enum SignalRError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Not connected")]
    NotConnected,

    /// The server completed an invocation with an error string.
    #[error("Server returned error: {0}")]
    Server(String),

    #[error("Invocation timed out")]
    InvocationTimeout,

    #[error("Connection closed")]
    ConnectionClosed,
}
