//! Public client surface.
//!
//! [`HubClient`] is a cheaply cloneable handle over the connection manager;
//! all clones share the same connection, handler table and pending
//! invocations. [`HubClientBuilder`] collects the connection options before
//! the first `start`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{
    HubConfig, InvokeTimeout, SslProtocol, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_SERVER_TIMEOUT,
};
use crate::connection::manager::ConnectionManager;
use crate::connection::registry::InvocationHandle;
use crate::connection::{ConnectionState, InvocationArguments};
use crate::error::SignalRError;

/// Client for a SignalR hub speaking the JSON protocol over WebSocket.
///
/// # Example
///
/// ```no_run
/// use signalr_client::HubClient;
/// use serde_json::json;
///
/// # async fn example() -> Result<(), signalr_client::SignalRError> {
/// let client = HubClient::builder("http://localhost:5000/chathub").build()?;
///
/// client.on("ReceiveMessage", |(user, text): (String, String)| {
///     println!("{user}: {text}");
/// }).await;
///
/// client.start().await?;
///
/// let sum: i32 = client.invoke("Add", vec![json!(2), json!(3)]).await?;
/// assert_eq!(sum, 5);
///
/// client.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HubClient {
    manager: ConnectionManager,
}

impl HubClient {
    /// Starts building a client for the given hub URL.
    ///
    /// `http://` and `https://` URLs are rewritten to `ws://`/`wss://`.
    pub fn builder(url: impl Into<String>) -> HubClientBuilder {
        HubClientBuilder::new(url)
    }

    /// Connects to the hub and performs the protocol handshake.
    ///
    /// Blocks the caller until the handshake completes or fails; the
    /// handshake watchdog bounds the wait. A call while the client is not
    /// disconnected is logged and ignored.
    pub async fn start(&self) -> Result<(), SignalRError> {
        self.manager.start().await
    }

    /// Gracefully closes the connection: sends `{"type":7}` and tears the
    /// session down. A no-op when already disconnected; never reconnects.
    pub async fn stop(&self) -> Result<(), SignalRError> {
        self.manager.stop(None).await
    }

    /// Like [`stop`](Self::stop), but the close record carries an error
    /// message and the `Closed` event reports it.
    pub async fn stop_with_error(&self, error: impl Into<String>) -> Result<(), SignalRError> {
        self.manager.stop(Some(error.into())).await
    }

    /// Fire-and-forget invocation. No completion is requested and no ticket
    /// is created.
    pub async fn send(&self, target: &str, arguments: Vec<Value>) -> Result<(), SignalRError> {
        self.manager.send(target, arguments).await
    }

    /// Invokes a hub method and waits for its result, bounded by the
    /// configured server timeout.
    pub async fn invoke<R: DeserializeOwned>(
        &self,
        target: &str,
        arguments: Vec<Value>,
    ) -> Result<R, SignalRError> {
        self.manager.invoke(target, arguments).await
    }

    /// Invokes a hub method and returns a detached [`InvocationHandle`].
    ///
    /// The handle can be awaited later or from another task; its timeout is
    /// resolved from `timeout` when the handle is created.
    pub async fn invoke_detached(
        &self,
        target: &str,
        arguments: Vec<Value>,
        timeout: InvokeTimeout,
    ) -> Result<InvocationHandle, SignalRError> {
        self.manager.invoke_detached(target, arguments, timeout).await
    }

    /// Registers a handler for a server-to-client method.
    ///
    /// The parameter types are declared through the closure's argument tuple;
    /// incoming arguments are deserialized into them one by one, and an
    /// invocation whose argument count differs is dropped. At most one
    /// handler per method: a duplicate registration is logged and dropped,
    /// the first stays. Registration is allowed before or after `start`.
    pub async fn on<A, F>(&self, target: &str, handler: F)
    where
        A: InvocationArguments + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        self.manager.on(target, handler).await;
    }

    /// Sets the callback fired when the connection ends.
    ///
    /// The payload is `None` for an intentional clean close, otherwise the
    /// close reason.
    pub async fn on_closed<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        self.manager.on_closed(callback).await;
    }

    /// Sets the callback fired once when the client enters the reconnect
    /// schedule, carrying the error that triggered it.
    pub async fn on_reconnecting<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        self.manager.on_reconnecting(callback).await;
    }

    /// Sets the callback fired when a reconnect attempt restores the
    /// connection.
    pub async fn on_reconnected<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        self.manager.on_reconnected(callback).await;
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        self.manager.state().await
    }

    /// Number of invocations still awaiting their completion.
    pub async fn pending_invocations(&self) -> usize {
        self.manager.pending_invocations().await
    }
}

/// Fluent configuration for a [`HubClient`].
pub struct HubClientBuilder {
    url: String,
    headers: Vec<(String, String)>,
    reconnect: bool,
    ca_certificate_pem: Option<Vec<u8>>,
    accept_invalid_certs: bool,
    min_tls_protocol: Option<SslProtocol>,
    server_timeout: Duration,
    keep_alive_interval: Duration,
    handshake_timeout: Duration,
}

impl HubClientBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            reconnect: false,
            ca_certificate_pem: None,
            accept_invalid_certs: false,
            min_tls_protocol: None,
            server_timeout: DEFAULT_SERVER_TIMEOUT,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Adds a header sent with the WebSocket connect request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Enables the reconnect schedule for server closes that permit it.
    pub fn with_automatic_reconnect(mut self) -> Self {
        self.reconnect = true;
        self
    }

    /// Trusts an additional root certificate (PEM) for `wss://` endpoints.
    pub fn with_ca_certificate(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_certificate_pem = Some(pem.into());
        self
    }

    /// Disables server certificate verification. For test setups only.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Sets the minimum TLS protocol version offered to the server.
    pub fn with_min_tls_protocol(mut self, protocol: SslProtocol) -> Self {
        self.min_tls_protocol = Some(protocol);
        self
    }

    /// Inbound silence tolerated before the server is declared dead.
    /// Default 30 seconds.
    pub fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = timeout;
        self
    }

    /// Period between outbound keep-alive pings. Default 15 seconds.
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Time the client waits for the handshake reply. Default 15 seconds.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Validates the URL and builds the client. The connection is not
    /// established until [`HubClient::start`] is called.
    pub fn build(self) -> Result<HubClient, SignalRError> {
        let url = HubConfig::parse_url(&self.url)?;
        let config = HubConfig {
            url,
            headers: self.headers,
            reconnect: self.reconnect,
            ca_certificate_pem: self.ca_certificate_pem,
            accept_invalid_certs: self.accept_invalid_certs,
            min_tls_protocol: self.min_tls_protocol,
            server_timeout: self.server_timeout,
            keep_alive_interval: self.keep_alive_interval,
            handshake_timeout: self.handshake_timeout,
        };
        Ok(HubClient {
            manager: ConnectionManager::new(config),
        })
    }
}
