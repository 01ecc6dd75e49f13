//! Connection configuration.
//!
//! [`HubConfig`] carries everything a connection attempt needs: the
//! normalized endpoint URL, custom headers, the TLS options forwarded to the
//! transport, the reconnect flag and the three liveness durations. It is
//! built once by [`HubClientBuilder`](crate::client::HubClientBuilder) and
//! shared read-only for the lifetime of the client.

use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::Connector;
use url::Url;

use crate::error::SignalRError;

/// Default inbound silence tolerated before the server is declared dead.
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(30);
/// Default period between outbound keep-alive pings.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
/// Default time the client waits for the handshake reply.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Minimum TLS protocol version forwarded to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslProtocol {
    Tlsv10,
    Tlsv11,
    Tlsv12,
}

impl From<SslProtocol> for native_tls::Protocol {
    fn from(protocol: SslProtocol) -> Self {
        match protocol {
            SslProtocol::Tlsv10 => native_tls::Protocol::Tlsv10,
            SslProtocol::Tlsv11 => native_tls::Protocol::Tlsv11,
            SslProtocol::Tlsv12 => native_tls::Protocol::Tlsv12,
        }
    }
}

/// How long an invocation waits for its completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvokeTimeout {
    /// Wait up to the configured server timeout (the default).
    #[default]
    ServerTimeout,
    /// Wait forever.
    Infinite,
    /// Wait up to the given duration.
    After(Duration),
}

impl InvokeTimeout {
    pub(crate) fn resolve(self, server_timeout: Duration) -> Option<Duration> {
        match self {
            InvokeTimeout::ServerTimeout => Some(server_timeout),
            InvokeTimeout::Infinite => None,
            InvokeTimeout::After(limit) => Some(limit),
        }
    }
}

/// Resolved connection options.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub(crate) url: Url,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) reconnect: bool,
    pub(crate) ca_certificate_pem: Option<Vec<u8>>,
    pub(crate) accept_invalid_certs: bool,
    pub(crate) min_tls_protocol: Option<SslProtocol>,
    pub(crate) server_timeout: Duration,
    pub(crate) keep_alive_interval: Duration,
    pub(crate) handshake_timeout: Duration,
}

impl HubConfig {
    /// Parses and normalizes the endpoint URL.
    ///
    /// `http://` becomes `ws://` and `https://` becomes `wss://`; other
    /// schemes pass through unchanged. The `url` crate lowercases the scheme
    /// during parsing, so detection is case-insensitive.
    pub(crate) fn parse_url(raw: &str) -> Result<Url, SignalRError> {
        let mut url = Url::parse(raw)?;
        match url.scheme() {
            "http" => {
                let _ = url.set_scheme("ws");
            }
            "https" => {
                let _ = url.set_scheme("wss");
            }
            _ => {}
        }
        Ok(url)
    }

    /// Builds the WebSocket client request with the custom headers applied.
    pub(crate) fn client_request(&self) -> Result<Request, SignalRError> {
        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(http::Error::from)?;
            let value = HeaderValue::from_str(value).map_err(http::Error::from)?;
            headers.insert(name, value);
        }
        Ok(request)
    }

    /// Builds the TLS connector for `wss://` endpoints, `None` otherwise.
    pub(crate) fn tls_connector(&self) -> Result<Option<Connector>, SignalRError> {
        if self.url.scheme() != "wss" {
            return Ok(None);
        }
        let mut builder = native_tls::TlsConnector::builder();
        if self.accept_invalid_certs {
            builder.danger_accept_invalid_certs(true);
        }
        if let Some(pem) = &self.ca_certificate_pem {
            builder.add_root_certificate(native_tls::Certificate::from_pem(pem)?);
        }
        if let Some(protocol) = self.min_tls_protocol {
            builder.min_protocol_version(Some(protocol.into()));
        }
        Ok(Some(Connector::NativeTls(builder.build()?)))
    }
}
