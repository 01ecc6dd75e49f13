//! Rust client for ASP.NET Core SignalR.
//!
//! This crate implements version 1 of the SignalR hub protocol with JSON
//! payloads over a WebSocket transport: handshake, client and server
//! invocations, keep-alive/watchdog liveness and a bounded reconnect
//! schedule when the server permits it.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use signalr_client::HubClient;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), signalr_client::SignalRError> {
//! let client = HubClient::builder("http://localhost:5000/chathub")
//!     .with_automatic_reconnect()
//!     .build()?;
//!
//! client.on("ReceiveMessage", |(user, text): (String, String)| {
//!     println!("{user}: {text}");
//! }).await;
//!
//! client.start().await?;
//! client.send("Broadcast", vec![json!("hello")]).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;

pub use client::{HubClient, HubClientBuilder};
pub use config::{InvokeTimeout, SslProtocol};
pub use connection::registry::InvocationHandle;
pub use connection::{ConnectionState, InvocationArguments};
pub use error::SignalRError;
