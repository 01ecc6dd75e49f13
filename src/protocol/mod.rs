//! SignalR hub protocol implementation.
//!
//! This module provides types and codecs for version 1 of the hub protocol
//! with JSON payloads, framed by the `0x1E` record separator.

pub mod arguments;
mod codec;
mod message;

pub use codec::{JsonCodec, ProtocolError, HANDSHAKE_REQUEST, PING};
pub use message::{Message, MessageType, RECORD_SEPARATOR};
