//! SignalR protocol messages.
//!
//! This module defines the core [`Message`] enum that represents all message
//! types of the hub protocol (v1) the client can receive, plus the numeric
//! type codes shared with the outgoing encoder.
//!
//! The protocol is transport-agnostic, but this implementation assumes JSON
//! serialization over WebSocket text frames, with each record terminated by
//! the `0x1E` record separator.
//!
//! For details, see the [official specification](https://github.com/dotnet/aspnetcore/blob/main/src/SignalR/docs/specs/HubProtocol.md).

use serde_json::Value;

/// The byte that terminates every record on the wire.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Numeric message type codes of the hub protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

impl MessageType {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::Invocation),
            2 => Some(Self::StreamItem),
            3 => Some(Self::Completion),
            4 => Some(Self::StreamInvocation),
            5 => Some(Self::CancelInvocation),
            6 => Some(Self::Ping),
            7 => Some(Self::Close),
            _ => None,
        }
    }
}

/// A parsed hub protocol message.
///
/// Arguments of an [`Message::Invocation`] are retained as raw
/// [`serde_json::Value`]s so that dispatch can deserialize each one into the
/// parameter type the registered handler declared.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A method call. Server → client calls are dispatched to the handler
    /// table; the `invocation_id` is present only when the caller expects a
    /// completion.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },

    /// Streaming item. Streaming is not supported; logged and ignored.
    StreamItem { invocation_id: Option<String> },

    /// Terminal reply to a client invocation.
    ///
    /// At most one of `result` and `error` is present.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },

    /// Streaming invocation request. Logged and ignored.
    StreamInvocation { invocation_id: Option<String> },

    /// Stream cancellation. Logged and ignored.
    CancelInvocation { invocation_id: Option<String> },

    /// Keep-alive message. Sent by either side, no payload, no reply.
    Ping,

    /// Connection termination notice from the server.
    Close {
        error: Option<String>,
        /// Whether the server permits the client to reconnect.
        allow_reconnect: bool,
    },
}
