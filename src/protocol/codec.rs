//! JSON codec for hub protocol records.
//!
//! Provides serialization of outgoing records and parsing of incoming
//! payloads. Every outgoing record is a single JSON object followed by the
//! `0x1E` record separator; an incoming transport message may carry several
//! such records back to back.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::protocol::{Message, MessageType, RECORD_SEPARATOR};

/// The literal handshake request, already terminated.
pub const HANDSHAKE_REQUEST: &[u8] = b"{\"protocol\":\"json\",\"version\":1}\x1e";

/// The literal ping record, already terminated.
pub const PING: &[u8] = b"{\"type\": 6}\x1e";

/// Errors that can occur while encoding or parsing protocol records.
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    /// The record was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The record is missing a field the message type requires.
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),

    /// A field was present but carried a value of the wrong JSON type.
    #[error("record field `{0}` has the wrong type")]
    FieldType(&'static str),

    /// The numeric `type` code is not one this implementation knows.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u64),
}

#[derive(Serialize)]
struct InvocationRecord<'a> {
    #[serde(rename = "type")]
    message_type: u8,
    #[serde(rename = "invocationId")]
    invocation_id: &'a str,
    target: &'a str,
    arguments: &'a [Value],
    // Streaming is unused, but the server side tolerates (and some versions
    // expect) the field as a literal empty array.
    #[serde(rename = "streamIds")]
    stream_ids: &'a [Value],
}

#[derive(Serialize)]
struct CloseRecord<'a> {
    #[serde(rename = "type")]
    message_type: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Codec for the JSON hub protocol.
///
/// This struct provides static methods to convert between [`Message`]s and
/// delimited wire bytes.
pub struct JsonCodec;

impl JsonCodec {
    /// Encodes an invocation record.
    ///
    /// Fire-and-forget sends pass an empty `invocation_id`; invocations that
    /// expect a completion pass the ticket id. Field order on the wire is
    /// `type, invocationId, target, arguments, streamIds`.
    pub fn encode_invocation(
        invocation_id: &str,
        target: &str,
        arguments: &[Value],
    ) -> Result<Vec<u8>, ProtocolError> {
        let record = InvocationRecord {
            message_type: MessageType::Invocation as u8,
            invocation_id,
            target,
            arguments,
            stream_ids: &[],
        };
        let mut buf = serde_json::to_vec(&record)?;
        buf.push(RECORD_SEPARATOR);
        Ok(buf)
    }

    /// Encodes a close record, `{"type":7}` or `{"type":7,"error":"<msg>"}`.
    pub fn encode_close(error: Option<&str>) -> Result<Vec<u8>, ProtocolError> {
        let record = CloseRecord {
            message_type: MessageType::Close as u8,
            error,
        };
        let mut buf = serde_json::to_vec(&record)?;
        buf.push(RECORD_SEPARATOR);
        Ok(buf)
    }

    /// Splits a transport payload into individual records.
    ///
    /// The trailing empty fragment produced by the terminating separator is
    /// discarded. A payload whose last byte is not the separator did not come
    /// from a conforming SignalR sender; it is logged and still split
    /// best-effort.
    pub fn split_records(payload: &[u8]) -> Vec<&[u8]> {
        if payload.last() != Some(&RECORD_SEPARATOR) {
            warn!("received non-SignalR message (missing record separator); parsing best-effort");
        }
        payload
            .split(|byte| *byte == RECORD_SEPARATOR)
            .filter(|fragment| !fragment.is_empty())
            .collect()
    }

    /// Parses a single record into a [`Message`].
    ///
    /// Fields are selected by name; unknown extra fields are ignored.
    pub fn parse(record: &[u8]) -> Result<Message, ProtocolError> {
        let value: Value = serde_json::from_slice(record)?;

        let code = value
            .get("type")
            .ok_or(ProtocolError::MissingField("type"))?
            .as_u64()
            .ok_or(ProtocolError::FieldType("type"))?;
        let message_type =
            MessageType::from_code(code).ok_or(ProtocolError::UnknownMessageType(code))?;

        match message_type {
            MessageType::Invocation => Ok(Message::Invocation {
                invocation_id: optional_string(&value, "invocationId")?,
                target: required_string(&value, "target")?,
                arguments: argument_values(&value)?,
            }),
            MessageType::StreamItem => Ok(Message::StreamItem {
                invocation_id: optional_string(&value, "invocationId")?,
            }),
            MessageType::Completion => Ok(Message::Completion {
                invocation_id: required_string(&value, "invocationId")?,
                result: value.get("result").filter(|v| !v.is_null()).cloned(),
                error: optional_string(&value, "error")?,
            }),
            MessageType::StreamInvocation => Ok(Message::StreamInvocation {
                invocation_id: optional_string(&value, "invocationId")?,
            }),
            MessageType::CancelInvocation => Ok(Message::CancelInvocation {
                invocation_id: optional_string(&value, "invocationId")?,
            }),
            MessageType::Ping => Ok(Message::Ping),
            MessageType::Close => Ok(Message::Close {
                error: optional_string(&value, "error")?,
                allow_reconnect: value
                    .get("allowReconnect")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
        }
    }

    /// Interprets the first record after the handshake request was sent.
    ///
    /// Returns the server's `error` field, `None` meaning the handshake
    /// succeeded. Any parseable reply without a non-null `error` (typically
    /// the empty object `{}`) counts as success.
    pub fn parse_handshake_response(record: &[u8]) -> Result<Option<String>, ProtocolError> {
        let value: Value = serde_json::from_slice(record)?;
        Ok(value
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_owned))
    }
}

fn required_string(value: &Value, field: &'static str) -> Result<String, ProtocolError> {
    value
        .get(field)
        .ok_or(ProtocolError::MissingField(field))?
        .as_str()
        .map(str::to_owned)
        .ok_or(ProtocolError::FieldType(field))
}

fn optional_string(value: &Value, field: &'static str) -> Result<Option<String>, ProtocolError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ProtocolError::FieldType(field)),
    }
}

fn argument_values(value: &Value) -> Result<Vec<Value>, ProtocolError> {
    match value.get("arguments") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(ProtocolError::FieldType("arguments")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_invocation_fire_and_forget() {
        let encoded = JsonCodec::encode_invocation("", "Echo", &[json!("hi")]).unwrap();
        assert_eq!(
            encoded,
            b"{\"type\":1,\"invocationId\":\"\",\"target\":\"Echo\",\"arguments\":[\"hi\"],\"streamIds\":[]}\x1e"
        );
    }

    #[test]
    fn encode_invocation_escapes_strings() {
        let encoded =
            JsonCodec::encode_invocation("3", "Say", &[json!("a \"quoted\"\nline")]).unwrap();
        let text = std::str::from_utf8(&encoded[..encoded.len() - 1]).unwrap();
        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["arguments"][0], json!("a \"quoted\"\nline"));
    }

    #[test]
    fn encode_close_forms() {
        assert_eq!(JsonCodec::encode_close(None).unwrap(), b"{\"type\":7}\x1e");
        assert_eq!(
            JsonCodec::encode_close(Some("boom")).unwrap(),
            b"{\"type\":7,\"error\":\"boom\"}\x1e"
        );
    }

    #[test]
    fn ping_constant_is_terminated() {
        assert_eq!(PING.last(), Some(&RECORD_SEPARATOR));
        let parsed = JsonCodec::parse(&PING[..PING.len() - 1]).unwrap();
        assert_eq!(parsed, Message::Ping);
    }

    #[test]
    fn split_multiple_records() {
        let payload = b"{\"type\":6}\x1e{\"type\":6}\x1e";
        let records = JsonCodec::split_records(payload);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], b"{\"type\":6}");
    }

    #[test]
    fn split_discards_trailing_fragment_only() {
        let records = JsonCodec::split_records(b"{\"type\":6}\x1e");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn split_tolerates_missing_terminator() {
        let records = JsonCodec::split_records(b"{\"type\":6}");
        assert_eq!(records.len(), 1);
        assert_eq!(JsonCodec::parse(records[0]).unwrap(), Message::Ping);
    }

    #[test]
    fn parse_invocation() {
        let record = b"{\"type\":1,\"target\":\"NewsUpdate\",\"arguments\":[{\"title\":\"Hello\"},2]}";
        match JsonCodec::parse(record).unwrap() {
            Message::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                assert!(invocation_id.is_none());
                assert_eq!(target, "NewsUpdate");
                assert_eq!(arguments, vec![json!({"title": "Hello"}), json!(2)]);
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn parse_completion_result() {
        let record = b"{\"type\":3,\"invocationId\":\"0\",\"result\":5}";
        match JsonCodec::parse(record).unwrap() {
            Message::Completion {
                invocation_id,
                result,
                error,
            } => {
                assert_eq!(invocation_id, "0");
                assert_eq!(result, Some(json!(5)));
                assert!(error.is_none());
            }
            other => panic!("expected Completion, got {other:?}"),
        }
    }

    #[test]
    fn parse_completion_error() {
        let record = b"{\"type\":3,\"invocationId\":\"0\",\"error\":\"boom\"}";
        match JsonCodec::parse(record).unwrap() {
            Message::Completion { result, error, .. } => {
                assert!(result.is_none());
                assert_eq!(error.as_deref(), Some("boom"));
            }
            other => panic!("expected Completion, got {other:?}"),
        }
    }

    #[test]
    fn parse_close_with_reconnect() {
        let record = b"{\"type\":7,\"allowReconnect\":true,\"error\":\"restart\"}";
        match JsonCodec::parse(record).unwrap() {
            Message::Close {
                error,
                allow_reconnect,
            } => {
                assert_eq!(error.as_deref(), Some("restart"));
                assert!(allow_reconnect);
            }
            other => panic!("expected Close, got {other:?}"),
        }
    }

    #[test]
    fn parse_close_defaults() {
        match JsonCodec::parse(b"{\"type\":7}").unwrap() {
            Message::Close {
                error,
                allow_reconnect,
            } => {
                assert!(error.is_none());
                assert!(!allow_reconnect);
            }
            other => panic!("expected Close, got {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_type() {
        let err = JsonCodec::parse(b"{\"type\":9}").unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(9)));
    }

    #[test]
    fn invocation_round_trip() {
        let arguments = vec![json!(2), json!("two"), json!({"nested": [1, 2]})];
        let encoded = JsonCodec::encode_invocation("7", "Add", &arguments).unwrap();
        let records = JsonCodec::split_records(&encoded);
        assert_eq!(records.len(), 1);
        match JsonCodec::parse(records[0]).unwrap() {
            Message::Invocation {
                invocation_id,
                target,
                arguments: parsed,
            } => {
                assert_eq!(invocation_id.as_deref(), Some("7"));
                assert_eq!(target, "Add");
                assert_eq!(parsed, arguments);
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn handshake_response_empty_object_is_success() {
        assert_eq!(JsonCodec::parse_handshake_response(b"{}").unwrap(), None);
    }

    #[test]
    fn handshake_response_error_is_fatal() {
        let error = JsonCodec::parse_handshake_response(
            b"{\"error\":\"Requested protocol 'json' is not available.\"}",
        )
        .unwrap();
        assert_eq!(
            error.as_deref(),
            Some("Requested protocol 'json' is not available.")
        );
    }

    #[test]
    fn handshake_request_constant() {
        assert_eq!(HANDSHAKE_REQUEST, b"{\"protocol\":\"json\",\"version\":1}\x1e");
    }
}
