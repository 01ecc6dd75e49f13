//! Helpers for building invocation argument values.
//!
//! Plain arguments (numbers, strings, booleans, serde-derived structs) go
//! through [`serde_json::json!`] or [`serde_json::to_value`] directly. The
//! helpers here cover the two encodings the hub protocol expects that serde
//! would not produce on its own: byte buffers travel as base64 strings, and
//! timestamps as ISO-8601 round-trip strings.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, TimeZone};
use serde_json::Value;

/// Encodes a byte buffer as a base64 string argument.
pub fn binary(bytes: &[u8]) -> Value {
    Value::String(STANDARD.encode(bytes))
}

/// Encodes a timestamp as an ISO-8601 extended (round-trip) string argument.
pub fn timestamp<Tz: TimeZone>(value: &DateTime<Tz>) -> Value
where
    Tz::Offset: std::fmt::Display,
{
    Value::String(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}
