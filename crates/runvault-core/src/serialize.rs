// ABOUTME: Serialization policy: storage format selection and storage-safe payload rewriting.
// ABOUTME: Pure functions only; the actual encoding happens at the storage boundary.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::snapshot::SerializationFormat;

/// Payloads whose encoded size exceeds this many bytes are stored compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Pick the storage format for a payload from its estimated encoded size.
pub fn choose_format(payload: &Value) -> SerializationFormat {
    let estimated = match serde_json::to_vec(payload) {
        Ok(bytes) => bytes.len(),
        Err(_) => usize::MAX,
    };
    if estimated > COMPRESSION_THRESHOLD {
        SerializationFormat::CompressedJson
    } else {
        SerializationFormat::Json
    }
}

/// Rewrite a payload into its storage-safe form: every timestamp string, at
/// any nesting depth, becomes the canonical RFC 3339 form in UTC so equality
/// and ordering are stable across save/load cycles. All other values pass
/// through unchanged. Applying this twice yields the same result as once.
pub fn to_storage_safe(value: Value) -> Value {
    match value {
        Value::String(s) => match DateTime::parse_from_rfc3339(&s) {
            Ok(ts) => Value::String(ts.with_timezone(&Utc).to_rfc3339()),
            Err(_) => Value::String(s),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(to_storage_safe).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, to_storage_safe(item)))
                .collect(),
        ),
        other => other,
    }
}
