//! JSON-RPC correlation ids on WebSocket messages
//!
//! A message that parses as a JSON object carries its correlation token in the
//! top-level `id` member. The token differs per call, so it is stripped before
//! fingerprinting and restored on the reply.
//!
//! serde_json is built with `arbitrary_precision`, so numbers keep their
//! original text through parse and re-serialization.

use bytes::Bytes;
use serde_json::{json, Map, Value};

/// Correlation id used on the private upstream connection of a single call
pub const UPSTREAM_CALL_ID: u64 = 1;

/// JSON-RPC "server error" code reported when no reply can be produced
pub const UPSTREAM_ERROR_CODE: i64 = -32000;

/// A WebSocket message split into its fingerprint scope and correlation id
#[derive(Debug, Clone, PartialEq)]
pub struct RpcMessage {
    /// Message without `id`, keys sorted; the raw bytes for non-JSON messages
    pub canonical: Bytes,
    /// Client-chosen `id`, if the message was a JSON object carrying one
    pub id: Option<Value>,
    /// Whether `canonical` is a JSON object
    pub is_json: bool,
}

/// Split a client message into its canonical body and correlation id
#[must_use]
pub fn split_message(payload: &[u8]) -> RpcMessage {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(mut object)) => {
            let id = object.remove("id");
            match serde_json::to_vec(&sort_keys(Value::Object(object))) {
                Ok(canonical) => RpcMessage {
                    canonical: Bytes::from(canonical),
                    id,
                    is_json: true,
                },
                Err(_) => raw_message(payload),
            }
        }
        _ => raw_message(payload),
    }
}

/// Rebuild objects with their keys in sorted order, recursively
///
/// `Map` keeps insertion order once any crate in the build enables serde_json's
/// `preserve_order`, so the order is fixed here rather than left to `Map`.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(String, Value)> = object.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sort_keys(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

fn raw_message(payload: &[u8]) -> RpcMessage {
    RpcMessage {
        canonical: Bytes::copy_from_slice(payload),
        id: None,
        is_json: false,
    }
}

/// Set the top-level `id` of a JSON object payload
///
/// Payloads that are not JSON objects are returned unchanged.
#[must_use]
pub fn with_id(payload: &[u8], id: &Value) -> Bytes {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(mut object)) => {
            object.insert("id".to_string(), id.clone());
            serde_json::to_vec(&Value::Object(object))
                .map_or_else(|_| Bytes::copy_from_slice(payload), Bytes::from)
        }
        _ => Bytes::copy_from_slice(payload),
    }
}

/// Restore the client's `id` on a stored or fetched reply
///
/// The reply is left untouched when the client sent no id or the reply has no
/// `id` member of its own.
#[must_use]
pub fn restore_id(reply: &Bytes, client_id: Option<&Value>) -> Bytes {
    let Some(id) = client_id else {
        return reply.clone();
    };
    match serde_json::from_slice::<Map<String, Value>>(reply) {
        Ok(object) if object.contains_key("id") => with_id(reply, id),
        _ => reply.clone(),
    }
}

/// Whether `reply` answers the upstream call `expected_id`
///
/// Without an expected id any frame is the reply.
#[must_use]
pub fn is_reply_to(reply: &[u8], expected_id: Option<&Value>) -> bool {
    let Some(expected) = expected_id else {
        return true;
    };
    serde_json::from_slice::<Map<String, Value>>(reply)
        .map(|object| object.get("id") == Some(expected))
        .unwrap_or(false)
}

/// Error reply sent to a WebSocket client when no response could be produced
#[must_use]
pub fn error_reply(client_id: Option<&Value>, is_json: bool, message: &str) -> Bytes {
    if is_json {
        let reply = json!({
            "jsonrpc": "2.0",
            "id": client_id.cloned().unwrap_or(Value::Null),
            "error": {
                "code": UPSTREAM_ERROR_CODE,
                "message": message,
            },
        });
        Bytes::from(reply.to_string())
    } else {
        Bytes::from(format!("recplay error: {message}"))
    }
}
