//! Protocol-agnostic request value shared by the normalizer, fingerprint and store

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

/// Request headers that survive normalization, in their canonical casing
pub const HEADER_ALLOW_LIST: [&str; 3] = ["Content-Type", "User-Agent", "Authorization"];

/// Method recorded for WebSocket-RPC calls
pub const WS_METHOD: &str = "WS";

/// Transport an inbound call arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Request/response HTTP
    Http,
    /// Message-correlated RPC over a WebSocket
    WebSocketRpc,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::WebSocketRpc => f.write_str("ws-rpc"),
        }
    }
}

/// Canonical form of an inbound call
///
/// Headers are kept in a `BTreeMap`, so iteration order is the sorted key
/// order no matter how the inbound call listed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    /// Target host, including an explicit non-default port
    pub host: String,
    /// Target path without query
    pub pathname: String,
    /// Full absolute target URL
    pub href: String,
    /// Uppercase method, or `WS` for WebSocket-RPC messages
    pub method: String,
    /// Allow-listed headers
    pub headers: BTreeMap<String, String>,
    /// Request body or message payload
    pub body: Bytes,
}

/// Canonical casing of `name` if it is on the allow-list
#[must_use]
pub fn allowed_header(name: &str) -> Option<&'static str> {
    HEADER_ALLOW_LIST
        .iter()
        .find(|allowed| allowed.eq_ignore_ascii_case(name))
        .copied()
}

/// Keep only allow-listed headers; the first occurrence of a name wins
pub fn filter_headers<'a, I>(headers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut filtered = BTreeMap::new();
    for (name, value) in headers {
        if let Some(canonical) = allowed_header(name) {
            filtered
                .entry(canonical.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    filtered
}
