//! Request normalization
//!
//! Turns a protocol-specific inbound call into a [`CanonicalRequest`]. HTTP
//! calls resolve their upstream target through a fallback chain; WebSocket-RPC
//! calls carry it explicitly as a connection parameter.

mod http;
mod websocket;

use bytes::Bytes;
use url::Url;

use crate::canonical::{filter_headers, CanonicalRequest, Protocol, WS_METHOD};
use crate::rpc;
use crate::Result;

pub use http::resolve_http_target;
pub use websocket::{resolve_ws_target, TARGET_PARAM};

/// Raw inbound call as delivered by the transport
#[derive(Debug, Clone, Default)]
pub struct InboundCall {
    /// Request method (ignored for WebSocket-RPC messages)
    pub method: String,
    /// Request target as received: origin-form or absolute-form
    pub uri: String,
    /// Request headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Request body or message payload
    pub body: Bytes,
}

impl InboundCall {
    /// First value of a header, matched case-insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Build from hyper request parts and a collected body
    #[must_use]
    pub fn from_parts(parts: &hyper::http::request::Parts, body: Bytes) -> Self {
        let headers = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            method: parts.method.as_str().to_string(),
            uri: parts.uri.to_string(),
            headers,
            body,
        }
    }
}

/// Normalize an inbound call into its canonical request
///
/// # Errors
///
/// Returns `UnresolvableTarget` if no absolute upstream URL can be derived
pub fn normalize(call: &InboundCall, protocol: Protocol) -> Result<CanonicalRequest> {
    match protocol {
        Protocol::Http => {
            let target = resolve_http_target(call)?;
            Ok(build(&target, call.method.to_uppercase(), call, call.body.clone()))
        }
        Protocol::WebSocketRpc => {
            let target = resolve_ws_target(&call.uri)?;
            let message = rpc::split_message(&call.body);
            Ok(build(&target, WS_METHOD.to_string(), call, message.canonical))
        }
    }
}

fn build(target: &Url, method: String, call: &InboundCall, body: Bytes) -> CanonicalRequest {
    CanonicalRequest {
        host: host_of(target),
        pathname: target.path().to_string(),
        href: target.as_str().to_string(),
        method,
        headers: filter_headers(call.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))),
        body,
    }
}

/// Host with an explicit port appended when it is not the scheme default
fn host_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
