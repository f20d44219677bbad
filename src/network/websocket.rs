//! WebSocket frame helpers shared by the proxy and the upstream adapter

use bytes::Bytes;
use hyper::header::{HeaderMap, CONNECTION, SEC_WEBSOCKET_KEY, UPGRADE};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::Message;

/// Content type recorded for text frames
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Content type recorded for binary frames
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Payload of a data frame; control frames yield `None`
#[must_use]
pub fn message_payload(msg: Message) -> Option<Bytes> {
    match msg {
        Message::Text(text) => Some(Bytes::from(text)),
        Message::Binary(data) => Some(Bytes::from(data)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}

/// Content type describing how a frame was received
#[must_use]
pub fn content_type_of(msg: &Message) -> &'static str {
    if matches!(msg, Message::Text(_)) {
        TEXT_CONTENT_TYPE
    } else {
        BINARY_CONTENT_TYPE
    }
}

/// Build a frame for `payload`
///
/// Text is used when `as_text` is requested and the payload is valid UTF-8.
#[must_use]
pub fn data_message(payload: Bytes, as_text: bool) -> Message {
    if as_text {
        match String::from_utf8(payload.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        }
    } else {
        Message::Binary(payload.to_vec())
    }
}

/// Whether a stored content type describes text
#[must_use]
pub fn is_text_content(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/"))
}

/// Whether a request with this `Content-Type` goes out as a text frame
///
/// Requests without one are sent as text.
#[must_use]
pub fn wants_text_frame(content_type: Option<&str>) -> bool {
    content_type.map_or(true, |ct| is_text_content(Some(ct)))
}

/// `Sec-WebSocket-Accept` value for an upgrade request, if it is one
#[must_use]
pub fn upgrade_accept_key(headers: &HeaderMap) -> Option<String> {
    let upgrade = headers.get(UPGRADE)?.to_str().ok()?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return None;
    }

    let connection = headers.get(CONNECTION)?.to_str().ok()?;
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return None;
    }

    let key = headers.get(SEC_WEBSOCKET_KEY)?;
    Some(derive_accept_key(key.as_bytes()))
}
