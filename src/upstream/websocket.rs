//! WebSocket RPC upstream: one private connection per call

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::Upstream;
use crate::canonical::CanonicalRequest;
use crate::network::websocket::{content_type_of, data_message, message_payload, wants_text_frame};
use crate::rpc::{self, UPSTREAM_CALL_ID};
use crate::storage::{SnapshotRecord, UpstreamResponse};
use crate::{RecplayError, Result};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Canonical header carrying the frame kind of a message; not sent on the handshake
const FRAME_KIND_HEADER: &str = "Content-Type";

/// WebSocket RPC upstream adapter
///
/// Every call opens its own connection, sends one message and waits for the
/// frame that answers it, so replies can never cross between callers. The
/// request's `Content-Type` selects a text or binary frame.
#[derive(Debug, Clone)]
pub struct WsUpstream {
    reply_timeout: Duration,
}

impl WsUpstream {
    /// Create an adapter that waits at most `reply_timeout` for each reply
    #[must_use]
    pub fn new(reply_timeout: Duration) -> Self {
        super::install_crypto_provider();
        Self { reply_timeout }
    }

    async fn connect(&self, request: &CanonicalRequest) -> Result<UpstreamSocket> {
        let mut client_request = request.href.as_str().into_client_request().map_err(|e| {
            RecplayError::UpstreamFailure(format!("Invalid WebSocket URL '{}': {e}", request.href))
        })?;

        for (name, value) in &request.headers {
            if name == FRAME_KIND_HEADER {
                continue;
            }
            if let Ok(value) = HeaderValue::from_str(value) {
                if let Ok(name) = name.parse::<HeaderName>() {
                    client_request.headers_mut().insert(name, value);
                }
            }
        }

        connect_async(client_request)
            .await
            .map(|(socket, _)| socket)
            .map_err(|e| {
                warn!("WebSocket connect to {} failed: {e}", request.href);
                RecplayError::UpstreamFailure(format!("WebSocket connect failed: {e}"))
            })
    }

    async fn exchange(
        socket: &mut UpstreamSocket,
        message: Message,
        expected_id: Option<&Value>,
    ) -> Result<UpstreamResponse> {
        socket
            .send(message)
            .await
            .map_err(|e| RecplayError::UpstreamFailure(format!("WebSocket send failed: {e}")))?;

        while let Some(frame) = socket.next().await {
            let frame = frame.map_err(|e| {
                RecplayError::UpstreamFailure(format!("WebSocket receive failed: {e}"))
            })?;

            if frame.is_close() {
                break;
            }

            let content_type = content_type_of(&frame);
            let Some(body) = message_payload(frame) else {
                continue;
            };

            if rpc::is_reply_to(&body, expected_id) {
                return Ok(UpstreamResponse {
                    status: 200,
                    status_text: "OK".to_string(),
                    headers: vec![("content-type".to_string(), content_type.to_string())],
                    body,
                });
            }
            debug!("Skipping unrelated upstream frame ({} bytes)", body.len());
        }

        Err(RecplayError::UpstreamFailure(
            "WebSocket closed before a reply arrived".to_string(),
        ))
    }
}

#[async_trait]
impl Upstream for WsUpstream {
    async fn fetch(&self, request: &CanonicalRequest) -> Result<SnapshotRecord> {
        let mut socket = self.connect(request).await?;

        let message = rpc::split_message(&request.body);
        let call_id = json!(UPSTREAM_CALL_ID);
        let (payload, expected_id) = if message.is_json {
            (rpc::with_id(&message.canonical, &call_id), Some(&call_id))
        } else {
            (request.body.clone(), None)
        };

        let as_text =
            wants_text_frame(request.headers.get(FRAME_KIND_HEADER).map(String::as_str));
        let reply = tokio::time::timeout(
            self.reply_timeout,
            Self::exchange(&mut socket, data_message(payload, as_text), expected_id),
        )
        .await
        .map_err(|_| {
            warn!("No WebSocket reply from {} within {:?}", request.href, self.reply_timeout);
            RecplayError::UpstreamFailure(format!(
                "no reply within {} ms",
                self.reply_timeout.as_millis()
            ))
        })?;

        if let Err(e) = socket.close(None).await {
            debug!("WebSocket close to {} failed: {e}", request.href);
        }

        Ok(SnapshotRecord::from_response(request, reply?))
    }
}
