//! WebSocket-RPC front: each inbound message is one record-replay exchange

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT, UPGRADE};
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::canonical::Protocol;
use crate::network::websocket::{
    content_type_of, data_message, is_text_content, message_payload, upgrade_accept_key,
};
use crate::network::{ConnectionGuard, ConnectionPool, HttpHandler};
use crate::normalize::{normalize, resolve_ws_target, InboundCall};
use crate::replay::{Outcome, RecordReplay};
use crate::rpc;

/// Reply frames queued per session before exchanges wait on the writer
const OUTBOUND_QUEUE: usize = 64;

/// WebSocket proxy over the record-replay engine
pub struct WebSocketProxy {
    engine: Arc<RecordReplay>,
    sessions: ConnectionPool,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketProxy {
    /// Create a new WebSocket proxy
    ///
    /// Open sessions are tracked in `sessions` and closed when `shutdown_tx`
    /// fires.
    #[must_use]
    pub fn new(
        engine: Arc<RecordReplay>,
        sessions: ConnectionPool,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            engine,
            sessions,
            shutdown_tx,
        }
    }

    /// Answer an upgrade request and start the session in the background
    ///
    /// The target must be given as `?url=`; without one the upgrade is
    /// refused with 400.
    pub fn upgrade<B>(&self, mut request: Request<B>) -> Response<Full<Bytes>> {
        let Some(accept_key) = upgrade_accept_key(request.headers()) else {
            return HttpHandler::empty_response(StatusCode::BAD_REQUEST);
        };

        let uri = request.uri().to_string();
        if let Err(e) = resolve_ws_target(&uri) {
            warn!("Refusing WebSocket upgrade for {uri}: {e}");
            return HttpHandler::error_response(&e);
        }

        let Some(guard) = self.sessions.try_acquire() else {
            warn!("Session limit reached, refusing WebSocket upgrade for {uri}");
            return HttpHandler::empty_response(StatusCode::SERVICE_UNAVAILABLE);
        };

        let Ok(accept) = HeaderValue::from_str(&accept_key) else {
            return HttpHandler::empty_response(StatusCode::BAD_REQUEST);
        };

        let template = InboundCall {
            method: request.method().as_str().to_string(),
            uri,
            headers: request
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
            body: Bytes::new(),
        };

        let on_upgrade = hyper::upgrade::on(&mut request);
        let session = Session {
            engine: Arc::clone(&self.engine),
            template,
            shutdown_rx: self.shutdown_tx.subscribe(),
            _guard: guard,
        };
        tokio::spawn(session.run(on_upgrade));

        let mut response = HttpHandler::empty_response(StatusCode::SWITCHING_PROTOCOLS);
        let headers = response.headers_mut();
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
        response
    }
}

/// One upgraded client connection
struct Session {
    engine: Arc<RecordReplay>,
    template: InboundCall,
    shutdown_rx: broadcast::Receiver<()>,
    _guard: ConnectionGuard,
}

impl Session {
    async fn run(mut self, on_upgrade: OnUpgrade) {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!("WebSocket upgrade failed: {e}");
                return;
            }
        };

        let socket =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = message.is_close();
                if let Err(e) = sink.send(message).await {
                    debug!("WebSocket send failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        info!("WebSocket session opened for {}", self.template.uri);

        let mut exchanges = JoinSet::new();
        let mut shutting_down = false;
        loop {
            tokio::select! {
                frame = stream.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => {
                            debug!("WebSocket receive failed: {e}");
                            break;
                        }
                        None => break,
                    };
                    if message.is_close() {
                        break;
                    }
                    let Some(call) = message_call(&self.template, message) else {
                        continue;
                    };

                    let engine = Arc::clone(&self.engine);
                    let tx = tx.clone();
                    exchanges.spawn(async move {
                        let reply = exchange(&engine, &call).await;
                        let _ = tx.send(reply).await;
                    });
                }
                Some(result) = exchanges.join_next(), if !exchanges.is_empty() => {
                    if let Err(e) = result {
                        debug!("WebSocket exchange task failed: {e}");
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    debug!("Closing WebSocket session for {}", self.template.uri);
                    shutting_down = true;
                    break;
                }
            }
        }

        // The session guard stays held until every in-flight exchange has saved.
        if !exchanges.is_empty() {
            debug!(
                "Waiting for {} in-flight exchanges on {}",
                exchanges.len(),
                self.template.uri
            );
        }
        while let Some(result) = exchanges.join_next().await {
            if let Err(e) = result {
                debug!("WebSocket exchange task failed: {e}");
            }
        }

        if shutting_down {
            let _ = tx.send(Message::Close(None)).await;
        }
        drop(tx);
        if let Err(e) = writer.await {
            debug!("WebSocket writer task failed: {e}");
        }
        info!("WebSocket session closed for {}", self.template.uri);
    }
}

/// Inbound call for one data frame
///
/// The frame kind travels as `Content-Type`, so text and binary frames with
/// the same bytes are distinct calls and reach the upstream unchanged.
fn message_call(template: &InboundCall, message: Message) -> Option<InboundCall> {
    let content_type = content_type_of(&message);
    let payload = message_payload(message)?;

    let mut call = template.clone();
    call.headers
        .retain(|(name, _)| !name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
    call.headers
        .push((CONTENT_TYPE.as_str().to_string(), content_type.to_string()));
    call.body = payload;
    Some(call)
}

/// Produce the reply frame for one inbound message
async fn exchange(engine: &RecordReplay, call: &InboundCall) -> Message {
    let message = rpc::split_message(&call.body);

    let request = match normalize(call, Protocol::WebSocketRpc) {
        Ok(request) => request,
        Err(e) => {
            return Message::Text(text_of(rpc::error_reply(
                message.id.as_ref(),
                message.is_json,
                &e.to_string(),
            )));
        }
    };

    match engine.handle(Protocol::WebSocketRpc, &request).await {
        Outcome::Replayed(record) | Outcome::Recorded(record) => {
            let reply = rpc::restore_id(&record.payload, message.id.as_ref());
            data_message(reply, is_text_content(record.metadata.content_type()))
        }
        Outcome::Failed(e) => Message::Text(text_of(rpc::error_reply(
            message.id.as_ref(),
            message.is_json,
            &e.to_string(),
        ))),
    }
}

fn text_of(reply: Bytes) -> String {
    String::from_utf8_lossy(&reply).into_owned()
}
