//! Protocol fronts over the record-replay engine

mod http;
mod websocket;

use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::{Request, Response};
use tokio::sync::broadcast;

use crate::config::LimitsConfig;
use crate::network::websocket::upgrade_accept_key;
use crate::network::ConnectionPool;
use crate::replay::RecordReplay;

pub use http::HttpProxy;
pub use websocket::WebSocketProxy;

/// Routes each inbound request to the HTTP or WebSocket front
pub struct Proxy {
    http: HttpProxy,
    websocket: WebSocketProxy,
}

impl Proxy {
    /// Create both fronts over one engine
    #[must_use]
    pub fn new(
        engine: Arc<RecordReplay>,
        limits: &LimitsConfig,
        sessions: ConnectionPool,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            http: HttpProxy::new(Arc::clone(&engine), limits.max_request_size),
            websocket: WebSocketProxy::new(engine, sessions, shutdown_tx),
        }
    }

    /// Answer one inbound request
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if upgrade_accept_key(request.headers()).is_some() {
            self.websocket.upgrade(request)
        } else {
            self.http.handle(request).await
        }
    }
}
