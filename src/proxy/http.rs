//! HTTP front: one inbound request, one replayed or recorded response

use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::{Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::canonical::Protocol;
use crate::network::HttpHandler;
use crate::normalize::{normalize, InboundCall};
use crate::replay::RecordReplay;

/// HTTP proxy over the record-replay engine
pub struct HttpProxy {
    engine: Arc<RecordReplay>,
    max_request_size: usize,
}

impl HttpProxy {
    /// Create a new HTTP proxy
    #[must_use]
    pub fn new(engine: Arc<RecordReplay>, max_request_size: usize) -> Self {
        Self {
            engine,
            max_request_size,
        }
    }

    /// Read and answer one inbound request
    ///
    /// Oversized or unreadable requests are refused; anything else gets the
    /// snapshot response or an empty body with the default status.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();

        if let Err(e) = HttpHandler::validate_request(&parts.headers, self.max_request_size) {
            warn!("Refusing {} {}: {e}", parts.method, parts.uri);
            return HttpHandler::error_response(&e);
        }

        let body = match HttpHandler::read_body(body, self.max_request_size).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Refusing {} {}: {e}", parts.method, parts.uri);
                return HttpHandler::error_response(&e);
            }
        };

        self.handle_call(&InboundCall::from_parts(&parts, body)).await
    }

    /// Answer an already-read inbound call
    pub async fn handle_call(&self, call: &InboundCall) -> Response<Full<Bytes>> {
        let request = match normalize(call, Protocol::Http) {
            Ok(request) => request,
            Err(e) => {
                debug!("Rejected {} {}: {e}", call.method, call.uri);
                return HttpHandler::empty_response(StatusCode::OK);
            }
        };

        match self.engine.handle(Protocol::Http, &request).await.record() {
            Some(record) => HttpHandler::snapshot_response(record),
            None => HttpHandler::empty_response(StatusCode::OK),
        }
    }
}
