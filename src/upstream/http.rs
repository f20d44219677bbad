//! HTTP client for forwarding requests to the real origin

use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use super::Upstream;
use crate::canonical::CanonicalRequest;
use crate::storage::{SnapshotRecord, UpstreamResponse};
use crate::{RecplayError, Result};

/// HTTP(S) upstream adapter
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    max_response_size: usize,
}

impl HttpUpstream {
    /// Create a new HTTP client
    #[must_use]
    pub fn new(max_response_size: usize) -> Self {
        super::install_crypto_provider();

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build(connector);

        Self {
            client,
            max_response_size,
        }
    }

    /// Forward a request to its origin and collect the raw response
    ///
    /// # Errors
    ///
    /// Returns `UpstreamFailure` if the request fails or the response exceeds
    /// the size limit
    pub async fn forward_request(&self, request: &CanonicalRequest) -> Result<UpstreamResponse> {
        let uri = request
            .href
            .parse::<Uri>()
            .map_err(|e| RecplayError::UpstreamFailure(format!("Invalid URI '{}': {e}", request.href)))?;

        let method = request.method.parse::<Method>().map_err(|e| {
            RecplayError::UpstreamFailure(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        debug!("Forwarding {} to {}", method, uri);

        let mut request_builder = Request::builder().method(method).uri(uri);
        for (name, value) in &request.headers {
            request_builder = request_builder.header(name, value);
        }

        let http_request = request_builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| RecplayError::UpstreamFailure(format!("Failed to build request: {e}")))?;

        let response = self.client.request(http_request).await.map_err(|e| {
            warn!("Request to {} failed: {e}", request.href);
            RecplayError::UpstreamFailure(format!("Request failed: {e}"))
        })?;

        let status = response.status();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();

        let body = Limited::new(response.into_body(), self.max_response_size)
            .collect()
            .await
            .map_err(|e| {
                RecplayError::UpstreamFailure(format!("Failed to read response body: {e}"))
            })?
            .to_bytes();

        Ok(UpstreamResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: &CanonicalRequest) -> Result<SnapshotRecord> {
        let response = self.forward_request(request).await?;
        Ok(SnapshotRecord::from_response(request, response))
    }
}
