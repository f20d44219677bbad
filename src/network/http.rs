//! HTTP response construction and request body limits

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Response, StatusCode};

use crate::storage::SnapshotRecord;
use crate::{RecplayError, Result};

/// Maximum number of inbound request headers
pub const MAX_HEADERS: usize = 128;

/// Helpers shared by the HTTP front
pub struct HttpHandler;

impl HttpHandler {
    /// Response with a status and body
    #[must_use]
    pub fn create_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    /// Response with an empty body
    #[must_use]
    pub fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
        Self::create_response(status, Bytes::new())
    }

    /// Response replaying a snapshot: stored status, payload and `Content-Type` only
    ///
    /// A stored status outside the valid range falls back to 200.
    #[must_use]
    pub fn snapshot_response(record: &SnapshotRecord) -> Response<Full<Bytes>> {
        let status = StatusCode::from_u16(record.metadata.status).unwrap_or(StatusCode::OK);
        let mut response = Self::create_response(status, record.payload.clone());

        if let Some(content_type) = record
            .metadata
            .content_type()
            .and_then(|ct| HeaderValue::from_str(ct).ok())
        {
            response.headers_mut().insert(CONTENT_TYPE, content_type);
        }

        response
    }

    /// Response for a request that could not be read
    #[must_use]
    pub fn error_response(error: &RecplayError) -> Response<Full<Bytes>> {
        let status = match error {
            RecplayError::DataTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RecplayError::InvalidRequest(_) | RecplayError::UnresolvableTarget(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self::create_response(status, format!("Error: {error}"))
    }

    /// Check declared size and header count before reading a request
    ///
    /// # Errors
    ///
    /// Returns `DataTooLarge` if `Content-Length` exceeds `max_size`, or
    /// `InvalidRequest` if there are too many headers
    pub fn validate_request(headers: &HeaderMap, max_size: usize) -> Result<()> {
        if let Some(length) = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if length > max_size {
                return Err(RecplayError::DataTooLarge {
                    size: length,
                    limit: max_size,
                });
            }
        }

        let header_count = headers.len();
        if header_count > MAX_HEADERS {
            return Err(RecplayError::InvalidRequest(format!(
                "Too many headers: {header_count}"
            )));
        }

        Ok(())
    }

    /// Read a request body, refusing anything larger than `max_size`
    ///
    /// # Errors
    ///
    /// Returns `DataTooLarge` if the body exceeds the limit, or
    /// `InvalidRequest` if reading fails
    pub async fn read_body<B>(body: B, max_size: usize) -> Result<Bytes>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let collected = Limited::new(body, max_size).collect().await.map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                RecplayError::DataTooLarge {
                    size: max_size.saturating_add(1),
                    limit: max_size,
                }
            } else {
                RecplayError::InvalidRequest(format!("Failed to read body: {e}"))
            }
        })?;

        Ok(collected.to_bytes())
    }
}
