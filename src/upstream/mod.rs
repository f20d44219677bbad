//! Live upstream calls made when no snapshot exists

mod http;
mod websocket;

use async_trait::async_trait;

use crate::canonical::CanonicalRequest;
use crate::storage::SnapshotRecord;
use crate::Result;

pub use http::HttpUpstream;
pub use websocket::WsUpstream;

/// Make ring the process-wide TLS provider unless one is already installed
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Adapter performing the real call for one protocol
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Perform the live call for `request`
    ///
    /// # Errors
    ///
    /// Returns `UpstreamFailure` if the call fails or yields no reply
    async fn fetch(&self, request: &CanonicalRequest) -> Result<SnapshotRecord>;
}
