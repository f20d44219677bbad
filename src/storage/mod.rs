//! Snapshot storage
//!
//! A snapshot is a metadata document plus the raw response payload, addressed
//! by the fingerprint of the request that produced it.

mod fs;
mod scan;

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalRequest;
use crate::fingerprint::fingerprint;
use crate::Result;

pub use fs::{FsSnapshotStore, SnapshotPaths, DATA_SUFFIX, METADATA_SUFFIX};
pub use scan::{scan, SnapshotSummary};

/// Persistent key→snapshot mapping
///
/// Implementations must be binary-safe and must never surface read failures:
/// anything unreadable is a miss.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the snapshot for `key`, or `None` on a miss
    async fn load(&self, key: &SnapshotKey) -> Option<SnapshotRecord>;

    /// Persist `record` under `key`, replacing any previous snapshot
    ///
    /// # Errors
    ///
    /// Returns `StoreWriteFailure` if the snapshot cannot be written
    async fn save(&self, key: &SnapshotKey, record: &SnapshotRecord) -> Result<()>;
}

/// Address of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    /// Target host
    pub host: String,
    /// Target path
    pub pathname: String,
    /// Request method
    pub method: String,
    /// Fingerprint of the canonical request
    pub fingerprint: String,
}

impl SnapshotKey {
    /// Derive the key of a canonical request
    #[must_use]
    pub fn for_request(request: &CanonicalRequest) -> Self {
        Self {
            host: request.host.clone(),
            pathname: request.pathname.clone(),
            method: request.method.clone(),
            fingerprint: fingerprint(request),
        }
    }
}

/// Response information stored next to the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Response status code
    pub status: u16,
    /// Reason phrase
    #[serde(default)]
    pub status_text: String,
    /// Response headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Upstream URL the response came from
    #[serde(default)]
    pub url: String,
    /// Request method
    #[serde(default)]
    pub method: String,
    /// Recording time, milliseconds since the Unix epoch
    #[serde(default)]
    pub recorded_at: u64,
    /// Payload length in bytes
    pub payload_len: u64,
    /// CRC32 of the payload
    pub payload_crc32: u32,
}

impl SnapshotMetadata {
    /// Header value, matched case-insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Content type of the payload, if recorded
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Whether `payload` is the one this metadata was written for
    #[must_use]
    pub fn matches_payload(&self, payload: &[u8]) -> bool {
        self.payload_len == payload.len() as u64 && self.payload_crc32 == crc32fast::hash(payload)
    }
}

/// Upstream response as observed on the wire
#[derive(Debug, Clone, Default)]
pub struct UpstreamResponse {
    /// Status code
    pub status: u16,
    /// Reason phrase
    pub status_text: String,
    /// Response headers; repeated names are joined with `, `
    pub headers: Vec<(String, String)>,
    /// Raw body
    pub body: Bytes,
}

/// Metadata and payload of one recorded response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    /// Response information
    pub metadata: SnapshotMetadata,
    /// Raw response bytes
    pub payload: Bytes,
}

impl SnapshotRecord {
    /// Wrap a fresh upstream response for the request that produced it
    #[must_use]
    pub fn from_response(request: &CanonicalRequest, response: UpstreamResponse) -> Self {
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers {
            headers
                .entry(name)
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert_with(|| value.clone());
        }

        let metadata = SnapshotMetadata {
            status: response.status,
            status_text: response.status_text,
            headers,
            url: request.href.clone(),
            method: request.method.clone(),
            recorded_at: now_millis(),
            payload_len: response.body.len() as u64,
            payload_crc32: crc32fast::hash(&response.body),
        };

        Self {
            metadata,
            payload: response.body,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
