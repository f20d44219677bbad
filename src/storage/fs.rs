//! Filesystem-backed snapshot store

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{SnapshotKey, SnapshotMetadata, SnapshotRecord, SnapshotStore};
use crate::{RecplayError, Result};

/// Suffix of the metadata artifact
pub const METADATA_SUFFIX: &str = "json";

/// Suffix of the payload artifact
pub const DATA_SUFFIX: &str = "data";

/// Paths of the two artifacts of one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    /// `{base}.json`
    pub metadata: PathBuf,
    /// `{base}.data`
    pub payload: PathBuf,
}

/// Snapshot store laid out as `{root}/{host}{pathname}.{method}.{fingerprint}.{json,data}`
///
/// No locking: concurrent writers of one key race and the last write wins.
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    root: PathBuf,
}

impl FsSnapshotStore {
    /// Create a store rooted at `root`; the directory is created on first save
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifact paths for `key`
    ///
    /// A pathname ending in `/` gets `index` appended so directories and
    /// files never collide.
    #[must_use]
    pub fn locate(&self, key: &SnapshotKey) -> SnapshotPaths {
        let mut pathname = key.pathname.clone();
        if pathname.is_empty() || pathname.ends_with('/') {
            if !pathname.ends_with('/') {
                pathname.push('/');
            }
            pathname.push_str("index");
        }

        let relative = format!(
            "{}{}.{}.{}",
            key.host, pathname, key.method, key.fingerprint
        );
        let base = self.root.join(sanitize(&relative));

        SnapshotPaths {
            metadata: with_suffix(&base, METADATA_SUFFIX),
            payload: with_suffix(&base, DATA_SUFFIX),
        }
    }
}

/// Drop empty, `.` and `..` segments so a key can never leave the root
fn sanitize(relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect()
}

pub(super) fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(".");
    path.push(suffix);
    PathBuf::from(path)
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn load(&self, key: &SnapshotKey) -> Option<SnapshotRecord> {
        let paths = self.locate(key);

        let raw_metadata = match tokio::fs::read(&paths.metadata).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Snapshot miss: {} ({e})", paths.metadata.display());
                return None;
            }
        };

        let metadata: SnapshotMetadata = match serde_json::from_slice(&raw_metadata) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(
                    "Unreadable snapshot metadata {}: {e}",
                    paths.metadata.display()
                );
                return None;
            }
        };

        let payload = match tokio::fs::read(&paths.payload).await {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Missing snapshot payload {}: {e}", paths.payload.display());
                return None;
            }
        };

        if !metadata.matches_payload(&payload) {
            debug!(
                "Snapshot payload {} does not match its metadata",
                paths.payload.display()
            );
            return None;
        }

        Some(SnapshotRecord {
            metadata,
            payload: Bytes::from(payload),
        })
    }

    async fn save(&self, key: &SnapshotKey, record: &SnapshotRecord) -> Result<()> {
        let paths = self.locate(key);

        if let Some(parent) = paths.metadata.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| RecplayError::StoreWriteFailure {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let metadata = serde_json::to_vec_pretty(&record.metadata).map_err(|e| {
            RecplayError::StoreWriteFailure {
                path: paths.metadata.clone(),
                source: e.into(),
            }
        })?;

        tokio::fs::write(&paths.metadata, metadata)
            .await
            .map_err(|source| RecplayError::StoreWriteFailure {
                path: paths.metadata.clone(),
                source,
            })?;

        tokio::fs::write(&paths.payload, &record.payload)
            .await
            .map_err(|source| RecplayError::StoreWriteFailure {
                path: paths.payload.clone(),
                source,
            })?;

        debug!("Saved snapshot {}", paths.metadata.display());
        Ok(())
    }
}
