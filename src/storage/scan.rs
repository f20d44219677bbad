//! Offline inspection of a snapshot directory

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::fs::{with_suffix, DATA_SUFFIX, METADATA_SUFFIX};
use crate::Result;

/// Aggregate view of a snapshot directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotSummary {
    /// Snapshots with both artifacts present
    pub snapshots: usize,
    /// Total size of their payloads
    pub payload_bytes: u64,
    /// Snapshot count per upstream host
    pub per_host: BTreeMap<String, usize>,
    /// Artifacts whose sibling is missing
    pub orphans: Vec<PathBuf>,
}

/// Walk `root` and summarize the snapshots found
///
/// # Errors
///
/// Returns error if a directory cannot be read
pub fn scan(root: &Path) -> Result<SnapshotSummary> {
    let mut metadata = BTreeSet::new();
    let mut payloads = BTreeMap::new();
    collect(root, &mut metadata, &mut payloads)?;

    let mut summary = SnapshotSummary::default();

    for base in &metadata {
        match payloads.get(base) {
            Some(size) => {
                summary.snapshots += 1;
                summary.payload_bytes += size;
                let host = base
                    .strip_prefix(root)
                    .ok()
                    .and_then(|relative| relative.components().next())
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .unwrap_or_default();
                *summary.per_host.entry(host).or_default() += 1;
            }
            None => summary.orphans.push(with_suffix(base, METADATA_SUFFIX)),
        }
    }

    for base in payloads.keys() {
        if !metadata.contains(base) {
            summary.orphans.push(with_suffix(base, DATA_SUFFIX));
        }
    }
    summary.orphans.sort();

    Ok(summary)
}

fn collect(
    dir: &Path,
    metadata: &mut BTreeSet<PathBuf>,
    payloads: &mut BTreeMap<PathBuf, u64>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect(&path, metadata, payloads)?;
            continue;
        }

        match path.extension().and_then(|s| s.to_str()) {
            Some(METADATA_SUFFIX) => {
                metadata.insert(path.with_extension(""));
            }
            Some(DATA_SUFFIX) => {
                let size = entry.metadata()?.len();
                payloads.insert(path.with_extension(""), size);
            }
            _ => {}
        }
    }
    Ok(())
}
