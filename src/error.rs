//! Error types for recplay

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for recplay operations
pub type Result<T> = std::result::Result<T, RecplayError>;

/// Errors that can occur in recplay
///
/// A snapshot miss is not an error: lookups return `Option` and unreadable
/// snapshots collapse into a miss before they reach this type.
#[derive(Debug, Error)]
pub enum RecplayError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No absolute upstream URL could be derived from the inbound call
    #[error("Unresolvable target: {0}")]
    UnresolvableTarget(String),

    /// The live upstream call failed at the transport or protocol level
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    /// A freshly fetched snapshot could not be persisted
    #[error("Failed to write snapshot {path}: {source}")]
    StoreWriteFailure {
        /// Artifact that could not be written
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Request/response too large
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// Inbound request could not be read
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
