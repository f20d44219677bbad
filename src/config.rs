//! Configuration types for recplay

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::{RecplayError, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the snapshot store
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    /// Log at debug level unless `RUST_LOG` says otherwise
    #[serde(default)]
    pub verbose: bool,
    /// Listening socket
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream adapter behavior
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

/// Listening socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Resolve the socket address to bind
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the host does not resolve to any address
    pub async fn socket_addr(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                RecplayError::ConfigError(format!("Cannot resolve server.host '{}': {e}", self.host))
            })?
            .next()
            .ok_or_else(|| {
                RecplayError::ConfigError(format!(
                    "server.host '{}' resolves to no address",
                    self.host
                ))
            })
    }
}

/// Upstream adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// How long a WebSocket-RPC call waits for its correlated reply
    #[serde(default = "default_ws_reply_timeout_ms")]
    pub ws_reply_timeout_ms: u64,
    /// Allow at most one concurrent upstream fetch per fingerprint
    #[serde(default = "default_true")]
    pub coalesce_misses: bool,
}

fn default_ws_reply_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            ws_reply_timeout_ms: default_ws_reply_timeout_ms(),
            coalesce_misses: true,
        }
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum request size in bytes
    pub max_request_size: usize,
    /// Maximum response size in bytes
    pub max_response_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 4096,
            max_request_size: 16 * 1024 * 1024,   // 16 MB
            max_response_size: 256 * 1024 * 1024, // 256 MB
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_dir: default_snapshot_dir(),
            verbose: false,
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RecplayError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| RecplayError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_dir.as_os_str().is_empty() {
            return Err(RecplayError::ConfigError(
                "snapshot_dir cannot be empty".to_string(),
            ));
        }

        if self.server.host.trim().is_empty() {
            return Err(RecplayError::ConfigError(
                "server.host cannot be empty".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(RecplayError::ConfigError(
                "server.port cannot be 0".to_string(),
            ));
        }

        if self.upstream.ws_reply_timeout_ms == 0 {
            return Err(RecplayError::ConfigError(
                "upstream.ws_reply_timeout_ms must be > 0".to_string(),
            ));
        }

        let limits = [
            ("max_connections", self.limits.max_connections),
            ("max_request_size", self.limits.max_request_size),
            ("max_response_size", self.limits.max_response_size),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(RecplayError::ConfigError(format!(
                    "limits.{name} must be > 0"
                )));
            }
        }

        Ok(())
    }
}
