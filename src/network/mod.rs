//! Network layer
//!
//! Accepts inbound connections with bounded concurrency and graceful
//! shutdown, and holds the HTTP and WebSocket wire helpers.

mod connection_pool;
mod handler;
mod http;
pub mod websocket;

pub use connection_pool::{ConnectionGuard, ConnectionPool};
pub use handler::NetworkHandler;
pub use http::{HttpHandler, MAX_HEADERS};

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
