//! Main network handler

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::proxy::Proxy;
use crate::replay::{EngineStats, RecordReplay};
use crate::{RecplayError, Result};

use super::connection_pool::ConnectionPool;
use super::SHUTDOWN_TIMEOUT_MS;

/// Accepts connections and serves them until shutdown
pub struct NetworkHandler {
    config: Arc<Config>,
    engine: Arc<RecordReplay>,
    connection_pool: ConnectionPool,
    session_pool: ConnectionPool,
    shutdown_tx: broadcast::Sender<()>,
}

impl NetworkHandler {
    /// Create a handler with the engine described by `config`
    #[must_use]
    pub fn new(config: Config) -> Self {
        let engine = Arc::new(RecordReplay::from_config(&config));
        Self::with_engine(config, engine)
    }

    /// Create a handler over an existing engine
    #[must_use]
    pub fn with_engine(config: Config, engine: Arc<RecordReplay>) -> Self {
        let max_connections = config.limits.max_connections;
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config: Arc::new(config),
            engine,
            connection_pool: ConnectionPool::new(max_connections),
            session_pool: ConnectionPool::new(max_connections),
            shutdown_tx,
        }
    }

    /// Sender that stops the handler when fired
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Engine shared by all connections
    #[must_use]
    pub fn engine(&self) -> Arc<RecordReplay> {
        Arc::clone(&self.engine)
    }

    /// Bind the configured address
    ///
    /// # Errors
    ///
    /// Returns error if the host cannot be resolved or the address cannot be bound
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.server.socket_addr().await?;
        TcpListener::bind(addr).await.map_err(|e| {
            RecplayError::ConfigError(format!("Failed to bind {addr}: {e}"))
        })
    }

    /// Bind and serve until SIGINT or a shutdown signal
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound
    pub async fn run(self) -> Result<EngineStats> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until SIGINT or a shutdown signal
    ///
    /// # Errors
    ///
    /// Returns error if the listener address cannot be read
    pub async fn serve(self, listener: TcpListener) -> Result<EngineStats> {
        let addr = listener.local_addr()?;
        info!("Listening on {addr}");

        let proxy = Arc::new(Proxy::new(
            Arc::clone(&self.engine),
            &self.config.limits,
            self.session_pool.clone(),
            self.shutdown_tx.clone(),
        ));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.accept(stream, peer_addr, &proxy),
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        drop(listener);
        self.shutdown_tx.send(()).ok();

        let shutdown_timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let drained = tokio::join!(
            self.connection_pool.drain(shutdown_timeout),
            self.session_pool.drain(shutdown_timeout),
        );
        if drained != (true, true) {
            warn!(
                "Shutdown timeout: {} connections and {} WebSocket sessions still open",
                self.connection_pool.active_connections(),
                self.session_pool.active_connections()
            );
        }

        let stats = self.engine.stats();
        info!(
            "Shutdown complete: {} replayed, {} recorded, {} failed, {} store write failures",
            stats.replayed, stats.recorded, stats.failed, stats.store_write_failures
        );
        Ok(stats)
    }

    fn accept(&self, stream: TcpStream, peer_addr: SocketAddr, proxy: &Arc<Proxy>) {
        let Some(guard) = self.connection_pool.try_acquire() else {
            warn!("Connection limit reached, rejecting {}", peer_addr);
            drop(stream);
            return;
        };

        let proxy = Arc::clone(proxy);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _guard = guard;

            let service = service_fn(move |request| {
                let proxy = Arc::clone(&proxy);
                async move { Ok::<_, Infallible>(proxy.handle(request).await) }
            });

            let connection = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades();
            tokio::pin!(connection);

            let result = tokio::select! {
                result = connection.as_mut() => result,
                _ = shutdown_rx.recv() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };

            if let Err(e) = result {
                debug!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }
}
