//! Record-replay engine: serve a snapshot or record a fresh one

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::canonical::{CanonicalRequest, Protocol};
use crate::config::Config;
use crate::storage::{FsSnapshotStore, SnapshotKey, SnapshotRecord, SnapshotStore};
use crate::upstream::{HttpUpstream, Upstream, WsUpstream};
use crate::RecplayError;

use super::inflight::InFlight;

/// Result of handling one canonical request
#[derive(Debug)]
pub enum Outcome {
    /// Served from an existing snapshot; upstream untouched
    Replayed(SnapshotRecord),
    /// Fetched live and recorded
    Recorded(SnapshotRecord),
    /// No response could be produced
    Failed(RecplayError),
}

impl Outcome {
    /// Record to deliver, if any
    #[must_use]
    pub fn record(&self) -> Option<&SnapshotRecord> {
        match self {
            Self::Replayed(record) | Self::Recorded(record) => Some(record),
            Self::Failed(_) => None,
        }
    }

    /// Take the record to deliver, if any
    #[must_use]
    pub fn into_record(self) -> Option<SnapshotRecord> {
        match self {
            Self::Replayed(record) | Self::Recorded(record) => Some(record),
            Self::Failed(_) => None,
        }
    }
}

/// Engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Requests served from a snapshot
    pub replayed: usize,
    /// Requests fetched live
    pub recorded: usize,
    /// Requests with no response
    pub failed: usize,
    /// Fresh responses that could not be persisted
    pub store_write_failures: usize,
}

/// Record-replay engine
pub struct RecordReplay {
    store: Arc<dyn SnapshotStore>,
    http: Arc<dyn Upstream>,
    ws: Arc<dyn Upstream>,
    in_flight: Option<InFlight>,
    replayed: AtomicUsize,
    recorded: AtomicUsize,
    failed: AtomicUsize,
    store_write_failures: AtomicUsize,
}

impl RecordReplay {
    /// Create an engine over `store` with one upstream adapter per protocol
    ///
    /// With `coalesce_misses`, concurrent misses for one fingerprint fetch
    /// upstream only once.
    #[must_use]
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        http: Arc<dyn Upstream>,
        ws: Arc<dyn Upstream>,
        coalesce_misses: bool,
    ) -> Self {
        Self {
            store,
            http,
            ws,
            in_flight: coalesce_misses.then(InFlight::new),
            replayed: AtomicUsize::new(0),
            recorded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            store_write_failures: AtomicUsize::new(0),
        }
    }

    /// Filesystem store and live adapters as described by `config`
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        info!("Snapshot root: {}", config.snapshot_dir.display());

        Self::new(
            Arc::new(FsSnapshotStore::new(config.snapshot_dir.clone())),
            Arc::new(HttpUpstream::new(config.limits.max_response_size)),
            Arc::new(WsUpstream::new(Duration::from_millis(
                config.upstream.ws_reply_timeout_ms,
            ))),
            config.upstream.coalesce_misses,
        )
    }

    /// Serve `request` from its snapshot or fetch and record it
    pub async fn handle(&self, protocol: Protocol, request: &CanonicalRequest) -> Outcome {
        let key = SnapshotKey::for_request(request);

        if let Some(record) = self.replay(&key).await {
            return Outcome::Replayed(record);
        }

        let _hold = match &self.in_flight {
            Some(in_flight) => {
                let hold = in_flight.acquire(&key.fingerprint).await;
                // Another caller may have recorded it while we waited.
                if let Some(record) = self.replay(&key).await {
                    return Outcome::Replayed(record);
                }
                Some(hold)
            }
            None => None,
        };

        debug!(
            "Snapshot miss: {} {}{} ({}), fetching {protocol}",
            key.method,
            key.host,
            key.pathname,
            short(&key.fingerprint)
        );

        let record = match self.upstream_for(protocol).fetch(request).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Upstream call to {} failed: {e}", request.href);
                self.failed.fetch_add(1, Ordering::Relaxed);
                return Outcome::Failed(e);
            }
        };

        if let Err(e) = self.store.save(&key, &record).await {
            warn!("Failed to persist snapshot for {}: {e}", request.href);
            self.store_write_failures.fetch_add(1, Ordering::Relaxed);
        }

        self.recorded.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Recorded {} {} -> {}",
            key.method, request.href, record.metadata.status
        );
        Outcome::Recorded(record)
    }

    /// Counters since creation
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            replayed: self.replayed.load(Ordering::Relaxed),
            recorded: self.recorded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            store_write_failures: self.store_write_failures.load(Ordering::Relaxed),
        }
    }

    async fn replay(&self, key: &SnapshotKey) -> Option<SnapshotRecord> {
        let record = self.store.load(key).await?;
        self.replayed.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Snapshot hit: {} {}{} ({}) -> {}",
            key.method,
            key.host,
            key.pathname,
            short(&key.fingerprint),
            record.metadata.status
        );
        Some(record)
    }

    fn upstream_for(&self, protocol: Protocol) -> &dyn Upstream {
        match protocol {
            Protocol::Http => self.http.as_ref(),
            Protocol::WebSocketRpc => self.ws.as_ref(),
        }
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..16).unwrap_or(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::UpstreamResponse;
    use crate::Result;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct CountingUpstream {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingUpstream {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for CountingUpstream {
        async fn fetch(&self, request: &CanonicalRequest) -> Result<SnapshotRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RecplayError::UpstreamFailure("refused".to_string()));
            }
            Ok(SnapshotRecord::from_response(
                request,
                UpstreamResponse {
                    status: 201,
                    status_text: "Created".to_string(),
                    headers: vec![("content-type".to_string(), "application/json".to_string())],
                    body: Bytes::from_static(b"{\"ok\":true}"),
                },
            ))
        }
    }

    fn request() -> CanonicalRequest {
        CanonicalRequest {
            host: "api.example.com".to_string(),
            pathname: "/v1/users".to_string(),
            href: "http://api.example.com/v1/users".to_string(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    fn engine(
        root: &std::path::Path,
        http: Arc<CountingUpstream>,
        ws: Arc<CountingUpstream>,
    ) -> RecordReplay {
        RecordReplay::new(Arc::new(FsSnapshotStore::new(root)), http, ws, true)
    }

    #[tokio::test]
    async fn test_miss_records_then_hit_replays() {
        let temp_dir = TempDir::new().unwrap();
        let http = CountingUpstream::new(false);
        let ws = CountingUpstream::new(false);
        let engine = engine(temp_dir.path(), Arc::clone(&http), Arc::clone(&ws));

        let first = engine.handle(Protocol::Http, &request()).await;
        assert!(matches!(first, Outcome::Recorded(_)));

        let second = engine.handle(Protocol::Http, &request()).await;
        assert!(matches!(second, Outcome::Replayed(_)));

        assert_eq!(http.calls(), 1);
        assert_eq!(ws.calls(), 0);
        assert_eq!(
            first.into_record().unwrap().payload,
            second.into_record().unwrap().payload
        );
        assert_eq!(
            engine.stats(),
            EngineStats {
                replayed: 1,
                recorded: 1,
                failed: 0,
                store_write_failures: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_protocol_selects_adapter() {
        let temp_dir = TempDir::new().unwrap();
        let http = CountingUpstream::new(false);
        let ws = CountingUpstream::new(false);
        let engine = engine(temp_dir.path(), Arc::clone(&http), Arc::clone(&ws));

        let mut ws_request = request();
        ws_request.method = crate::canonical::WS_METHOD.to_string();
        engine.handle(Protocol::WebSocketRpc, &ws_request).await;

        assert_eq!(http.calls(), 0);
        assert_eq!(ws.calls(), 1);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_failed_and_not_saved() {
        let temp_dir = TempDir::new().unwrap();
        let http = CountingUpstream::new(true);
        let ws = CountingUpstream::new(false);
        let engine = engine(temp_dir.path(), Arc::clone(&http), ws);

        let outcome = engine.handle(Protocol::Http, &request()).await;
        assert!(matches!(outcome, Outcome::Failed(RecplayError::UpstreamFailure(_))));

        // Nothing was stored, so the next call goes upstream again.
        engine.handle(Protocol::Http, &request()).await;
        assert_eq!(http.calls(), 2);
        assert_eq!(engine.stats().failed, 2);
    }

    #[tokio::test]
    async fn test_store_write_failure_still_returns_record() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let http = CountingUpstream::new(false);
        let ws = CountingUpstream::new(false);
        let engine = engine(&blocker, Arc::clone(&http), ws);

        let outcome = engine.handle(Protocol::Http, &request()).await;
        assert_eq!(outcome.record().map(|r| r.metadata.status), Some(201));
        assert_eq!(engine.stats().store_write_failures, 1);
        assert_eq!(engine.stats().recorded, 1);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_refetched() {
        let temp_dir = TempDir::new().unwrap();
        let http = CountingUpstream::new(false);
        let ws = CountingUpstream::new(false);
        let engine = engine(temp_dir.path(), Arc::clone(&http), ws);

        engine.handle(Protocol::Http, &request()).await;

        let store = FsSnapshotStore::new(temp_dir.path());
        let paths = store.locate(&SnapshotKey::for_request(&request()));
        std::fs::write(&paths.metadata, b"{\"status\":").unwrap();

        let outcome = engine.handle(Protocol::Http, &request()).await;
        assert!(matches!(outcome, Outcome::Recorded(_)));
        assert_eq!(http.calls(), 2);
    }

    #[test]
    fn test_short_fingerprint() {
        assert_eq!(short(&"a".repeat(64)), "a".repeat(16));
        assert_eq!(short("abc"), "abc");
    }
}
