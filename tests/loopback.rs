//! End-to-end tests through the listening proxy against loopback origins

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async};

use recplay::config::Config;
use recplay::network::NetworkHandler;
use recplay::replay::EngineStats;

/// HTTP origin answering `201 {method} {path}` and counting hits
async fn http_origin(hits: Arc<AtomicUsize>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let hits = Arc::clone(&hits);
            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        let body = format!("{} {}", request.method(), request.uri().path());
                        let response = Response::builder()
                            .status(StatusCode::CREATED)
                            .header("content-type", "text/plain")
                            .header("x-origin", "loopback")
                            .body(Full::new(Bytes::from(body)))
                            .unwrap();
                        Ok::<_, Infallible>(response)
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// JSON-RPC origin answering every request with its own id after `delay`,
/// counting calls
async fn ws_origin(hits: Arc<AtomicUsize>, delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let hits = Arc::clone(&hits);
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(Message::Text(text))) = ws.next().await {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    let request: Value = serde_json::from_str(&text).unwrap();
                    let reply = json!({
                        "jsonrpc": "2.0",
                        "id": request["id"],
                        "result": request["method"],
                    });
                    if ws.send(Message::Text(reply.to_string())).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

/// Origin answering binary frames with their bytes reversed, counting calls
async fn binary_origin(hits: Arc<AtomicUsize>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let hits = Arc::clone(&hits);
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    let Message::Binary(mut data) = message else {
                        continue;
                    };
                    hits.fetch_add(1, Ordering::SeqCst);
                    data.reverse();
                    if ws.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

struct RunningProxy {
    addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<recplay::Result<EngineStats>>,
}

async fn start_proxy(snapshot_dir: &std::path::Path) -> RunningProxy {
    let config = Config {
        snapshot_dir: snapshot_dir.to_path_buf(),
        ..Default::default()
    };
    let handler = NetworkHandler::new(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = handler.shutdown_handle();
    let handle = tokio::spawn(handler.serve(listener));

    RunningProxy {
        addr,
        shutdown,
        handle,
    }
}

impl RunningProxy {
    async fn stop(self) -> EngineStats {
        self.shutdown.send(()).ok();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }
}

async fn get(proxy: SocketAddr, target: &str) -> Response<Incoming> {
    let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let uri = format!(
        "http://{proxy}/?url={}",
        urlencoding::encode(target)
    );
    client
        .request(
            Request::builder()
                .uri(uri)
                .body(Full::new(Bytes::new()))
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_http_record_then_replay_through_listener() {
    let temp_dir = TempDir::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let origin = http_origin(Arc::clone(&hits)).await;
    let proxy = start_proxy(temp_dir.path()).await;
    let target = format!("http://{origin}/v1/users");

    let first = get(proxy.addr, &target).await;
    assert_eq!(first.status(), StatusCode::CREATED);
    assert_eq!(first.headers()["content-type"], "text/plain");
    assert!(first.headers().get("x-origin").is_none());
    let first_body = first.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(first_body, Bytes::from_static(b"GET /v1/users"));

    let second = get(proxy.addr, &target).await;
    assert_eq!(second.status(), StatusCode::CREATED);
    let second_body = second.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(second_body, first_body);

    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let stats = proxy.stop().await;
    assert_eq!(stats.recorded, 1);
    assert_eq!(stats.replayed, 1);
}

#[tokio::test]
async fn test_http_unreachable_upstream_is_empty_body() {
    let temp_dir = TempDir::new().unwrap();
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);

    let proxy = start_proxy(temp_dir.path()).await;
    let response = get(proxy.addr, &format!("http://127.0.0.1:{port}/gone")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());

    let stats = proxy.stop().await;
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_ws_rpc_record_then_replay_restores_ids() {
    let temp_dir = TempDir::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let origin = ws_origin(Arc::clone(&hits), Duration::ZERO).await;
    let proxy = start_proxy(temp_dir.path()).await;

    let target = format!("ws://{origin}/rpc");
    let url = format!("ws://{}/?url={}", proxy.addr, urlencoding::encode(&target));
    let (mut client, _) = connect_async(url).await.unwrap();

    for id in [11, 12] {
        let message = json!({"jsonrpc": "2.0", "id": id, "method": "eth_chainId"});
        client
            .send(Message::Text(message.to_string()))
            .await
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Text(text) = reply else {
            panic!("expected a text reply, got {reply:?}");
        };
        let reply: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(reply["id"], json!(id));
        assert_eq!(reply["result"], json!("eth_chainId"));
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1);

    client.close(None).await.ok();
    let stats = proxy.stop().await;
    assert_eq!(stats.recorded, 1);
    assert_eq!(stats.replayed, 1);
}

#[tokio::test]
async fn test_ws_upgrade_without_target_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    let proxy = start_proxy(temp_dir.path()).await;

    let result = connect_async(format!("ws://{}/no-target", proxy.addr)).await;
    assert!(result.is_err());

    proxy.stop().await;
}

#[tokio::test]
async fn test_ws_binary_reply_replays_as_binary() {
    let temp_dir = TempDir::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let origin = binary_origin(Arc::clone(&hits)).await;
    let proxy = start_proxy(temp_dir.path()).await;

    let target = format!("ws://{origin}/bin");
    let url = format!("ws://{}/?url={}", proxy.addr, urlencoding::encode(&target));
    let (mut client, _) = connect_async(url).await.unwrap();

    for _ in 0..2 {
        client
            .send(Message::Binary(b"abc".to_vec()))
            .await
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply, Message::Binary(b"cba".to_vec()));
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1);

    client.close(None).await.ok();
    let stats = proxy.stop().await;
    assert_eq!(stats.recorded, 1);
    assert_eq!(stats.replayed, 1);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_ws_exchange() {
    let temp_dir = TempDir::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let origin = ws_origin(Arc::clone(&hits), Duration::from_millis(800)).await;
    let proxy = start_proxy(temp_dir.path()).await;

    let target = format!("ws://{origin}/slow");
    let url = format!("ws://{}/?url={}", proxy.addr, urlencoding::encode(&target));
    let (mut client, _) = connect_async(url).await.unwrap();

    let message = json!({"jsonrpc": "2.0", "id": 3, "method": "eth_slow"});
    client
        .send(Message::Text(message.to_string()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = proxy.stop().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(stats.recorded, 1);
    assert_eq!(stats.failed, 0);

    let reply = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = reply else {
        panic!("expected a text reply, got {reply:?}");
    };
    let reply: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(reply["id"], json!(3));
    assert_eq!(reply["result"], json!("eth_slow"));
}
