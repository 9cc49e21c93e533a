//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use edge_proxy::config::{ConfigStore, StaticConfig};
use edge_proxy::error::ProxyError;
use edge_proxy::http::{ProxyService, Upstream};
use edge_proxy::observability::MetricsCollector;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

pub const CLIENT: &str = "203.0.113.7:40000";

/// Start a programmable HTTP/1.1 backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;

                let (status, body) = f().await;
                let reason = StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a backend that always answers 200 with `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, body.to_string()) }).await
}

/// A port nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// What the scripted upstream does for one backend.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Status(u16),
    NetworkError,
    Delay(Duration, u16),
}

/// In-memory backend client: each backend address follows a script.
#[derive(Default)]
pub struct ScriptedUpstream {
    scripts: Mutex<HashMap<SocketAddr, Vec<Reply>>>,
    fallback: Mutex<HashMap<SocketAddr, Reply>>,
    calls: Mutex<Vec<SocketAddr>>,
    body_sizes: Arc<Mutex<Vec<usize>>>,
}

impl ScriptedUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replies consumed in order, then `then` forever.
    pub fn script(&self, backend: SocketAddr, replies: Vec<Reply>, then: Reply) {
        self.scripts.lock().insert(backend, replies.into_iter().rev().collect());
        self.fallback.lock().insert(backend, then);
    }

    pub fn always(&self, backend: SocketAddr, reply: Reply) {
        self.script(backend, Vec::new(), reply);
    }

    pub fn calls(&self) -> Vec<SocketAddr> {
        self.calls.lock().clone()
    }

    /// Request body length seen by each call, in call order.
    pub fn body_sizes(&self) -> Vec<usize> {
        self.body_sizes.lock().clone()
    }

    pub fn calls_to(&self, backend: SocketAddr) -> usize {
        self.calls.lock().iter().filter(|a| **a == backend).count()
    }

    fn next_reply(&self, backend: SocketAddr) -> Reply {
        if let Some(reply) = self.scripts.lock().get_mut(&backend).and_then(Vec::pop) {
            return reply;
        }
        self.fallback
            .lock()
            .get(&backend)
            .copied()
            .unwrap_or(Reply::Status(200))
    }
}

impl Upstream for ScriptedUpstream {
    fn send(
        &self,
        backend: SocketAddr,
        request: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, ProxyError>> {
        self.calls.lock().push(backend);
        let reply = self.next_reply(backend);
        let body_sizes = self.body_sizes.clone();
        Box::pin(async move {
            let body = axum::body::to_bytes(request.into_body(), usize::MAX)
                .await
                .map_err(|e| ProxyError::BadRequest { reason: e.to_string() })?;
            body_sizes.lock().push(body.len());
            let status = match reply {
                Reply::Status(status) => status,
                Reply::Delay(delay, status) => {
                    tokio::time::sleep(delay).await;
                    status
                }
                Reply::NetworkError => {
                    return Err(ProxyError::BackendNetwork {
                        backend: backend.to_string(),
                        reason: "connection refused".into(),
                    })
                }
            };
            Ok(Response::builder()
                .status(status)
                .body(Body::from(backend.to_string()))
                .unwrap())
        })
    }
}

/// A proxy over the scripted upstream with `dynamic` already published.
pub fn proxy_with(dynamic: &str, upstream: Arc<ScriptedUpstream>) -> ProxyService {
    let store = Arc::new(ConfigStore::new(StaticConfig::default()));
    store.reload_from_str(dynamic).expect("dynamic config is valid");
    let collector = Arc::new(MetricsCollector::from_config(store.static_config()));
    ProxyService::new(store, upstream, collector)
}

pub fn get(host: &str, path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("host", host)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn client_addr() -> SocketAddr {
    CLIENT.parse().unwrap()
}

/// A running proxy on an ephemeral port using the real backend client.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub service: ProxyService,
    pub shutdown: edge_proxy::Shutdown,
}

/// Serve `dynamic` on entrypoint `entrypoint` until the returned shutdown fires.
pub async fn start_proxy(entrypoint: &str, dynamic: &str) -> RunningProxy {
    let store = Arc::new(ConfigStore::new(StaticConfig::default()));
    store.reload_from_str(dynamic).expect("dynamic config is valid");
    let collector = Arc::new(MetricsCollector::from_config(store.static_config()));
    let upstream = Arc::new(edge_proxy::http::HyperUpstream::new(
        &store.static_config().timeouts,
    ));
    let service = ProxyService::new(store, upstream, collector);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = edge_proxy::Shutdown::new();
    let rx = shutdown.subscribe();
    let name = entrypoint.to_string();
    let served = service.clone();
    tokio::spawn(async move {
        let _ = edge_proxy::http::server::serve_listener(listener, &name, served, rx).await;
    });

    RunningProxy {
        addr,
        service,
        shutdown,
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
