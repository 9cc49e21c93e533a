//! Backend client.
//!
//! The request pipeline talks to backends through the [`Upstream`] trait so
//! tests can script backend behaviour without sockets.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::schema::TimeoutConfig;
use crate::error::ProxyError;

/// Sends one request to one backend.
pub trait Upstream: Send + Sync + 'static {
    fn send(&self, backend: SocketAddr, request: Request<Body>) -> BoxFuture<'static, Result<Response<Body>, ProxyError>>;
}

/// HTTP/1.1 client with connection pooling.
#[derive(Debug, Clone)]
pub struct HyperUpstream {
    client: Client<HttpConnector, Body>,
}

impl HyperUpstream {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(timeouts.idle_secs))
            .build(connector);
        Self { client }
    }
}

impl Upstream for HyperUpstream {
    fn send(&self, backend: SocketAddr, request: Request<Body>) -> BoxFuture<'static, Result<Response<Body>, ProxyError>> {
        let response = self.client.request(request);
        Box::pin(async move {
            match response.await {
                Ok(response) => Ok(response.map(Body::new)),
                Err(e) => Err(ProxyError::BackendNetwork {
                    backend: backend.to_string(),
                    reason: e.to_string(),
                }),
            }
        })
    }
}
