//! The request pipeline.
//!
//! ```text
//! request
//!     → snapshot = store.load()          (kept until the request completes)
//!     → route = snapshot.router.match    (404 when nothing matches)
//!     → chain.on_request                 (may respond or reject)
//!     → internal service, or:
//!         retry policy (idempotent-safe methods, replayable body)
//!             → select healthy backend   (503 when none)
//!             → breaker permit           (503 while open, backend untouched)
//!             → backend call             (per-attempt and route deadline)
//!             → record breaker, passive health, attempt counters
//!     → chain.on_response (reverse order)
//!     → collector, Prometheus, access log
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, Request, Response};
use axum::response::IntoResponse;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::admin::Admin;
use crate::config::store::ConfigStore;
use crate::error::ProxyError;
use crate::health::passive;
use crate::http::request::{
    build_attempt, request_id, set_forwarded_headers, strip_hop_by_hop, RequestBody,
};
use crate::http::response::from_backend;
use crate::http::upstream::Upstream;
use crate::middleware::{Flow, ResponseContext};
use crate::observability::access_log::{AccessLog, AccessLogEntry};
use crate::observability::collector::MetricsCollector;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::Outcome;
use crate::resilience::timeouts::{with_timeout, Deadline};
use crate::routing::matcher::{request_host, EntrypointInfo};
use crate::routing::router::{Route, Target};
use crate::service::Service;

const UNMATCHED: &str = "unmatched";

/// Backends tried while serving one request.
#[derive(Debug, Default)]
struct AttemptTrace {
    attempts: AtomicU32,
    last_backend: Mutex<Option<SocketAddr>>,
}

impl AttemptTrace {
    fn record(&self, backend: SocketAddr) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        *self.last_backend.lock() = Some(backend);
    }
}

/// Shared handler state for every entrypoint.
#[derive(Clone)]
pub struct ProxyService {
    store: Arc<ConfigStore>,
    upstream: Arc<dyn Upstream>,
    collector: Arc<MetricsCollector>,
    admin: Admin,
    access_log: AccessLog,
    max_replay_body: usize,
}

impl ProxyService {
    pub fn new(store: Arc<ConfigStore>, upstream: Arc<dyn Upstream>, collector: Arc<MetricsCollector>) -> Self {
        let static_config = store.static_config().clone();
        Self {
            admin: Admin::new(store.clone(), collector.clone()),
            access_log: AccessLog::from_config(&static_config.access_log),
            max_replay_body: static_config.limits.max_retry_body_bytes,
            store,
            upstream,
            collector,
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    /// Serve one client request. Always produces a response.
    pub async fn handle(&self, request: Request<Body>, peer: SocketAddr) -> Response<Body> {
        let start = Instant::now();
        let snapshot = self.store.load();

        let request_id = request_id(&request)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let method = request.method().clone();
        let host = request_host(&request).unwrap_or_default();
        let path = request.uri().path().to_string();
        let entrypoint = request.extensions().get::<EntrypointInfo>().cloned();
        let logged_headers = if self.access_log.enabled() {
            self.access_log.header_fields(request.headers())
        } else {
            String::new()
        };
        let trace = AttemptTrace::default();

        // 1. Match Route
        let route = snapshot.router().match_request(&request).cloned();
        let (response, outcome) = match &route {
            Some(route) => self.dispatch(route, request, peer, &request_id, &trace).await,
            None => {
                tracing::debug!(request_id = %request_id, host = %host, path = %path, "No route matched");
                let error = ProxyError::RouteNotFound;
                let outcome = error.outcome();
                (error.into_response(), outcome)
            }
        };

        // 2. Record
        let latency = start.elapsed();
        let status = response.status().as_u16();
        let route_name = route.as_ref().map_or(UNMATCHED, |r| r.name.as_str());
        let service_name = route.as_ref().map(|r| r.target.name());

        if route.is_some() {
            self.collector.record(route_name, service_name, status, latency);
        }
        metrics::record_request(
            route_name,
            service_name.unwrap_or("-"),
            method.as_str(),
            status,
            outcome,
            latency,
        );
        self.access_log.log(
            &AccessLogEntry {
                request_id: &request_id,
                client: peer.ip().to_string(),
                entrypoint: entrypoint.as_ref().map_or("-", |e| &*e.name),
                method: method.as_str(),
                host: &host,
                path: &path,
                route: route_name,
                service: service_name.unwrap_or("-"),
                backend: (*trace.last_backend.lock()).map(|a| a.to_string()),
                status,
                outcome,
                attempts: trace.attempts.load(Ordering::Relaxed),
                latency,
            },
            &logged_headers,
        );

        response
    }

    async fn dispatch(
        &self,
        route: &Route,
        mut request: Request<Body>,
        peer: SocketAddr,
        request_id: &str,
        trace: &AttemptTrace,
    ) -> (Response<Body>, &'static str) {
        let ctx = ResponseContext::from_request(&request);
        let phase = route.chain.on_request(&mut request, peer);

        let result = match phase.flow {
            Err(e) => Err(e),
            Ok(Flow::Respond(response)) => Ok(response),
            Ok(Flow::Next) => match &route.target {
                Target::Internal(internal) => Ok(self.admin.handle(*internal, request).await),
                Target::Service(service) => {
                    self.forward(route, service, request, peer, request_id, trace)
                        .await
                }
            },
        };

        let (response, outcome) = match result {
            Ok(response) => {
                let outcome = if response.status().is_server_error() {
                    "backend_server_error"
                } else {
                    "success"
                };
                (response, outcome)
            }
            Err(e) => {
                tracing::debug!(request_id = %request_id, route = %route.name, error = %e, "Request failed");
                let outcome = e.outcome();
                (e.into_response(), outcome)
            }
        };

        (route.chain.on_response(phase.entered, &ctx, response).await, outcome)
    }

    /// Forward to the service, with retries when the route allows them.
    async fn forward(
        &self,
        route: &Route,
        service: &Arc<Service>,
        request: Request<Body>,
        peer: SocketAddr,
        request_id: &str,
        trace: &AttemptTrace,
    ) -> Result<Response<Body>, ProxyError> {
        let tls = request
            .extensions()
            .get::<EntrypointInfo>()
            .map_or(false, |e| e.tls);
        let policy = route
            .chain
            .retry_policy()
            .filter(|p| p.applies_to(request.method()))
            .cloned();

        let (mut parts, body) = request.into_parts();
        if !parts.headers.contains_key(header::HOST) {
            // HTTP/2 carries the host in the authority
            if let Some(value) = parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            {
                parts.headers.insert(header::HOST, value);
            }
        }
        // framing headers decide replayability, so look before stripping them
        let body = RequestBody::prepare(body, &parts.headers, policy.is_some(), self.max_replay_body).await?;
        strip_hop_by_hop(&mut parts.headers);
        set_forwarded_headers(&mut parts.headers, peer.ip(), tls, request_id);
        let deadline = Deadline::after(route.timeout);

        let (parts, body, deadline) = (&parts, &body, &deadline);
        let service = service.as_ref();
        let call = async move {
            match policy.as_ref().filter(|_| body.is_replayable()) {
                Some(policy) => {
                    policy
                        .execute(move |_| self.attempt(service, parts, body, deadline, trace))
                        .await
                }
                None => self.attempt(service, parts, body, deadline, trace).await,
            }
        };

        with_timeout(service.name(), route.timeout, call)
            .await
            .map(from_backend)
    }

    /// One backend call.
    async fn attempt(
        &self,
        service: &Service,
        parts: &Parts,
        body: &RequestBody,
        deadline: &Deadline,
        trace: &AttemptTrace,
    ) -> Result<Response<Body>, ProxyError> {
        if deadline.is_expired() {
            return Err(ProxyError::BackendTimeout {
                backend: service.name().to_string(),
                elapsed: deadline.limit(),
            });
        }

        // 1. Select Backend
        let backend = service.select()?;
        let request = build_attempt(parts, body.take(), backend.addr)?;

        // 2. Breaker Permit
        let permit = service.breaker().try_acquire()?;
        let _in_flight = backend.acquire();
        trace.record(backend.addr);
        let addr = backend.addr.to_string();

        // 3. Forward
        let limit = deadline.attempt_limit(service.response_timeout());
        let result = with_timeout(&addr, limit, self.upstream.send(backend.addr, request)).await;

        // 4. Record
        let outcome = match &result {
            Ok(response) => Outcome::from_status(response.status()),
            Err(_) => Outcome::NetworkError,
        };
        permit.record(outcome);
        passive::observe(service.name(), &backend, service.health_check(), &result);
        self.collector
            .record_attempt(service.name(), &addr, outcome.is_failure());

        let label = match &result {
            Ok(response) if response.status().is_server_error() => "server_error",
            Ok(_) => "success",
            Err(e) => {
                tracing::warn!(service = %service.name(), backend = %addr, error = %e, "Backend call failed");
                e.outcome()
            }
        };
        metrics::record_backend_attempt(service.name(), &addr, label);

        result
    }
}
