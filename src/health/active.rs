//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend of every service
//! - Update backend health state based on results
//! - Restart the probe loops whenever a new snapshot is published
//!
//! One tokio task per service; probes of one service run concurrently. The
//! loops only touch the backends' atomic health trackers, never the request
//! path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures_util::future::{join_all, BoxFuture};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::schema::HealthCheckConfig;
use crate::config::store::ConfigStore;
use crate::config::Snapshot;
use crate::health::state::HealthState;
use crate::load_balancer::backend::Backend;
use crate::observability::metrics;
use crate::service::Service;

const USER_AGENT: &str = "edge-proxy-health-check";

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 2xx answer.
    Healthy,
    Status(StatusCode),
    Error(String),
    Timeout,
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// Something that can probe a backend.
pub trait Prober: Send + Sync + 'static {
    fn probe<'a>(&'a self, addr: SocketAddr, path: &'a str, timeout: Duration) -> BoxFuture<'a, ProbeOutcome>;
}

/// HTTP GET prober on the hyper client.
#[derive(Debug, Clone)]
pub struct HyperProber {
    client: Client<HttpConnector, Body>,
}

impl HyperProber {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }
}

impl Prober for HyperProber {
    fn probe<'a>(&'a self, addr: SocketAddr, path: &'a str, timeout: Duration) -> BoxFuture<'a, ProbeOutcome> {
        Box::pin(async move {
            let request = match Request::builder()
                .method("GET")
                .uri(format!("http://{}{}", addr, path))
                .header(header::USER_AGENT, USER_AGENT)
                .body(Body::empty())
            {
                Ok(req) => req,
                Err(e) => return ProbeOutcome::Error(e.to_string()),
            };

            match time::timeout(timeout, self.client.request(request)).await {
                Ok(Ok(response)) if response.status().is_success() => ProbeOutcome::Healthy,
                Ok(Ok(response)) => ProbeOutcome::Status(response.status()),
                Ok(Err(e)) => ProbeOutcome::Error(e.to_string()),
                Err(_) => ProbeOutcome::Timeout,
            }
        })
    }
}

/// Probe one backend and apply the outcome to its tracker.
pub async fn check_backend<P: Prober + ?Sized>(
    prober: &P,
    service: &str,
    backend: &Backend,
    config: &HealthCheckConfig,
) -> Option<HealthState> {
    let outcome = prober
        .probe(backend.addr, &config.path, Duration::from_secs(config.timeout_secs))
        .await;

    let transition = if outcome.is_healthy() {
        backend.health.mark_success(config.healthy_threshold)
    } else {
        tracing::debug!(service = %service, backend = %backend.addr, outcome = ?outcome, "Health probe failed");
        backend.health.mark_failure(config.unhealthy_threshold)
    };

    match transition {
        Some(HealthState::Unhealthy) => {
            tracing::warn!(service = %service, backend = %backend.addr, outcome = ?outcome, "Backend marked unhealthy");
        }
        Some(HealthState::Healthy) => {
            tracing::info!(service = %service, backend = %backend.addr, "Backend marked healthy");
        }
        None => {}
    }
    metrics::record_backend_health(service, &backend.addr.to_string(), backend.is_healthy());
    transition
}

/// Probe every backend of a service concurrently.
pub async fn check_service<P: Prober + ?Sized>(prober: &P, service: &Service) {
    let config = service.health_check();
    join_all(
        service
            .backends()
            .iter()
            .map(|backend| check_backend(prober, service.name(), backend, config)),
    )
    .await;
}

async fn service_loop<P: Prober + ?Sized>(prober: Arc<P>, service: Arc<Service>) {
    let interval = Duration::from_secs(service.health_check().interval_secs.max(1));
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        check_service(prober.as_ref(), &service).await;
    }
}

/// Owns the per-service probe loops for the current snapshot.
pub struct HealthSupervisor<P: Prober + ?Sized> {
    store: Arc<ConfigStore>,
    prober: Arc<P>,
}

impl<P: Prober + ?Sized> HealthSupervisor<P> {
    pub fn new(store: Arc<ConfigStore>, prober: Arc<P>) -> Self {
        Self { store, prober }
    }

    fn spawn_all(&self, snapshot: &Snapshot) -> Vec<JoinHandle<()>> {
        snapshot
            .services()
            .filter(|s| s.health_check().enabled)
            .map(|service| {
                tracing::debug!(
                    service = %service.name(),
                    interval = service.health_check().interval_secs,
                    path = %service.health_check().path,
                    "Starting health probe loop"
                );
                tokio::spawn(service_loop(self.prober.clone(), service.clone()))
            })
            .collect()
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut generations = self.store.subscribe();
        let mut tasks = self.spawn_all(&self.store.load());
        tracing::info!(loops = tasks.len(), "Health monitor starting");

        loop {
            tokio::select! {
                changed = generations.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    for task in tasks.drain(..) {
                        task.abort();
                    }
                    let snapshot = self.store.load();
                    tasks = self.spawn_all(&snapshot);
                    tracing::info!(generation = snapshot.generation(), loops = tasks.len(), "Health probe loops restarted");
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }

        for task in tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{
        BackendConfig, DynamicConfig, HealthCheckConfig, ServiceConfig, StaticConfig,
    };
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Fails every backend in `down`.
    #[derive(Default)]
    struct ScriptedProber {
        down: Mutex<HashSet<SocketAddr>>,
    }

    impl Prober for ScriptedProber {
        fn probe<'a>(&'a self, addr: SocketAddr, _path: &'a str, _timeout: Duration) -> BoxFuture<'a, ProbeOutcome> {
            let healthy = !self.down.lock().contains(&addr);
            Box::pin(async move {
                if healthy {
                    ProbeOutcome::Healthy
                } else {
                    ProbeOutcome::Error("connection refused".into())
                }
            })
        }
    }

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn thresholds_gate_transitions() {
        let prober = ScriptedProber::default();
        let backend = Backend::new("10.0.0.1:80".parse().unwrap(), 1);
        prober.down.lock().insert(backend.addr);

        assert_eq!(check_backend(&prober, "web", &backend, &config()).await, None);
        assert_eq!(check_backend(&prober, "web", &backend, &config()).await, None);
        assert_eq!(
            check_backend(&prober, "web", &backend, &config()).await,
            Some(HealthState::Unhealthy)
        );

        prober.down.lock().clear();
        assert_eq!(check_backend(&prober, "web", &backend, &config()).await, None);
        assert!(!backend.is_healthy());
        assert_eq!(
            check_backend(&prober, "web", &backend, &config()).await,
            Some(HealthState::Healthy)
        );
    }

    #[tokio::test]
    async fn hyper_prober_reports_refused_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = HyperProber::new(Duration::from_secs(1));
        let outcome = prober.probe(addr, "/ping", Duration::from_secs(1)).await;
        assert!(!outcome.is_healthy());
    }

    fn dynamic(addr: &str) -> DynamicConfig {
        DynamicConfig {
            services: vec![ServiceConfig {
                name: "web".into(),
                backends: vec![BackendConfig {
                    address: addr.into(),
                    weight: 1,
                }],
                health_check: HealthCheckConfig {
                    unhealthy_threshold: 1,
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if cond() {
                return true;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn supervisor_follows_reloads() {
        let store = Arc::new(ConfigStore::new(StaticConfig::default()));
        store.apply(dynamic("10.0.0.1:80")).unwrap();

        let prober = Arc::new(ScriptedProber::default());
        prober.down.lock().insert("10.0.0.2:80".parse().unwrap());

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(HealthSupervisor::new(store.clone(), prober.clone()).run(rx));

        // the new backend is probed by the restarted loop
        store.apply(dynamic("10.0.0.2:80")).unwrap();
        let s = store.clone();
        assert!(
            wait_until(move || {
                let snapshot = s.load();
                snapshot.service("web").map_or(false, |svc| svc.pool().healthy_count() == 0)
            })
            .await
        );

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
