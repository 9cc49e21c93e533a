use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::config::schema::LoadBalancerPolicy;
use crate::config::store::ConfigStore;
use crate::health::state::HealthState;
use crate::observability::collector::{MetricSample, MetricsCollector};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{CircuitState, WindowCounts};
use crate::service::Service;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<ConfigStore>,
    pub collector: Arc<MetricsCollector>,
    pub started: Instant,
}

#[derive(Serialize)]
pub struct Overview {
    pub version: &'static str,
    pub generation: u64,
    pub loaded_at: u64,
    pub uptime_secs: u64,
    pub routers: usize,
    pub services: usize,
    pub backends: usize,
    pub healthy_backends: usize,
    pub open_circuits: usize,
}

#[derive(Serialize)]
pub struct RouterStatus {
    pub name: String,
    pub rule: String,
    pub priority: u32,
    pub service: String,
    pub middlewares: Vec<String>,
    pub timeout_ms: u64,
}

#[derive(Serialize)]
pub struct BackendStatus {
    pub address: String,
    pub weight: u32,
    pub state: HealthState,
    pub active_requests: usize,
    pub attempts: u64,
    pub failures: u64,
}

#[derive(Serialize)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub window: WindowCounts,
}

#[derive(Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub load_balancer: LoadBalancerPolicy,
    pub healthy_backends: usize,
    pub backends: Vec<BackendStatus>,
    pub circuit: CircuitStatus,
    pub metrics: Option<MetricSample>,
}

fn service_status(service: &Service, collector: &MetricsCollector) -> ServiceStatus {
    let breaker = service.breaker();
    ServiceStatus {
        name: service.name().to_string(),
        load_balancer: service.pool().policy(),
        healthy_backends: service.pool().healthy_count(),
        backends: service
            .backends()
            .iter()
            .map(|b| {
                let address = b.addr.to_string();
                let counters = collector.backend(service.name(), &address);
                BackendStatus {
                    weight: b.weight,
                    state: b.health_state(),
                    active_requests: b.active_requests(),
                    attempts: counters.attempts,
                    failures: counters.failures,
                    address,
                }
            })
            .collect(),
        circuit: CircuitStatus {
            state: breaker.state(),
            window: breaker.counts(),
        },
        metrics: collector.service_sample(service.name()),
    }
}

pub async fn get_overview(State(state): State<AdminState>) -> Json<Overview> {
    let snapshot = state.store.load();
    let services: Vec<_> = snapshot.services().collect();
    Json(Overview {
        version: env!("CARGO_PKG_VERSION"),
        generation: snapshot.generation(),
        loaded_at: snapshot
            .loaded_at()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
        uptime_secs: state.started.elapsed().as_secs(),
        routers: snapshot.router().routes().len(),
        services: services.len(),
        backends: services.iter().map(|s| s.backends().len()).sum(),
        healthy_backends: services.iter().map(|s| s.pool().healthy_count()).sum(),
        open_circuits: services
            .iter()
            .filter(|s| s.breaker().state() != CircuitState::Closed)
            .count(),
    })
}

pub async fn get_routers(State(state): State<AdminState>) -> Json<Vec<RouterStatus>> {
    let snapshot = state.store.load();
    Json(
        snapshot
            .router()
            .routes()
            .iter()
            .map(|route| RouterStatus {
                name: route.name.clone(),
                rule: route.rule().to_string(),
                priority: route.priority(),
                service: route.target.name().to_string(),
                middlewares: route.chain.names().map(str::to_string).collect(),
                timeout_ms: route.timeout.as_millis() as u64,
            })
            .collect(),
    )
}

pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<ServiceStatus>> {
    let snapshot = state.store.load();
    Json(
        snapshot
            .services()
            .map(|s| service_status(s, &state.collector))
            .collect(),
    )
}

pub async fn get_service(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceStatus>, StatusCode> {
    let snapshot = state.store.load();
    snapshot
        .service(&name)
        .map(|s| Json(service_status(s, &state.collector)))
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_metrics(State(state): State<AdminState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "routes": state.collector.routes(),
    }))
}

/// Prometheus text exposition.
pub fn prometheus() -> Response {
    match metrics::render() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
