//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics on the `metrics` facade
//! - Install the Prometheus recorder and keep its handle for
//!   `prometheus@internal`
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by route, service, method, status, outcome
//! - `proxy_request_duration_seconds` (histogram): latency distribution by route
//! - `proxy_backend_attempts_total` (counter): backend calls by service, backend, outcome
//! - `proxy_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `proxy_rate_limited_total` (counter): rejections by limiter
//! - `proxy_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `proxy_retries_total` (counter): retries by policy
//! - `proxy_config_reloads_total` (counter): reloads by result
//! - `proxy_scaling_decisions_total` (counter): decisions by service and direction
//!
//! Without an installed recorder every call is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

use crate::resilience::circuit_breaker::CircuitState;

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder as the global recorder (once per process).
pub fn init_recorder() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("proxy_request_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install_recorder()?;
    let _ = HANDLE.set(handle.clone());
    tracing::info!("Prometheus recorder installed");
    Ok(handle)
}

/// Handle of the installed recorder, if any.
pub fn handle() -> Option<&'static PrometheusHandle> {
    HANDLE.get()
}

/// Prometheus text exposition of every metric, if the recorder is installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// Drain histogram buffers periodically; histograms grow without it.
pub async fn run_upkeep(interval: Duration) {
    let Some(handle) = HANDLE.get() else {
        return;
    };
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        handle.run_upkeep();
    }
}

/// Record one completed client request.
pub fn record_request(
    route: &str,
    service: &str,
    method: &str,
    status: u16,
    outcome: &'static str,
    duration: Duration,
) {
    counter!(
        "proxy_requests_total",
        "route" => route.to_string(),
        "service" => service.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "proxy_request_duration_seconds",
        "route" => route.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record one backend call.
pub fn record_backend_attempt(service: &str, backend: &str, outcome: &'static str) {
    counter!(
        "proxy_backend_attempts_total",
        "service" => service.to_string(),
        "backend" => backend.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_backend_health(service: &str, backend: &str, healthy: bool) {
    gauge!(
        "proxy_backend_health",
        "service" => service.to_string(),
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_rate_limited(limiter: &str) {
    counter!("proxy_rate_limited_total", "limiter" => limiter.to_string()).increment(1);
}

pub fn record_circuit_state(service: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("proxy_circuit_state", "service" => service.to_string()).set(value);
}

pub fn record_retry(policy: &str) {
    counter!("proxy_retries_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_config_reload(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("proxy_config_reloads_total", "result" => result).increment(1);
}

pub fn record_scaling_decision(service: &str, direction: &'static str) {
    counter!(
        "proxy_scaling_decisions_total",
        "service" => service.to_string(),
        "direction" => direction
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_renders_recorded_metrics() {
        let handle = init_recorder().unwrap();
        // second install returns the same handle
        assert!(init_recorder().is_ok());

        record_request("api", "web", "GET", 200, "success", Duration::from_millis(12));
        record_rate_limited("limit");

        let text = handle.render();
        assert!(text.contains("proxy_requests_total"));
        assert!(text.contains("proxy_rate_limited_total"));
        assert!(render().is_some());
    }
}
