//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Observe live request outcomes
//! - Feed them into the same consecutive counters active probes use
//!
//! # Design Decisions
//! - Only connection errors, timeouts and 502/503/504 count as failures
//! - 4xx are NOT failures (client error, not backend)
//! - Enabled per service with `health_check.passive`

use axum::http::StatusCode;

use crate::config::schema::HealthCheckConfig;
use crate::error::ProxyError;
use crate::health::state::HealthState;
use crate::load_balancer::backend::Backend;
use crate::observability::metrics;

/// Whether a request outcome says anything bad about the backend.
pub fn is_backend_failure<B>(result: &Result<axum::http::Response<B>, ProxyError>) -> bool {
    match result {
        Ok(response) => matches!(
            response.status(),
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ),
        Err(e) => e.is_transient(),
    }
}

/// Record one live request outcome against `backend`.
pub fn observe<B>(
    service: &str,
    backend: &Backend,
    config: &HealthCheckConfig,
    result: &Result<axum::http::Response<B>, ProxyError>,
) {
    if !config.passive {
        return;
    }

    let transition = if is_backend_failure(result) {
        backend.health.mark_failure(config.unhealthy_threshold)
    } else {
        backend.health.mark_success(config.healthy_threshold)
    };

    if let Some(state) = transition {
        match state {
            HealthState::Unhealthy => tracing::warn!(
                service = %service,
                backend = %backend.addr,
                "Backend marked unhealthy by passive check"
            ),
            HealthState::Healthy => tracing::info!(
                service = %service,
                backend = %backend.addr,
                "Backend marked healthy by passive check"
            ),
        }
        metrics::record_backend_health(service, &backend.addr.to_string(), state == HealthState::Healthy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Response;

    fn status(code: u16) -> Result<Response<()>, ProxyError> {
        let mut r = Response::new(());
        *r.status_mut() = StatusCode::from_u16(code).unwrap();
        Ok(r)
    }

    #[test]
    fn classifies_outcomes() {
        assert!(is_backend_failure(&status(503)));
        assert!(!is_backend_failure(&status(500)));
        assert!(!is_backend_failure(&status(404)));
        assert!(is_backend_failure::<()>(&Err(ProxyError::BackendNetwork {
            backend: "b".into(),
            reason: "reset".into(),
        })));
    }

    #[test]
    fn passive_failures_mark_backend_unhealthy() {
        let backend = Backend::new("127.0.0.1:9".parse().unwrap(), 1);
        let config = HealthCheckConfig {
            passive: true,
            ..Default::default()
        };
        for _ in 0..3 {
            observe("web", &backend, &config, &status(502));
        }
        assert!(!backend.is_healthy());
    }

    #[test]
    fn disabled_passive_is_ignored() {
        let backend = Backend::new("127.0.0.1:9".parse().unwrap(), 1);
        for _ in 0..5 {
            observe("web", &backend, &HealthCheckConfig::default(), &status(502));
        }
        assert!(backend.is_healthy());
    }
}
