//! Services: the logical backend targets routes point at.

use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::HealthCheckConfig;
use crate::error::ProxyError;
use crate::load_balancer::backend::Backend;
use crate::load_balancer::pool::BackendPool;
use crate::resilience::circuit_breaker::CircuitBreaker;

/// Built-in services living in the same dispatch table as user services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalService {
    /// Liveness endpoint, always 200.
    Ping,
    /// Read-only JSON dashboard API.
    Api,
    /// Prometheus text exposition.
    Prometheus,
}

impl InternalService {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ping@internal" => Some(InternalService::Ping),
            "api@internal" => Some(InternalService::Api),
            "prometheus@internal" => Some(InternalService::Prometheus),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InternalService::Ping => "ping@internal",
            InternalService::Api => "api@internal",
            InternalService::Prometheus => "prometheus@internal",
        }
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, InternalService::Ping)
    }
}

/// A user-defined service: backends, their breaker and health check spec.
#[derive(Debug)]
pub struct Service {
    name: String,
    pool: BackendPool,
    breaker: Arc<CircuitBreaker>,
    health_check: HealthCheckConfig,
    response_timeout: Option<Duration>,
}

impl Service {
    pub fn new(
        name: String,
        pool: BackendPool,
        breaker: Arc<CircuitBreaker>,
        health_check: HealthCheckConfig,
        response_timeout: Option<Duration>,
    ) -> Self {
        Self {
            name,
            pool,
            breaker,
            health_check,
            response_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        self.pool.backends()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn health_check(&self) -> &HealthCheckConfig {
        &self.health_check
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout
    }

    /// Pick a healthy backend or report that none is left.
    pub fn select(&self) -> Result<Arc<Backend>, ProxyError> {
        self.pool.select().ok_or_else(|| ProxyError::NoHealthyBackend {
            service: self.name.clone(),
        })
    }
}
