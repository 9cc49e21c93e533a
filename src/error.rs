//! Request-path error taxonomy.
//!
//! Every variant maps to exactly one client-visible status code (see
//! `http::response`). Configuration errors live in `config::loader::ConfigError`
//! because they never reach a client.

use std::time::Duration;

use axum::http::StatusCode;

/// Failure classes produced while routing a single request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxyError {
    /// No route matched the request.
    #[error("no route matches the request")]
    RouteNotFound,

    /// The client's token bucket is empty.
    #[error("rate limit exceeded for {key}")]
    RateLimited {
        key: String,
        retry_after: Option<Duration>,
    },

    /// The Service's circuit breaker is open; the backend was not contacted.
    #[error("circuit open for service {service}")]
    CircuitOpen { service: String },

    /// Every backend of the Service is unhealthy.
    #[error("no healthy backend for service {service}")]
    NoHealthyBackend { service: String },

    /// Connection-level failure talking to a backend.
    #[error("backend {backend} network error: {reason}")]
    BackendNetwork { backend: String, reason: String },

    /// A backend did not answer in time, or the route deadline expired.
    #[error("backend {backend} timed out after {elapsed:?}")]
    BackendTimeout { backend: String, elapsed: Duration },

    /// A backend answered with a 5xx status.
    #[error("backend {backend} returned {status}")]
    BackendServerError { backend: String, status: StatusCode },

    /// The Auth middleware rejected the credentials.
    #[error("unauthorized")]
    Unauthorized { realm: String },

    /// The client request body could not be read.
    #[error("invalid request body: {reason}")]
    BadRequest { reason: String },
}

impl ProxyError {
    /// Short outcome label used in access logs and metric labels.
    pub fn outcome(&self) -> &'static str {
        match self {
            ProxyError::RouteNotFound => "route_not_found",
            ProxyError::RateLimited { .. } => "rate_limited",
            ProxyError::CircuitOpen { .. } => "circuit_open",
            ProxyError::NoHealthyBackend { .. } => "no_healthy_backend",
            ProxyError::BackendNetwork { .. } => "backend_network_error",
            ProxyError::BackendTimeout { .. } => "backend_timeout",
            ProxyError::BackendServerError { .. } => "backend_server_error",
            ProxyError::Unauthorized { .. } => "unauthorized",
            ProxyError::BadRequest { .. } => "bad_request",
        }
    }

    /// Status code the client receives for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::RouteNotFound => StatusCode::NOT_FOUND,
            ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::CircuitOpen { .. } | ProxyError::NoHealthyBackend { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::BackendNetwork { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BackendServerError { status, .. } => *status,
            ProxyError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ProxyError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Transient backend failures that a retry policy may re-attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProxyError::BackendNetwork { .. } | ProxyError::BackendTimeout { .. }
        )
    }
}
