//! Response handling and transformation.
//!
//! # Responsibilities
//! - Map request-path errors to client responses
//! - Strip hop-by-hop headers from backend responses
//!
//! # Design Decisions
//! - Backend bodies are streamed, never buffered here
//! - Error bodies are short plain text; the status carries the outcome class

use axum::body::Body;
use axum::http::{header, HeaderValue, Response};
use axum::response::IntoResponse;

use crate::error::ProxyError;
use crate::http::request::strip_hop_by_hop;

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = match &self {
            ProxyError::RouteNotFound => "404 page not found",
            ProxyError::RateLimited { .. } => "Too Many Requests",
            ProxyError::CircuitOpen { .. } => "Service Unavailable: circuit open",
            ProxyError::NoHealthyBackend { .. } => "Service Unavailable: no healthy backend",
            ProxyError::BackendNetwork { .. } => "Bad Gateway",
            ProxyError::BackendTimeout { .. } => "Gateway Timeout",
            ProxyError::BackendServerError { .. } => "Backend Error",
            ProxyError::Unauthorized { .. } => "401 Unauthorized",
            ProxyError::BadRequest { .. } => "Bad Request",
        };

        let mut response = (status, body).into_response();
        let headers = response.headers_mut();
        match &self {
            ProxyError::RateLimited {
                retry_after: Some(wait),
                ..
            } => {
                // whole seconds, rounded up
                let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
                headers.insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
            }
            ProxyError::Unauthorized { realm } => {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer realm=\"{}\"", realm)) {
                    headers.insert(header::WWW_AUTHENTICATE, value);
                }
            }
            _ => {}
        }
        response
    }
}

/// Prepare a backend response for the client.
pub fn from_backend(mut response: Response<Body>) -> Response<Body> {
    strip_hop_by_hop(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::time::Duration;

    #[test]
    fn maps_error_classes_to_status() {
        let cases = [
            (ProxyError::RouteNotFound, StatusCode::NOT_FOUND),
            (
                ProxyError::CircuitOpen { service: "web".into() },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ProxyError::NoHealthyBackend { service: "web".into() },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ProxyError::BackendNetwork {
                    backend: "a".into(),
                    reason: "refused".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                ProxyError::BackendTimeout {
                    backend: "a".into(),
                    elapsed: Duration::from_secs(1),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ProxyError::BackendServerError {
                    backend: "a".into(),
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let response = ProxyError::RateLimited {
            key: "1.2.3.4".into(),
            retry_after: Some(Duration::from_millis(1500)),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn unauthorized_challenges_for_bearer() {
        let response = ProxyError::Unauthorized {
            realm: "edge-proxy".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            "Bearer realm=\"edge-proxy\""
        );
    }
}
