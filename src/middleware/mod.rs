//! Middleware chain.
//!
//! # Data Flow
//! ```text
//! matched route
//!     → on_request, in declared order (each may continue, respond, or reject)
//!     → [backend call, wrapped by the chain's retry policy if any]
//!     → on_response, in reverse order, for every middleware that was entered
//! ```
//!
//! # Design Decisions
//! - Variants are a closed enum compiled from the configuration snapshot
//! - Stateful variants (rate limiter, retry budget) are shared through `Arc`
//! - The circuit breaker variant only configures the service's breaker; the
//!   breaker itself is consulted at backend-selection time

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response};

use crate::config::schema::CircuitBreakerConfig;
use crate::error::ProxyError;
use crate::resilience::retries::RetryPolicy;
use crate::security::rate_limit::RateLimiter;

pub mod auth;
pub mod compress;
pub mod cors;
pub mod headers;

use auth::BearerAuth;
use compress::Compress;
use cors::Cors;
use headers::HeaderRules;

/// One compiled middleware.
#[derive(Debug, Clone)]
pub enum Middleware {
    RateLimit(Arc<RateLimiter>),
    Cors(Arc<Cors>),
    CircuitBreaker(CircuitBreakerConfig),
    Retry(Arc<RetryPolicy>),
    Compress(Arc<Compress>),
    Headers(Arc<HeaderRules>),
    Auth(Arc<BearerAuth>),
}

impl Middleware {
    pub fn kind(&self) -> &'static str {
        match self {
            Middleware::RateLimit(_) => "rate_limit",
            Middleware::Cors(_) => "cors",
            Middleware::CircuitBreaker(_) => "circuit_breaker",
            Middleware::Retry(_) => "retry",
            Middleware::Compress(_) => "compress",
            Middleware::Headers(_) => "headers",
            Middleware::Auth(_) => "auth",
        }
    }
}

/// Result of the request phase of one middleware.
#[derive(Debug)]
pub enum Flow {
    /// Continue with the next middleware, then the backend.
    Next,
    /// Answer the client directly.
    Respond(Response<Body>),
}

/// Request facts the response phase needs after the request was consumed.
#[derive(Debug, Clone, Default)]
pub struct ResponseContext {
    pub origin: Option<HeaderValue>,
    pub accept_encoding: Option<HeaderValue>,
}

impl ResponseContext {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            origin: request.headers().get(header::ORIGIN).cloned(),
            accept_encoding: request.headers().get(header::ACCEPT_ENCODING).cloned(),
        }
    }
}

/// Outcome of running the request phase of a chain.
#[derive(Debug)]
pub struct RequestPhase {
    /// Number of middlewares whose request phase ran.
    pub entered: usize,
    pub flow: Result<Flow, ProxyError>,
}

/// Ordered middlewares of one route.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    middlewares: Vec<(String, Middleware)>,
}

impl Chain {
    pub fn new(middlewares: Vec<(String, Middleware)>) -> Self {
        Self { middlewares }
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.middlewares.iter().map(|(n, _)| n.as_str())
    }

    pub fn retry_policy(&self) -> Option<&Arc<RetryPolicy>> {
        self.middlewares.iter().find_map(|(_, m)| match m {
            Middleware::Retry(policy) => Some(policy),
            _ => None,
        })
    }

    /// Run request phases in order until one short-circuits.
    pub fn on_request(&self, request: &mut Request<Body>, peer: SocketAddr) -> RequestPhase {
        for (index, (name, middleware)) in self.middlewares.iter().enumerate() {
            let flow = match middleware {
                Middleware::RateLimit(limiter) => {
                    let key = limiter.client_key(request, peer);
                    limiter.check_at(&key, Instant::now()).map(|_| Flow::Next)
                }
                Middleware::Cors(cors) if Cors::is_preflight(request) => {
                    Ok(Flow::Respond(cors.preflight(request)))
                }
                Middleware::Headers(rules) => {
                    rules.apply_request(request.headers_mut());
                    Ok(Flow::Next)
                }
                Middleware::Auth(auth) => auth.check(request).map(|_| Flow::Next),
                Middleware::Cors(_)
                | Middleware::CircuitBreaker(_)
                | Middleware::Retry(_)
                | Middleware::Compress(_) => Ok(Flow::Next),
            };

            match flow {
                Ok(Flow::Next) => {}
                other => {
                    tracing::debug!(middleware = %name, kind = middleware.kind(), "Middleware short-circuited request");
                    return RequestPhase {
                        entered: index + 1,
                        flow: other,
                    };
                }
            }
        }

        RequestPhase {
            entered: self.middlewares.len(),
            flow: Ok(Flow::Next),
        }
    }

    /// Run response phases of the first `entered` middlewares in reverse.
    pub async fn on_response(
        &self,
        entered: usize,
        ctx: &ResponseContext,
        mut response: Response<Body>,
    ) -> Response<Body> {
        for (_, middleware) in self.middlewares[..entered.min(self.middlewares.len())]
            .iter()
            .rev()
        {
            match middleware {
                Middleware::Cors(cors) => cors.apply(ctx.origin.as_ref(), response.headers_mut()),
                Middleware::Headers(rules) => rules.apply_response(response.headers_mut()),
                Middleware::Compress(compress) => {
                    response = compress.apply(ctx.accept_encoding.as_ref(), response).await;
                }
                _ => {}
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AuthConfig, CorsConfig, HeadersConfig, RateLimitConfig};
    use std::collections::BTreeMap;

    fn peer() -> SocketAddr {
        "192.0.2.10:4000".parse().unwrap()
    }

    fn limiter(burst: u32) -> Middleware {
        Middleware::RateLimit(Arc::new(RateLimiter::from_config(
            "limit",
            &RateLimitConfig {
                burst,
                ..Default::default()
            },
        )))
    }

    fn auth() -> Middleware {
        Middleware::Auth(Arc::new(BearerAuth::from_config(&AuthConfig {
            bearer_tokens: vec!["t".into()],
            ..Default::default()
        })))
    }

    #[test]
    fn rate_limit_rejects_once_bucket_empty() {
        let chain = Chain::new(vec![("limit".into(), limiter(1))]);
        let mut req = Request::new(Body::empty());

        assert!(matches!(chain.on_request(&mut req, peer()).flow, Ok(Flow::Next)));
        let phase = chain.on_request(&mut req, peer());
        assert_eq!(phase.entered, 1);
        assert!(matches!(phase.flow, Err(ProxyError::RateLimited { .. })));
    }

    #[test]
    fn short_circuit_stops_later_middlewares() {
        let headers = Middleware::Headers(Arc::new(HeaderRules::from_config(&HeadersConfig {
            request: BTreeMap::from([("x-seen".to_string(), "1".to_string())]),
            ..Default::default()
        })));
        let chain = Chain::new(vec![("auth".into(), auth()), ("hdr".into(), headers)]);
        let mut req = Request::new(Body::empty());

        let phase = chain.on_request(&mut req, peer());
        assert_eq!(phase.entered, 1);
        assert!(matches!(phase.flow, Err(ProxyError::Unauthorized { .. })));
        assert!(!req.headers().contains_key("x-seen"));
    }

    #[tokio::test]
    async fn preflight_answered_and_decorated_in_reverse() {
        let cors = Middleware::Cors(Arc::new(Cors::from_config(&CorsConfig {
            allow_origins: vec!["*".into()],
            ..Default::default()
        })));
        let chain = Chain::new(vec![("cors".into(), cors), ("auth".into(), auth())]);

        let mut req = Request::builder()
            .method("OPTIONS")
            .header(header::ORIGIN, "https://a.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();
        let ctx = ResponseContext::from_request(&req);

        let phase = chain.on_request(&mut req, peer());
        assert_eq!(phase.entered, 1);
        let Ok(Flow::Respond(resp)) = phase.flow else {
            panic!("expected preflight response");
        };
        let resp = chain.on_response(phase.entered, &ctx, resp).await;
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[test]
    fn finds_retry_policy() {
        let retry = Middleware::Retry(Arc::new(RetryPolicy::from_config(
            "retry",
            &Default::default(),
        )));
        let chain = Chain::new(vec![("retry".into(), retry)]);
        assert_eq!(chain.retry_policy().unwrap().max_attempts(), 3);
        assert!(Chain::default().retry_policy().is_none());
    }
}
