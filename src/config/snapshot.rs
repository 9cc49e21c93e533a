//! Compiled configuration snapshots.
//!
//! A [`Snapshot`] is the fully-resolved, immutable view the request path
//! works from: ordered routes with their middleware chains, and services
//! with their pools and breakers. It is rebuilt from scratch on every reload
//! and published atomically by the `ConfigStore`.
//!
//! State that must outlive a reload is carried over from the previous
//! snapshot:
//! - a backend keeps its health while its service name, address and weight
//!   stay the same
//! - a service keeps its circuit breaker while the breaker settings stay
//!   the same
//!
//! Rate limiter buckets start fresh with every snapshot.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::schema::{
    AuthConfig, CircuitBreakerConfig, DynamicConfig, LimiterScope, MiddlewareSpec, RouterConfig,
    StaticConfig,
};
use crate::load_balancer::backend::Backend;
use crate::load_balancer::pool::BackendPool;
use crate::middleware::auth::BearerAuth;
use crate::middleware::compress::Compress;
use crate::middleware::cors::Cors;
use crate::middleware::headers::HeaderRules;
use crate::middleware::{Chain, Middleware};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retries::RetryPolicy;
use crate::routing::router::{Route, Router, Target};
use crate::security::rate_limit::RateLimiter;
use crate::service::{InternalService, Service};

/// Priority of the implicit internal routes; they cannot be shadowed.
const INTERNAL_PRIORITY: u32 = u32::MAX;

/// Immutable routing state at one point in time.
#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    loaded_at: SystemTime,
    router: Router,
    services: BTreeMap<String, Arc<Service>>,
    config: DynamicConfig,
}

impl Snapshot {
    /// Snapshot with no routes or services.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            loaded_at: SystemTime::now(),
            router: Router::default(),
            services: BTreeMap::new(),
            config: DynamicConfig::default(),
        }
    }

    /// Compile a validated dynamic configuration.
    pub fn compile(
        config: DynamicConfig,
        static_config: &StaticConfig,
        generation: u64,
        previous: Option<&Snapshot>,
    ) -> Self {
        let services = compile_services(&config, previous);
        let router = compile_router(&config, static_config, &services);

        tracing::debug!(
            generation,
            routes = router.routes().len(),
            services = services.len(),
            "Compiled configuration snapshot"
        );

        Self {
            generation,
            loaded_at: SystemTime::now(),
            router,
            services,
            config,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn service(&self, name: &str) -> Option<&Arc<Service>> {
        self.services.get(name)
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<Service>> {
        self.services.values()
    }

    /// The dynamic document this snapshot was compiled from.
    pub fn config(&self) -> &DynamicConfig {
        &self.config
    }
}

/// Breaker settings each service receives from the routes targeting it.
fn breaker_configs(config: &DynamicConfig) -> HashMap<&str, &CircuitBreakerConfig> {
    let specs: HashMap<&str, &MiddlewareSpec> = config
        .middlewares
        .iter()
        .map(|m| (m.name.as_str(), &m.spec))
        .collect();

    let mut out = HashMap::new();
    for router in &config.routers {
        for name in &router.middlewares {
            if let Some(MiddlewareSpec::CircuitBreaker(cb)) = specs.get(name.as_str()) {
                out.entry(router.service.as_str()).or_insert(cb);
            }
        }
    }
    out
}

fn compile_services(
    config: &DynamicConfig,
    previous: Option<&Snapshot>,
) -> BTreeMap<String, Arc<Service>> {
    let breakers = breaker_configs(config);
    let default_breaker = CircuitBreakerConfig::default();
    let mut services = BTreeMap::new();

    for svc in &config.services {
        let prev = previous.and_then(|p| p.service(&svc.name));

        let mut backends = Vec::with_capacity(svc.backends.len());
        for b in &svc.backends {
            let addr: SocketAddr = match b.address.parse() {
                Ok(a) => a,
                Err(_) => {
                    tracing::warn!(service = %svc.name, address = %b.address, "Invalid backend address");
                    continue;
                }
            };
            let reused = prev
                .and_then(|p| p.pool().find(&addr))
                .filter(|existing| existing.weight == b.weight)
                .cloned();
            backends.push(reused.unwrap_or_else(|| Arc::new(Backend::new(addr, b.weight))));
        }

        let breaker_config = breakers
            .get(svc.name.as_str())
            .copied()
            .unwrap_or(&default_breaker);
        let breaker = prev
            .map(|p| p.breaker())
            .filter(|existing| existing.config() == breaker_config)
            .cloned()
            .unwrap_or_else(|| Arc::new(CircuitBreaker::new(svc.name.clone(), breaker_config.clone())));

        let service = Service::new(
            svc.name.clone(),
            BackendPool::new(svc.load_balancer, backends),
            breaker,
            svc.health_check.clone(),
            svc.response_timeout_ms.map(Duration::from_millis),
        );
        services.insert(svc.name.clone(), Arc::new(service));
    }
    services
}

/// Shares compiled middleware instances between the routes of one snapshot.
#[derive(Default)]
struct MiddlewareCache {
    shared: HashMap<String, Middleware>,
    limiters: HashMap<(String, String), Arc<RateLimiter>>,
}

impl MiddlewareCache {
    fn get(&mut self, name: &str, spec: &MiddlewareSpec, router: &RouterConfig) -> Middleware {
        if let MiddlewareSpec::RateLimit(rl) = spec {
            let scope = match rl.scope {
                LimiterScope::Service => format!("service:{}", router.service),
                LimiterScope::Route => format!("route:{}", router.name),
            };
            let limiter = self
                .limiters
                .entry((name.to_string(), scope))
                .or_insert_with(|| Arc::new(RateLimiter::from_config(name, rl)))
                .clone();
            return Middleware::RateLimit(limiter);
        }

        self.shared
            .entry(name.to_string())
            .or_insert_with(|| match spec {
                MiddlewareSpec::Cors(c) => Middleware::Cors(Arc::new(Cors::from_config(c))),
                MiddlewareSpec::CircuitBreaker(c) => Middleware::CircuitBreaker(c.clone()),
                MiddlewareSpec::Retry(c) => {
                    Middleware::Retry(Arc::new(RetryPolicy::from_config(name, c)))
                }
                MiddlewareSpec::Compress(c) => {
                    Middleware::Compress(Arc::new(Compress::from_config(c)))
                }
                MiddlewareSpec::Headers(c) => {
                    Middleware::Headers(Arc::new(HeaderRules::from_config(c)))
                }
                MiddlewareSpec::Auth(c) => Middleware::Auth(Arc::new(BearerAuth::from_config(c))),
                MiddlewareSpec::RateLimit(rl) => {
                    Middleware::RateLimit(Arc::new(RateLimiter::from_config(name, rl)))
                }
            })
            .clone()
    }
}

fn compile_router(
    config: &DynamicConfig,
    static_config: &StaticConfig,
    services: &BTreeMap<String, Arc<Service>>,
) -> Router {
    let specs: HashMap<&str, &MiddlewareSpec> = config
        .middlewares
        .iter()
        .map(|m| (m.name.as_str(), &m.spec))
        .collect();
    let default_timeout = Duration::from_secs(static_config.timeouts.request_secs);
    let mut cache = MiddlewareCache::default();
    let mut routes = Vec::with_capacity(config.routers.len() + 3);

    for (index, rc) in config.routers.iter().enumerate() {
        let target = match InternalService::parse(&rc.service) {
            Some(internal) => Target::Internal(internal),
            None => match services.get(&rc.service) {
                Some(s) => Target::Service(s.clone()),
                None => {
                    tracing::warn!(router = %rc.name, service = %rc.service, "Skipping router with unknown service");
                    continue;
                }
            },
        };

        let chain = Chain::new(
            rc.middlewares
                .iter()
                .filter_map(|name| {
                    let spec = specs.get(name.as_str())?;
                    Some((name.clone(), cache.get(name, spec, rc)))
                })
                .collect(),
        );
        let timeout = rc
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);
        routes.push(Route::new(index, rc, target, chain, timeout));
    }

    let base = config.routers.len();
    for (offset, (internal, rc, chain)) in internal_routes(static_config).into_iter().enumerate() {
        routes.push(Route::new(
            base + offset,
            &rc,
            Target::Internal(internal),
            chain,
            default_timeout,
        ));
    }

    Router::new(routes)
}

/// Routes registered by the static `api` and `metrics` settings.
fn internal_routes(static_config: &StaticConfig) -> Vec<(InternalService, RouterConfig, Chain)> {
    let api = &static_config.api;
    let route = |internal: InternalService, path: Option<&str>, prefix: Option<&str>| RouterConfig {
        name: internal.name().to_string(),
        entrypoints: vec![api.entrypoint.clone()],
        host: None,
        path_prefix: prefix.map(str::to_string),
        path: path.map(str::to_string),
        service: internal.name().to_string(),
        middlewares: Vec::new(),
        tls: false,
        priority: INTERNAL_PRIORITY,
        timeout_ms: None,
    };
    let has_tokens = api.bearer_tokens.iter().any(|t| !t.is_empty());
    let auth_chain = || {
        Chain::new(vec![(
            "api-auth@internal".to_string(),
            Middleware::Auth(Arc::new(BearerAuth::from_config(&AuthConfig {
                bearer_tokens: api.bearer_tokens.clone(),
                ..Default::default()
            }))),
        )])
    };

    let mut routes = Vec::new();
    if api.ping {
        let ping = InternalService::Ping;
        routes.push((ping, route(ping, Some("/ping"), None), Chain::default()));
    }
    if api.dashboard && has_tokens {
        let dashboard = InternalService::Api;
        routes.push((dashboard, route(dashboard, None, Some("/api")), auth_chain()));
    }
    if static_config.metrics.prometheus && has_tokens {
        let prometheus = InternalService::Prometheus;
        routes.push((prometheus, route(prometheus, Some("/metrics"), None), auth_chain()));
    }
    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_dynamic;

    const DOC: &str = r#"
[[routers]]
name = "a"
path_prefix = "/a"
service = "web"
middlewares = ["limit", "cb"]

[[routers]]
name = "b"
path_prefix = "/b"
service = "web"
middlewares = ["limit"]

[[services]]
name = "web"
backends = [{ address = "127.0.0.1:7001" }, { address = "127.0.0.1:7002" }]

[[middlewares]]
name = "limit"
type = "rate_limit"
average = 10
burst = 1

[[middlewares]]
name = "cb"
type = "circuit_breaker"
ratio_threshold = 0.25
"#;

    fn compile(previous: Option<&Snapshot>, doc: &str, generation: u64) -> Snapshot {
        let static_config = StaticConfig::default();
        let cfg = parse_dynamic(doc, &static_config).unwrap();
        Snapshot::compile(cfg, &static_config, generation, previous)
    }

    #[test]
    fn breaker_settings_come_from_route_middleware() {
        let snap = compile(None, DOC, 1);
        let web = snap.service("web").unwrap();
        assert_eq!(web.breaker().config().ratio_threshold, 0.25);
        assert_eq!(snap.generation(), 1);
    }

    #[test]
    fn health_and_breaker_survive_reload() {
        let first = compile(None, DOC, 1);
        let web = first.service("web").unwrap();
        web.backends()[0].health.mark_failure(1);

        let second = compile(Some(&first), DOC, 2);
        let web2 = second.service("web").unwrap();
        assert!(!web2.backends()[0].is_healthy());
        assert!(Arc::ptr_eq(web.breaker(), web2.breaker()));

        let changed = DOC.replace("0.25", "0.75");
        let third = compile(Some(&second), &changed, 3);
        assert!(!Arc::ptr_eq(web2.breaker(), third.service("web").unwrap().breaker()));
    }

    #[test]
    fn service_scoped_limiter_is_shared_between_routes() {
        use axum::body::Body;
        use axum::http::Request;

        let snap = compile(None, DOC, 1);
        let route = |name: &str| {
            snap.router()
                .routes()
                .iter()
                .find(|r| r.name == name)
                .cloned()
                .unwrap()
        };
        let peer = "198.51.100.1:1000".parse().unwrap();

        let mut req = Request::new(Body::empty());
        assert!(route("a").chain.on_request(&mut req, peer).flow.is_ok());
        let mut req = Request::new(Body::empty());
        assert!(route("b").chain.on_request(&mut req, peer).flow.is_err());
    }

    #[test]
    fn implicit_ping_route_is_registered() {
        let snap = compile(None, DOC, 1);
        let names: Vec<_> = snap.router().routes().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names[0], "ping@internal");
        assert!(!names.contains(&"api@internal"));
    }
}
