//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routers reference existing services,
//!   middlewares and entrypoints)
//! - Validate value ranges (thresholds, durations, addresses)
//! - Enforce authentication on internal dashboard and metrics services
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function of the documents
//! - Runs before a document is accepted into the system

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::str::FromStr;

use axum::http::{HeaderName, Method};

use crate::config::schema::{
    CircuitBreakerConfig, DynamicConfig, LoadBalancerPolicy, MiddlewareSpec, RouterConfig,
    ServiceConfig, StaticConfig,
};
use crate::service::InternalService;

/// A single semantic problem in a configuration document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("duplicate {kind} name '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("router '{router}' references unknown service '{service}'")]
    UnknownService { router: String, service: String },

    #[error("router '{router}' references unknown middleware '{middleware}'")]
    UnknownMiddleware { router: String, middleware: String },

    #[error("router '{router}' references unknown entrypoint '{entrypoint}'")]
    UnknownEntrypoint { router: String, entrypoint: String },

    #[error("router '{router}' targets {service} without an auth middleware")]
    UnauthenticatedInternal { router: String, service: String },

    #[error("service '{service}' receives conflicting circuit breakers '{first}' and '{second}'")]
    ConflictingBreakers {
        service: String,
        first: String,
        second: String,
    },

    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ValidationError {
    ValidationError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Validate the static configuration.
pub fn validate_static(config: &StaticConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.entrypoints.is_empty() {
        errors.push(invalid("entrypoints", "at least one entrypoint is required"));
    }

    let mut names = HashSet::new();
    for ep in &config.entrypoints {
        if !names.insert(ep.name.as_str()) {
            errors.push(ValidationError::Duplicate {
                kind: "entrypoint",
                name: ep.name.clone(),
            });
        }
        if SocketAddr::from_str(&ep.address).is_err() {
            errors.push(invalid(
                format!("entrypoints.{}.address", ep.name),
                format!("'{}' is not a socket address", ep.address),
            ));
        }
    }

    let api = &config.api;
    if (api.ping || api.dashboard) && !names.contains(api.entrypoint.as_str()) {
        errors.push(invalid(
            "api.entrypoint",
            format!("unknown entrypoint '{}'", api.entrypoint),
        ));
    }
    if api.dashboard && api.bearer_tokens.iter().all(|t| t.is_empty()) {
        errors.push(invalid(
            "api.bearer_tokens",
            "the dashboard requires at least one bearer token",
        ));
    }

    if config.metrics.latency_window_secs == 0 {
        errors.push(invalid("metrics.latency_window_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(invalid("timeouts.request_secs", "must be greater than 0"));
    }

    let scaling = &config.autoscaling;
    if scaling.enabled {
        if scaling.tick_secs == 0 {
            errors.push(invalid("autoscaling.tick_secs", "must be greater than 0"));
        }
        if scaling.min_capacity > scaling.max_capacity {
            errors.push(invalid(
                "autoscaling.min_capacity",
                "must not exceed max_capacity",
            ));
        }
        if !(0.0..1.0).contains(&scaling.scale_in_ratio) {
            errors.push(invalid("autoscaling.scale_in_ratio", "must be in [0, 1)"));
        }
        if scaling.step == 0 {
            errors.push(invalid("autoscaling.step", "must be greater than 0"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a dynamic configuration against the static one it will run under.
pub fn validate_dynamic(
    config: &DynamicConfig,
    static_config: &StaticConfig,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let services = index_by_name(
        config.services.iter().map(|s| s.name.as_str()),
        "service",
        &mut errors,
    );
    let middlewares: HashMap<&str, &MiddlewareSpec> = config
        .middlewares
        .iter()
        .map(|m| (m.name.as_str(), &m.spec))
        .collect();
    index_by_name(
        config.middlewares.iter().map(|m| m.name.as_str()),
        "middleware",
        &mut errors,
    );
    index_by_name(
        config.routers.iter().map(|r| r.name.as_str()),
        "router",
        &mut errors,
    );

    let entrypoints: HashSet<&str> = static_config
        .entrypoints
        .iter()
        .map(|e| e.name.as_str())
        .collect();

    for service in &config.services {
        validate_service(service, &mut errors);
    }
    for middleware in &config.middlewares {
        validate_middleware(&middleware.name, &middleware.spec, &mut errors);
    }

    // service name -> (middleware name, config) of the breaker guarding it
    let mut breakers: HashMap<&str, (&str, &CircuitBreakerConfig)> = HashMap::new();

    for router in &config.routers {
        validate_router_shape(router, &mut errors);

        for ep in &router.entrypoints {
            if !entrypoints.contains(ep.as_str()) {
                errors.push(ValidationError::UnknownEntrypoint {
                    router: router.name.clone(),
                    entrypoint: ep.clone(),
                });
            }
        }

        let mut has_auth = false;
        let mut retries = 0;
        for name in &router.middlewares {
            match middlewares.get(name.as_str()) {
                None => errors.push(ValidationError::UnknownMiddleware {
                    router: router.name.clone(),
                    middleware: name.clone(),
                }),
                Some(MiddlewareSpec::Auth(_)) => has_auth = true,
                Some(MiddlewareSpec::Retry(_)) => retries += 1,
                Some(MiddlewareSpec::CircuitBreaker(cb)) => {
                    match breakers.get(router.service.as_str()) {
                        Some((first, existing)) if *first != name.as_str() && *existing != cb => {
                            errors.push(ValidationError::ConflictingBreakers {
                                service: router.service.clone(),
                                first: first.to_string(),
                                second: name.clone(),
                            });
                        }
                        Some(_) => {}
                        None => {
                            breakers.insert(router.service.as_str(), (name.as_str(), cb));
                        }
                    }
                }
                Some(_) => {}
            }
        }
        if retries > 1 {
            errors.push(invalid(
                format!("routers.{}.middlewares", router.name),
                "at most one retry middleware per router",
            ));
        }

        match InternalService::parse(&router.service) {
            Some(internal) => {
                if internal.requires_auth() && !has_auth {
                    errors.push(ValidationError::UnauthenticatedInternal {
                        router: router.name.clone(),
                        service: router.service.clone(),
                    });
                }
                if internal == InternalService::Prometheus && !static_config.metrics.prometheus {
                    errors.push(invalid(
                        format!("routers.{}.service", router.name),
                        "prometheus@internal requires metrics.prometheus = true",
                    ));
                }
            }
            None if !services.contains(router.service.as_str()) => {
                errors.push(ValidationError::UnknownService {
                    router: router.name.clone(),
                    service: router.service.clone(),
                });
            }
            None => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn index_by_name<'a>(
    names: impl Iterator<Item = &'a str>,
    kind: &'static str,
    errors: &mut Vec<ValidationError>,
) -> HashSet<&'a str> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            errors.push(ValidationError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
    }
    seen
}

fn validate_router_shape(router: &RouterConfig, errors: &mut Vec<ValidationError>) {
    let field = |f: &str| format!("routers.{}.{}", router.name, f);

    if router.path.is_some() && router.path_prefix.is_some() {
        errors.push(invalid(field("path"), "path and path_prefix are mutually exclusive"));
    }
    for (name, value) in [("path", &router.path), ("path_prefix", &router.path_prefix)] {
        if let Some(p) = value {
            if !p.starts_with('/') {
                errors.push(invalid(field(name), "must start with '/'"));
            }
        }
    }
    if let Some(host) = &router.host {
        let bare = host.strip_prefix("*.").unwrap_or(host);
        if bare.is_empty() || bare.contains('*') {
            errors.push(invalid(field("host"), format!("invalid host pattern '{}'", host)));
        }
    }
    if router.timeout_ms == Some(0) {
        errors.push(invalid(field("timeout_ms"), "must be greater than 0"));
    }
}

fn validate_service(service: &ServiceConfig, errors: &mut Vec<ValidationError>) {
    let field = |f: &str| format!("services.{}.{}", service.name, f);

    if InternalService::parse(&service.name).is_some() || service.name.ends_with("@internal") {
        errors.push(invalid(field("name"), "the @internal suffix is reserved"));
    }
    if service.backends.is_empty() {
        errors.push(invalid(field("backends"), "at least one backend is required"));
    }
    let mut addresses = HashSet::new();
    for backend in &service.backends {
        if SocketAddr::from_str(&backend.address).is_err() {
            errors.push(invalid(
                field("backends"),
                format!("'{}' is not a socket address", backend.address),
            ));
        }
        if !addresses.insert(backend.address.as_str()) {
            errors.push(invalid(
                field("backends"),
                format!("duplicate backend '{}'", backend.address),
            ));
        }
        if service.load_balancer == LoadBalancerPolicy::Weighted && backend.weight == 0 {
            errors.push(invalid(
                field("backends"),
                format!("backend '{}' has weight 0", backend.address),
            ));
        }
    }

    let hc = &service.health_check;
    if hc.enabled {
        if !hc.path.starts_with('/') {
            errors.push(invalid(field("health_check.path"), "must start with '/'"));
        }
        if hc.interval_secs == 0 || hc.timeout_secs == 0 {
            errors.push(invalid(
                field("health_check"),
                "interval_secs and timeout_secs must be greater than 0",
            ));
        }
    }
    if hc.healthy_threshold == 0 || hc.unhealthy_threshold == 0 {
        errors.push(invalid(field("health_check"), "thresholds must be at least 1"));
    }
    if service.response_timeout_ms == Some(0) {
        errors.push(invalid(field("response_timeout_ms"), "must be greater than 0"));
    }
}

fn validate_middleware(name: &str, spec: &MiddlewareSpec, errors: &mut Vec<ValidationError>) {
    let field = |f: &str| format!("middlewares.{}.{}", name, f);

    match spec {
        MiddlewareSpec::RateLimit(rl) => {
            if rl.average == 0 || rl.period_secs == 0 {
                errors.push(invalid(field("average"), "average and period_secs must be greater than 0"));
            }
            if rl.burst == 0 {
                errors.push(invalid(field("burst"), "must be at least 1"));
            }
            if rl.max_keys == 0 {
                errors.push(invalid(field("max_keys"), "must be greater than 0"));
            }
            if matches!(rl.source.ipv4_prefix, Some(p) if p > 32) {
                errors.push(invalid(field("source.ipv4_prefix"), "must be at most 32"));
            }
            if matches!(rl.source.ipv6_prefix, Some(p) if p > 128) {
                errors.push(invalid(field("source.ipv6_prefix"), "must be at most 128"));
            }
            if let Some(header) = &rl.source.request_header {
                if HeaderName::from_str(header).is_err() {
                    errors.push(invalid(field("source.request_header"), "not a valid header name"));
                }
            }
        }
        MiddlewareSpec::CircuitBreaker(cb) => {
            if !(cb.ratio_threshold > 0.0 && cb.ratio_threshold <= 1.0) {
                errors.push(invalid(field("ratio_threshold"), "must be in (0, 1]"));
            }
            if cb.window_secs == 0 || cb.check_period_secs == 0 {
                errors.push(invalid(
                    field("window_secs"),
                    "window_secs and check_period_secs must be greater than 0",
                ));
            }
            if cb.half_open_trials == 0 {
                errors.push(invalid(field("half_open_trials"), "must be at least 1"));
            }
        }
        MiddlewareSpec::Retry(retry) => {
            if retry.attempts == 0 {
                errors.push(invalid(field("attempts"), "must be at least 1"));
            }
            for method in &retry.methods {
                if Method::from_str(method).is_err() {
                    errors.push(invalid(field("methods"), format!("invalid method '{}'", method)));
                }
            }
            for status in &retry.retry_on {
                if !(500..=599).contains(status) {
                    errors.push(invalid(field("retry_on"), format!("{} is not a 5xx status", status)));
                }
            }
            if let Some(ratio) = retry.budget_ratio {
                if !(ratio > 0.0 && ratio <= 1.0) {
                    errors.push(invalid(field("budget_ratio"), "must be in (0, 1]"));
                }
            }
        }
        MiddlewareSpec::Cors(cors) => {
            if cors.allow_credentials && cors.allow_origins.iter().any(|o| o == "*") {
                errors.push(invalid(
                    field("allow_origins"),
                    "'*' cannot be combined with allow_credentials",
                ));
            }
            for method in &cors.allow_methods {
                if Method::from_str(method).is_err() {
                    errors.push(invalid(field("allow_methods"), format!("invalid method '{}'", method)));
                }
            }
        }
        MiddlewareSpec::Compress(c) => {
            if c.min_size > c.max_size {
                errors.push(invalid(field("min_size"), "must not exceed max_size"));
            }
        }
        MiddlewareSpec::Headers(h) => {
            for header in h.request.keys().chain(h.response.keys()) {
                if HeaderName::from_str(header).is_err() {
                    errors.push(invalid(field("headers"), format!("invalid header name '{}'", header)));
                }
            }
        }
        MiddlewareSpec::Auth(auth) => {
            if auth.bearer_tokens.iter().all(|t| t.is_empty()) {
                errors.push(invalid(field("bearer_tokens"), "at least one token is required"));
            }
        }
    }
}
