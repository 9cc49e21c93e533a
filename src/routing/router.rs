//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes in specificity order
//! - Look up matching route for request
//! - Return matched route or explicit no-match
//!
//! # Ordering
//! 1. explicit `priority`, higher first
//! 2. exact host, then wildcard host, then no host
//! 3. exact path, then prefix, then no path
//! 4. longer path first
//! 5. declaration order
//!
//! Immutable after construction; a reload builds a new router.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;

use crate::config::schema::RouterConfig;
use crate::middleware::Chain;
use crate::routing::matcher::{AndMatcher, EntrypointMatcher, HostMatcher, Matcher, PathMatcher};
use crate::service::{InternalService, Service};

/// Where a matched request goes.
#[derive(Debug, Clone)]
pub enum Target {
    Service(Arc<Service>),
    Internal(InternalService),
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Service(s) => s.name(),
            Target::Internal(i) => i.name(),
        }
    }
}

type SortKey = (Reverse<u32>, Reverse<u8>, Reverse<u8>, Reverse<usize>, usize);

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub target: Target,
    pub chain: Chain,
    /// Deadline for the whole request, retries included.
    pub timeout: Duration,
    matcher: AndMatcher,
    rule: String,
    key: SortKey,
}

impl Route {
    /// Compile a route from its configuration. `index` is the declaration
    /// position used as the final tie-breaker.
    pub fn new(index: usize, config: &RouterConfig, target: Target, chain: Chain, timeout: Duration) -> Self {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        let mut rule = Vec::new();

        let host = config.host.as_deref().map(HostMatcher::new);
        let path = match (&config.path, &config.path_prefix) {
            (Some(p), _) => Some(PathMatcher::Exact(p.clone())),
            (None, Some(p)) => Some(PathMatcher::Prefix(p.clone())),
            (None, None) => None,
        };

        let key = (
            Reverse(config.priority),
            Reverse(host.as_ref().map_or(0, |h| h.rank())),
            Reverse(path.as_ref().map_or(0, |p| p.rank())),
            Reverse(path.as_ref().map_or(0, |p| p.len())),
            index,
        );

        if !config.entrypoints.is_empty() || config.tls {
            matchers.push(Box::new(EntrypointMatcher::new(
                config.entrypoints.clone(),
                config.tls,
            )));
        }
        if let Some(h) = host {
            rule.push(format!("Host({})", config.host.as_deref().unwrap_or_default()));
            matchers.push(Box::new(h));
        }
        if let Some(p) = path {
            match &p {
                PathMatcher::Exact(s) => rule.push(format!("Path({})", s)),
                PathMatcher::Prefix(s) => rule.push(format!("PathPrefix({})", s)),
            }
            matchers.push(Box::new(p));
        }

        Self {
            name: config.name.clone(),
            target,
            chain,
            timeout,
            matcher: AndMatcher::new(matchers),
            rule: if rule.is_empty() {
                "*".to_string()
            } else {
                rule.join(" && ")
            },
            key,
        }
    }

    /// Human-readable matching rule, for the dashboard.
    pub fn rule(&self) -> &str {
        &self.rule
    }

    pub fn priority(&self) -> u32 {
        self.key.0 .0
    }

    pub fn matches(&self, req: &Request<Body>) -> bool {
        self.matcher.matches(req)
    }
}

/// Ordered route table.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Arc<Route>>,
}

impl Router {
    pub fn new(mut routes: Vec<Route>) -> Self {
        routes.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    /// First route, in specificity order, whose matchers all pass.
    pub fn match_request(&self, req: &Request<Body>) -> Option<&Arc<Route>> {
        self.routes.iter().find(|r| r.matches(req))
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, host: Option<&str>, prefix: Option<&str>, path: Option<&str>) -> RouterConfig {
        RouterConfig {
            name: name.into(),
            entrypoints: Vec::new(),
            host: host.map(Into::into),
            path_prefix: prefix.map(Into::into),
            path: path.map(Into::into),
            service: "ping@internal".into(),
            middlewares: Vec::new(),
            tls: false,
            priority: 0,
            timeout_ms: None,
        }
    }

    fn router(configs: Vec<RouterConfig>) -> Router {
        Router::new(
            configs
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    Route::new(
                        i,
                        c,
                        Target::Internal(InternalService::Ping),
                        Chain::default(),
                        Duration::from_secs(30),
                    )
                })
                .collect(),
        )
    }

    fn request(host: &str, path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("host", host)
            .body(Body::empty())
            .unwrap()
    }

    fn matched(router: &Router, host: &str, path: &str) -> Option<String> {
        router
            .match_request(&request(host, path))
            .map(|r| r.name.clone())
    }

    #[test]
    fn most_specific_route_wins_regardless_of_declaration_order() {
        let r = router(vec![
            config("catch-all", None, Some("/"), None),
            config("wildcard", Some("*.example.com"), Some("/"), None),
            config("exact-host", Some("api.example.com"), Some("/"), None),
            config("exact-host-v1", Some("api.example.com"), Some("/v1"), None),
            config("exact-path", Some("api.example.com"), None, Some("/v1/health")),
        ]);

        assert_eq!(matched(&r, "api.example.com", "/v1/health").as_deref(), Some("exact-path"));
        assert_eq!(matched(&r, "api.example.com", "/v1/users").as_deref(), Some("exact-host-v1"));
        assert_eq!(matched(&r, "api.example.com", "/v2").as_deref(), Some("exact-host"));
        assert_eq!(matched(&r, "www.example.com", "/v1").as_deref(), Some("wildcard"));
        assert_eq!(matched(&r, "other.org", "/v1").as_deref(), Some("catch-all"));
    }

    #[test]
    fn ties_resolved_by_declaration_order() {
        let r = router(vec![
            config("first", None, Some("/a"), None),
            config("second", None, Some("/a"), None),
        ]);
        assert_eq!(matched(&r, "x", "/a/b").as_deref(), Some("first"));
    }

    #[test]
    fn explicit_priority_beats_specificity() {
        let mut low = config("specific", Some("api.example.com"), Some("/v1"), None);
        low.priority = 0;
        let mut high = config("broad", None, Some("/"), None);
        high.priority = 10;

        let r = router(vec![low, high]);
        assert_eq!(matched(&r, "api.example.com", "/v1").as_deref(), Some("broad"));
    }

    #[test]
    fn no_match_is_explicit() {
        let r = router(vec![config("api", Some("api.example.com"), None, None)]);
        assert!(matched(&r, "other.example.com", "/").is_none());
        assert_eq!(r.routes()[0].rule(), "Host(api.example.com)");
    }
}
