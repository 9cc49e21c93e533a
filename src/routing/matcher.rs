//! Route matching logic.
//!
//! # Responsibilities
//! - Match host (exact or `*.` wildcard, case-insensitive, port ignored)
//! - Match path (prefix or exact, case-sensitive)
//! - Match the entrypoint the request arrived on, and whether it was TLS
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching
//! - Each matcher reports a rank so the router can order routes by
//!   specificity

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request};

/// Entrypoint a request was accepted on. Inserted as a request extension
/// by the listener.
#[derive(Debug, Clone)]
pub struct EntrypointInfo {
    pub name: Arc<str>,
    pub tls: bool,
}

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<Body>) -> bool;
}

/// Host of the request, lowercased, without port. Taken from the `Host`
/// header, or the URI authority for HTTP/2.
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    let raw = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))?;
    Some(strip_port(raw).to_ascii_lowercase())
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // [v6]:port
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub enum HostMatcher {
    /// `api.example.com`
    Exact(String),
    /// `*.example.com`, stored as `.example.com`
    Wildcard(String),
}

impl HostMatcher {
    /// Create a new host matcher.
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: &str) -> Self {
        let host = host.to_ascii_lowercase();
        match host.strip_prefix('*') {
            Some(suffix) => HostMatcher::Wildcard(suffix.to_string()),
            None => HostMatcher::Exact(host),
        }
    }

    /// Exact hosts outrank wildcards.
    pub fn rank(&self) -> u8 {
        match self {
            HostMatcher::Exact(_) => 2,
            HostMatcher::Wildcard(_) => 1,
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        let Some(host) = request_host(req) else {
            return false;
        };
        match self {
            HostMatcher::Exact(expected) => host == *expected,
            HostMatcher::Wildcard(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
        }
    }
}

/// Matches the request path.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    Prefix(String),
    Exact(String),
}

impl PathMatcher {
    /// Exact paths outrank prefixes.
    pub fn rank(&self) -> u8 {
        match self {
            PathMatcher::Exact(_) => 2,
            PathMatcher::Prefix(_) => 1,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PathMatcher::Exact(p) | PathMatcher::Prefix(p) => p.len(),
        }
    }
}

impl Matcher for PathMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        let path = req.uri().path();
        match self {
            PathMatcher::Exact(expected) => path == expected,
            PathMatcher::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

/// Matches the entrypoint the request arrived on.
#[derive(Debug, Clone)]
pub struct EntrypointMatcher {
    /// Empty = any entrypoint.
    names: Vec<String>,
    tls_only: bool,
}

impl EntrypointMatcher {
    pub fn new(names: Vec<String>, tls_only: bool) -> Self {
        Self { names, tls_only }
    }
}

impl Matcher for EntrypointMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        let info = req.extensions().get::<EntrypointInfo>();
        if self.tls_only && !info.map_or(false, |i| i.tls) {
            return false;
        }
        if self.names.is_empty() {
            return true;
        }
        info.map_or(false, |i| self.names.iter().any(|n| *n == *i.name))
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        // All matchers must pass (AND)
        self.matchers.iter().all(|m| m.matches(req))
    }
}
