//! Request handling and transformation.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers before forwarding
//! - Set X-Forwarded-For / -Proto / -Host and X-Request-Id
//! - Rewrite the URI to target the selected backend
//! - Buffer bodies of retryable requests so every attempt can replay them
//!
//! # Design Decisions
//! - The original `Host` header is passed through to the backend
//! - Incoming X-Forwarded-Proto/-Host are overwritten, X-Forwarded-For is
//!   appended to
//! - Bodies larger than the replay limit, or of unknown length, stream once
//!   and disable retries for that request

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use axum::body::{Body, HttpBody};
use axum::http::header::{self, HeaderName};
use axum::http::request::Parts;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{HeaderMap, HeaderValue, Request, Uri, Version};
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::ProxyError;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including those named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Request ID from the header set by the request-id layer.
pub fn request_id<B>(request: &Request<B>) -> Option<&str> {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
}

/// Set the forwarding headers for a request received from `client`.
pub fn set_forwarded_headers(headers: &mut HeaderMap, client: IpAddr, tls: bool, request_id: &str) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let client = client.to_string();
    let xff = if prior.is_empty() {
        client
    } else {
        format!("{}, {}", prior.join(", "), client)
    };
    if let Ok(value) = HeaderValue::from_str(&xff) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    headers.insert(
        X_FORWARDED_PROTO,
        HeaderValue::from_static(if tls { "https" } else { "http" }),
    );
    match headers.get(header::HOST).cloned() {
        Some(host) => {
            headers.insert(X_FORWARDED_HOST, host);
        }
        None => {
            headers.remove(X_FORWARDED_HOST);
        }
    }
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }
}

/// `uri` with scheme and authority replaced by the backend's.
pub fn backend_uri(uri: &Uri, backend: SocketAddr) -> Result<Uri, ProxyError> {
    let mut parts = uri.clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(
        Authority::from_str(&backend.to_string()).map_err(|e| ProxyError::BadRequest {
            reason: e.to_string(),
        })?,
    );
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    Uri::from_parts(parts).map_err(|e| ProxyError::BadRequest {
        reason: e.to_string(),
    })
}

/// Body of a request being forwarded, possibly more than once.
#[derive(Debug)]
pub enum RequestBody {
    /// Fully read; can be replayed for every attempt.
    Buffered(Bytes),
    /// Streamed; only the first attempt gets it.
    Once(Mutex<Option<Body>>),
}

impl RequestBody {
    /// Buffer the body when `replay` is requested and it fits in `limit`.
    ///
    /// `headers` are the client's, before hop-by-hop headers are stripped.
    pub async fn prepare(body: Body, headers: &HeaderMap, replay: bool, limit: usize) -> Result<Self, ProxyError> {
        if !replay || !fits(&body, headers, limit) {
            return Ok(RequestBody::Once(Mutex::new(Some(body))));
        }
        axum::body::to_bytes(body, limit)
            .await
            .map(RequestBody::Buffered)
            .map_err(|e| ProxyError::BadRequest {
                reason: e.to_string(),
            })
    }

    pub fn is_replayable(&self) -> bool {
        matches!(self, RequestBody::Buffered(_))
    }

    /// Body for the next attempt.
    pub fn take(&self) -> Body {
        match self {
            RequestBody::Buffered(bytes) => Body::from(bytes.clone()),
            RequestBody::Once(body) => body.lock().take().unwrap_or_else(Body::empty),
        }
    }
}

/// Exact length within `limit`. Chunked bodies, and HTTP/2 bodies sent
/// without a `Content-Length`, have no exact length.
fn fits(body: &Body, headers: &HeaderMap, limit: usize) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return false;
    }
    body.size_hint()
        .exact()
        .map_or(false, |len| len <= limit as u64)
}

/// Build the request for one attempt against `backend`.
///
/// `parts` must already carry the forwarding headers.
pub fn build_attempt(parts: &Parts, body: Body, backend: SocketAddr) -> Result<Request<Body>, ProxyError> {
    let mut request = Request::new(body);
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = backend_uri(&parts.uri, backend)?;
    // the backend client speaks HTTP/1.1
    *request.version_mut() = Version::HTTP_11;
    *request.headers_mut() = parts.headers.clone();
    Ok(request)
}
