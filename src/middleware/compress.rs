//! Gzip response compression.
//!
//! Encoding is delegated to tower-http's `CompressionLayer`, which handles
//! `Accept-Encoding` negotiation (q-values included), streams the encoded
//! body and rewrites `Content-Encoding`, `Content-Length` and `Vary`. This
//! module only decides which responses are worth compressing: a known length
//! inside `[min_size, max_size]` and a content type not on the excluded list.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, HttpBody};
use axum::http::{header, HeaderValue, Request, Response};
use tower::{Layer, ServiceExt};
use tower_http::compression::predicate::{NotForContentType, Predicate};
use tower_http::compression::CompressionLayer;

use crate::config::schema::CompressConfig;

/// Size and content-type gate for compression.
#[derive(Debug, Clone)]
pub struct Eligible {
    min_size: u64,
    max_size: u64,
    excluded: Arc<[String]>,
}

impl Predicate for Eligible {
    fn should_compress<B>(&self, response: &Response<B>) -> bool
    where
        B: HttpBody,
    {
        // gRPC framing carries its own compression
        if !NotForContentType::GRPC.should_compress(response) {
            return false;
        }
        let headers = response.headers();
        let length = response.body().size_hint().exact().or_else(|| {
            headers
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
        });
        let Some(length) = length else {
            return false;
        };
        if length < self.min_size || length > self.max_size {
            return false;
        }
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        !self.excluded.iter().any(|e| content_type.starts_with(e.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct Compress {
    layer: CompressionLayer<Eligible>,
}

impl Compress {
    pub fn from_config(config: &CompressConfig) -> Self {
        let eligible = Eligible {
            min_size: config.min_size as u64,
            max_size: config.max_size as u64,
            excluded: config
                .excluded_content_types
                .iter()
                .map(|c| c.to_ascii_lowercase())
                .collect(),
        };
        Self {
            layer: CompressionLayer::new().compress_when(eligible),
        }
    }

    /// Compress `response` for a client that sent `accept_encoding`.
    pub async fn apply(&self, accept_encoding: Option<&HeaderValue>, response: Response<Body>) -> Response<Body> {
        let Some(accept_encoding) = accept_encoding else {
            return response;
        };
        let mut request = Request::new(Body::empty());
        request
            .headers_mut()
            .insert(header::ACCEPT_ENCODING, accept_encoding.clone());

        let mut response = Some(response);
        let respond = tower::service_fn(move |_: Request<Body>| {
            std::future::ready(Ok::<_, Infallible>(response.take().unwrap_or_default()))
        });

        match self.layer.layer(respond).oneshot(request).await {
            Ok(compressed) => compressed.map(Body::new),
            Err(never) => match never {},
        }
    }
}
