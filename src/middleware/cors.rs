//! Cross-origin resource sharing.
//!
//! Preflight requests (`OPTIONS` with `Origin` and
//! `Access-Control-Request-Method`) are answered here with 204 and never
//! reach the backend. Simple requests get the allow headers added on the
//! way out.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};

use crate::config::schema::CorsConfig;

#[derive(Debug)]
pub struct Cors {
    any_origin: bool,
    origins: Vec<String>,
    allow_methods: Option<HeaderValue>,
    allow_headers: Option<HeaderValue>,
    expose_headers: Option<HeaderValue>,
    allow_credentials: bool,
    max_age: Option<HeaderValue>,
}

fn joined(values: &[String]) -> Option<HeaderValue> {
    if values.is_empty() {
        return None;
    }
    HeaderValue::from_str(&values.join(", ")).ok()
}

impl Cors {
    pub fn from_config(config: &CorsConfig) -> Self {
        Self {
            any_origin: config.allow_origins.iter().any(|o| o == "*"),
            origins: config
                .allow_origins
                .iter()
                .map(|o| o.to_ascii_lowercase())
                .collect(),
            allow_methods: joined(&config.allow_methods),
            allow_headers: joined(&config.allow_headers),
            expose_headers: joined(&config.expose_headers),
            allow_credentials: config.allow_credentials,
            max_age: config.max_age_secs.map(HeaderValue::from),
        }
    }

    fn allowed_origin(&self, origin: &HeaderValue) -> Option<HeaderValue> {
        if self.any_origin {
            return Some(HeaderValue::from_static("*"));
        }
        let value = origin.to_str().ok()?.to_ascii_lowercase();
        self.origins
            .iter()
            .any(|o| *o == value)
            .then(|| origin.clone())
    }

    pub fn is_preflight<B>(request: &Request<B>) -> bool {
        request.method() == Method::OPTIONS
            && request.headers().contains_key(header::ORIGIN)
            && request
                .headers()
                .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
    }

    /// Answer a preflight request.
    pub fn preflight<B>(&self, request: &Request<B>) -> Response<Body> {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;

        let Some(origin) = request.headers().get(header::ORIGIN) else {
            return response;
        };
        let Some(allowed) = self.allowed_origin(origin) else {
            tracing::debug!(origin = ?origin, "CORS preflight from disallowed origin");
            return response;
        };

        let headers = response.headers_mut();
        self.common_headers(headers, allowed);
        if let Some(methods) = &self.allow_methods {
            headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, methods.clone());
        }
        match &self.allow_headers {
            Some(allow) => {
                headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allow.clone());
            }
            None => {
                if let Some(requested) = request.headers().get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
                    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
                }
            }
        }
        if let Some(max_age) = &self.max_age {
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, max_age.clone());
        }
        response
    }

    /// Decorate an actual response for the request's origin.
    pub fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        let Some(allowed) = origin.and_then(|o| self.allowed_origin(o)) else {
            return;
        };
        self.common_headers(headers, allowed);
        if let Some(expose) = &self.expose_headers {
            headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, expose.clone());
        }
    }

    fn common_headers(&self, headers: &mut HeaderMap, allowed: HeaderValue) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allowed);
        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if !self.any_origin {
            headers.append(header::VARY, HeaderValue::from_static("origin"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cors() -> Cors {
        Cors::from_config(&CorsConfig {
            allow_origins: vec!["https://app.example.com".into()],
            expose_headers: vec!["x-trace".into()],
            max_age_secs: Some(600),
            ..Default::default()
        })
    }

    fn preflight_request(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn preflight_for_allowed_origin() {
        let req = preflight_request("https://app.example.com");
        assert!(Cors::is_preflight(&req));

        let resp = cors().preflight(&req);
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_MAX_AGE], "600");
        assert!(resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    }

    #[test]
    fn preflight_for_unknown_origin_has_no_grant() {
        let resp = cors().preflight(&preflight_request("https://evil.example"));
        assert!(!resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[test]
    fn simple_response_is_decorated() {
        let mut headers = HeaderMap::new();
        let origin = HeaderValue::from_static("https://APP.example.com");
        cors().apply(Some(&origin), &mut headers);
        assert_eq!(headers[header::ACCESS_CONTROL_EXPOSE_HEADERS], "x-trace");
        assert_eq!(headers[header::VARY], "origin");

        let mut untouched = HeaderMap::new();
        cors().apply(None, &mut untouched);
        assert!(untouched.is_empty());
    }
}
