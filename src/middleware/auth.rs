//! Bearer token authentication.

use axum::body::Body;
use axum::http::{header, Request};

use crate::config::schema::AuthConfig;
use crate::error::ProxyError;

#[derive(Debug)]
pub struct BearerAuth {
    tokens: Vec<String>,
    realm: String,
    remove_header: bool,
}

impl BearerAuth {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            tokens: config
                .bearer_tokens
                .iter()
                .filter(|t| !t.is_empty())
                .cloned()
                .collect(),
            realm: config.realm.clone(),
            remove_header: config.remove_header,
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Accept the request if it carries one of the configured tokens.
    pub fn check(&self, request: &mut Request<Body>) -> Result<(), ProxyError> {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        let accepted = presented
            .map(|token| self.tokens.iter().any(|t| constant_time_eq(t.as_bytes(), token.as_bytes())))
            .unwrap_or(false);

        if !accepted {
            return Err(ProxyError::Unauthorized {
                realm: self.realm.clone(),
            });
        }

        if self.remove_header {
            request.headers_mut().remove(header::AUTHORIZATION);
        }
        Ok(())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
