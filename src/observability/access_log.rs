//! Structured access log.
//!
//! One event per client request on the `access_log` target. Selected
//! request headers can be included; credentials are always redacted.

use std::time::Duration;

use axum::http::HeaderMap;

use crate::config::schema::AccessLogConfig;

const REDACTED: &str = "<redacted>";

const SENSITIVE: &[&str] = &["authorization", "cookie", "proxy-authorization", "set-cookie"];

fn is_sensitive(name: &str) -> bool {
    SENSITIVE.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Fields of one access log line.
#[derive(Debug, Clone, Default)]
pub struct AccessLogEntry<'a> {
    pub request_id: &'a str,
    pub client: String,
    pub entrypoint: &'a str,
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub route: &'a str,
    pub service: &'a str,
    pub backend: Option<String>,
    pub status: u16,
    pub outcome: &'static str,
    pub attempts: u32,
    pub latency: Duration,
}

/// Emits access log events according to the static configuration.
#[derive(Debug, Clone, Default)]
pub struct AccessLog {
    enabled: bool,
    keep_headers: Vec<String>,
}

impl AccessLog {
    pub fn from_config(config: &AccessLogConfig) -> Self {
        Self {
            enabled: config.enabled,
            keep_headers: config
                .keep_headers
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// `name=value` pairs of the kept headers, credentials redacted.
    pub fn header_fields(&self, headers: &HeaderMap) -> String {
        let mut out = Vec::new();
        for name in &self.keep_headers {
            for value in headers.get_all(name.as_str()) {
                let value = if is_sensitive(name) {
                    REDACTED
                } else {
                    value.to_str().unwrap_or("<binary>")
                };
                out.push(format!("{}={}", name, value));
            }
        }
        out.join("; ")
    }

    pub fn log(&self, entry: &AccessLogEntry<'_>, headers: &str) {
        if !self.enabled {
            return;
        }
        tracing::info!(
            target: "access_log",
            request_id = entry.request_id,
            client = %entry.client,
            entrypoint = entry.entrypoint,
            method = entry.method,
            host = entry.host,
            path = entry.path,
            route = entry.route,
            service = entry.service,
            backend = entry.backend.as_deref().unwrap_or("-"),
            status = entry.status,
            outcome = entry.outcome,
            attempts = entry.attempts,
            latency_ms = entry.latency.as_secs_f64() * 1000.0,
            headers,
        );
    }
}
