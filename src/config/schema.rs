//! Configuration schema definitions.
//!
//! Two documents configure the proxy:
//! - [`StaticConfig`]: process-wide settings read once at startup
//!   (entrypoints, logging, metrics, API, providers, autoscaling).
//! - [`DynamicConfig`]: routers, services and middlewares. Watched and
//!   reloaded atomically while the proxy runs.
//!
//! All types derive Serde traits for deserialization from TOML files, and
//! every optional knob has a default so minimal documents stay small.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Static configuration
// ---------------------------------------------------------------------------

/// Root of the static (startup-only) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticConfig {
    /// Listening entrypoints.
    pub entrypoints: Vec<EntrypointConfig>,

    /// Process log settings.
    pub log: LogConfig,

    /// Per-request access log.
    pub access_log: AccessLogConfig,

    /// Metrics export and in-process aggregation.
    pub metrics: MetricsConfig,

    /// Internal services (ping, dashboard API, Prometheus export).
    pub api: ApiConfig,

    /// Dynamic configuration providers.
    pub providers: ProvidersConfig,

    /// Timeout defaults.
    pub timeouts: TimeoutConfig,

    /// Body size limits.
    pub limits: LimitsConfig,

    /// Autoscaling control loop.
    pub autoscaling: AutoscalingConfig,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            entrypoints: vec![
                EntrypointConfig {
                    name: "web".to_string(),
                    address: "0.0.0.0:8080".to_string(),
                    tls: None,
                },
                EntrypointConfig {
                    name: "admin".to_string(),
                    address: "127.0.0.1:8081".to_string(),
                    tls: None,
                },
            ],
            log: LogConfig::default(),
            access_log: AccessLogConfig::default(),
            metrics: MetricsConfig::default(),
            api: ApiConfig::default(),
            providers: ProvidersConfig::default(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            autoscaling: AutoscalingConfig::default(),
        }
    }
}

/// A named listening address.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntrypointConfig {
    /// Name routers refer to.
    pub name: String,

    /// Bind address (e.g., "0.0.0.0:8080").
    pub address: String,

    /// Optional TLS termination.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// TLS configuration for an entrypoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Output format of the process log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Process log settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub level: String,

    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Access log settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessLogConfig {
    pub enabled: bool,

    /// Request headers copied into each access log line. Sensitive headers
    /// are redacted even when listed.
    pub keep_headers: Vec<String>,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_headers: Vec::new(),
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder and serve `prometheus@internal`.
    pub prometheus: bool,

    /// Age after which latency samples leave the rolling window.
    pub latency_window_secs: u64,

    /// Hard cap on retained latency samples per route or service.
    pub max_samples: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prometheus: true,
            latency_window_secs: 60,
            max_samples: 10_000,
        }
    }
}

/// Internal services configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Entrypoint the implicit internal routes are attached to.
    pub entrypoint: String,

    /// Register `/ping` -> `ping@internal`.
    pub ping: bool,

    /// Register `/api` -> `api@internal` (authenticated).
    pub dashboard: bool,

    /// Bearer tokens accepted by the implicit dashboard and metrics routes.
    pub bearer_tokens: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            entrypoint: "admin".to_string(),
            ping: true,
            dashboard: false,
            bearer_tokens: Vec::new(),
        }
    }
}

/// Providers of dynamic configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub file: Option<FileProviderConfig>,
}

/// File provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileProviderConfig {
    /// Path of the dynamic configuration document.
    pub path: String,

    /// Reload when the file changes.
    #[serde(default = "default_true")]
    pub watch: bool,
}

fn default_true() -> bool {
    true
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Default per-route deadline (whole request including retries) in seconds.
    pub request_secs: u64,

    /// Idle pooled connection timeout in seconds.
    pub idle_secs: u64,

    /// Grace period for draining in-flight requests at shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            idle_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest request body buffered so it can be replayed on retry.
    pub max_retry_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_retry_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Autoscaling control loop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AutoscalingConfig {
    pub enabled: bool,

    /// Evaluation interval in seconds.
    pub tick_secs: u64,

    /// Minimum gap between two decisions of the same direction.
    pub cooldown_secs: u64,

    /// Scale-out trigger: average CPU utilization in percent.
    pub cpu_percent: f64,

    /// Scale-out trigger: requests per backend instance over the request window.
    pub requests_per_instance: f64,

    /// Scale-out trigger: p95 latency in milliseconds.
    pub p95_latency_ms: u64,

    /// Window over which request counts are taken.
    pub request_window_secs: u64,

    /// Scale-in fires when every signal is below `ratio × trigger`.
    pub scale_in_ratio: f64,

    /// How long the low-utilization condition must hold before scale-in.
    pub scale_in_sustain_secs: u64,

    /// Instances added or removed per decision.
    pub step: u32,

    pub min_capacity: u32,
    pub max_capacity: u32,
}

impl Default for AutoscalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tick_secs: 15,
            cooldown_secs: 60,
            cpu_percent: 70.0,
            requests_per_instance: 1000.0,
            p95_latency_ms: 2000,
            request_window_secs: 60,
            scale_in_ratio: 0.5,
            scale_in_sustain_secs: 300,
            step: 1,
            min_capacity: 1,
            max_capacity: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Dynamic configuration
// ---------------------------------------------------------------------------

/// Root of the dynamic (hot-reloadable) configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DynamicConfig {
    /// Routers in declaration order.
    pub routers: Vec<RouterConfig>,

    /// Backend services.
    pub services: Vec<ServiceConfig>,

    /// Named middlewares routers can reference.
    pub middlewares: Vec<MiddlewareConfig>,
}

/// Router mapping matching requests to a service through a middleware chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Router identifier for logging/metrics.
    pub name: String,

    /// Entrypoints this router listens on (empty = all).
    #[serde(default)]
    pub entrypoints: Vec<String>,

    /// Host to match: exact (`api.example.com`) or wildcard (`*.example.com`).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Exact path to match. Mutually exclusive with `path_prefix`.
    pub path: Option<String>,

    /// Service name, or an internal service (`api@internal`,
    /// `prometheus@internal`, `ping@internal`).
    pub service: String,

    /// Middleware names applied in order.
    #[serde(default)]
    pub middlewares: Vec<String>,

    /// Only match requests received on a TLS entrypoint.
    #[serde(default)]
    pub tls: bool,

    /// Explicit priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// Deadline for the whole request including retries.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Load-balancing policy of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerPolicy {
    #[default]
    RoundRobin,
    Weighted,
}

/// Logical backend target.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServiceConfig {
    pub name: String,

    #[serde(default)]
    pub load_balancer: LoadBalancerPolicy,

    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Per-attempt response deadline.
    #[serde(default)]
    pub response_timeout_ms: Option<u64>,
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Backend address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Also count live request failures toward the thresholds.
    pub passive: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/ping".to_string(),
            interval_secs: 30,
            timeout_secs: 10,
            healthy_threshold: 2,
            unhealthy_threshold: 3,
            passive: false,
        }
    }
}

/// A named middleware.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MiddlewareConfig {
    pub name: String,

    #[serde(flatten)]
    pub spec: MiddlewareSpec,
}

/// Middleware variants, tagged by `type`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MiddlewareSpec {
    RateLimit(RateLimitConfig),
    Cors(CorsConfig),
    CircuitBreaker(CircuitBreakerConfig),
    Retry(RetryConfig),
    Compress(CompressConfig),
    Headers(HeadersConfig),
    Auth(AuthConfig),
}

impl MiddlewareSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            MiddlewareSpec::RateLimit(_) => "rate_limit",
            MiddlewareSpec::Cors(_) => "cors",
            MiddlewareSpec::CircuitBreaker(_) => "circuit_breaker",
            MiddlewareSpec::Retry(_) => "retry",
            MiddlewareSpec::Compress(_) => "compress",
            MiddlewareSpec::Headers(_) => "headers",
            MiddlewareSpec::Auth(_) => "auth",
        }
    }
}

/// Whether routes that share a service share rate-limit buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimiterScope {
    #[default]
    Service,
    Route,
}

/// Token bucket rate limiting.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Tokens added per `period_secs`.
    pub average: u32,

    /// Refill period in seconds.
    pub period_secs: u64,

    /// Bucket capacity.
    pub burst: u32,

    pub scope: LimiterScope,

    /// How the client key is derived.
    pub source: SourceCriterion,

    /// Upper bound on tracked keys.
    pub max_keys: usize,

    /// Keys idle this long are evicted first.
    pub idle_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            average: 100,
            period_secs: 1,
            burst: 50,
            scope: LimiterScope::Service,
            source: SourceCriterion::default(),
            max_keys: 65_536,
            idle_ttl_secs: 300,
        }
    }
}

/// Client key extraction strategy for rate limiting.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SourceCriterion {
    /// 0 = peer address; n = n-th entry from the right of X-Forwarded-For.
    pub ip_depth: usize,

    /// Group IPv4 clients by network prefix.
    pub ipv4_prefix: Option<u8>,

    /// Group IPv6 clients by network prefix.
    pub ipv6_prefix: Option<u8>,

    /// Key on this request header instead of the address.
    pub request_header: Option<String>,
}

/// CORS policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any.
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            allow_methods: vec!["GET".into(), "HEAD".into(), "POST".into(), "OPTIONS".into()],
            allow_headers: Vec::new(),
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: None,
        }
    }
}

/// Circuit breaker parameters for the service a route targets.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Open when the network- or server-error ratio exceeds this.
    pub ratio_threshold: f64,

    /// Sliding outcome window in seconds.
    pub window_secs: u64,

    /// Minimum interval between two ratio evaluations in seconds.
    pub check_period_secs: u64,

    /// Time spent OPEN before trials are admitted.
    pub fallback_duration_secs: u64,

    /// Longest HALF_OPEN phase before the breaker re-opens.
    pub recovery_duration_secs: u64,

    /// Outcomes required in the window before the ratio is evaluated.
    pub min_requests: u64,

    /// Concurrent trial calls admitted while HALF_OPEN.
    pub half_open_trials: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            ratio_threshold: 0.5,
            window_secs: 10,
            check_period_secs: 10,
            fallback_duration_secs: 10,
            recovery_duration_secs: 10,
            min_requests: 10,
            half_open_trials: 1,
        }
    }
}

/// Backoff schedule between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub attempts: u32,

    pub backoff: BackoffKind,

    /// First backoff delay in milliseconds.
    pub initial_interval_ms: u64,

    /// Backoff cap in milliseconds.
    pub max_interval_ms: u64,

    /// Methods considered idempotent-safe for this route.
    pub methods: Vec<String>,

    /// Backend statuses that trigger a retry.
    pub retry_on: Vec<u16>,

    /// Fraction of recent requests that may be retries (None = unlimited).
    pub budget_ratio: Option<f64>,

    /// Retries always allowed per budget window regardless of the ratio.
    pub min_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: BackoffKind::Exponential,
            initial_interval_ms: 100,
            max_interval_ms: 2000,
            methods: vec!["GET".into(), "HEAD".into(), "OPTIONS".into()],
            retry_on: vec![502, 503, 504],
            budget_ratio: None,
            min_retries: 10,
        }
    }
}

/// Response compression.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressConfig {
    /// Bodies smaller than this are sent as-is.
    pub min_size: usize,

    /// Bodies larger than this are streamed uncompressed.
    pub max_size: usize,

    /// Content-type prefixes never compressed.
    pub excluded_content_types: Vec<String>,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            min_size: 1024,
            max_size: 8 * 1024 * 1024,
            excluded_content_types: vec![
                "image/".into(),
                "video/".into(),
                "audio/".into(),
                "text/event-stream".into(),
                "application/gzip".into(),
            ],
        }
    }
}

/// Custom header rules. An empty value removes the header.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HeadersConfig {
    pub request: BTreeMap<String, String>,
    pub response: BTreeMap<String, String>,

    /// Add standard security response headers.
    pub security_headers: bool,
}

/// Bearer token authentication.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub bearer_tokens: Vec<String>,

    /// Realm advertised in `WWW-Authenticate`.
    pub realm: String,

    /// Strip the Authorization header before forwarding.
    pub remove_header: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bearer_tokens: Vec::new(),
            realm: "edge-proxy".to_string(),
            remove_header: false,
        }
    }
}
