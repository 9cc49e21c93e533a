//! Edge reverse proxy library.
//!
//! Routes requests by host and path to load-balanced backend services,
//! guarded by rate limiting, circuit breaking, retries and health checks.
//! Routing tables are immutable snapshots swapped atomically on reload.

pub mod admin;
pub mod autoscale;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod middleware;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod service;

pub use config::{ConfigStore, DynamicConfig, StaticConfig};
pub use error::ProxyError;
pub use http::ProxyService;
pub use lifecycle::Shutdown;
