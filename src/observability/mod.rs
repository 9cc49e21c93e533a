//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! request pipeline, health loops, breakers, config store
//!     → logging.rs    (tracing subscriber, structured events)
//!     → metrics.rs    (Prometheus facade, write-only)
//!     → collector.rs  (in-process aggregates the dashboard and
//!                      autoscaler read back)
//!     → access_log.rs (one event per client request)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through access log and trace spans
//! - Metric updates are cheap (atomic increments, sharded maps)

pub mod access_log;
pub mod collector;
pub mod logging;
pub mod metrics;

pub use collector::MetricsCollector;
