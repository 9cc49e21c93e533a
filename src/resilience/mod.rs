//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → circuit_breaker.rs (fail fast while the service's circuit is open)
//!     → timeouts.rs (per-attempt and per-route deadlines)
//!     → On failure: retries.rs (retry idempotent-safe requests, backoff.rs)
//! ```
//!
//! # Design Decisions
//! - Every backend call has a deadline
//! - Retries only for methods the route's retry middleware lists
//! - One breaker per service, fed by every attempt

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;
