//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client token buckets)
//!     → Pass to the rest of the middleware chain
//! ```
//!
//! # Design Decisions
//! - Bounded state: tracked client keys are evicted when idle
//! - Rejections never reach a backend and are never retried

pub mod rate_limit;
