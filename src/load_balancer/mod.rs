//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → service identified
//!     → pool.rs (the service's backends)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through backends)
//!         - weighted.rs (smooth weighted round-robin)
//!     → backend.rs (in-flight guard)
//!     → Return backend or "no healthy backend"
//! ```
//!
//! # Design Decisions
//! - Backends own their health; selectors only read it
//! - Algorithm selection per service
//! - Unhealthy backends excluded from selection

use std::fmt::Debug;
use std::sync::Arc;

pub mod backend;
pub mod pool;
pub mod round_robin;
pub mod weighted;

use backend::Backend;

/// A backend selection strategy.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Pick the next healthy backend, or `None` if none is healthy.
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}
