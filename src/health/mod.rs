//! Backend eligibility.
//!
//! # Data Flow
//! ```text
//! HealthSupervisor (active.rs), one task per service of the current snapshot:
//!     every interval_secs: GET <backend><path> with timeout_secs
//!     → 2xx counts as success, anything else as failure
//!     → state.rs counters
//!
//! ProxyService (passive.rs), only with health_check.passive:
//!     network error, timeout, 502/503/504 → failure, else success
//!     → state.rs counters
//!
//! state.rs:
//!     HEALTHY  --unhealthy_threshold failures-->  UNHEALTHY
//!     UNHEALTHY --healthy_threshold successes-->  HEALTHY
//! ```
//!
//! Load balancers read the state; only this module writes it. Backends start
//! HEALTHY, and a reload that keeps a backend keeps its state.

pub mod active;
pub mod passive;
pub mod state;
