//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (entrypoint, host, path)
//!     → router.rs (ordered route lookup)
//!     → matcher.rs (host, path and entrypoint checks)
//!     → first matching Route, or None (404)
//!
//! Route Compilation (on every snapshot):
//!     RouterConfig[]
//!     → Compile matchers
//!     → Sort by priority, then specificity, then declaration order
//!     → Router stored inside the Snapshot
//! ```
//!
//! # Design Decisions
//! - No regex in hot path (exact, wildcard and prefix matching only)
//! - Ordering is total, so a request maps to one route per snapshot
//! - First match wins

pub mod matcher;
pub mod router;
