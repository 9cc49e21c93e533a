//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     static config → logging/metrics → first snapshot → background tasks → entrypoints
//!
//! Shutdown (shutdown.rs):
//!     trigger → entrypoints stop accepting → in-flight requests drain → tasks aborted
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//!     SIGHUP → dynamic configuration reload
//! ```
//!
//! # Design Decisions
//! - Fail fast: an invalid first dynamic document is fatal, later ones are not
//! - Entrypoints start last, after the first snapshot is published
//! - Draining is bounded by `timeouts.shutdown_grace_secs`

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
