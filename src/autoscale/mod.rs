//! Autoscaling decisions.
//!
//! # Algorithm
//!
//! ```text
//! every tick, for every service:
//!     signals = cpu%, requests per instance over the request window, p95
//!
//!     if any signal > its trigger and scale-out cooldown over:
//!         ScaleOut(step)                 (bounded by max_capacity)
//!
//!     if every signal < trigger * scale_in_ratio
//!        for scale_in_sustain_secs and scale-in cooldown over:
//!         ScaleIn(step)                  (bounded by min_capacity)
//! ```
//!
//! The controller never touches backend membership; decisions go out on a
//! channel to whatever owns compute capacity.

pub mod controller;

pub use controller::{AutoscalingController, CpuSource, ScalingDecision, ScalingEvent, ServiceSignals};
