//! Backend health state machine.
//!
//! # States
//! - Healthy: backend receives traffic
//! - Unhealthy: backend excluded from load balancing
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! Backends start Healthy. Counters reset on every transition.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use serde::Serialize;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy = 0,
    Unhealthy = 1,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Unhealthy,
            _ => HealthState::Healthy,
        }
    }
}

/// Consecutive-outcome counters plus the current state of one backend.
#[derive(Debug)]
pub struct HealthTracker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(HealthState::Healthy as u8),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
        }
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes.load(Ordering::Relaxed)
    }

    /// Report a successful probe or request.
    ///
    /// Returns the new state if this call caused a transition.
    pub fn mark_success(&self, healthy_threshold: u32) -> Option<HealthState> {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.is_healthy() {
            return None;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold
            && self
                .state
                .compare_exchange(
                    HealthState::Unhealthy as u8,
                    HealthState::Healthy as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            return Some(HealthState::Healthy);
        }
        None
    }

    /// Report a failed probe or request.
    ///
    /// Returns the new state if this call caused a transition.
    pub fn mark_failure(&self, unhealthy_threshold: u32) -> Option<HealthState> {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        if !self.is_healthy() {
            return None;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold
            && self
                .state
                .compare_exchange(
                    HealthState::Healthy as u8,
                    HealthState::Unhealthy as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            return Some(HealthState::Unhealthy);
        }
        None
    }
}
