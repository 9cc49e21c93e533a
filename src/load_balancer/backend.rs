//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server of a service
//! - Carry its static weight for weighted selection
//! - Own its health tracker (written by the health checker, read by the router)
//! - Track in-flight requests

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::health::state::{HealthState, HealthTracker};

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// The address of the backend.
    pub addr: SocketAddr,
    /// Relative weight for weighted load balancing.
    pub weight: u32,
    /// Health state, shared across reloads while the address stays configured.
    pub health: HealthTracker,
    /// Number of requests currently in flight.
    active_requests: AtomicUsize,
}

impl Backend {
    pub fn new(addr: SocketAddr, weight: u32) -> Self {
        Self {
            addr,
            weight,
            health: HealthTracker::new(),
            active_requests: AtomicUsize::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    pub fn health_state(&self) -> HealthState {
        self.health.state()
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Relaxed)
    }

    /// Count a request against this backend until the guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> BackendGuard {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        BackendGuard {
            backend: self.clone(),
        }
    }
}

/// A RAII guard that manages the in-flight request count.
#[derive(Debug)]
pub struct BackendGuard {
    pub backend: Arc<Backend>,
}

impl Deref for BackendGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        self.backend.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_tracks_in_flight_requests() {
        let backend = Arc::new(Backend::new("127.0.0.1:9000".parse().unwrap(), 1));
        let g1 = backend.acquire();
        let g2 = backend.acquire();
        assert_eq!(backend.active_requests(), 2);
        drop(g1);
        assert_eq!(g2.active_requests(), 1);
        drop(g2);
        assert_eq!(backend.active_requests(), 0);
    }
}
