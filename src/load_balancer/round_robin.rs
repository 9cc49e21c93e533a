//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Round-robin selector.
/// The counter indexes the healthy subset, so every healthy backend gets an
/// equal share while others are out of rotation.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let healthy = backends.iter().filter(|b| b.is_healthy()).count();
        if healthy == 0 {
            return None;
        }
        let start = self.counter.fetch_add(1, Ordering::Relaxed);

        backends
            .iter()
            .filter(|b| b.is_healthy())
            .nth(start % healthy)
            // health may flip between the count and the pick
            .or_else(|| backends.iter().find(|b| b.is_healthy()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(port: u16) -> Arc<Backend> {
        Arc::new(Backend::new(format!("127.0.0.1:{}", port).parse().unwrap(), 1))
    }

    #[test]
    fn rotates_through_backends() {
        let lb = RoundRobin::new();
        let backends = vec![backend(8080), backend(8081)];

        assert_eq!(lb.next_server(&backends).unwrap().addr.port(), 8080);
        assert_eq!(lb.next_server(&backends).unwrap().addr.port(), 8081);
        assert_eq!(lb.next_server(&backends).unwrap().addr.port(), 8080);
    }

    #[test]
    fn healthy_backends_share_evenly() {
        let lb = RoundRobin::new();
        let backends = vec![backend(8080), backend(8081), backend(8082)];
        for _ in 0..3 {
            backends[2].health.mark_failure(3);
        }

        let mut counts = [0usize; 3];
        for _ in 0..300 {
            let port = lb.next_server(&backends).unwrap().addr.port();
            counts[usize::from(port - 8080)] += 1;
        }
        assert_eq!(counts, [150, 150, 0]);
    }

    #[test]
    fn skips_unhealthy_backends() {
        let lb = RoundRobin::new();
        let backends = vec![backend(8080), backend(8081)];
        for _ in 0..3 {
            backends[0].health.mark_failure(3);
        }

        for _ in 0..4 {
            assert_eq!(lb.next_server(&backends).unwrap().addr.port(), 8081);
        }

        backends[1].health.mark_failure(1);
        assert!(lb.next_server(&backends).is_none());
    }
}
