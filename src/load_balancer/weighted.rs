//! Smooth weighted round-robin.
//!
//! Each pick adds every healthy backend's weight to its running score,
//! selects the highest score and subtracts the total weight from it. Over
//! `sum(weights)` picks each backend is chosen exactly `weight` times, and
//! picks of heavy backends are interleaved rather than bunched.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::load_balancer::{backend::Backend, LoadBalancer};

#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    current: Mutex<Vec<i64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let mut current = self.current.lock();
        if current.len() != backends.len() {
            *current = vec![0; backends.len()];
        }

        let mut total = 0i64;
        let mut best: Option<usize> = None;
        for (i, backend) in backends.iter().enumerate() {
            if !backend.is_healthy() || backend.weight == 0 {
                continue;
            }
            let weight = i64::from(backend.weight);
            current[i] += weight;
            total += weight;
            if best.map_or(true, |b| current[i] > current[b]) {
                best = Some(i);
            }
        }

        let best = best?;
        current[best] -= total;
        Some(backends[best].clone())
    }
}
