//! Backend pool management.
//!
//! # Responsibilities
//! - Hold the backends of one service
//! - Apply the service's load balancing policy to select a backend
//! - Expose the backend list to health checking and the dashboard

use std::sync::Arc;

use crate::config::schema::LoadBalancerPolicy;
use crate::load_balancer::{
    backend::Backend, round_robin::RoundRobin, weighted::WeightedRoundRobin, LoadBalancer,
};

/// The backends of one service plus the selector choosing among them.
#[derive(Debug)]
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    policy: LoadBalancerPolicy,
    lb: Box<dyn LoadBalancer>,
}

impl BackendPool {
    pub fn new(policy: LoadBalancerPolicy, backends: Vec<Arc<Backend>>) -> Self {
        let lb: Box<dyn LoadBalancer> = match policy {
            LoadBalancerPolicy::RoundRobin => Box::new(RoundRobin::new()),
            LoadBalancerPolicy::Weighted => Box::new(WeightedRoundRobin::new()),
        };
        Self {
            backends,
            policy,
            lb,
        }
    }

    /// Select a healthy backend, or `None` if every backend is unhealthy.
    pub fn select(&self) -> Option<Arc<Backend>> {
        let selected = self.lb.next_server(&self.backends);
        if selected.is_none() {
            tracing::debug!(backend_count = self.backends.len(), "No healthy backends found in pool");
            for b in &self.backends {
                tracing::debug!(addr = %b.addr, state = ?b.health_state(), "Backend status");
            }
        }
        selected
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn policy(&self) -> LoadBalancerPolicy {
        self.policy
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }

    /// Look up a backend by address (used to carry health across reloads).
    pub fn find(&self, addr: &std::net::SocketAddr) -> Option<&Arc<Backend>> {
        self.backends.iter().find(|b| &b.addr == addr)
    }
}
