//! In-process request aggregates.
//!
//! The Prometheus recorder is write-only; the dashboard and the autoscaling
//! controller need numbers they can read back. The collector keeps, per route
//! and per service:
//! - total requests and counts per status class
//! - a rolling latency window, trimmed by age and by sample count, from which
//!   percentiles are derived
//! - per-second arrival buckets for request rates
//!
//! and per backend, attempt and failure counters.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::config::schema::StaticConfig;

/// Read-only view of one route or service.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MetricSample {
    pub requests: u64,
    /// Keyed by `1xx` .. `5xx`.
    pub status_classes: BTreeMap<&'static str, u64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

/// Signals one service exposes to the autoscaling controller.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServiceLoad {
    /// Requests that arrived inside the window.
    pub requests: u64,
    pub p95: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct BackendCounters {
    pub attempts: u64,
    pub failures: u64,
}

const CLASSES: [&str; 5] = ["1xx", "2xx", "3xx", "4xx", "5xx"];

#[derive(Debug, Default)]
struct Series {
    requests: u64,
    classes: [u64; 5],
    latencies: VecDeque<(Instant, Duration)>,
    /// (bucket start, count), one bucket per second.
    arrivals: VecDeque<(Instant, u64)>,
}

impl Series {
    fn record(&mut self, status: u16, latency: Duration, now: Instant, limits: &Limits) {
        self.requests += 1;
        if let Some(slot) = (status / 100).checked_sub(1).and_then(|i| self.classes.get_mut(i as usize)) {
            *slot += 1;
        }

        self.latencies.push_back((now, latency));
        while self.latencies.len() > limits.max_samples {
            self.latencies.pop_front();
        }

        match self.arrivals.back_mut() {
            Some((start, count)) if now.saturating_duration_since(*start) < Duration::from_secs(1) => {
                *count += 1;
            }
            _ => self.arrivals.push_back((now, 1)),
        }
        self.trim(now, limits);
    }

    fn trim(&mut self, now: Instant, limits: &Limits) {
        while let Some((at, _)) = self.latencies.front() {
            if now.saturating_duration_since(*at) > limits.latency_window {
                self.latencies.pop_front();
            } else {
                break;
            }
        }
        while let Some((start, _)) = self.arrivals.front() {
            if now.saturating_duration_since(*start) > limits.arrival_retention {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }
    }

    fn percentile(&self, q: f64, now: Instant, window: Duration) -> Option<Duration> {
        let mut values: Vec<Duration> = self
            .latencies
            .iter()
            .filter(|(at, _)| now.saturating_duration_since(*at) <= window)
            .map(|(_, d)| *d)
            .collect();
        percentile(&mut values, q)
    }

    fn arrivals_within(&self, window: Duration, now: Instant) -> u64 {
        self.arrivals
            .iter()
            .filter(|(start, _)| now.saturating_duration_since(*start) <= window)
            .map(|(_, count)| *count)
            .sum()
    }

    fn sample(&self, now: Instant, window: Duration) -> MetricSample {
        let ms = |d: Option<Duration>| d.map(|d| d.as_secs_f64() * 1000.0);
        MetricSample {
            requests: self.requests,
            status_classes: CLASSES.iter().copied().zip(self.classes).collect(),
            p50_ms: ms(self.percentile(0.50, now, window)),
            p95_ms: ms(self.percentile(0.95, now, window)),
            p99_ms: ms(self.percentile(0.99, now, window)),
        }
    }
}

/// Nearest-rank percentile.
pub fn percentile(values: &mut [Duration], q: f64) -> Option<Duration> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let rank = (q * values.len() as f64).ceil() as usize;
    Some(values[rank.clamp(1, values.len()) - 1])
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    latency_window: Duration,
    max_samples: usize,
    arrival_retention: Duration,
}

/// Aggregates fed by every request outcome.
#[derive(Debug)]
pub struct MetricsCollector {
    limits: Limits,
    routes: DashMap<String, Series>,
    services: DashMap<String, Series>,
    backends: DashMap<(String, String), BackendCounters>,
}

impl MetricsCollector {
    pub fn new(latency_window: Duration, max_samples: usize, request_window: Duration) -> Self {
        Self {
            limits: Limits {
                latency_window,
                max_samples: max_samples.max(1),
                arrival_retention: request_window.max(latency_window),
            },
            routes: DashMap::new(),
            services: DashMap::new(),
            backends: DashMap::new(),
        }
    }

    pub fn from_config(config: &StaticConfig) -> Self {
        Self::new(
            Duration::from_secs(config.metrics.latency_window_secs),
            config.metrics.max_samples,
            Duration::from_secs(config.autoscaling.request_window_secs),
        )
    }

    /// Record one finished request of a matched route.
    pub fn record(&self, route: &str, service: Option<&str>, status: u16, latency: Duration) {
        self.record_at(route, service, status, latency, Instant::now());
    }

    pub fn record_at(
        &self,
        route: &str,
        service: Option<&str>,
        status: u16,
        latency: Duration,
        now: Instant,
    ) {
        self.routes
            .entry(route.to_owned())
            .or_default()
            .record(status, latency, now, &self.limits);
        if let Some(service) = service {
            self.services
                .entry(service.to_owned())
                .or_default()
                .record(status, latency, now, &self.limits);
        }
    }

    /// Record one backend call.
    pub fn record_attempt(&self, service: &str, backend: &str, failed: bool) {
        let mut counters = self
            .backends
            .entry((service.to_owned(), backend.to_owned()))
            .or_default();
        counters.attempts += 1;
        if failed {
            counters.failures += 1;
        }
    }

    pub fn backend(&self, service: &str, backend: &str) -> BackendCounters {
        self.backends
            .get(&(service.to_owned(), backend.to_owned()))
            .map(|c| *c)
            .unwrap_or_default()
    }

    pub fn route_sample(&self, route: &str) -> Option<MetricSample> {
        self.route_sample_at(route, Instant::now())
    }

    pub fn route_sample_at(&self, route: &str, now: Instant) -> Option<MetricSample> {
        self.routes
            .get(route)
            .map(|s| s.sample(now, self.limits.latency_window))
    }

    pub fn service_sample(&self, service: &str) -> Option<MetricSample> {
        self.services
            .get(service)
            .map(|s| s.sample(Instant::now(), self.limits.latency_window))
    }

    /// Every route with its sample, sorted by name.
    pub fn routes(&self) -> BTreeMap<String, MetricSample> {
        let now = Instant::now();
        self.routes
            .iter()
            .map(|e| (e.key().clone(), e.value().sample(now, self.limits.latency_window)))
            .collect()
    }

    /// Request count and p95 latency of a service over `window`.
    pub fn service_load(&self, service: &str, window: Duration, now: Instant) -> ServiceLoad {
        let Some(mut series) = self.services.get_mut(service) else {
            return ServiceLoad::default();
        };
        series.trim(now, &self.limits);
        ServiceLoad {
            requests: series.arrivals_within(window, now),
            p95: series.percentile(0.95, now, window.min(self.limits.latency_window)),
        }
    }

    /// Forget series of routes and services that no longer exist.
    pub fn retain_known<'a>(
        &self,
        routes: impl IntoIterator<Item = &'a str>,
        services: impl IntoIterator<Item = &'a str>,
    ) {
        let routes: Vec<&str> = routes.into_iter().collect();
        let services: Vec<&str> = services.into_iter().collect();
        self.routes.retain(|name, _| routes.contains(&name.as_str()));
        self.services.retain(|name, _| services.contains(&name.as_str()));
        self.backends
            .retain(|(service, _), _| services.contains(&service.as_str()));
    }
}
