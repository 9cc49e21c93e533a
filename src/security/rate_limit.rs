//! Token bucket rate limiting.
//!
//! One [`TokenBucket`] per client key, refilled lazily from elapsed time on
//! every call (no background timer). Buckets live in a sharded `DashMap`, so
//! unrelated keys never contend on the same lock. The number of tracked keys
//! is bounded: once `max_keys` is reached, one sweep drops idle keys and then
//! the least recently seen ones down to a low-water mark, so the sweep cost is
//! paid once per batch of new keys rather than on every insert.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::Request;
use dashmap::DashMap;
use ipnet::{Ipv4Net, Ipv6Net};
use parking_lot::Mutex;

use crate::config::schema::{RateLimitConfig, SourceCriterion};
use crate::error::ProxyError;
use crate::observability::metrics;

/// A simple token bucket. Invariant: `0 <= tokens <= capacity`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, capacity: f64, rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Refill, then take one token if available.
    pub fn try_acquire(&mut self, capacity: f64, rate: f64, now: Instant) -> bool {
        self.refill(capacity, rate, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until the next token becomes available.
    pub fn time_to_next(&self, rate: f64) -> Duration {
        if self.tokens >= 1.0 || rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / rate)
    }
}

/// How a client key is derived from a request.
#[derive(Debug, Clone, Default)]
pub struct KeyStrategy {
    criterion: SourceCriterion,
}

impl KeyStrategy {
    pub fn new(criterion: SourceCriterion) -> Self {
        Self { criterion }
    }

    pub fn client_key<B>(&self, request: &Request<B>, peer: SocketAddr) -> String {
        if let Some(name) = &self.criterion.request_header {
            if let Some(value) = request
                .headers()
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
            {
                return value.to_string();
            }
        }

        let ip = self.client_ip(request, peer);
        match ip {
            IpAddr::V4(v4) => match self.criterion.ipv4_prefix {
                Some(prefix) => Ipv4Net::new(v4, prefix)
                    .map(|net| net.trunc().to_string())
                    .unwrap_or_else(|_| v4.to_string()),
                None => v4.to_string(),
            },
            IpAddr::V6(v6) => match self.criterion.ipv6_prefix {
                Some(prefix) => Ipv6Net::new(v6, prefix)
                    .map(|net| net.trunc().to_string())
                    .unwrap_or_else(|_| v6.to_string()),
                None => v6.to_string(),
            },
        }
    }

    /// `ip_depth` 0 is the peer; n is the n-th `X-Forwarded-For` entry from
    /// the right. Missing or unparsable entries fall back to the peer.
    fn client_ip<B>(&self, request: &Request<B>, peer: SocketAddr) -> IpAddr {
        let depth = self.criterion.ip_depth;
        if depth == 0 {
            return peer.ip();
        }
        request
            .headers()
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .nth(depth - 1)
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| peer.ip())
    }
}

#[derive(Debug)]
struct Entry {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Per-key admission control.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    capacity: f64,
    /// Tokens per second.
    rate: f64,
    strategy: KeyStrategy,
    max_keys: usize,
    idle_ttl: Duration,
    buckets: DashMap<String, Entry>,
    /// Held by the one caller sweeping at capacity.
    sweep: Mutex<()>,
    sweeps: AtomicU64,
}

impl RateLimiter {
    pub fn from_config(name: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            capacity: f64::from(config.burst.max(1)),
            rate: f64::from(config.average) / config.period_secs.max(1) as f64,
            strategy: KeyStrategy::new(config.source.clone()),
            max_keys: config.max_keys.max(1),
            idle_ttl: Duration::from_secs(config.idle_ttl_secs),
            buckets: DashMap::new(),
            sweep: Mutex::new(()),
            sweeps: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    /// Number of eviction sweeps run so far.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    pub fn client_key<B>(&self, request: &Request<B>, peer: SocketAddr) -> String {
        self.strategy.client_key(request, peer)
    }

    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        self.check_at(key, now).is_ok()
    }

    /// Admit or reject one request for `key`.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), ProxyError> {
        let admitted = match self.buckets.get_mut(key) {
            Some(mut entry) => self.take(&mut entry, now),
            None => {
                if self.buckets.len() >= self.max_keys {
                    self.evict(now);
                }
                let mut entry = self.buckets.entry(key.to_owned()).or_insert_with(|| Entry {
                    bucket: TokenBucket::new(self.capacity, now),
                    last_seen: now,
                });
                self.take(&mut entry, now)
            }
        };

        match admitted {
            Ok(()) => Ok(()),
            Err(retry_after) => {
                tracing::debug!(limiter = %self.name, client = %key, "Rate limit exceeded");
                metrics::record_rate_limited(&self.name);
                Err(ProxyError::RateLimited {
                    key: key.to_owned(),
                    retry_after: Some(retry_after),
                })
            }
        }
    }

    fn take(&self, entry: &mut Entry, now: Instant) -> Result<(), Duration> {
        if now > entry.last_seen {
            entry.last_seen = now;
        }
        if entry.bucket.try_acquire(self.capacity, self.rate, now) {
            Ok(())
        } else {
            Err(entry.bucket.time_to_next(self.rate))
        }
    }

    /// Size the map is trimmed to by a sweep.
    fn low_water(&self) -> usize {
        (self.max_keys - self.max_keys / 10).min(self.max_keys - 1)
    }

    /// Drop idle keys, then the least recently seen, down to the low-water mark.
    fn evict(&self, now: Instant) {
        let _sweep = self.sweep.lock();
        // a concurrent caller may have swept while we waited
        if self.buckets.len() < self.max_keys {
            return;
        }
        self.sweeps.fetch_add(1, Ordering::Relaxed);

        let ttl = self.idle_ttl;
        self.buckets
            .retain(|_, e| now.saturating_duration_since(e.last_seen) < ttl);

        let excess = self.buckets.len().saturating_sub(self.low_water());
        if excess > 0 {
            let mut seen: Vec<Instant> = self.buckets.iter().map(|e| e.value().last_seen).collect();
            let (_, cutoff, _) = seen.select_nth_unstable(excess - 1);
            let cutoff = *cutoff;
            self.buckets.retain(|_, e| e.last_seen > cutoff);
        }
        tracing::debug!(limiter = %self.name, remaining = self.buckets.len(), "Evicted rate limit keys");
    }

    #[cfg(test)]
    fn tokens(&self, key: &str) -> Option<f64> {
        self.buckets.get(key).map(|e| e.bucket.tokens())
    }
}
