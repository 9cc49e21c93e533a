//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: network- or server-error ratio > threshold over the window
//! Open → Half-Open: after fallback_duration
//! Half-Open → Closed: every trial call succeeds
//! Half-Open → Open: trial failure ratio > threshold, or no verdict within
//!                   recovery_duration
//! ```
//!
//! One breaker per service, guarded by its own mutex. Every transition bumps
//! an epoch; outcomes carried by permits from an older epoch are dropped, so
//! a slow call admitted while Closed can never close a Half-Open breaker.
//!
//! All operations have an `*_at(now)` variant so tests drive the clock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::schema::CircuitBreakerConfig;
use crate::error::ProxyError;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Classification of one completed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    NetworkError,
    ServerError,
}

impl Outcome {
    /// 5xx is a server error; everything else (4xx included) is a success.
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_server_error() {
            Outcome::ServerError
        } else {
            Outcome::Success
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, Outcome::Success)
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start: Instant,
    success: u64,
    network: u64,
    server: u64,
}

/// Outcome counts over the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowCounts {
    pub success: u64,
    pub network_errors: u64,
    pub server_errors: u64,
}

impl WindowCounts {
    pub fn total(&self) -> u64 {
        self.success + self.network_errors + self.server_errors
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    epoch: u64,
    transitioned_at: Instant,
    buckets: VecDeque<Bucket>,
    next_check: Instant,
    trials_admitted: u32,
    trial_successes: u32,
    trial_failures: u32,
}

/// Per-service failure-ratio state machine.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    window: Duration,
    bucket_width: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::new_at(service, config, Instant::now())
    }

    pub fn new_at(service: impl Into<String>, config: CircuitBreakerConfig, now: Instant) -> Self {
        let window = Duration::from_secs(config.window_secs.max(1));
        Self {
            service: service.into(),
            window,
            bucket_width: (window / 10).max(Duration::from_millis(1)),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                epoch: 0,
                transitioned_at: now,
                buckets: VecDeque::new(),
                next_check: now,
                trials_admitted: 0,
                trial_successes: 0,
                trial_failures: 0,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.state_at(Instant::now())
    }

    /// Current state, applying the lazy Open → Half-Open transition.
    pub fn state_at(&self, now: Instant) -> CircuitState {
        let mut inner = self.inner.lock();
        self.advance(&mut inner, now);
        inner.state
    }

    /// Outcome counts inside the window.
    pub fn counts_at(&self, now: Instant) -> WindowCounts {
        let mut inner = self.inner.lock();
        self.trim(&mut inner, now);
        sum(&inner.buckets)
    }

    pub fn counts(&self) -> WindowCounts {
        self.counts_at(Instant::now())
    }

    pub fn try_acquire(&self) -> Result<CallPermit<'_>, ProxyError> {
        self.try_acquire_at(Instant::now())
    }

    /// Ask permission to call the backend.
    ///
    /// Fails fast with [`ProxyError::CircuitOpen`] while Open, or while
    /// Half-Open with every trial slot taken.
    pub fn try_acquire_at(&self, now: Instant) -> Result<CallPermit<'_>, ProxyError> {
        let mut inner = self.inner.lock();
        self.advance(&mut inner, now);

        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => return Err(self.open_error()),
            CircuitState::HalfOpen => {
                if inner.trials_admitted >= self.config.half_open_trials.max(1) {
                    return Err(self.open_error());
                }
                inner.trials_admitted += 1;
                true
            }
        };

        Ok(CallPermit {
            breaker: self,
            epoch: inner.epoch,
            trial,
            recorded: false,
        })
    }

    fn open_error(&self) -> ProxyError {
        ProxyError::CircuitOpen {
            service: self.service.clone(),
        }
    }

    fn record_at(&self, epoch: u64, trial: bool, outcome: Outcome, now: Instant) {
        let mut inner = self.inner.lock();
        self.advance(&mut inner, now);

        if epoch != inner.epoch {
            tracing::trace!(service = %self.service, "Dropping outcome from a previous breaker epoch");
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                self.push(&mut inner, outcome, now);
                if now >= inner.next_check {
                    self.evaluate(&mut inner, now);
                }
            }
            CircuitState::HalfOpen if trial => {
                if outcome.is_failure() {
                    inner.trial_failures += 1;
                } else {
                    inner.trial_successes += 1;
                }
                let trials = f64::from(self.config.half_open_trials.max(1));
                if f64::from(inner.trial_failures) / trials > self.config.ratio_threshold {
                    self.transition(&mut inner, CircuitState::Open, now);
                } else if inner.trial_successes + inner.trial_failures
                    >= self.config.half_open_trials.max(1)
                {
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            _ => {}
        }
    }

    /// Time-driven transitions: Open → Half-Open after the fallback period,
    /// Half-Open → Open when recovery takes too long.
    fn advance(&self, inner: &mut Inner, now: Instant) {
        let elapsed = now.saturating_duration_since(inner.transitioned_at);
        match inner.state {
            CircuitState::Open
                if elapsed >= Duration::from_secs(self.config.fallback_duration_secs) =>
            {
                self.transition(inner, CircuitState::HalfOpen, now);
            }
            CircuitState::HalfOpen
                if elapsed >= Duration::from_secs(self.config.recovery_duration_secs) =>
            {
                self.transition(inner, CircuitState::Open, now);
            }
            _ => {}
        }
    }

    fn evaluate(&self, inner: &mut Inner, now: Instant) {
        self.trim(inner, now);
        let counts = sum(&inner.buckets);
        let total = counts.total();
        if total == 0 || total < self.config.min_requests {
            return;
        }

        let network_ratio = counts.network_errors as f64 / total as f64;
        let server_ratio = counts.server_errors as f64 / total as f64;
        if network_ratio > self.config.ratio_threshold || server_ratio > self.config.ratio_threshold
        {
            tracing::warn!(
                service = %self.service,
                network_ratio,
                server_ratio,
                total,
                "Error ratio over threshold, opening circuit"
            );
            self.transition(inner, CircuitState::Open, now);
        } else {
            inner.next_check = now + Duration::from_secs(self.config.check_period_secs);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.epoch += 1;
        inner.transitioned_at = now;
        inner.trials_admitted = 0;
        inner.trial_successes = 0;
        inner.trial_failures = 0;
        if to == CircuitState::Closed {
            inner.buckets.clear();
            inner.next_check = now;
        }

        tracing::info!(
            service = %self.service,
            from = from.as_str(),
            to = to.as_str(),
            "Circuit breaker transition"
        );
        metrics::record_circuit_state(&self.service, to);
    }

    fn push(&self, inner: &mut Inner, outcome: Outcome, now: Instant) {
        self.trim(inner, now);
        let needs_bucket = inner
            .buckets
            .back()
            .map_or(true, |b| now.saturating_duration_since(b.start) >= self.bucket_width);
        if needs_bucket {
            inner.buckets.push_back(Bucket {
                start: now,
                success: 0,
                network: 0,
                server: 0,
            });
        }
        if let Some(bucket) = inner.buckets.back_mut() {
            match outcome {
                Outcome::Success => bucket.success += 1,
                Outcome::NetworkError => bucket.network += 1,
                Outcome::ServerError => bucket.server += 1,
            }
        }
    }

    fn trim(&self, inner: &mut Inner, now: Instant) {
        while let Some(front) = inner.buckets.front() {
            if now.saturating_duration_since(front.start) >= self.window {
                inner.buckets.pop_front();
            } else {
                break;
            }
        }
    }
}

fn sum(buckets: &VecDeque<Bucket>) -> WindowCounts {
    buckets.iter().fold(WindowCounts::default(), |mut acc, b| {
        acc.success += b.success;
        acc.network_errors += b.network;
        acc.server_errors += b.server;
        acc
    })
}

/// Permission to make one backend call.
///
/// Dropping the permit without recording an outcome (the call timed out or
/// was cancelled) records a network failure.
#[derive(Debug)]
#[must_use = "record the call outcome on the permit"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    trial: bool,
    recorded: bool,
}

impl CallPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record(self, outcome: Outcome) {
        self.record_at(outcome, Instant::now());
    }

    pub fn record_at(mut self, outcome: Outcome, now: Instant) {
        self.recorded = true;
        self.breaker.record_at(self.epoch, self.trial, outcome, now);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker
                .record_at(self.epoch, self.trial, Outcome::NetworkError, Instant::now());
        }
    }
}
