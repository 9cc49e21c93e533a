//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a request is retryable (configured idempotent methods only)
//! - Execute retries with backoff + jitter
//! - Enforce retry budget (retries as a fraction of recent requests)
//!
//! # Design Decisions
//! - Connection errors and timeouts always retryable; 5xx statuses configurable
//! - Circuit-open, rate-limited and no-healthy-backend failures are never retried
//! - When the last attempt returns a retryable status, that response is
//!   surfaced unchanged

use std::collections::VecDeque;
use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, Instant};

use axum::http::{Method, Response, StatusCode};
use parking_lot::Mutex;

use crate::config::schema::RetryConfig;
use crate::error::ProxyError;
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;

const BUDGET_WINDOW: Duration = Duration::from_secs(10);
const BUDGET_BUCKET: Duration = Duration::from_secs(1);

/// Bounded retry with backoff for idempotent-safe requests.
#[derive(Debug)]
pub struct RetryPolicy {
    name: String,
    attempts: u32,
    backoff: Backoff,
    methods: Vec<Method>,
    retry_on: Vec<StatusCode>,
    budget: Option<RetryBudget>,
}

impl RetryPolicy {
    pub fn from_config(name: impl Into<String>, config: &RetryConfig) -> Self {
        Self {
            name: name.into(),
            attempts: config.attempts.max(1),
            backoff: Backoff::from_config(config),
            methods: config
                .methods
                .iter()
                .filter_map(|m| Method::from_str(m).ok())
                .collect(),
            retry_on: config
                .retry_on
                .iter()
                .filter_map(|s| StatusCode::from_u16(*s).ok())
                .collect(),
            budget: config
                .budget_ratio
                .map(|ratio| RetryBudget::new(ratio, config.min_retries)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether requests with this method may be retried.
    pub fn applies_to(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retry_on.contains(&status)
    }

    /// Run `op` up to `max_attempts` times.
    ///
    /// `op` receives the zero-based attempt index. A result is retried when it
    /// is a transient error or a response with a configured status; anything
    /// else is returned as soon as it is seen.
    pub async fn execute<F, Fut, B>(&self, mut op: F) -> Result<Response<B>, ProxyError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Response<B>, ProxyError>>,
    {
        if let Some(budget) = &self.budget {
            budget.record_request();
        }

        let mut attempt = 0;
        loop {
            let result = op(attempt).await;
            attempt += 1;

            let retryable = match &result {
                Ok(response) => self.is_retryable_status(response.status()),
                Err(e) => e.is_transient(),
            };
            if !retryable || attempt >= self.attempts {
                return result;
            }
            if let Some(budget) = &self.budget {
                if !budget.try_withdraw() {
                    tracing::debug!(policy = %self.name, "Retry budget exhausted");
                    return result;
                }
            }

            let delay = self.backoff.compute(attempt);
            tracing::debug!(
                policy = %self.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                outcome = %describe(&result),
                "Retrying request"
            );
            metrics::record_retry(&self.name);
            tokio::time::sleep(delay).await;
        }
    }
}

fn describe<B>(result: &Result<Response<B>, ProxyError>) -> String {
    match result {
        Ok(response) => response.status().to_string(),
        Err(e) => e.outcome().to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
struct BudgetBucket {
    start: Instant,
    requests: u64,
    retries: u64,
}

/// Limits retries to a fraction of the requests seen in the last 10 seconds,
/// with a floor of `min_retries` per window.
#[derive(Debug)]
pub struct RetryBudget {
    ratio: f64,
    min_retries: u32,
    buckets: Mutex<VecDeque<BudgetBucket>>,
}

impl RetryBudget {
    pub fn new(ratio: f64, min_retries: u32) -> Self {
        Self {
            ratio,
            min_retries,
            buckets: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record_request(&self) {
        self.record_request_at(Instant::now());
    }

    pub fn record_request_at(&self, now: Instant) {
        let mut buckets = self.buckets.lock();
        current(&mut buckets, now).requests += 1;
    }

    pub fn try_withdraw(&self) -> bool {
        self.try_withdraw_at(Instant::now())
    }

    /// Take one retry from the budget if any is left.
    pub fn try_withdraw_at(&self, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();
        current(&mut buckets, now);

        let (requests, retries) = buckets
            .iter()
            .fold((0u64, 0u64), |(q, r), b| (q + b.requests, r + b.retries));
        let allowed = ((requests as f64) * self.ratio).floor() as u64;
        if retries >= allowed.max(u64::from(self.min_retries)) {
            return false;
        }
        if let Some(bucket) = buckets.back_mut() {
            bucket.retries += 1;
        }
        true
    }
}

fn current(buckets: &mut VecDeque<BudgetBucket>, now: Instant) -> &mut BudgetBucket {
    while let Some(front) = buckets.front() {
        if now.saturating_duration_since(front.start) >= BUDGET_WINDOW {
            buckets.pop_front();
        } else {
            break;
        }
    }
    let stale = buckets
        .back()
        .map_or(true, |b| now.saturating_duration_since(b.start) >= BUDGET_BUCKET);
    if stale {
        buckets.push_back(BudgetBucket {
            start: now,
            requests: 0,
            retries: 0,
        });
    }
    let last = buckets.len() - 1;
    &mut buckets[last]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BackoffKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        let config = RetryConfig {
            attempts,
            backoff: BackoffKind::Fixed,
            initial_interval_ms: 1,
            ..Default::default()
        };
        RetryPolicy::from_config("retry", &config)
    }

    fn network_error() -> ProxyError {
        ProxyError::BackendNetwork {
            backend: "10.0.0.1:80".into(),
            reason: "connection refused".into(),
        }
    }

    fn status(code: u16) -> Response<()> {
        let mut response = Response::new(());
        *response.status_mut() = StatusCode::from_u16(code).unwrap();
        response
    }

    #[tokio::test]
    async fn always_failing_call_is_attempted_exactly_max_times() {
        let calls = AtomicU32::new(0);
        let result: Result<Response<()>, _> = policy(3)
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(network_error()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(ProxyError::BackendNetwork { .. })));
    }

    #[tokio::test]
    async fn retryable_status_then_success() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(status(if attempt == 0 { 503 } else { 200 })) }
            })
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn last_retryable_response_is_surfaced() {
        let result = policy(2)
            .execute(|_| async { Ok(status(502)) })
            .await
            .unwrap();
        assert_eq!(result.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn open_circuit_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<Response<()>, _> = policy(3)
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProxyError::CircuitOpen { service: "api".into() }) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ProxyError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn unlisted_status_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(status(500)) }
            })
            .await
            .unwrap();
        assert_eq!(result.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_configured_methods_apply() {
        let p = policy(3);
        assert!(p.applies_to(&Method::GET));
        assert!(p.applies_to(&Method::HEAD));
        assert!(!p.applies_to(&Method::POST));
    }

    #[test]
    fn budget_caps_retries_to_ratio_of_requests() {
        let budget = RetryBudget::new(0.2, 1);
        let t0 = Instant::now();
        for _ in 0..10 {
            budget.record_request_at(t0);
        }
        assert!(budget.try_withdraw_at(t0));
        assert!(budget.try_withdraw_at(t0));
        assert!(!budget.try_withdraw_at(t0));

        // the window rolls over
        let later = t0 + Duration::from_secs(11);
        assert!(budget.try_withdraw_at(later));
        assert!(!budget.try_withdraw_at(later));
    }
}
