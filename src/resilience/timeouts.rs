//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap backend calls with a deadline
//! - Bound a whole request (retries included) by the route timeout
//! - Cancel operations cleanly on timeout (the future is dropped)
//!
//! Timed-out calls surface as [`ProxyError::BackendTimeout`] and map to
//! 504 Gateway Timeout.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time;

use crate::error::ProxyError;

/// Run `fut`, failing with `BackendTimeout` if it exceeds `limit`.
pub async fn with_timeout<F, T>(backend: &str, limit: Duration, fut: F) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
{
    match time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProxyError::BackendTimeout {
            backend: backend.to_string(),
            elapsed: limit,
        }),
    }
}

/// Absolute deadline for one request, shared by all of its attempts.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.start.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// The tighter of the remaining route budget and a per-attempt limit.
    pub fn attempt_limit(&self, per_attempt: Option<Duration>) -> Duration {
        match per_attempt {
            Some(limit) => limit.min(self.remaining()),
            None => self.remaining(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_call_times_out() {
        let result: Result<(), _> = with_timeout("10.0.0.1:80", Duration::from_millis(50), async {
            time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        match result {
            Err(ProxyError::BackendTimeout { backend, elapsed }) => {
                assert_eq!(backend, "10.0.0.1:80");
                assert_eq!(elapsed, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let result = with_timeout("b", Duration::from_secs(1), async { Ok::<_, ProxyError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn attempt_limit_never_exceeds_remaining_budget() {
        let deadline = Deadline::after(Duration::from_millis(100));
        assert!(deadline.attempt_limit(Some(Duration::from_secs(5))) <= Duration::from_millis(100));
        assert!(deadline.attempt_limit(Some(Duration::from_millis(10))) <= Duration::from_millis(10));
    }
}
