//! Backoff schedules with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::schema::{BackoffKind, RetryConfig};

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { interval_ms: u64 },
    /// `initial × 2^(attempt-1)`, capped at `max_ms`.
    Exponential { initial_ms: u64, max_ms: u64 },
}

impl Backoff {
    pub fn from_config(config: &RetryConfig) -> Self {
        match config.backoff {
            BackoffKind::Fixed => Backoff::Fixed {
                interval_ms: config.initial_interval_ms,
            },
            BackoffKind::Exponential => Backoff::Exponential {
                initial_ms: config.initial_interval_ms,
                max_ms: config.max_interval_ms,
            },
        }
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 never waits.
    pub fn compute(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match *self {
            Backoff::Fixed { interval_ms } => Duration::from_millis(interval_ms),
            Backoff::Exponential { initial_ms, max_ms } => {
                calculate_backoff(attempt, initial_ms, max_ms)
            }
        }
    }
}

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_grows_and_caps() {
        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100 && b1.as_millis() < 110);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let max = calculate_backoff(10, 100, 1000);
        assert!(max.as_millis() >= 1000 && max.as_millis() < 1100);
    }

    #[test]
    fn fixed_is_constant() {
        let b = Backoff::Fixed { interval_ms: 50 };
        assert_eq!(b.compute(0), Duration::ZERO);
        assert_eq!(b.compute(1), Duration::from_millis(50));
        assert_eq!(b.compute(7), Duration::from_millis(50));
    }

    #[test]
    fn built_from_retry_config() {
        let cfg = RetryConfig::default();
        assert_eq!(
            Backoff::from_config(&cfg),
            Backoff::Exponential {
                initial_ms: 100,
                max_ms: 2000
            }
        );
    }
}
