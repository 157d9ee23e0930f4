//! Caller-owned retry policy for tier calls.
//!
//! Stores never retry internally. The migration pipeline wraps each upload
//! in [`with_retries`], which re-runs the call while the error is
//! [retryable](AssetError::is_retryable), doubling the wait each time up to
//! `max_delay`.

use crate::config::duration_ms;
use crate::error::{AssetError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    #[serde(with = "duration_ms", rename = "base_delay_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Scale each wait by a random factor in `0.5..1.5`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait before the `retry`-th retry (0 is the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX));
        let capped = doubled.min(self.max_delay);
        if !self.jitter {
            return capped;
        }
        capped.mul_f64(rand::rng().random_range(0.5..1.5)).min(self.max_delay)
    }
}

/// Result of a retried call.
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T>,
    pub attempts: u32,
    pub waited: Duration,
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. `label` identifies the call in logs.
pub async fn with_retries<F, Fut, T>(config: &RetryConfig, label: &str, mut call: F) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let budget = config.attempts();
    let mut waited = Duration::ZERO;
    let mut attempt = 1;

    loop {
        let error: AssetError = match call().await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                    waited,
                }
            }
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= budget {
            if attempt > 1 {
                warn!(label, attempts = attempt, error = %error, "Giving up after retries");
            }
            return Retried {
                result: Err(error),
                attempts: attempt,
                waited,
            };
        }

        let delay = config.backoff(attempt - 1);
        debug!(
            label,
            attempt,
            budget,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying tier call"
        );
        tokio::time::sleep(delay).await;
        waited += delay;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed(max_attempts: u32, base_ms: u64) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(3),
            ..fixed(5, 500)
        };
        let waits: Vec<_> = (0..5).map(|n| config.backoff(n).as_millis()).collect();
        assert_eq!(waits, vec![500, 1000, 2000, 3000, 3000]);
        assert_eq!(config.backoff(200), Duration::from_secs(3));
    }

    #[test]
    fn test_jittered_backoff_stays_in_band() {
        let config = RetryConfig {
            jitter: true,
            ..fixed(3, 2000)
        };
        for _ in 0..50 {
            let wait = config.backoff(0);
            assert!(wait >= Duration::from_secs(1) && wait <= Duration::from_secs(3));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_remote_is_retried() {
        let calls = &AtomicU32::new(0);
        let retried = with_retries(&fixed(3, 10), "imgs/a.png", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AssetError::unavailable(Tier::Remote, "503 Slow Down"))
            } else {
                Ok("https://cdn.example.com/imgs/a.png")
            }
        })
        .await;

        assert!(retried.result.is_ok());
        assert_eq!(retried.attempts, 3);
        assert_eq!(retried.waited, Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_final() {
        let retried = with_retries(&fixed(5, 10), "imgs/a.png", || async {
            Err::<(), _>(AssetError::NotFound {
                tier: Tier::Local,
                key: "imgs/a.png".into(),
            })
        })
        .await;

        assert!(retried.result.unwrap_err().is_not_found());
        assert_eq!(retried.attempts, 1);
        assert_eq!(retried.waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted_returns_last_error() {
        let retried = with_retries(&fixed(2, 10), "imgs/a.png", || async {
            Err::<(), _>(AssetError::Timeout {
                tier: Tier::Remote,
                duration: Duration::from_secs(5),
            })
        })
        .await;

        assert!(matches!(retried.result, Err(AssetError::Timeout { .. })));
        assert_eq!(retried.attempts, 2);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryConfig::none().attempts(), 1);
        assert_eq!(fixed(0, 10).attempts(), 1);
    }
}
