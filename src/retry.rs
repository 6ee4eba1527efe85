//! Retry combinator for transient upstream failures.
//!
//! Wraps an async operation with exponential backoff. Only errors the
//! operation classifies as retryable are retried; everything else bubbles
//! up immediately so deterministic failures stay tick-level.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::RetryConfig;
use crate::prelude::*;

pub async fn retry_with<T, F, Fut>(policy: &RetryConfig, label: &str, op: F) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let started = Instant::now();
    let mut backoff = policy.backoff_unit();

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && started.elapsed() + backoff < policy.max_elapsed() => {
                warn!(%err, %label, delay = ?backoff, "retrying after transient failure");
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff, policy);
            }
            Err(err) => return Err(err),
        }
    }
}

fn next_backoff(current: Duration, policy: &RetryConfig) -> Duration {
    std::cmp::min(current * policy.backoff_factor, policy.max_backoff())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> RetryConfig {
        RetryConfig {
            backoff_unit_sec: 0,
            backoff_factor: 2,
            max_backoff_sec: 0,
            max_elapsed_sec: 5,
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicUsize::new(0);

        let result = retry_with(&fast_policy(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::client("connection reset"))
            } else {
                Ok(42u64)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_deterministic_errors() {
        let calls = AtomicUsize::new(0);

        let result: Result<(), Error> = retry_with(&fast_policy(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::PaginationError("0xdeadbeef".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryConfig {
            backoff_unit_sec: 1,
            backoff_factor: 2,
            max_backoff_sec: 3,
            max_elapsed_sec: 300,
        };

        let mut delay = policy.backoff_unit();
        for _ in 0..10 {
            delay = next_backoff(delay, &policy);
        }

        assert_eq!(delay, Duration::from_secs(3));
    }
}
