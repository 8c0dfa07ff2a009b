//! Bounded fixed-backoff retry for reaching the index service at startup.

use facematch_core::IndexError;
use std::future::Future;
use std::time::Duration;

/// How many times to try and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Run `op` until it succeeds or `policy.attempts` tries are used up.
///
/// Configuration errors are returned immediately; retrying cannot fix them.
/// Exhausting every attempt yields [`IndexError::Unreachable`].
pub async fn retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, IndexError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, IndexError>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(what, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_config() => return Err(e),
            Err(e) => {
                tracing::warn!(what, attempt, max_attempts = attempts, error = %e, "attempt failed");
                last_error = e.to_string();
                if attempt < attempts {
                    tracing::info!(what, backoff_secs = policy.backoff.as_secs_f32(), "retrying");
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }

    Err(IndexError::Unreachable {
        attempts,
        last_error,
    })
}
