//! Bounded retry with random jitter.
//!
//! Used by the counters to resolve compare-and-set contention: the operation
//! reports whether it committed, conflicted (retry) or failed (abort).

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Retry bounds and backoff window.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Lower bound of the random delay between attempts.
    pub min_backoff: Duration,
    /// Upper bound of the random delay between attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(150),
        }
    }
}

impl RetryPolicy {
    /// Policy without sleeping between attempts (for tests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn delay(&self) -> Duration {
        let min = self.min_backoff.as_millis() as u64;
        let max = (self.max_backoff.as_millis() as u64).max(min);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The operation finished with a value.
    Done(T),
    /// Transient contention; try again.
    Retry,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("operation failed: {0}")]
    Operation(E),
}

/// Run `op` until it returns [`Attempt::Done`], an error, or the policy's
/// attempt ceiling is reached.
///
/// `op` receives the 1-based attempt number. There is no delay after the
/// final attempt.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Attempt<T>, E>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match op(attempt).await.map_err(RetryError::Operation)? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Retry if attempt < max_attempts => {
                let delay = policy.delay();
                tracing::trace!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Attempt::Retry => {}
        }
    }

    Err(RetryError::Exhausted {
        attempts: max_attempts,
    })
}
