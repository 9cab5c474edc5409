//! Bounded retry with exponential backoff.
//!
//! Attempt `n` (0-based) that fails is followed by a sleep of
//! `base * 2^n` before attempt `n + 1`.  With the defaults (7 attempts,
//! 1 s base) the worst case waits 1+2+4+8+16+32 = 63 s before giving up.
//! No sleep follows the final attempt.

use std::future::Future;
use std::time::Duration;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
        }
    }

    /// Delay after the failed attempt `attempt` (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(7, Duration::from_secs(1))
    }
}

/// The last error seen once every attempt has failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds or the policy's attempt budget is spent.
///
/// `op` receives the 0-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt + 1 >= policy.max_attempts {
                    return Err(Exhausted {
                        attempts: attempt + 1,
                        last_error: err,
                    });
                }
                let delay = policy.delay_after(attempt);
                log::warn!(
                    "transport: attempt {}/{} failed ({err}); retrying in {:?}",
                    attempt + 1,
                    policy.max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
