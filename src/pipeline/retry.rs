//! Bounded exponential backoff around a single fallible call.
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. The delay before retry *k* (1-indexed) is
//! `base_delay * 2^k`, so with a 1 s base the waits run 2 s → 4 s → 8 s.
//! When the service names its own wait (`retry_after`) the longer of the two
//! is used.
//!
//! The sleep is `tokio::time::sleep`: it suspends only the calling task, so
//! other pages keep running while one page backs off.

use crate::pipeline::classify::{Classify, ErrorClass};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry ceiling and backoff unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always ≥ 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// A successful value plus how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// The error that ended the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryError<E> {
    pub error: E,
    pub attempts: u32,
    pub class: ErrorClass,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retry `k` (1-indexed): `base_delay * 2^k`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-indexed attempt number. Permanent errors are
    /// returned after the first attempt; an exhausted transient error is
    /// returned as-is (never turned into an empty success).
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<Attempted<T>, RetryError<E>>
    where
        E: Classify + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    })
                }
                Err(error) => {
                    let class = error.class();
                    if class == ErrorClass::Permanent || attempt >= max_attempts {
                        return Err(RetryError {
                            error,
                            attempts: attempt,
                            class,
                        });
                    }

                    let mut delay = self.backoff(attempt);
                    if let Some(hint) = error.retry_after() {
                        delay = delay.max(hint);
                    }
                    warn!(
                        "attempt {}/{} failed ({}), retrying in {}ms: {}",
                        attempt,
                        max_attempts,
                        class,
                        delay.as_millis(),
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
