//! Retry with deterministic exponential backoff.
//!
//! Delays double from `min_delay` and are capped at `max_delay`; there is no
//! jitter, so the schedule for a given attempt is always the same. The sleep
//! between attempts is a tokio timer, so other tasks keep running.

use crate::airdrop::types::AirdropConfig;
use std::future::Future;
use std::time::Duration;
use tokio_retry::Retry;
use tracing::{debug, warn};

/// Backoff schedule: `min(min_delay * 2^(n-1), max_delay)` for the n-th retry.
#[derive(Debug, Clone)]
pub struct DoublingBackoff {
    next: Duration,
    max: Duration,
}

impl DoublingBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { next: min, max }
    }
}

impl Iterator for DoublingBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.next.min(self.max);
        self.next = self.next.saturating_mul(2);
        Some(delay)
    }
}

/// Bounded retry policy applied to every remote call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &AirdropConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_millis(config.retry_min_delay_ms),
            Duration::from_millis(config.retry_max_delay_ms),
        )
    }

    /// Delays slept between attempts; one fewer than `max_attempts`.
    pub fn schedule(&self) -> std::iter::Take<DoublingBackoff> {
        DoublingBackoff::new(self.min_delay, self.max_delay).take(self.max_attempts - 1)
    }

    /// Delay slept after the given failed attempt (1-based).
    pub fn delay_after_attempt(&self, attempt: usize) -> Duration {
        DoublingBackoff::new(self.min_delay, self.max_delay)
            .nth(attempt.saturating_sub(1))
            .unwrap_or(self.max_delay)
    }

    /// Run `operation` until it succeeds or attempts run out.
    ///
    /// The error from the final attempt is returned as is.
    pub async fn execute<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts;
        let mut attempt = 0usize;

        Retry::start(self.schedule(), || {
            attempt += 1;
            let current = attempt;
            let pending = operation();
            let policy = self;
            async move {
                let result = pending.await;
                match &result {
                    Err(e) if current < max_attempts => warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        label,
                        current,
                        max_attempts,
                        e,
                        policy.delay_after_attempt(current)
                    ),
                    Err(e) => warn!("{} failed after {} attempts: {}", label, current, e),
                    Ok(_) if current > 1 => debug!("{} succeeded on attempt {}", label, current),
                    Ok(_) => {}
                }
                result
            }
        })
        .await
    }
}
