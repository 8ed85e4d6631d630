//! Bounded retry with exponential backoff and jitter.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::AiServiceError;
use crate::cancel::CancelToken;

/// Retry schedule for AI calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound on a single attempt.
    pub attempt_timeout_ms: u64,
    /// No attempt is started and no backoff slept past this.
    pub overall_deadline_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
            attempt_timeout_ms: 10_000,
            overall_deadline_ms: 45_000,
        }
    }
}

impl RetryPolicy {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_millis(self.overall_deadline_ms)
    }

    /// Backoff before retry `retry` (1 = first retry), doubling from the
    /// base delay and capped at the max delay. No jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32);
        let millis = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Backoff with "equal jitter": half fixed, half uniformly random.
    pub fn backoff_with_jitter<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let full = self.backoff(retry).as_millis() as u64;
        let half = full / 2;
        Duration::from_millis(half + rng.gen_range(0..=full - half))
    }

    /// Delay before the next attempt after `error`. A server-provided
    /// retry-after wins when it asks for longer, still capped.
    fn delay_after(&self, retry: u32, error: &AiServiceError) -> Duration {
        let jittered = self.backoff_with_jitter(retry, &mut rand::thread_rng());
        match error {
            AiServiceError::RateLimited {
                retry_after: Some(after),
            } => jittered.max(*after).min(Duration::from_millis(self.max_delay_ms)),
            _ => jittered,
        }
    }
}

/// Run `attempt` until it succeeds, fails permanently, or the policy gives up.
///
/// `attempt` receives the 1-based attempt number and the timeout it must
/// honour (the per-attempt timeout, shortened to what is left of the
/// overall deadline). Transient failures are retried; anything else is
/// returned as is. Running out of attempts yields `RetriesExhausted` with
/// the last cause.
pub fn run_with_retry<T, F>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut attempt: F,
) -> Result<T, AiServiceError>
where
    F: FnMut(u32, Duration) -> Result<T, AiServiceError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let deadline = policy.overall_deadline();
    let started = Instant::now();
    let mut number = 0;
    let mut last: Option<AiServiceError> = None;

    loop {
        number += 1;
        if cancel.is_cancelled() {
            return Err(AiServiceError::Cancelled);
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(AiServiceError::DeadlineExceeded {
                deadline,
                last: last.map(Box::new),
            });
        }

        let error = match attempt(number, policy.attempt_timeout().min(remaining)) {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => e,
        };

        if number >= max_attempts {
            tracing::warn!(attempts = number, error = %error, "AI call failed, retries exhausted");
            return Err(AiServiceError::RetriesExhausted {
                attempts: number,
                last: Box::new(error),
            });
        }

        let delay = policy.delay_after(number, &error);
        if started.elapsed() + delay >= deadline {
            tracing::warn!(attempt = number, error = %error, "AI call failed, no time left to retry");
            return Err(AiServiceError::DeadlineExceeded {
                deadline,
                last: Some(Box::new(error)),
            });
        }

        tracing::warn!(
            attempt = number,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "AI call failed, retrying"
        );
        if !cancel.sleep(delay) {
            return Err(AiServiceError::Cancelled);
        }
        last = Some(error);
    }
}
