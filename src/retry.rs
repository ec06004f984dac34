// Bounded retry with per-attempt timeout and backoff
//
// The combinator knows nothing about HTTP: callers hand it an attempt closure,
// a predicate deciding which errors are worth another try, and a policy.

use std::{fmt::Display, future::Future, time::Duration};

use thiserror::Error;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(7);
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(1000);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Raised in place of an attempt that did not finish within the policy timeout.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("attempt timed out after {}ms", .0.as_millis())]
pub struct AttemptTimeout(pub Duration);

#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// `step × attempt`: 1s, 2s, 3s, ... with the default step.
    Linear { step: Duration },
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
        jitter_factor: f64,
    },
}

impl Backoff {
    /// Doubling delays from `initial`, capped at 10s, with 10% jitter.
    pub fn exponential(initial: Duration) -> Self {
        Backoff::Exponential {
            initial,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max: DEFAULT_MAX_BACKOFF,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Linear { step } => step.saturating_mul(attempt),
            Backoff::Exponential {
                initial,
                multiplier,
                max,
                jitter_factor,
            } => {
                let exponent = attempt.saturating_sub(1) as f64;
                let base_ms = (initial.as_millis() as f64 * multiplier.powf(exponent))
                    .min(max.as_millis() as f64);

                // Spread retries so concurrent callers do not line up
                let jitter = rand::random::<f64>() * jitter_factor * base_ms;
                let backoff_ms = base_ms * (1.0 - jitter_factor / 2.0) + jitter;

                Duration::from_millis(backoff_ms.max(0.0) as u64)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Linear {
            step: DEFAULT_BACKOFF_STEP,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub attempt_timeout: Option<Duration>,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
            backoff: Backoff::default(),
        }
    }
}

/// Value of the attempt that succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Error of the last attempt, after a terminal failure or exhaustion.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("failed after {attempts} attempt(s): {error}")]
pub struct RetryError<E: Display> {
    pub attempts: u32,
    pub error: E,
}

/// Run `op` until it succeeds, fails terminally, or `policy.max_attempts` is spent.
///
/// `op` receives the 1-based attempt number. An attempt that outlives
/// `policy.attempt_timeout` is dropped, which cancels whatever it had in
/// flight, and is reported as `E::from(AttemptTimeout)`; the predicate then
/// decides like for any other error.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut op: F,
) -> Result<Retried<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: From<AttemptTimeout> + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(E::from(AttemptTimeout(limit))),
            },
            None => op(attempt).await,
        };

        let error = match result {
            Ok(value) => return Ok(Retried { value, attempts: attempt }),
            Err(error) => error,
        };

        let retryable = is_retryable(&error);
        if !retryable || attempt >= max_attempts {
            warn!(
                attempt,
                max_attempts,
                retryable,
                error = %error,
                "giving up"
            );
            return Err(RetryError {
                attempts: attempt,
                error,
            });
        }

        let delay = policy.backoff.delay(attempt);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "attempt failed, retrying after backoff"
        );
        tokio::time::sleep(delay).await;
    }
}
