use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Exponential Backoff Retry
// ============================================================================
//
// Used by the pricing dispatcher. Only errors that report themselves as
// transient are retried; anything else stops at the first attempt.
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success(T),
    /// Every attempt failed with a transient error.
    Exhausted { error: E, attempts: u32 },
    /// A non-transient error ended the loop early.
    Permanent { error: E, attempts: u32 },
}

/// Whether an error is worth another attempt.
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

pub async fn retry_on_transient<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display + IsTransient,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return RetryOutcome::Success(value);
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            return RetryOutcome::Permanent {
                error,
                attempts: attempt,
            };
        }
        if attempt >= config.max_attempts {
            return RetryOutcome::Exhausted {
                error,
                attempts: attempt,
            };
        }

        let delay = config.delay_after(attempt);
        tracing::warn!(
            operation = operation_name,
            attempt,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, retrying"
        );
        sleep(delay).await;
    }
}
