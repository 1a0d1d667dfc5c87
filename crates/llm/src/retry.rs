use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Failure type understood by [`RetryExecutor`].
pub trait RetryableError: Sized {
    fn is_retryable(&self) -> bool;

    /// Error recorded when an attempt is cancelled for exceeding its budget.
    fn attempt_timed_out(limit: Duration) -> Self;
}

/// Details handed to a [`RetryObserver`] right before a backoff sleep.
#[derive(Debug)]
pub struct RetryNotice<'a, E> {
    /// Zero-based index of the attempt about to run.
    pub next_attempt: u32,
    pub delay: Duration,
    pub error: &'a E,
}

pub trait RetryObserver<E>: Send + Sync {
    fn on_retry(&self, notice: &RetryNotice<'_, E>);
}

impl<E> RetryObserver<E> for () {
    fn on_retry(&self, _notice: &RetryNotice<'_, E>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub per_attempt_timeout: Duration,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);

    pub fn new(max_retries: u32, per_attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            per_attempt_timeout,
            base_delay: Self::DEFAULT_BASE_DELAY,
        }
    }

    /// One attempt, no retries.
    pub fn single_attempt(per_attempt_timeout: Duration) -> Self {
        Self::new(0, per_attempt_timeout)
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sleep before zero-based `attempt`: nothing for the first, then 1x, 2x, 4x ... base.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1_u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Runs one unit of async work with a per-attempt timeout and exponential backoff.
///
/// The executor knows nothing about what the work is. Each attempt future is
/// dropped when its timeout fires, which aborts any I/O it owns.
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + Display,
    {
        self.run_observed(operation, &()).await
    }

    pub async fn run_observed<T, E, F, Fut, O>(&self, mut operation: F, observer: &O) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + Display,
        O: RetryObserver<E> + ?Sized,
    {
        let total_attempts = self.policy.total_attempts();
        let mut attempt = 0_u32;

        loop {
            let outcome =
                match tokio::time::timeout(self.policy.per_attempt_timeout, operation(attempt))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_elapsed) => Err(E::attempt_timed_out(self.policy.per_attempt_timeout)),
                };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            attempt = attempt + 1,
                            total_attempts,
                            "operation recovered after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                tracing::warn!(
                    attempt = attempt + 1,
                    error = %error,
                    "operation failed with a non-retryable error"
                );
                return Err(error);
            }

            if attempt >= self.policy.max_retries {
                tracing::warn!(
                    attempts = attempt + 1,
                    error = %error,
                    "retry budget exhausted"
                );
                return Err(error);
            }

            attempt += 1;
            let delay = self.policy.delay_before(attempt);
            tracing::warn!(
                attempt,
                total_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "operation failed; backing off before retry"
            );
            observer.on_retry(&RetryNotice {
                next_attempt: attempt,
                delay,
                error: &error,
            });
            tokio::time::sleep(delay).await;
        }
    }
}
