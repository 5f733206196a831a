//! Retry with exponential backoff for hardware driver calls.
//!
//! Driver faults are transient by assumption: a call is attempted up to
//! [`RetryPolicy::max_attempts`] times, sleeping `base * 2^attempt`
//! (capped at `max_delay`) between attempts. Exhaustion is reported to the
//! caller, which logs it and carries on with the next cycle.

use std::time::Duration;

use crate::hardware::DriverError;

/// How often and how patiently a driver call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first. Zero behaves as one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt number `attempt` (0-based):
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `call` until it succeeds, fails with a non-transient error, or
    /// the attempts are used up.
    ///
    /// `operation` names the call in log output.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn run<T, F>(&self, operation: &str, mut call: F) -> Result<T, DriverError>
    where
        F: FnMut() -> Result<T, DriverError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    if attempt >= attempts || !e.is_transient() {
                        return Err(e);
                    }
                    let delay = self.backoff(attempt.saturating_sub(1));
                    tracing::debug!(
                        operation,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Driver call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
