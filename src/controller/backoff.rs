//! Linear, cancellable backoff

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// `base + step * attempt`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearBackoff {
    pub base: Duration,
    pub step: Duration,
}

impl LinearBackoff {
    pub const fn new(base: Duration, step: Duration) -> Self {
        Self { base, step }
    }

    pub const fn zero() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base + self.step * attempt
    }

    pub async fn wait(&self, attempt: u32, cancel: &CancellationToken) -> Result<()> {
        sleep_or_cancel(self.delay(attempt), cancel).await
    }
}

/// Sleep for `duration` unless `cancel` fires first
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Attempt counts and delays for every polling loop in the engine
#[derive(Clone, Debug)]
pub struct RetryTimings {
    pub readiness_attempts: u32,
    pub readiness_backoff: LinearBackoff,
    /// Delay after a failed status call while polling readiness
    pub readiness_error_delay: Duration,
    pub address_attempts: u32,
    pub address_backoff: LinearBackoff,
    pub registration_rounds: u32,
    pub registration_backoff: LinearBackoff,
}

impl Default for RetryTimings {
    fn default() -> Self {
        let linear = LinearBackoff::new(Duration::from_secs(10), Duration::from_secs(5));
        Self {
            readiness_attempts: 10,
            readiness_backoff: linear,
            readiness_error_delay: Duration::from_secs(15),
            address_attempts: 5,
            address_backoff: linear,
            registration_rounds: 3,
            registration_backoff: linear,
        }
    }
}

impl RetryTimings {
    /// Same attempt counts, no waiting
    pub fn immediate() -> Self {
        Self {
            readiness_backoff: LinearBackoff::zero(),
            readiness_error_delay: Duration::ZERO,
            address_backoff: LinearBackoff::zero(),
            registration_backoff: LinearBackoff::zero(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_delay() {
        let backoff = LinearBackoff::new(Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(backoff.delay(0), Duration::from_secs(10));
        assert_eq!(backoff.delay(2), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });
        let result = sleep_or_cancel(Duration::from_secs(3600), &token).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_token_fails_fast_even_without_delay() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            LinearBackoff::zero().wait(0, &token).await,
            Err(Error::Cancelled)
        ));
    }
}
