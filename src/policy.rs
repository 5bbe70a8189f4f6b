//! Retry policy for transient storage failures.

use crate::error::Result;
use std::time::Duration;
use tracing::warn;

/// Retry policy: attempts, base delay, exponential backoff toggle.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            exponential: true,
        }
    }
}

impl RetryPolicy {
    /// A single extra attempt with no delay, for in-process stores.
    pub fn quick() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::ZERO,
            exponential: false,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        if self.exponential {
            self.base_delay * 2u32.saturating_pow(attempt - 1)
        } else {
            self.base_delay
        }
    }
}

/// Run `op`, retrying on retryable errors per the policy.
///
/// Only [`CoreError::retryable`] failures are retried; version conflicts,
/// validation errors, and not-found pass straight through since retrying
/// cannot change their outcome.
pub fn with_retry<T, F>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.retryable() && attempt < policy.max_attempts => {
                warn!(
                    label,
                    attempt,
                    max = policy.max_attempts,
                    error = %err,
                    "retrying after transient failure"
                );
                let delay = policy.delay_for(attempt);
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn test_retries_transient_then_succeeds() {
        let mut calls = 0;
        let result = with_retry(RetryPolicy::quick(), "test", || {
            calls += 1;
            if calls == 1 {
                Err(CoreError::Storage("transient".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_conflicts_are_never_retried() {
        let mut calls = 0;
        let result: Result<()> = with_retry(RetryPolicy::quick(), "test", || {
            calls += 1;
            Err(CoreError::VersionConflict { current: 3 })
        });
        assert!(matches!(
            result.unwrap_err(),
            CoreError::VersionConflict { current: 3 }
        ));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_exhausted_attempts_surface_last_error() {
        let mut calls = 0;
        let result: Result<()> = with_retry(RetryPolicy::quick(), "test", || {
            calls += 1;
            Err(CoreError::Storage("still down".into()))
        });
        assert!(matches!(result.unwrap_err(), CoreError::Storage(_)));
        assert_eq!(calls, 2);
    }
}
