//! Bounded retries with exponential backoff for transient failures.

use crate::cancel::CancellationToken;
use crate::config::{timespan, SeedingOptions};
use crate::error::{MigrationError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for a single backoff delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// How often and how patiently to retry an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Run once, never retry.
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Batch retry policy from the seeding options; negative values disable it.
    pub fn from_seeding(options: &SeedingOptions) -> Self {
        Self {
            max_retries: u32::try_from(options.max_retry_attempts).unwrap_or(0),
            base_delay: timespan::to_std_positive(&options.retry_delay).unwrap_or(Duration::ZERO),
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor).min(MAX_RETRY_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or the policy runs out of attempts.
///
/// Cancellation is checked after every backoff sleep.
pub async fn retry_async<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
    should_retry: impl Fn(&MigrationError) -> bool,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if retry > 0 {
                    debug!(operation = label, attempts = retry + 1, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if retry < policy.max_retries && should_retry(&e) => {
                let delay = policy.delay_for(retry);
                warn!(
                    operation = label,
                    attempt = retry + 1,
                    delay = ?delay,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                cancel.check()?;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn busy() -> MigrationError {
        MigrationError::Timeout {
            operation: "Insert batch into Test".into(),
            after: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(40), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_policy_from_options() {
        let mut options = SeedingOptions::default();
        options.max_retry_attempts = -3;
        assert_eq!(RetryPolicy::from_seeding(&options).max_retries, 0);
        options.max_retry_attempts = 4;
        assert_eq!(RetryPolicy::from_seeding(&options).max_retries, 4);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let result = retry_async(
            &policy,
            &CancellationToken::new(),
            "insert",
            move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(busy())
                } else {
                    Ok(7)
                }
            },
            MigrationError::is_retryable,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        let result: Result<()> = retry_async(
            &policy,
            &CancellationToken::new(),
            "insert",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(busy())
            },
            MigrationError::is_retryable,
        )
        .await;
        assert!(matches!(result, Err(MigrationError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry_async(
            &RetryPolicy {
                max_retries: 5,
                base_delay: Duration::from_millis(1),
            },
            &CancellationToken::new(),
            "insert",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(MigrationError::Sql {
                    message: "NOT NULL constraint failed".into(),
                })
            },
            MigrationError::is_retryable,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops() {
        let cancel = CancellationToken::new();
        let result: Result<()> = retry_async(
            &RetryPolicy {
                max_retries: 5,
                base_delay: Duration::from_millis(1),
            },
            &cancel,
            "insert",
            || {
                cancel.cancel();
                async { Err(busy()) }
            },
            MigrationError::is_retryable,
        )
        .await;
        assert!(matches!(result, Err(MigrationError::Cancelled)));
    }
}
