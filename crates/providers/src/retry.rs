//! Retry and deadline policy for provider calls
//!
//! Transient failures are retried with exponential backoff and then escalated
//! to `Unavailable`. Every long-running call is wrapped in a deadline.

use std::future::Future;
use std::time::Duration;

use crate::ProviderError;

/// Backoff policy for transient provider failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// First backoff delay
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run a provider call, retrying transient failures per `policy`.
///
/// Timeouts and unavailability are returned immediately; exhausted retries
/// escalate the last transient error to `Unavailable`.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(ProviderError::Transient(message)) => {
                if attempt >= policy.max_retries {
                    tracing::warn!("{} failed after {} retries: {}", what, attempt, message);
                    return Err(ProviderError::Unavailable(message));
                }
                let delay = policy.backoff(attempt);
                attempt += 1;
                tracing::debug!(
                    "{} transient failure (attempt {}), retrying in {:?}: {}",
                    what,
                    attempt,
                    delay,
                    message
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Bound a provider call by a deadline, mapping elapse to `Timeout`.
pub async fn with_deadline<T, Fut>(
    deadline: Duration,
    what: &str,
    fut: Fut,
) -> Result<T, ProviderError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(what.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_recovers_from_transient() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        };

        let result = call_with_retry(&policy, "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Transient("flaky".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_escalates_to_unavailable() {
        let policy = RetryPolicy {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        };

        let result: Result<(), _> = call_with_retry(&policy, "test", || async {
            Err(ProviderError::Transient("down".to_string()))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_timeout_not_retried() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<(), _> = call_with_retry(&policy, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Timeout("asr".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_elapses() {
        let result: Result<(), _> = with_deadline(Duration::from_millis(5), "slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }
}
