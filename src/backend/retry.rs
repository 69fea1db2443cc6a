//! Bounded retry with optional exponential backoff for backend calls.
//!
//! Only the two sync mutations opt in; reads like the current-user fetch go
//! out exactly once. The policy is injected, so callers can widen or disable
//! retries without touching the client.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::SyncError;

// MARK: - Constants

/// Default total attempts for a sync mutation (one call plus two retries).
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default initial backoff in milliseconds. Zero: retries fire immediately.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 0;

/// Default backoff ceiling in milliseconds.
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Default backoff multiplier.
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

// MARK: - RetryPolicy

/// Retry policy for backend synchronization calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first call. `1` disables retries.
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Ceiling on any single backoff, in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive backoffs.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Set the total attempt count.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the initial backoff in milliseconds.
    #[must_use]
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set the backoff ceiling in milliseconds.
    #[must_use]
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Set the backoff growth factor.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Backoff before the retry following the given zero-based attempt.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Whether the error warrants another attempt.
    ///
    /// Transient transport failures and 5xx/429/408 responses are retryable.
    /// Auth rejections, missing records and payload problems are not: the
    /// backend gave a definitive answer.
    pub fn should_retry(&self, error: &SyncError, attempt: u32) -> bool {
        if attempt + 1 >= self.max_attempts {
            return false;
        }
        match error {
            SyncError::Http(e) => e.is_timeout() || e.is_connect(),
            SyncError::Api { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            SyncError::SyncFailed(_) | SyncError::Unauthorized(_) | SyncError::NotFound(_) => false,
        }
    }
}

impl From<&crate::config::RetryConfig> for RetryPolicy {
    fn from(config: &crate::config::RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

// MARK: - Execution

/// Run an operation under the policy, retrying retryable failures.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if !policy.should_retry(&error, attempt) {
                    return Err(error);
                }
                let backoff = policy.calculate_backoff(attempt);
                attempt += 1;
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "retrying backend call"
                );
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn api_error(status: u16) -> SyncError {
        SyncError::Api {
            status,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff_ms, 0);
        assert_eq!(policy.max_backoff_ms, 30_000);
    }

    #[test]
    fn test_calculate_backoff_growth() {
        let policy = RetryPolicy::new()
            .with_initial_backoff(100)
            .with_backoff_multiplier(2.0);
        assert_eq!(policy.calculate_backoff(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_backoff(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_backoff(2), Duration::from_millis(400));
    }

    #[test]
    fn test_calculate_backoff_respects_cap() {
        let policy = RetryPolicy::new()
            .with_initial_backoff(1000)
            .with_max_backoff(2500);
        assert_eq!(policy.calculate_backoff(5), Duration::from_millis(2500));
    }

    #[test]
    fn test_zero_initial_backoff_stays_zero() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.calculate_backoff(0), Duration::ZERO);
        assert_eq!(policy.calculate_backoff(4), Duration::ZERO);
    }

    #[test]
    fn test_should_retry_classification() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&api_error(500), 0));
        assert!(policy.should_retry(&api_error(503), 0));
        assert!(policy.should_retry(&api_error(429), 0));
        assert!(policy.should_retry(&api_error(408), 0));
        assert!(!policy.should_retry(&api_error(400), 0));
        assert!(!policy.should_retry(&api_error(404), 0));
        assert!(!policy.should_retry(&SyncError::Unauthorized("expired".to_string()), 0));
        assert!(!policy.should_retry(&SyncError::NotFound("no record".to_string()), 0));
        assert!(!policy.should_retry(&SyncError::SyncFailed("empty payload".to_string()), 0));
    }

    #[test]
    fn test_should_retry_exhaustion() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&api_error(500), 0));
        assert!(policy.should_retry(&api_error(500), 1));
        // Third attempt is the last: no further retry.
        assert!(!policy.should_retry(&api_error(500), 2));

        let none = RetryPolicy::none();
        assert!(!none.should_retry(&api_error(500), 0));
    }

    #[tokio::test]
    async fn test_execute_succeeds_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = execute_with_retry(&RetryPolicy::default(), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, SyncError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = execute_with_retry(&RetryPolicy::default(), "test", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(api_error(500))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<u32, _> = execute_with_retry(&RetryPolicy::default(), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(api_error(503))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_stops_on_non_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<u32, _> = execute_with_retry(&RetryPolicy::default(), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::Unauthorized("expired".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_attempt_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy::default().with_max_attempts(5);

        let result: Result<u32, _> = execute_with_retry(&policy, "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(api_error(500))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
