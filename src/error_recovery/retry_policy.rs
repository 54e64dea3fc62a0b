//! Retry policy with exponential backoff and jitter
//!
//! Only errors whose [`ErrorKind`] is in the policy's retryable set are
//! retried. Everything else propagates on first occurrence, and exhausting
//! the retry budget returns the last error unchanged.

use crate::error::{ErrorKind, RegistryError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Exponential growth factor
    pub multiplier: f64,
    /// Scale each delay by a random factor in `[0.5, 1.0)`
    pub jitter: bool,
    /// Error kinds that may be retried
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            retryable: ErrorKind::TRANSIENT.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Policy for background work (more retries, longer delays)
    pub fn background() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            multiplier: 3.0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if secs.is_finite() {
            Duration::from_secs_f64(secs.max(0.0)).min(self.max_delay)
        } else {
            self.max_delay
        };

        if self.jitter {
            let factor = 0.5 + rand::thread_rng().gen::<f64>() * 0.5;
            capped.mul_f64(factor)
        } else {
            capped
        }
    }

    /// Check if error should be retried
    pub fn should_retry(&self, error: &RegistryError) -> bool {
        self.retryable.contains(&error.kind())
    }
}

/// Retry statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryStats {
    /// Total operations attempted
    pub total_operations: u64,
    /// Successful operations (no retry needed)
    pub successful_first_attempt: u64,
    /// Successful operations (after retry)
    pub successful_after_retry: u64,
    /// Operations that ran out of retries
    pub exhausted: u64,
    /// Operations that failed with a non-retryable error
    pub non_retryable: u64,
    /// Total retry attempts
    pub total_retry_attempts: u64,
    /// Last retry timestamp
    pub last_retry: Option<DateTime<Utc>>,
}

/// Retry executor
pub struct RetryExecutor {
    policy: RetryPolicy,
    stats: Arc<RwLock<RetryStats>>,
}

impl RetryExecutor {
    /// Create new retry executor
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stats: Arc::new(RwLock::new(RetryStats::default())),
        }
    }

    /// Active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute operation with retry policy
    pub async fn execute<F, T, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_policy(&self.policy, operation).await
    }

    /// Execute operation under an explicit policy, recording into these stats
    pub async fn execute_with_policy<F, T, Fut>(
        &self,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.stats.write().await.total_operations += 1;

        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(result) => {
                    let mut stats = self.stats.write().await;
                    if attempt == 0 {
                        stats.successful_first_attempt += 1;
                    } else {
                        stats.successful_after_retry += 1;
                        info!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !policy.should_retry(&error) {
                        self.stats.write().await.non_retryable += 1;
                        debug!(kind = ?error.kind(), "Error not retryable: {}", error);
                        return Err(error);
                    }

                    if attempt >= policy.max_retries {
                        self.stats.write().await.exhausted += 1;
                        warn!(
                            retries = attempt,
                            "Operation failed after exhausting retries: {}", error
                        );
                        return Err(error);
                    }

                    let delay = policy.calculate_delay(attempt);
                    attempt += 1;

                    {
                        let mut stats = self.stats.write().await;
                        stats.total_retry_attempts += 1;
                        stats.last_retry = Some(Utc::now());
                    }

                    debug!(
                        kind = ?error.kind(),
                        "Retrying after {:?} (retry {}/{})",
                        delay,
                        attempt,
                        policy.max_retries
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Get retry statistics
    pub async fn get_stats(&self) -> RetryStats {
        self.stats.read().await.clone()
    }

    /// Reset statistics
    pub async fn reset_stats(&self) {
        *self.stats.write().await = RetryStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = fixed_policy(5);

        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(350));
        assert_eq!(policy.calculate_delay(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter: true,
            ..fixed_policy(3)
        };

        for _ in 0..100 {
            let delay = policy.calculate_delay(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let attempts = AtomicU32::new(0);
        let executor = RetryExecutor::new(fixed_policy(3));

        let result = executor
            .execute(|| async {
                let current = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if current < 3 {
                    Err(RegistryError::connection("Simulated failure"))
                } else {
                    Ok("Success")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "Success");

        let stats = executor.get_stats().await;
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.successful_after_retry, 1);
        assert_eq!(stats.total_retry_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_propagates_immediately() {
        let attempts = AtomicU32::new(0);
        let executor = RetryExecutor::new(fixed_policy(3));

        let result: Result<()> = executor
            .execute(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(RegistryError::validation("bad product code"))
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(executor.get_stats().await.non_retryable, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let executor = RetryExecutor::new(fixed_policy(2));

        let result: Result<()> = executor
            .execute(|| async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                Err(RegistryError::server_error(503, format!("attempt {n}")))
            })
            .await;

        let error = result.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(error.to_string().contains("attempt 2"));
        assert_eq!(executor.get_stats().await.exhausted, 1);
    }
}
