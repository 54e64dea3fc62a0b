//! Circuit breaker pattern implementation for resilient error recovery
//!
//! This module provides a circuit breaker that stops calling a failing
//! endpoint for a cooldown period. One breaker exists per logical endpoint;
//! the [`CircuitBreakerManager`] creates them lazily and keeps them for the
//! lifetime of the process.
//!
//! Transitions: `Closed` opens once `failure_threshold` consecutive tracked
//! failures are seen; `Open` becomes `HalfOpen` once `recovery_timeout` has
//! elapsed since the last failure. `HalfOpen` admits a single trial call and
//! fails the rest fast until that trial either closes the circuit (success)
//! or opens it again (failure).

use crate::error::{ErrorKind, RegistryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - operations blocked
    Open,
    /// Circuit is half-open - testing if service recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before allowing a trial call
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    /// Error kinds that count as failures
    pub tracked_errors: Vec<ErrorKind>,
    /// Grow the recovery timeout after a failed trial call
    pub exponential_backoff: bool,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
    /// Upper bound for the grown recovery timeout
    #[serde(with = "humantime_serde")]
    pub max_recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            tracked_errors: ErrorKind::TRANSIENT.to_vec(),
            exponential_backoff: false,
            backoff_multiplier: 2.0,
            max_recovery_timeout: Duration::from_secs(300),
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Current consecutive failure count
    pub failure_count: u32,
    /// Total calls that reached the wrapped operation
    pub total_requests: u64,
    /// Failed requests
    pub failed_requests: u64,
    /// Successful requests
    pub successful_requests: u64,
    /// Requests rejected without invoking the operation
    pub blocked_requests: u64,
    /// Last failure time
    pub last_failure: Option<DateTime<Utc>>,
    /// Last success time
    pub last_success: Option<DateTime<Utc>>,
    /// Circuit open count
    pub circuit_open_count: u64,
    /// Current recovery timeout
    #[serde(with = "humantime_serde")]
    pub current_timeout: Duration,
    /// Time until a trial call is allowed
    #[serde(with = "humantime_serde::option")]
    pub time_until_half_open: Option<Duration>,
}

/// Internal circuit breaker state
struct CircuitBreakerState {
    current_state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    current_timeout: Duration,
    consecutive_trips: u32,
    /// Start of the trial call admitted in `HalfOpen`, if one is running
    trial_started: Option<Instant>,
    stats: CircuitBreakerStats,
}

/// Circuit breaker implementation
pub struct CircuitBreaker {
    endpoint: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitBreakerState>,
}

impl CircuitBreaker {
    /// Create new circuit breaker for an endpoint
    pub fn new(endpoint: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let initial_state = CircuitBreakerState {
            current_state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            current_timeout: config.recovery_timeout,
            consecutive_trips: 0,
            trial_started: None,
            stats: CircuitBreakerStats {
                state: CircuitState::Closed,
                failure_count: 0,
                total_requests: 0,
                failed_requests: 0,
                successful_requests: 0,
                blocked_requests: 0,
                last_failure: None,
                last_success: None,
                circuit_open_count: 0,
                current_timeout: config.recovery_timeout,
                time_until_half_open: None,
            },
        };

        Self {
            endpoint: endpoint.into(),
            config,
            state: RwLock::new(initial_state),
        }
    }

    /// Endpoint this breaker guards
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Invoke `operation` through the breaker
    ///
    /// Fails fast with [`RegistryError::CircuitOpen`] while the circuit is open,
    /// without invoking `operation`. Otherwise the outcome is recorded and the
    /// operation's own result is returned unchanged.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit().await?;

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(error) => {
                self.record_failure(&error).await;
                Err(error)
            }
        }
    }

    /// Check whether a call may proceed, moving `Open` to `HalfOpen` when due
    async fn admit(&self) -> Result<()> {
        let mut state = self.state.write().await;

        if state.current_state == CircuitState::Open {
            let elapsed = state
                .last_failure_time
                .map(|at| at.elapsed())
                .unwrap_or(state.current_timeout);

            if elapsed >= state.current_timeout {
                self.transition_state(&mut state, CircuitState::HalfOpen);
                info!(endpoint = %self.endpoint, "Circuit breaker transitioning to half-open");
                state.trial_started = Some(Instant::now());
            } else {
                state.stats.blocked_requests += 1;
                let retry_after = state.current_timeout - elapsed;
                debug!(endpoint = %self.endpoint, ?retry_after, "Circuit breaker open, blocking request");
                return Err(RegistryError::CircuitOpen {
                    endpoint: self.endpoint.clone(),
                    retry_after,
                });
            }
        } else if state.current_state == CircuitState::HalfOpen {
            // A trial abandoned for longer than the timeout no longer counts
            let busy = state
                .trial_started
                .map_or(false, |at| at.elapsed() < state.current_timeout);
            if busy {
                state.stats.blocked_requests += 1;
                debug!(endpoint = %self.endpoint, "Trial call in flight, blocking request");
                return Err(RegistryError::CircuitOpen {
                    endpoint: self.endpoint.clone(),
                    retry_after: Duration::ZERO,
                });
            }
            state.trial_started = Some(Instant::now());
        }

        state.stats.total_requests += 1;
        Ok(())
    }

    /// Record successful operation
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.stats.successful_requests += 1;
        state.stats.last_success = Some(Utc::now());
        state.failure_count = 0;
        state.trial_started = None;

        if state.current_state != CircuitState::Closed {
            self.transition_state(&mut state, CircuitState::Closed);
            state.consecutive_trips = 0;
            state.current_timeout = self.config.recovery_timeout;
            info!(endpoint = %self.endpoint, "Circuit breaker closed after successful recovery");
        }
    }

    /// Record failed operation
    pub async fn record_failure(&self, error: &RegistryError) {
        let kind = error.kind();
        if kind == ErrorKind::CircuitOpen || !self.config.tracked_errors.contains(&kind) {
            debug!(endpoint = %self.endpoint, ?kind, "Error kind not tracked by circuit breaker");
            self.state.write().await.trial_started = None;
            return;
        }

        let mut state = self.state.write().await;
        state.trial_started = None;
        state.stats.failed_requests += 1;
        state.stats.last_failure = Some(Utc::now());
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.current_state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    self.transition_state(&mut state, CircuitState::Open);
                    error!(
                        endpoint = %self.endpoint,
                        failures = state.failure_count,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // A failed trial call reopens the circuit
                self.transition_state(&mut state, CircuitState::Open);

                if self.config.exponential_backoff {
                    state.consecutive_trips += 1;
                    let grown = state
                        .current_timeout
                        .mul_f64(self.config.backoff_multiplier.max(1.0));
                    state.current_timeout = grown.min(self.config.max_recovery_timeout);
                    warn!(
                        endpoint = %self.endpoint,
                        timeout = ?state.current_timeout,
                        trips = state.consecutive_trips,
                        "Circuit breaker reopened with grown timeout"
                    );
                } else {
                    warn!(endpoint = %self.endpoint, "Circuit breaker reopened");
                }
            }
            CircuitState::Open => {
                debug!(endpoint = %self.endpoint, "Failure recorded while circuit is open");
            }
        }
    }

    /// Current state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.current_state
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> CircuitBreakerStats {
        let state = self.state.read().await;
        let mut stats = state.stats.clone();

        stats.state = state.current_state;
        stats.failure_count = state.failure_count;
        stats.current_timeout = state.current_timeout;

        if state.current_state == CircuitState::Open {
            if let Some(at) = state.last_failure_time {
                stats.time_until_half_open = Some(state.current_timeout.saturating_sub(at.elapsed()));
            }
        }

        stats
    }

    /// Reset circuit breaker
    pub async fn reset(&self) {
        let mut state = self.state.write().await;

        self.transition_state(&mut state, CircuitState::Closed);
        state.failure_count = 0;
        state.last_failure_time = None;
        state.current_timeout = self.config.recovery_timeout;
        state.consecutive_trips = 0;
        state.trial_started = None;

        info!(endpoint = %self.endpoint, "Circuit breaker reset to closed state");
    }

    fn transition_state(&self, state: &mut CircuitBreakerState, new_state: CircuitState) {
        let old_state = state.current_state;
        state.current_state = new_state;
        state.stats.state = new_state;

        match new_state {
            CircuitState::Open => state.stats.circuit_open_count += 1,
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::HalfOpen => {}
        }

        debug!(
            endpoint = %self.endpoint,
            "State transition: {old_state:?} -> {new_state:?}"
        );
    }
}

/// Circuit breaker manager for multiple endpoints
pub struct CircuitBreakerManager {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    /// Create new circuit breaker manager
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    /// Get or create circuit breaker for an endpoint
    pub async fn get_breaker(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(endpoint) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                info!("Created new circuit breaker for endpoint: {}", endpoint);
                Arc::new(CircuitBreaker::new(endpoint, self.default_config.clone()))
            })
            .clone()
    }

    /// Get all circuit breaker statistics
    pub async fn get_all_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        let breakers = self.breakers.read().await;
        let mut stats = HashMap::new();

        for (name, breaker) in breakers.iter() {
            stats.insert(name.clone(), breaker.get_stats().await);
        }

        stats
    }

    /// Reset all circuit breakers
    pub async fn reset_all(&self) {
        let breakers = self.breakers.read().await;

        for breaker in breakers.values() {
            breaker.reset().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    fn breaker(threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "registry/search",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_millis(timeout_ms),
                ..Default::default()
            },
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker
            .call(|| async { Err::<(), _>(RegistryError::connection("reset")) })
            .await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = breaker(2, 10_000);
        let invocations = AtomicU32::new(0);

        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Open);

        let result = breaker
            .call(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(RegistryError::CircuitOpen { .. })));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);

        let stats = breaker.get_stats().await;
        assert_eq!(stats.blocked_requests, 1);
        assert!(stats.time_until_half_open.is_some());
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let breaker = breaker(2, 50);
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        sleep(Duration::from_millis(70)).await;

        let result = breaker.call(|| async { Ok::<_, RegistryError>("ok") }).await;
        assert_eq!(result.unwrap(), "ok");

        let stats = breaker.get_stats().await;
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_admits_a_single_trial() {
        let breaker = breaker(1, 50);
        let _ = fail(&breaker).await;
        sleep(Duration::from_millis(70)).await;

        let release = tokio::sync::Notify::new();
        let invocations = AtomicU32::new(0);
        let (trial, concurrent) = tokio::join!(
            breaker.call(|| async {
                release.notified().await;
                Ok::<_, RegistryError>("trial")
            }),
            async {
                let result = breaker
                    .call(|| async {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, RegistryError>("concurrent")
                    })
                    .await;
                release.notify_one();
                result
            }
        );

        assert_eq!(trial.unwrap(), "trial");
        assert!(matches!(concurrent, Err(RegistryError::CircuitOpen { .. })));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_trial_frees_the_slot_after_timeout() {
        let breaker = breaker(1, 50);
        let _ = fail(&breaker).await;
        sleep(Duration::from_millis(70)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.call(|| std::future::pending::<Result<()>>()),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(matches!(
            breaker.call(|| async { Ok(()) }).await,
            Err(RegistryError::CircuitOpen { .. })
        ));

        sleep(Duration::from_millis(60)).await;
        assert!(breaker.call(|| async { Ok(()) }).await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_with_backoff() {
        let breaker = CircuitBreaker::new(
            "registry/details",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_millis(50),
                exponential_backoff: true,
                backoff_multiplier: 2.0,
                ..Default::default()
            },
        );
        let _ = fail(&breaker).await;
        sleep(Duration::from_millis(70)).await;

        let _ = fail(&breaker).await;
        let stats = breaker.get_stats().await;
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.current_timeout, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_untracked_errors_do_not_trip() {
        let breaker = breaker(1, 10_000);

        let result = breaker
            .call(|| async { Err::<(), _>(RegistryError::not_found("K000000")) })
            .await;
        assert!(matches!(result, Err(RegistryError::Permanent { .. })));
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_manager_scopes_breakers_per_endpoint() {
        let manager = CircuitBreakerManager::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        let search = manager.get_breaker("registry/search").await;
        let _ = fail(&search).await;

        let details = manager.get_breaker("registry/details").await;
        assert_eq!(details.state().await, CircuitState::Closed);
        assert_eq!(
            manager.get_breaker("registry/search").await.state().await,
            CircuitState::Open
        );
        assert_eq!(manager.get_all_stats().await.len(), 2);

        manager.reset_all().await;
        assert_eq!(search.state().await, CircuitState::Closed);
    }
}
