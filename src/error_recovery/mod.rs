//! Error recovery patterns for upstream calls
//!
//! This module provides circuit breakers, retry policies, recovery probes and
//! the fallback chain, plus the [`ResilienceManager`] that composes them.

pub mod circuit_breaker;
pub mod fallback;
pub mod recovery;
pub mod resilience_manager;
pub mod retry_policy;

// Re-export commonly used types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitBreakerStats, CircuitState,
};
pub use fallback::{
    DegradedFn, FallbackManager, FallbackRequest, FallbackSource, FallbackStats, FallbackValue,
};
pub use recovery::{
    ErrorRecoveryEngine, ProbeFn, RecoveryAttempt, RecoveryConfig, RecoveryStats, RecoveryStrategy,
};
pub use resilience_manager::{
    CallOptions, CallSpec, ResilienceBuilder, ResilienceConfig, ResilienceManager,
    ResilienceStats, ResilientResponse, ResponseMeta,
};
pub use retry_policy::{RetryExecutor, RetryPolicy, RetryStats};
