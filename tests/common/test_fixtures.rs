//! Test fixtures and utilities for consistent test setup
//!
//! Provides reusable configurations and fully assembled clients as rstest
//! fixtures.

use super::ScriptedRegistry;
use registry_resilience::cache::{CacheConfig, CompressionType, IntelligentCache};
use registry_resilience::error_recovery::{CircuitBreakerConfig, RetryPolicy};
use registry_resilience::monitoring::InMemorySink;
use registry_resilience::{EnhancedClient, EnhancedClientConfig, ResilienceBuilder, ResilienceManager};
use rstest::*;
use std::sync::Arc;
use std::time::Duration;

/// Retry policy with millisecond delays and no jitter
#[fixture]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        jitter: false,
        ..Default::default()
    }
}

/// Cache config storing plain payloads
#[fixture]
pub fn cache_config() -> CacheConfig {
    CacheConfig {
        compression: CompressionType::None,
        ..Default::default()
    }
}

/// Everything an integration test needs to drive and observe the client
pub struct Harness {
    pub registry: Arc<ScriptedRegistry>,
    pub cache: Arc<IntelligentCache>,
    pub resilience: ResilienceManager,
    pub sink: Arc<InMemorySink>,
    pub client: Arc<EnhancedClient>,
}

/// Assemble a client around `registry` with fast retries
pub async fn harness_with(registry: ScriptedRegistry, breaker: CircuitBreakerConfig) -> Harness {
    let registry = Arc::new(registry);
    let cache = Arc::new(IntelligentCache::new(cache_config()));
    let sink = Arc::new(InMemorySink::default());
    let resilience = ResilienceBuilder::new()
        .retry_policy(fast_retry())
        .circuit_breaker(breaker)
        .cache(cache.clone())
        .sink(sink.clone())
        .build()
        .await;
    let client = Arc::new(EnhancedClient::new(
        registry.clone(),
        resilience.clone(),
        cache.clone(),
        EnhancedClientConfig::default(),
    ));

    Harness {
        registry,
        cache,
        resilience,
        sink,
        client,
    }
}

#[fixture]
pub async fn harness() -> Harness {
    harness_with(ScriptedRegistry::new(), CircuitBreakerConfig::default()).await
}
