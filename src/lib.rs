//! Resilient, self-optimizing access layer for upstream registry APIs
//!
//! This crate wraps a slow, rate-limited and occasionally unavailable
//! registry API behind a single resilient call path and an adaptive cache.
//!
//! # Features
//!
//! - Sliding-window rate limiting and a bounded admission queue
//! - Per-endpoint circuit breakers with optional timeout backoff
//! - Exponential retry with jitter for transient failures
//! - Deduplication of concurrent identical calls
//! - Recovery probes and a stale-cache / static / degraded / default fallback chain
//! - Adaptive-TTL cache with freshness tiers, compression and weighted eviction
//! - Cache-first client with query optimization, batching and background warming
//!
//! # Example
//!
//! ```no_run
//! use registry_resilience::{AccessLayerConfig, EnhancedClient, IntelligentCache, ResilienceBuilder};
//! # use registry_resilience::client::RegistryClient;
//! # use std::sync::Arc;
//! # async fn run(base: Arc<dyn RegistryClient>) -> registry_resilience::Result<()> {
//! let config = AccessLayerConfig::load(None)?;
//! let cache = Arc::new(IntelligentCache::new(config.cache.clone()));
//! let resilience = ResilienceBuilder::from_config(&config)
//!     .cache(cache.clone())
//!     .build()
//!     .await;
//! let client = EnhancedClient::new(base, resilience, cache, config.client.clone());
//! let details = client.get_details("K123456").await?;
//! println!("degraded: {}", details.meta.degraded);
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod logging;
pub mod monitoring;
pub mod traffic;

// Test support modules - available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheStrategy, Freshness, IntelligentCache};
pub use client::{
    CacheWarmer, EnhancedClient, EnhancedClientConfig, RegistryClient, SearchRequest,
    SearchResults, WarmingConfig,
};
pub use config::AccessLayerConfig;
pub use error::{ErrorKind, PipelineStage, RegistryError, Result};
pub use error_recovery::{
    CallOptions, CallSpec, FallbackRequest, FallbackSource, ResilienceBuilder, ResilienceManager,
    ResilientResponse,
};
pub use logging::{init_logging, LogConfig};
pub use monitoring::{CallOutcome, HealthStatus, MetricsSink};
pub use traffic::{RateLimiter, RequestDeduplicator, RequestQueue};
