//! Access layer configuration
//!
//! Every component has its own typed configuration struct with defaults;
//! [`AccessLayerConfig`] aggregates them so one file (plus environment
//! overrides) configures the whole layer:
//!
//! ```toml
//! [rate_limit]
//! max_requests = 240
//! window_duration = "1m"
//!
//! [cache]
//! default_ttl = "1h"
//! ```
//!
//! Environment variables use the `REGISTRY` prefix and `__` as the nesting
//! separator, e.g. `REGISTRY__RATE_LIMIT__MAX_REQUESTS=120`.

use crate::cache::CacheConfig;
use crate::client::{EnhancedClientConfig, WarmingConfig};
use crate::error::{RegistryError, Result};
use crate::error_recovery::{CircuitBreakerConfig, RecoveryConfig, ResilienceConfig, RetryPolicy};
use crate::traffic::{DeduplicationConfig, QueueConfig, RateLimitConfig};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "REGISTRY";

/// Root configuration for the access layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessLayerConfig {
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
    pub deduplication: DeduplicationConfig,
    pub queue: QueueConfig,
    pub recovery: RecoveryConfig,
    pub resilience: ResilienceConfig,
    pub client: EnhancedClientConfig,
    pub warming: WarmingConfig,
}

impl AccessLayerConfig {
    /// Load configuration from an optional file and the environment
    ///
    /// A given path must exist; its format follows the file extension.
    /// Environment variables override file values. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: AccessLayerConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent values
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_requests == 0 {
            return Err(RegistryError::config("rate_limit.max_requests must be > 0"));
        }
        if self.rate_limit.window_duration.is_zero() {
            return Err(RegistryError::config(
                "rate_limit.window_duration must be non-zero",
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(RegistryError::config(
                "circuit_breaker.failure_threshold must be > 0",
            ));
        }
        if self.circuit_breaker.backoff_multiplier < 1.0 {
            return Err(RegistryError::config(
                "circuit_breaker.backoff_multiplier must be >= 1.0",
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(RegistryError::config("retry.multiplier must be >= 1.0"));
        }
        if self.cache.min_ttl > self.cache.max_ttl {
            return Err(RegistryError::config(format!(
                "cache.min_ttl ({:?}) exceeds cache.max_ttl ({:?})",
                self.cache.min_ttl, self.cache.max_ttl
            )));
        }
        if self.cache.max_memory_bytes == 0 {
            return Err(RegistryError::config("cache.max_memory_bytes must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.cache.ema_alpha) || self.cache.ema_alpha == 0.0 {
            return Err(RegistryError::config("cache.ema_alpha must be in (0, 1]"));
        }
        if self.queue.max_concurrent == 0 {
            return Err(RegistryError::config("queue.max_concurrent must be > 0"));
        }
        if self.client.max_parallel == 0 {
            return Err(RegistryError::config("client.max_parallel must be > 0"));
        }
        if self.client.max_page_size == 0 {
            return Err(RegistryError::config("client.max_page_size must be > 0"));
        }
        Ok(())
    }
}
