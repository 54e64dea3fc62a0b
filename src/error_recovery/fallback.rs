//! Fallback chain for calls whose upstream work failed for good
//!
//! Sources are tried in a fixed order until one yields a value:
//! 1. the cached value for the call's key, regardless of freshness
//! 2. a static value registered under the caller's fallback key
//! 3. a degraded-service function registered under the same key
//! 4. the caller-supplied default
//!
//! A source whose value the caller cannot use is skipped. If none applies the
//! original error is handed back unchanged.

use crate::cache::IntelligentCache;
use crate::error::{RegistryError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Where a fallback value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSource {
    StaleCache,
    Static,
    Degraded,
    Default,
}

/// Fallback inputs supplied with a call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackRequest {
    /// Cache entry to serve stale, as `(namespace, key)`
    pub cache_key: Option<(String, String)>,
    /// Key of registered static and degraded fallbacks
    pub fallback_key: Option<String>,
    /// Value returned when every other source is unavailable
    pub default: Option<Value>,
}

impl FallbackRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_key(mut self, namespace: impl Into<String>, key: impl Into<String>) -> Self {
        self.cache_key = Some((namespace.into(), key.into()));
        self
    }

    pub fn with_fallback_key(mut self, key: impl Into<String>) -> Self {
        self.fallback_key = Some(key.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.cache_key.is_none() && self.fallback_key.is_none() && self.default.is_none()
    }
}

/// A value produced by the fallback chain
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackValue<T = Value> {
    pub value: T,
    pub source: FallbackSource,
}

/// Reduced-functionality handler, called with the original call arguments
pub type DegradedFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Fallback statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackStats {
    pub stale_cache: u64,
    pub static_value: u64,
    pub degraded: u64,
    pub default_value: u64,
    /// Degraded handlers that themselves failed
    pub degraded_failures: u64,
    /// Values skipped because the caller could not use them
    pub rejected: u64,
    /// Requests no source could serve
    pub misses: u64,
}

/// Ordered fallback chain
pub struct FallbackManager {
    cache: OnceCell<Arc<IntelligentCache>>,
    static_values: RwLock<HashMap<String, Value>>,
    degraded: RwLock<HashMap<String, DegradedFn>>,
    stats: RwLock<FallbackStats>,
}

impl FallbackManager {
    /// Create a fallback manager, optionally backed by a cache for stale reads
    pub fn new(cache: Option<Arc<IntelligentCache>>) -> Self {
        Self {
            cache: cache.map(OnceCell::with_value).unwrap_or_default(),
            static_values: RwLock::new(HashMap::new()),
            degraded: RwLock::new(HashMap::new()),
            stats: RwLock::new(FallbackStats::default()),
        }
    }

    /// Use `cache` for stale reads unless a cache is already attached
    ///
    /// Returns whether stale reads now come from `cache`.
    pub fn attach_cache(&self, cache: Arc<IntelligentCache>) -> bool {
        let attached = self.cache.get_or_init(|| cache.clone());
        Arc::ptr_eq(attached, &cache)
    }

    pub fn has_cache(&self) -> bool {
        self.cache.get().is_some()
    }

    /// Register a static fallback value
    pub async fn register_static(&self, key: impl Into<String>, value: Value) {
        self.static_values.write().await.insert(key.into(), value);
    }

    /// Register a degraded-service handler
    pub async fn register_degraded<F, Fut>(&self, key: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: DegradedFn = Arc::new(move |args| handler(args).boxed());
        self.degraded.write().await.insert(key.into(), handler);
    }

    /// Walk the chain, returning the first value found or `error` unchanged
    pub async fn resolve(
        &self,
        request: &FallbackRequest,
        args: &Value,
        error: RegistryError,
    ) -> std::result::Result<FallbackValue, RegistryError> {
        self.resolve_as(request, args, error, Ok).await
    }

    /// Walk the chain, skipping any source whose value `convert` rejects
    pub async fn resolve_as<T, C>(
        &self,
        request: &FallbackRequest,
        args: &Value,
        error: RegistryError,
        convert: C,
    ) -> std::result::Result<FallbackValue<T>, RegistryError>
    where
        T: Send,
        C: Fn(Value) -> Result<T> + Send + Sync,
    {
        if let (Some(cache), Some((namespace, key))) = (self.cache.get(), &request.cache_key) {
            if let Some(value) = cache.get_stale(namespace, key).await {
                match convert(value) {
                    Ok(value) => {
                        self.stats.write().await.stale_cache += 1;
                        info!(namespace = %namespace, key = %key, "Serving stale cache entry after failure");
                        return Ok(FallbackValue {
                            value,
                            source: FallbackSource::StaleCache,
                        });
                    }
                    Err(e) => self.reject(FallbackSource::StaleCache, &e).await,
                }
            }
        }

        if let Some(fallback_key) = &request.fallback_key {
            let static_value = self.static_values.read().await.get(fallback_key).cloned();
            if let Some(value) = static_value {
                match convert(value) {
                    Ok(value) => {
                        self.stats.write().await.static_value += 1;
                        info!(fallback_key = %fallback_key, "Serving static fallback");
                        return Ok(FallbackValue {
                            value,
                            source: FallbackSource::Static,
                        });
                    }
                    Err(e) => self.reject(FallbackSource::Static, &e).await,
                }
            }

            let handler = self.degraded.read().await.get(fallback_key).cloned();
            if let Some(handler) = handler {
                match handler(args.clone()).await.and_then(&convert) {
                    Ok(value) => {
                        self.stats.write().await.degraded += 1;
                        info!(fallback_key = %fallback_key, "Serving degraded response");
                        return Ok(FallbackValue {
                            value,
                            source: FallbackSource::Degraded,
                        });
                    }
                    Err(e) => {
                        self.stats.write().await.degraded_failures += 1;
                        warn!(fallback_key = %fallback_key, "Degraded handler failed: {}", e);
                    }
                }
            }
        }

        if let Some(value) = &request.default {
            match convert(value.clone()) {
                Ok(value) => {
                    self.stats.write().await.default_value += 1;
                    debug!("Serving caller default");
                    return Ok(FallbackValue {
                        value,
                        source: FallbackSource::Default,
                    });
                }
                Err(e) => self.reject(FallbackSource::Default, &e).await,
            }
        }

        self.stats.write().await.misses += 1;
        Err(error)
    }

    async fn reject(&self, source: FallbackSource, error: &RegistryError) {
        self.stats.write().await.rejected += 1;
        warn!(?source, "Skipping fallback value with the wrong shape: {}", error);
    }

    /// Get fallback statistics
    pub async fn get_stats(&self) -> FallbackStats {
        self.stats.read().await.clone()
    }
}
