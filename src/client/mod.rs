//! Registry client abstraction and the optimizing client built on it
//!
//! [`RegistryClient`] is the base transport-level client supplied by the
//! application. [`EnhancedClient`] wraps it with caching, query optimization,
//! batching and the resilience pipeline; [`CacheWarmer`] keeps popular
//! queries warm in the background.

pub mod enhanced;
pub mod warming;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub use enhanced::{ClientHealth, EnhancedClient, EnhancedClientConfig, PerformanceMetrics, UpstreamHealth};
pub use warming::{CacheWarmer, WarmQuery, WarmingConfig, WarmingHandle, WarmingStats};

/// Search request sent to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free-text query
    pub query: String,
    /// Field filters, kept sorted so equivalent requests compare equal
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    /// Maximum results to return
    pub limit: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: BTreeMap::new(),
            limit: 25,
        }
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Search results returned by the registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Total matches upstream, which may exceed `results.len()`
    pub total: u64,
    pub results: Vec<Value>,
}

/// Base client for the upstream registry API
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Full-text search
    async fn search(&self, request: &SearchRequest) -> Result<SearchResults>;

    /// Full record for one registry identifier
    async fn get_details(&self, id: &str) -> Result<Value>;

    /// Reference-data lookup, such as a product code
    async fn lookup(&self, code: &str) -> Result<Value>;

    /// Cheap liveness probe
    async fn health_check(&self) -> Result<()>;
}
