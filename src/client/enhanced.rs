//! Optimizing registry client
//!
//! Every operation checks the cache first and only on a miss goes upstream
//! through the [`ResilienceManager`]. Upstream answers are cached with a
//! priority derived from the query, so popular and broad queries survive
//! eviction longest. Fallback values are never written back to the cache.

use super::warming::WarmingStats;
use super::{RegistryClient, SearchRequest, SearchResults};
use crate::cache::{CacheHealth, CacheStats, CacheStrategy, Freshness, IntelligentCache};
use crate::error::{RegistryError, Result};
use crate::error_recovery::{
    CallSpec, CircuitState, FallbackRequest, ResilienceManager, ResilienceStats, ResilientResponse,
};
use crate::monitoring::HealthStatus;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

const SEARCH_NAMESPACE: &str = "search";
const DETAILS_NAMESPACE: &str = "details";
const LOOKUP_NAMESPACE: &str = "lookup";

/// Enhanced client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancedClientConfig {
    /// Service name used for breaker scopes and telemetry
    pub service_name: String,
    /// Freshness required by the plain read operations
    pub default_freshness: Freshness,
    /// Upper bound for `SearchRequest::limit`
    pub max_page_size: usize,
    /// Default concurrency for `batch_search`
    pub max_parallel: usize,
    /// Query terms whose results deserve a higher cache priority
    pub common_terms: Vec<String>,
    /// Result counts at or above this raise the cache priority
    pub many_results_threshold: u64,
    /// Strategy for cached search results
    pub search_strategy: CacheStrategy,
    /// Strategy for cached details and lookups
    pub record_strategy: CacheStrategy,
    /// Deadline for the upstream health probe
    #[serde(with = "humantime_serde")]
    pub health_timeout: Duration,
}

impl Default for EnhancedClientConfig {
    fn default() -> Self {
        Self {
            service_name: "registry".to_string(),
            default_freshness: Freshness::Recent,
            max_page_size: 100,
            max_parallel: 4,
            common_terms: ["pump", "catheter", "stent", "glucose", "monitor", "implant"]
                .into_iter()
                .map(String::from)
                .collect(),
            many_results_threshold: 100,
            search_strategy: CacheStrategy::RefreshAhead,
            record_strategy: CacheStrategy::WriteThrough,
            health_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct ClientCounters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    upstream_calls: AtomicU64,
    upstream_latency_ms: AtomicU64,
    degraded: AtomicU64,
    recovered: AtomicU64,
    failed: AtomicU64,
}

/// Performance snapshot for dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_hit_ratio: f64,
    pub upstream_calls: u64,
    pub avg_upstream_latency_ms: f64,
    pub degraded_responses: u64,
    pub recovered_responses: u64,
    pub failed_requests: u64,
    pub cache: CacheStats,
    pub resilience: ResilienceStats,
    pub warming: WarmingStats,
}

/// Result of probing the base client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamHealth {
    pub healthy: bool,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    pub error: Option<String>,
}

/// Combined health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHealth {
    pub status: HealthStatus,
    pub upstream: UpstreamHealth,
    pub cache: CacheHealth,
    pub circuit_breakers: HashMap<String, CircuitState>,
    pub checked_at: DateTime<Utc>,
}

/// Cache-first, resilient registry client
pub struct EnhancedClient {
    base: Arc<dyn RegistryClient>,
    resilience: ResilienceManager,
    cache: Arc<IntelligentCache>,
    config: EnhancedClientConfig,
    counters: ClientCounters,
    warming: Arc<RwLock<WarmingStats>>,
}

impl EnhancedClient {
    pub fn new(
        base: Arc<dyn RegistryClient>,
        resilience: ResilienceManager,
        cache: Arc<IntelligentCache>,
        config: EnhancedClientConfig,
    ) -> Self {
        if !resilience.fallback_manager().attach_cache(cache.clone()) {
            warn!(
                service = %config.service_name,
                "Stale fallback reads a different cache than the client writes"
            );
        }
        Self {
            base,
            resilience,
            cache,
            config,
            counters: ClientCounters::default(),
            warming: Arc::new(RwLock::new(WarmingStats::default())),
        }
    }

    pub fn config(&self) -> &EnhancedClientConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<IntelligentCache> {
        &self.cache
    }

    pub fn resilience(&self) -> &ResilienceManager {
        &self.resilience
    }

    pub(crate) fn warming_stats(&self) -> Arc<RwLock<WarmingStats>> {
        self.warming.clone()
    }

    /// Normalize a request so equivalent queries share cache keys
    ///
    /// Lower-cases the query, collapses whitespace, trims filter values and
    /// clamps `limit` to `1..=max_page_size`.
    pub fn optimize_query(&self, request: &SearchRequest) -> SearchRequest {
        let query = request
            .query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let filters = request
            .filters
            .iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();

        SearchRequest {
            query,
            filters,
            limit: request.limit.clamp(1, self.config.max_page_size.max(1)),
        }
    }

    /// Cache priority for a search and its results, in `0..=10`
    pub fn search_priority(&self, request: &SearchRequest, results: &SearchResults) -> u8 {
        let mut priority: i32 = 5;
        if self
            .config
            .common_terms
            .iter()
            .any(|term| request.query.contains(term.as_str()))
        {
            priority += 2;
        }
        if results.total >= self.config.many_results_threshold {
            priority += 2;
        }
        priority.clamp(0, 10) as u8
    }

    pub async fn search(&self, request: SearchRequest) -> Result<ResilientResponse<SearchResults>> {
        self.search_with_freshness(request, self.config.default_freshness)
            .await
    }

    pub async fn search_with_freshness(
        &self,
        request: SearchRequest,
        freshness: Freshness,
    ) -> Result<ResilientResponse<SearchResults>> {
        self.run_search(request, Some(freshness)).await
    }

    /// Search upstream regardless of cached state, then re-cache
    pub async fn refresh_search(
        &self,
        request: SearchRequest,
    ) -> Result<ResilientResponse<SearchResults>> {
        self.run_search(request, None).await
    }

    /// Run searches with at most `max_parallel` in flight, preserving order
    pub async fn batch_search(
        &self,
        requests: Vec<SearchRequest>,
        max_parallel: usize,
    ) -> Vec<Result<ResilientResponse<SearchResults>>> {
        stream::iter(requests)
            .map(|request| self.search(request))
            .buffered(max_parallel.max(1))
            .collect()
            .await
    }

    pub async fn get_details(&self, id: &str) -> Result<ResilientResponse<Value>> {
        self.run_details(id, Some(self.config.default_freshness))
            .await
    }

    pub async fn get_details_with_freshness(
        &self,
        id: &str,
        freshness: Freshness,
    ) -> Result<ResilientResponse<Value>> {
        self.run_details(id, Some(freshness)).await
    }

    pub async fn refresh_details(&self, id: &str) -> Result<ResilientResponse<Value>> {
        self.run_details(id, None).await
    }

    pub async fn lookup(&self, code: &str) -> Result<ResilientResponse<Value>> {
        self.run_lookup(code, Some(self.config.default_freshness))
            .await
    }

    pub async fn lookup_with_freshness(
        &self,
        code: &str,
        freshness: Freshness,
    ) -> Result<ResilientResponse<Value>> {
        self.run_lookup(code, Some(freshness)).await
    }

    pub async fn refresh_lookup(&self, code: &str) -> Result<ResilientResponse<Value>> {
        self.run_lookup(code, None).await
    }

    /// Re-fetch whatever a cache key was built from
    pub async fn refresh_key(&self, namespace: &str, key: &str) -> Result<()> {
        match namespace {
            SEARCH_NAMESPACE => {
                let request = parse_search_key(key).ok_or_else(|| {
                    RegistryError::validation(format!("malformed search cache key: {key}"))
                })?;
                self.refresh_search(request).await.map(|_| ())
            }
            DETAILS_NAMESPACE => {
                let id = parse_single_key(key, "details", "id").ok_or_else(|| {
                    RegistryError::validation(format!("malformed details cache key: {key}"))
                })?;
                self.refresh_details(&id).await.map(|_| ())
            }
            LOOKUP_NAMESPACE => {
                let code = parse_single_key(key, "lookup", "code").ok_or_else(|| {
                    RegistryError::validation(format!("malformed lookup cache key: {key}"))
                })?;
                self.refresh_lookup(&code).await.map(|_| ())
            }
            other => Err(RegistryError::validation(format!(
                "unknown cache namespace: {other}"
            ))),
        }
    }

    async fn run_search(
        &self,
        request: SearchRequest,
        freshness: Option<Freshness>,
    ) -> Result<ResilientResponse<SearchResults>> {
        let request = self.optimize_query(&request);
        let key = search_key(&request);
        let args = serde_json::to_value(&request)?;
        let base = self.base.clone();
        let upstream_request = request.clone();

        self.cached_call(
            SEARCH_NAMESPACE,
            &key,
            args,
            freshness,
            self.config.search_strategy,
            |results: &SearchResults| self.search_priority(&request, results),
            move || {
                let base = base.clone();
                let request = upstream_request.clone();
                async move { base.search(&request).await }
            },
        )
        .await
    }

    async fn run_details(
        &self,
        id: &str,
        freshness: Option<Freshness>,
    ) -> Result<ResilientResponse<Value>> {
        let id = id.trim().to_string();
        let key = single_key("details", "id", &id);
        let base = self.base.clone();
        let upstream_id = id.clone();

        self.cached_call(
            DETAILS_NAMESPACE,
            &key,
            json!({ "id": id }),
            freshness,
            self.config.record_strategy,
            |_: &Value| 5,
            move || {
                let base = base.clone();
                let id = upstream_id.clone();
                async move { base.get_details(&id).await }
            },
        )
        .await
    }

    async fn run_lookup(
        &self,
        code: &str,
        freshness: Option<Freshness>,
    ) -> Result<ResilientResponse<Value>> {
        let code = code.trim().to_uppercase();
        let key = single_key("lookup", "code", &code);
        let base = self.base.clone();
        let upstream_code = code.clone();

        self.cached_call(
            LOOKUP_NAMESPACE,
            &key,
            json!({ "code": code }),
            freshness,
            self.config.record_strategy,
            |_: &Value| 6,
            move || {
                let base = base.clone();
                let code = upstream_code.clone();
                async move { base.lookup(&code).await }
            },
        )
        .await
    }

    /// Cache check, resilient upstream call on miss, then re-cache
    #[allow(clippy::too_many_arguments)]
    async fn cached_call<T, P, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        args: Value,
        freshness: Option<Freshness>,
        strategy: CacheStrategy,
        priority: P,
        operation: F,
    ) -> Result<ResilientResponse<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        P: FnOnce(&T) -> u8,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        if let Some(freshness) = freshness {
            if let Some(value) = self
                .cache
                .get_with_freshness_check(namespace, key, freshness)
                .await
            {
                match serde_json::from_value::<T>(value) {
                    Ok(data) => {
                        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                        debug!(namespace, key, "Served from cache");
                        return Ok(ResilientResponse::cached(data));
                    }
                    Err(e) => {
                        warn!(namespace, key, "Discarding cached value with wrong shape: {}", e);
                        self.cache.invalidate(namespace, key).await;
                    }
                }
            }
        }

        let spec = CallSpec::new(self.config.service_name.clone(), namespace)
            .with_args(args)
            .with_fallback(
                FallbackRequest::new()
                    .with_cache_key(namespace, key)
                    .with_fallback_key(namespace),
            );

        let started = Instant::now();
        let response = match self.resilience.execute(spec, operation).await {
            Ok(response) => response,
            Err(error) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return Err(error);
            }
        };

        if response.meta.degraded {
            self.counters.degraded.fetch_add(1, Ordering::Relaxed);
            return Ok(response);
        }

        let elapsed = started.elapsed();
        self.counters.upstream_calls.fetch_add(1, Ordering::Relaxed);
        self.counters
            .upstream_latency_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        if response.meta.recovered {
            self.counters.recovered.fetch_add(1, Ordering::Relaxed);
        }
        self.cache.record_response_time(namespace, key, elapsed).await;

        let priority = priority(&response.data);
        match serde_json::to_value(&response.data) {
            Ok(value) => {
                if let Err(e) = self
                    .cache
                    .set_with_strategy(namespace, key, &value, None, strategy, priority)
                    .await
                {
                    warn!(namespace, key, "Failed to cache upstream response: {}", e);
                }
            }
            Err(e) => warn!(namespace, key, "Failed to serialize response for cache: {}", e),
        }

        Ok(response)
    }

    /// Performance snapshot
    pub async fn get_performance_metrics(&self) -> PerformanceMetrics {
        let requests = self.counters.requests.load(Ordering::Relaxed);
        let cache_hits = self.counters.cache_hits.load(Ordering::Relaxed);
        let upstream_calls = self.counters.upstream_calls.load(Ordering::Relaxed);
        let latency_total = self.counters.upstream_latency_ms.load(Ordering::Relaxed);

        PerformanceMetrics {
            requests,
            cache_hits,
            cache_hit_ratio: if requests == 0 {
                0.0
            } else {
                cache_hits as f64 / requests as f64
            },
            upstream_calls,
            avg_upstream_latency_ms: if upstream_calls == 0 {
                0.0
            } else {
                latency_total as f64 / upstream_calls as f64
            },
            degraded_responses: self.counters.degraded.load(Ordering::Relaxed),
            recovered_responses: self.counters.recovered.load(Ordering::Relaxed),
            failed_requests: self.counters.failed.load(Ordering::Relaxed),
            cache: self.cache.stats().await,
            resilience: self.resilience.get_stats().await,
            warming: self.warming.read().await.clone(),
        }
    }

    /// Probe upstream and the cache and summarize breaker states
    pub async fn health_check(&self) -> ClientHealth {
        let started = Instant::now();
        let upstream = match timeout(self.config.health_timeout, self.base.health_check()).await {
            Ok(Ok(())) => UpstreamHealth {
                healthy: true,
                latency: started.elapsed(),
                error: None,
            },
            Ok(Err(e)) => UpstreamHealth {
                healthy: false,
                latency: started.elapsed(),
                error: Some(e.to_string()),
            },
            Err(_) => UpstreamHealth {
                healthy: false,
                latency: started.elapsed(),
                error: Some(format!(
                    "health probe exceeded {:?}",
                    self.config.health_timeout
                )),
            },
        };

        let cache = self.cache.health_check().await;
        let circuit_breakers: HashMap<String, CircuitState> = self
            .resilience
            .circuit_breakers()
            .get_all_stats()
            .await
            .into_iter()
            .map(|(endpoint, stats)| (endpoint, stats.state))
            .collect();

        let any_open = circuit_breakers
            .values()
            .any(|state| *state != CircuitState::Closed);
        let upstream_status = match (upstream.healthy, cache.status) {
            (true, _) if !any_open => HealthStatus::Healthy,
            (false, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };

        ClientHealth {
            status: upstream_status.combine(cache.status),
            upstream,
            cache,
            circuit_breakers,
            checked_at: Utc::now(),
        }
    }
}

fn escape(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('&', "%26")
        .replace('=', "%3D")
}

fn unescape(value: &str) -> String {
    value
        .replace("%3D", "=")
        .replace("%26", "&")
        .replace("%25", "%")
}

fn single_key(operation: &str, field: &str, value: &str) -> String {
    format!("{operation}?{field}={}", escape(value))
}

fn parse_single_key(key: &str, operation: &str, field: &str) -> Option<String> {
    let rest = key.strip_prefix(operation)?.strip_prefix('?')?;
    let value = rest.strip_prefix(field)?.strip_prefix('=')?;
    Some(unescape(value))
}

fn search_key(request: &SearchRequest) -> String {
    let mut key = format!(
        "search?q={}&limit={}",
        escape(&request.query),
        request.limit
    );
    for (field, value) in &request.filters {
        key.push_str(&format!("&f.{}={}", escape(field), escape(value)));
    }
    key
}

fn parse_search_key(key: &str) -> Option<SearchRequest> {
    let rest = key.strip_prefix("search?")?;
    let mut request = SearchRequest::new("");
    let mut has_query = false;

    for part in rest.split('&') {
        let (name, value) = part.split_once('=')?;
        match name {
            "q" => {
                request.query = unescape(value);
                has_query = true;
            }
            "limit" => request.limit = value.parse().ok()?,
            filter => {
                let field = filter.strip_prefix("f.")?;
                request.filters.insert(unescape(field), unescape(value));
            }
        }
    }

    has_query.then_some(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CompressionType};
    use crate::error_recovery::{FallbackSource, RetryPolicy};
    use crate::mock::MockRegistryClient;

    async fn client_with(mock: Arc<MockRegistryClient>) -> EnhancedClient {
        let cache = Arc::new(IntelligentCache::new(CacheConfig {
            compression: CompressionType::None,
            ..Default::default()
        }));
        let resilience = ResilienceManager::builder()
            .retry_policy(RetryPolicy::none())
            .cache(cache.clone())
            .build()
            .await;
        EnhancedClient::new(mock, resilience, cache, EnhancedClientConfig::default())
    }

    #[tokio::test]
    async fn test_optimize_query_normalizes() {
        let client = client_with(Arc::new(MockRegistryClient::new())).await;
        let request = SearchRequest::new("  Infusion   PUMP ")
            .with_filter(" Decision ", " SESE ")
            .with_limit(10_000);

        let optimized = client.optimize_query(&request);
        assert_eq!(optimized.query, "infusion pump");
        assert_eq!(optimized.filters.get("decision").map(String::as_str), Some("SESE"));
        assert_eq!(optimized.limit, 100);
    }

    #[tokio::test]
    async fn test_search_priority_heuristic() {
        let client = client_with(Arc::new(MockRegistryClient::new())).await;
        let common = SearchRequest::new("insulin pump");
        let rare = SearchRequest::new("zebra");
        let many = SearchResults {
            total: 500,
            results: vec![],
        };
        let few = SearchResults::default();

        assert_eq!(client.search_priority(&common, &many), 9);
        assert_eq!(client.search_priority(&common, &few), 7);
        assert_eq!(client.search_priority(&rare, &few), 5);
    }

    #[tokio::test]
    async fn test_second_search_is_served_from_cache() {
        let mock = Arc::new(MockRegistryClient::new());
        let client = client_with(mock.clone()).await;

        let first = client.search(SearchRequest::new("pump")).await.unwrap();
        let second = client.search(SearchRequest::new("  PUMP ")).await.unwrap();

        assert!(!first.meta.cache_hit);
        assert!(second.meta.cache_hit);
        assert_eq!(first.data, second.data);
        assert_eq!(mock.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_serves_when_upstream_fails() {
        let mock = Arc::new(MockRegistryClient::new());
        let client = client_with(mock.clone()).await;

        let fresh = client.get_details("K123456").await.unwrap();
        mock.fail_with(Some(RegistryError::server_error(503, "maintenance")));

        let degraded = client.refresh_details("K123456").await.unwrap();
        assert!(degraded.meta.degraded);
        assert_eq!(degraded.data, fresh.data);

        let metrics = client.get_performance_metrics().await;
        assert_eq!(metrics.degraded_responses, 1);
        assert_eq!(metrics.upstream_calls, 1);
    }

    #[tokio::test]
    async fn test_client_cache_backs_stale_fallback() {
        let mock = Arc::new(MockRegistryClient::new());
        let cache = Arc::new(IntelligentCache::new(CacheConfig::default()));
        let resilience = ResilienceManager::builder()
            .retry_policy(RetryPolicy::none())
            .build()
            .await;
        assert!(!resilience.fallback_manager().has_cache());

        let client = EnhancedClient::new(
            mock.clone(),
            resilience,
            cache,
            EnhancedClientConfig::default(),
        );
        assert!(client.resilience().fallback_manager().has_cache());

        let fresh = client.lookup("DXY").await.unwrap();
        mock.fail_with(Some(RegistryError::connection("reset")));
        let degraded = client.refresh_lookup("DXY").await.unwrap();

        assert_eq!(degraded.meta.fallback, Some(FallbackSource::StaleCache));
        assert_eq!(degraded.data, fresh.data);
    }

    #[test]
    fn test_cache_keys_parse_back() {
        let request = SearchRequest::new("a&b=c")
            .with_filter("decision", "SE%SE")
            .with_limit(7);
        let key = search_key(&request);

        assert_eq!(parse_search_key(&key), Some(request));
        assert_eq!(
            parse_single_key(&single_key("details", "id", "K1=2"), "details", "id"),
            Some("K1=2".to_string())
        );
    }
}
