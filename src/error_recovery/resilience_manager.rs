//! Resilience manager composing every protection layer into one entry point
//!
//! A call runs through these layers, outermost first:
//!
//! ```text
//! Deduplicator -> RequestQueue -> RateLimiter -> CircuitBreaker -> Retry -> operation
//! ```
//!
//! If the breaker-wrapped retry loop still fails, a recovery probe may grant
//! one more attempt. Everything up to that point is the deduplicated unit of
//! upstream work and is shared by concurrent identical callers. Fallback
//! resolution runs per caller afterwards, since it depends on caller-supplied
//! defaults. Each call reports exactly one outcome to the metrics sink.

use crate::cache::IntelligentCache;
use crate::config::AccessLayerConfig;
use crate::error::{ErrorReporter, PipelineStage, RegistryError, Result};
use crate::error_recovery::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerManager, CircuitBreakerStats,
};
use crate::error_recovery::fallback::{FallbackManager, FallbackRequest, FallbackSource, FallbackStats};
use crate::error_recovery::recovery::{
    ErrorRecoveryEngine, RecoveryConfig, RecoveryStats, RecoveryStrategy,
};
use crate::error_recovery::retry_policy::{RetryExecutor, RetryPolicy, RetryStats};
use crate::monitoring::{CallOutcome, MetricsSink, OutcomeRecorder, TracingSink};
use crate::traffic::{
    DeduplicationConfig, DeduplicationStats, QueueConfig, QueueStats, RateLimitConfig,
    RateLimiter, RateLimiterStats, RequestDeduplicator, RequestQueue,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Per-call defaults and upstream deadline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry transient failures
    pub use_retry: bool,
    /// Resolve fallbacks on terminal failure
    pub use_fallback: bool,
    /// Share in-flight identical calls
    pub use_deduplication: bool,
    /// Pass through the admission queue
    pub use_queue: bool,
    /// Deadline for each individual upstream attempt
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            use_retry: true,
            use_fallback: true,
            use_deduplication: true,
            use_queue: false,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-call overrides of [`ResilienceConfig`] flags
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CallOptions {
    pub use_retry: Option<bool>,
    pub use_fallback: Option<bool>,
    pub use_deduplication: Option<bool>,
    pub use_queue: Option<bool>,
}

#[derive(Debug, Clone, Copy)]
struct ResolvedOptions {
    retry: bool,
    fallback: bool,
    deduplication: bool,
    queue: bool,
}

impl CallOptions {
    fn resolve(&self, defaults: &ResilienceConfig) -> ResolvedOptions {
        ResolvedOptions {
            retry: self.use_retry.unwrap_or(defaults.use_retry),
            fallback: self.use_fallback.unwrap_or(defaults.use_fallback),
            deduplication: self.use_deduplication.unwrap_or(defaults.use_deduplication),
            queue: self.use_queue.unwrap_or(defaults.use_queue),
        }
    }
}

/// Describes one resilient call
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub service: String,
    pub operation: String,
    /// Arguments the deduplication fingerprint is derived from
    pub args: Value,
    pub options: CallOptions,
    pub fallback: FallbackRequest,
}

impl CallSpec {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            args: Value::Null,
            options: CallOptions::default(),
            fallback: FallbackRequest::default(),
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackRequest) -> Self {
        self.fallback = fallback;
        self
    }

    /// Circuit breaker scope for this call
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.service, self.operation)
    }
}

/// Resilience metadata attached to every successful response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Served from cache without touching upstream
    pub cache_hit: bool,
    /// Served by a fallback source rather than upstream
    pub degraded: bool,
    /// Upstream answered only after a recovery probe
    pub recovered: bool,
    pub fallback: Option<FallbackSource>,
    pub stages: Vec<PipelineStage>,
}

/// A result plus how it was obtained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilientResponse<T> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T> ResilientResponse<T> {
    pub fn fresh(data: T) -> Self {
        Self {
            data,
            meta: ResponseMeta::default(),
        }
    }

    pub fn cached(data: T) -> Self {
        Self {
            data,
            meta: ResponseMeta {
                cache_hit: true,
                ..Default::default()
            },
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResilientResponse<U> {
        ResilientResponse {
            data: f(self.data),
            meta: self.meta,
        }
    }
}

/// Output of the shared upstream unit
#[derive(Debug, Clone)]
struct UpstreamSuccess {
    value: Value,
    recovered: bool,
    stages: Vec<PipelineStage>,
}

#[derive(Debug, Clone)]
struct UpstreamFailure {
    error: RegistryError,
    stages: Vec<PipelineStage>,
}

type UpstreamResult = std::result::Result<UpstreamSuccess, UpstreamFailure>;

#[derive(Debug, Default)]
struct OutcomeCounters {
    total: AtomicU64,
    success: AtomicU64,
    recovered: AtomicU64,
    fallback: AtomicU64,
    failed: AtomicU64,
}

/// Resilience statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceStats {
    pub total_calls: u64,
    pub successes: u64,
    pub recovered: u64,
    pub fallbacks: u64,
    pub failures: u64,
    pub rate_limiter: RateLimiterStats,
    pub circuit_breakers: HashMap<String, CircuitBreakerStats>,
    pub retry: RetryStats,
    pub deduplication: DeduplicationStats,
    pub queue: QueueStats,
    pub recovery: RecoveryStats,
    pub fallback: FallbackStats,
}

/// Single entry point for resilient upstream calls
///
/// Cheap to clone; clones share every component.
#[derive(Clone)]
pub struct ResilienceManager {
    config: Arc<ResilienceConfig>,
    rate_limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerManager>,
    retry: Arc<RetryExecutor>,
    dedup: Arc<RequestDeduplicator<UpstreamResult>>,
    queue: Arc<RequestQueue>,
    recovery: Arc<ErrorRecoveryEngine>,
    fallback: Arc<FallbackManager>,
    sink: Arc<dyn MetricsSink>,
    counters: Arc<OutcomeCounters>,
}

impl ResilienceManager {
    /// Start building a manager
    pub fn builder() -> ResilienceBuilder {
        ResilienceBuilder::new()
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Fallback chain, for registering static values and degraded handlers
    pub fn fallback_manager(&self) -> &FallbackManager {
        &self.fallback
    }

    /// Recovery dispatcher, for registering strategies after construction
    pub fn recovery_engine(&self) -> &ErrorRecoveryEngine {
        &self.recovery
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    /// Execute `operation` with full resilience protection
    ///
    /// The caller receives either a value (flagged if it came from a fallback
    /// or needed recovery) or [`RegistryError::RecoveryFailed`] carrying the
    /// original error and every stage that was attempted.
    pub async fn execute<T, F, Fut>(
        &self,
        spec: CallSpec,
        operation: F,
    ) -> Result<ResilientResponse<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let recorder = OutcomeRecorder::start(self.sink.clone(), &spec.service, &spec.operation);
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let options = spec.options.resolve(&self.config);
        let endpoint = spec.endpoint();
        let operation = Arc::new(operation);
        let upstream = self
            .clone()
            .run_upstream::<T, F, Fut>(endpoint, options, operation);

        let (mut stages, result) = if options.deduplication {
            let fingerprint = self
                .dedup
                .fingerprint(&spec.service, &spec.operation, &spec.args);
            let result = self.dedup.execute(&fingerprint, move || upstream).await;
            (vec![PipelineStage::Deduplication], result)
        } else {
            (Vec::new(), upstream.await)
        };

        let failure = match result {
            Ok(success) => {
                stages.extend(success.stages);
                match serde_json::from_value::<T>(success.value) {
                    Ok(data) => {
                        let outcome = if success.recovered {
                            self.counters.recovered.fetch_add(1, Ordering::Relaxed);
                            CallOutcome::Recovered
                        } else {
                            self.counters.success.fetch_add(1, Ordering::Relaxed);
                            CallOutcome::Success
                        };
                        recorder.finish(outcome, &stages);
                        return Ok(ResilientResponse {
                            data,
                            meta: ResponseMeta {
                                recovered: success.recovered,
                                stages,
                                ..Default::default()
                            },
                        });
                    }
                    Err(e) => RegistryError::from(e),
                }
            }
            Err(failure) => {
                stages.extend(failure.stages);
                failure.error
            }
        };

        if options.fallback && !spec.fallback.is_empty() {
            stages.push(PipelineStage::Fallback);
            if let Ok(found) = self
                .fallback
                .resolve_as(&spec.fallback, &spec.args, failure.clone(), |value| {
                    serde_json::from_value::<T>(value).map_err(RegistryError::from)
                })
                .await
            {
                self.counters.fallback.fetch_add(1, Ordering::Relaxed);
                recorder.finish(CallOutcome::FallbackUsed(found.source), &stages);
                return Ok(ResilientResponse {
                    data: found.value,
                    meta: ResponseMeta {
                        degraded: true,
                        fallback: Some(found.source),
                        stages,
                        ..Default::default()
                    },
                });
            }
        }

        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        let error = RegistryError::RecoveryFailed {
            source: Box::new(failure),
            stages,
        };
        ErrorReporter::log_error(&error, &spec.service, &spec.operation);
        recorder.fail(&error);
        Err(error)
    }

    /// The shared unit of upstream work
    async fn run_upstream<T, F, Fut>(
        self,
        endpoint: String,
        options: ResolvedOptions,
        operation: Arc<F>,
    ) -> UpstreamResult
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut stages = Vec::new();
        let call_timeout = self.config.call_timeout;

        let _permit = if options.queue {
            stages.push(PipelineStage::Queue);
            match self.queue.enter().await {
                Ok(permit) => Some(permit),
                Err(error) => return Err(UpstreamFailure { error, stages }),
            }
        } else {
            None
        };

        stages.push(PipelineStage::RateLimit);
        self.rate_limiter.acquire().await;

        let breaker = self.breakers.get_breaker(&endpoint).await;
        stages.push(PipelineStage::CircuitBreaker);
        if options.retry {
            stages.push(PipelineStage::Retry);
        }

        let first = breaker
            .call(|| async {
                if options.retry {
                    self.retry
                        .execute(|| attempt(operation.as_ref(), call_timeout))
                        .await
                } else {
                    attempt(operation.as_ref(), call_timeout).await
                }
            })
            .await;

        let error = match first {
            Ok(value) => {
                return Ok(UpstreamSuccess {
                    value,
                    recovered: false,
                    stages,
                })
            }
            Err(error) => error,
        };

        if self.recovery.is_enabled() {
            let recovery_attempt = self.recovery.attempt_recovery(&error).await;
            if recovery_attempt.probed() {
                stages.push(PipelineStage::Recovery);
            }
            if recovery_attempt.is_recovered() {
                stages.push(PipelineStage::RecoveryRetry);
                self.rate_limiter.acquire().await;

                match breaker
                    .call(|| attempt(operation.as_ref(), call_timeout))
                    .await
                {
                    Ok(value) => {
                        info!(endpoint = %endpoint, "Call recovered after probe");
                        return Ok(UpstreamSuccess {
                            value,
                            recovered: true,
                            stages,
                        });
                    }
                    Err(retry_error) => {
                        debug!(endpoint = %endpoint, "Retry after recovery failed: {}", retry_error);
                    }
                }
            }
        }

        Err(UpstreamFailure { error, stages })
    }

    /// Get resilience statistics
    pub async fn get_stats(&self) -> ResilienceStats {
        ResilienceStats {
            total_calls: self.counters.total.load(Ordering::Relaxed),
            successes: self.counters.success.load(Ordering::Relaxed),
            recovered: self.counters.recovered.load(Ordering::Relaxed),
            fallbacks: self.counters.fallback.load(Ordering::Relaxed),
            failures: self.counters.failed.load(Ordering::Relaxed),
            rate_limiter: self.rate_limiter.get_statistics().await,
            circuit_breakers: self.breakers.get_all_stats().await,
            retry: self.retry.get_stats().await,
            deduplication: self.dedup.get_stats().await,
            queue: self.queue.get_stats(),
            recovery: self.recovery.get_stats().await,
            fallback: self.fallback.get_stats().await,
        }
    }
}

/// One upstream attempt under the per-call deadline
async fn attempt<T, F, Fut>(operation: &F, call_timeout: Duration) -> Result<Value>
where
    T: Serialize,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match timeout(call_timeout, operation()).await {
        Ok(result) => Ok(serde_json::to_value(result?)?),
        Err(_) => Err(RegistryError::timeout(format!(
            "upstream call exceeded {call_timeout:?}"
        ))),
    }
}

/// Resilience builder for fluent API
pub struct ResilienceBuilder {
    config: ResilienceConfig,
    rate_limit: RateLimitConfig,
    circuit_breaker: CircuitBreakerConfig,
    retry_policy: RetryPolicy,
    deduplication: DeduplicationConfig,
    queue: QueueConfig,
    recovery: RecoveryConfig,
    strategies: Vec<RecoveryStrategy>,
    cache: Option<Arc<IntelligentCache>>,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl ResilienceBuilder {
    /// Create new resilience builder with default configuration
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry_policy: RetryPolicy::default(),
            deduplication: DeduplicationConfig::default(),
            queue: QueueConfig::default(),
            recovery: RecoveryConfig::default(),
            strategies: Vec::new(),
            cache: None,
            sink: None,
        }
    }

    /// Create a builder from the loaded access layer configuration
    pub fn from_config(config: &AccessLayerConfig) -> Self {
        Self {
            config: config.resilience.clone(),
            rate_limit: config.rate_limit.clone(),
            circuit_breaker: config.circuit_breaker.clone(),
            retry_policy: config.retry.clone(),
            deduplication: config.deduplication.clone(),
            queue: config.queue.clone(),
            recovery: config.recovery.clone(),
            ..Self::new()
        }
    }

    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Set circuit breaker configuration
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Set retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn deduplication(mut self, config: DeduplicationConfig) -> Self {
        self.deduplication = config;
        self
    }

    pub fn queue(mut self, config: QueueConfig) -> Self {
        self.queue = config;
        self
    }

    pub fn recovery(mut self, config: RecoveryConfig) -> Self {
        self.recovery = config;
        self
    }

    /// Add a recovery strategy
    pub fn strategy(mut self, strategy: RecoveryStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Cache used for stale-if-error fallback
    pub fn cache(mut self, cache: Arc<IntelligentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Outcome sink; defaults to [`TracingSink`]
    pub fn sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the manager
    pub async fn build(self) -> ResilienceManager {
        let recovery = ErrorRecoveryEngine::new(self.recovery);
        for strategy in self.strategies {
            recovery.register(strategy).await;
        }

        ResilienceManager {
            config: Arc::new(self.config),
            rate_limiter: Arc::new(RateLimiter::with_config(self.rate_limit)),
            breakers: Arc::new(CircuitBreakerManager::new(self.circuit_breaker)),
            retry: Arc::new(RetryExecutor::new(self.retry_policy)),
            dedup: Arc::new(RequestDeduplicator::with_config(self.deduplication)),
            queue: Arc::new(RequestQueue::new(self.queue)),
            recovery: Arc::new(recovery),
            fallback: Arc::new(FallbackManager::new(self.cache)),
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            counters: Arc::new(OutcomeCounters::default()),
        }
    }
}

impl Default for ResilienceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::ErrorKind;
    use crate::monitoring::InMemorySink;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let sink = Arc::new(InMemorySink::default());
        let manager = ResilienceManager::builder()
            .retry_policy(fast_retry())
            .sink(sink.clone())
            .build()
            .await;
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let response = manager
            .execute(CallSpec::new("registry", "search"), move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(RegistryError::server_error(503, "unavailable"))
                    } else {
                        Ok(json!({"total": 1}))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(response.data, json!({"total": 1}));
        assert!(!response.meta.degraded);
        assert!(response.meta.stages.contains(&PipelineStage::Retry));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.count("success"), 1);
    }

    #[tokio::test]
    async fn test_failure_uses_fallback_then_reports_provenance() {
        let sink = Arc::new(InMemorySink::default());
        let manager = ResilienceManager::builder()
            .retry_policy(fast_retry())
            .sink(sink.clone())
            .build()
            .await;
        manager
            .fallback_manager()
            .register_static("lookup", json!(["cached-code"]))
            .await;

        let spec = CallSpec::new("registry", "lookup")
            .with_fallback(FallbackRequest::new().with_fallback_key("lookup"));
        let response: ResilientResponse<Vec<String>> = manager
            .execute(spec, || async { Err(RegistryError::connection("reset")) })
            .await
            .unwrap();

        assert!(response.meta.degraded);
        assert_eq!(response.meta.fallback, Some(FallbackSource::Static));
        assert_eq!(response.data, vec!["cached-code".to_string()]);

        let error = manager
            .execute::<Value, _, _>(CallSpec::new("registry", "lookup"), || async {
                Err(RegistryError::connection("reset"))
            })
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::RecoveryFailed);
        assert_eq!(error.root_cause().kind(), ErrorKind::Connection);
        assert!(error.stages().contains(&PipelineStage::Retry));
        // No strategy handles connection errors, so no probe ran
        assert!(!error.stages().contains(&PipelineStage::Recovery));
        assert_eq!(sink.count("fallback"), 1);
        assert_eq!(sink.count("failed"), 1);
    }

    #[tokio::test]
    async fn test_recovery_grants_one_more_attempt() {
        let manager = ResilienceManager::builder()
            .retry_policy(RetryPolicy::none())
            .strategy(RecoveryStrategy::wait_then_retry(
                "pause",
                vec![ErrorKind::Timeout],
                1,
                Duration::from_millis(1),
            ))
            .build()
            .await;
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let response = manager
            .execute(CallSpec::new("registry", "details"), move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(RegistryError::timeout("slow"))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(response.data, 42);
        assert!(response.meta.recovered);
        assert!(response.meta.stages.contains(&PipelineStage::Recovery));
        assert!(response.meta.stages.contains(&PipelineStage::RecoveryRetry));
        assert_eq!(manager.get_stats().await.recovered, 1);
    }

    #[tokio::test]
    async fn test_unusable_stale_value_does_not_end_fallback_chain() {
        let cache = Arc::new(IntelligentCache::new(CacheConfig::default()));
        cache
            .set("lookup", "lookup?code=DXY", &json!({"not": "a list"}))
            .await
            .unwrap();
        let manager = ResilienceManager::builder()
            .retry_policy(RetryPolicy::none())
            .cache(cache)
            .build()
            .await;
        manager
            .fallback_manager()
            .register_static("lookup", json!(["static-ok"]))
            .await;

        let spec = CallSpec::new("registry", "lookup").with_fallback(
            FallbackRequest::new()
                .with_cache_key("lookup", "lookup?code=DXY")
                .with_fallback_key("lookup"),
        );
        let response = manager
            .execute::<Vec<String>, _, _>(spec, || async {
                Err(RegistryError::connection("reset"))
            })
            .await
            .unwrap();

        assert_eq!(response.meta.fallback, Some(FallbackSource::Static));
        assert_eq!(response.data, vec!["static-ok".to_string()]);
        assert_eq!(manager.fallback_manager().get_stats().await.rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let manager = ResilienceManager::builder()
            .config(ResilienceConfig {
                call_timeout: Duration::from_millis(100),
                ..Default::default()
            })
            .retry_policy(RetryPolicy::none())
            .build()
            .await;

        let error = manager
            .execute::<u32, _, _>(CallSpec::new("registry", "search"), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await
            .unwrap_err();

        assert_eq!(error.root_cause().kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_concurrent_identical_calls_share_upstream() {
        let manager = ResilienceManager::builder().build().await;
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let manager = manager.clone();
            let counter = calls.clone();
            handles.push(tokio::spawn(async move {
                let spec = CallSpec::new("registry", "search").with_args(json!({"q": "pump"}));
                manager
                    .execute(spec, move || {
                        let counter = counter.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok("result".to_string())
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().data, "result");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.get_stats().await.deduplication.joined, 4);
    }
}
