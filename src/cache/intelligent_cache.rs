//! Namespaced cache with freshness-aware reads, adaptive TTL and
//! memory-bounded eviction
//!
//! Entries are addressed by `(namespace, key)` and stored as encoded
//! [`StoredPayload`]s, so size accounting uses the real (possibly compressed)
//! byte length. Payload, metadata and size accounting live under one lock and
//! are always changed together.
//!
//! An entry passes through three ages:
//! - younger than `fresh_max_age`: satisfies every [`Freshness`] level
//! - younger than its TTL: satisfies `Stale` and, if young enough, `Recent`
//! - expired but within `stale_grace`: only [`IntelligentCache::get_stale`]
//!   returns it, for stale-if-error fallback
//!
//! After the grace period the maintenance task removes it.

use super::backing_store::{CacheBackingStore, StoredRecord};
use super::compression::{self, CompressionType, StoredPayload};
use super::patterns::{QueryPattern, QueryPatternTracker};
use crate::error::{RegistryError, Result};
use crate::monitoring::HealthStatus;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const HEALTH_NAMESPACE: &str = "__health__";

/// Caller tolerance for cached-data age
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Recent,
    Stale,
}

/// How a value is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Memory only
    #[default]
    MemoryOnly,
    /// Memory and the backing store
    WriteThrough,
    /// Memory only, and reported by `expiring_soon` for proactive refresh
    RefreshAhead,
}

/// Adaptive TTL tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveTtlConfig {
    /// Observations after which a pattern counts as hot
    pub hot_frequency: u64,
    /// Average upstream latency above which a pattern counts as expensive
    pub slow_response_ms: f64,
    /// TTL multiplier for hot and expensive patterns
    pub boost_multiplier: f64,
    /// Hit rate below which caching is considered unhelpful
    pub low_hit_rate: f64,
    /// Hit/miss samples required before the hit rate is trusted
    pub min_hit_samples: u64,
}

impl Default for AdaptiveTtlConfig {
    fn default() -> Self {
        Self {
            hot_frequency: 10,
            slow_response_ms: 1000.0,
            boost_multiplier: 2.0,
            low_hit_rate: 0.2,
            min_hit_samples: 20,
        }
    }
}

/// Relative weights of the eviction score terms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionWeights {
    pub recency: f64,
    pub frequency: f64,
    pub priority: f64,
    pub size: f64,
}

impl Default for EvictionWeights {
    fn default() -> Self {
        Self {
            recency: 0.35,
            frequency: 0.3,
            priority: 0.25,
            size: 0.1,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used when no pattern data is available
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Lower bound for adaptive TTLs
    #[serde(with = "humantime_serde")]
    pub min_ttl: Duration,
    /// Upper bound for adaptive TTLs
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,
    /// Maximum age accepted by `Freshness::Fresh`
    #[serde(with = "humantime_serde")]
    pub fresh_max_age: Duration,
    /// Maximum age accepted by `Freshness::Recent`
    #[serde(with = "humantime_serde")]
    pub recent_max_age: Duration,
    /// How long expired entries stay available to `get_stale`
    #[serde(with = "humantime_serde")]
    pub stale_grace: Duration,
    /// Memory budget for stored payloads
    pub max_memory_bytes: usize,
    /// Maximum number of entries
    pub max_entries: usize,
    /// Compression algorithm for large payloads
    pub compression: CompressionType,
    /// Payloads at or above this size are compressed
    pub compression_threshold_bytes: usize,
    /// Maximum tracked query patterns
    pub max_patterns: usize,
    /// EMA smoothing factor for pattern statistics
    pub ema_alpha: f64,
    /// Adaptive TTL tuning
    pub adaptive: AdaptiveTtlConfig,
    /// Eviction score weights
    pub eviction: EvictionWeights,
    /// Interval of the background cleanup task
    #[serde(with = "humantime_serde")]
    pub maintenance_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            min_ttl: Duration::from_secs(60),
            max_ttl: Duration::from_secs(24 * 3600),
            fresh_max_age: Duration::from_secs(300),
            recent_max_age: Duration::from_secs(3600),
            stale_grace: Duration::from_secs(24 * 3600),
            max_memory_bytes: 64 * 1024 * 1024, // 64MB
            max_entries: 50_000,
            compression: CompressionType::Zstd,
            compression_threshold_bytes: 4 * 1024,
            max_patterns: 1000,
            ema_alpha: 0.2,
            adaptive: AdaptiveTtlConfig::default(),
            eviction: EvictionWeights::default(),
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Maximum age accepted by a freshness level, `None` for no limit
    pub fn max_age(&self, freshness: Freshness) -> Option<Duration> {
        match freshness {
            Freshness::Fresh => Some(self.fresh_max_age),
            Freshness::Recent => Some(self.recent_max_age),
            Freshness::Stale => None,
        }
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Hits served from the backing store
    pub backing_hits: u64,
    /// Expired entries handed out through `get_stale`
    pub stale_served: u64,
    pub evictions: u64,
    pub expired_removed: u64,
    /// Entries rejected for exceeding the whole budget
    pub rejected: u64,
    pub backing_errors: u64,
    pub entry_count: usize,
    pub compressed_entries: usize,
    pub memory_bytes: usize,
    pub max_memory_bytes: usize,
}

impl CacheStats {
    /// Calculate hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Result of the cache self-test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    pub memory_bytes: usize,
    pub entry_count: usize,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: StoredPayload,
    created_at: Instant,
    expires_at: Instant,
    last_accessed: Instant,
    access_count: u64,
    priority: u8,
    strategy: CacheStrategy,
}

impl CacheEntry {
    fn size_bytes(&self) -> usize {
        self.payload.size_bytes()
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

type EntryKey = (String, String);

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<EntryKey, CacheEntry>,
    total_bytes: usize,
    stats: CacheStats,
}

impl CacheState {
    fn remove(&mut self, key: &EntryKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes());
        Some(entry)
    }

    fn insert(&mut self, key: EntryKey, entry: CacheEntry) {
        self.total_bytes += entry.size_bytes();
        self.entries.insert(key, entry);
    }
}

/// Adaptive, memory-bounded cache
pub struct IntelligentCache {
    config: CacheConfig,
    state: RwLock<CacheState>,
    patterns: RwLock<QueryPatternTracker>,
    backing: Option<Arc<dyn CacheBackingStore>>,
}

impl IntelligentCache {
    /// Create a memory-only cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            patterns: RwLock::new(QueryPatternTracker::new(
                config.max_patterns,
                config.ema_alpha,
            )),
            state: RwLock::new(CacheState::default()),
            backing: None,
            config,
        }
    }

    /// Create a cache that reads and writes through a backing store
    pub fn with_backing_store(config: CacheConfig, store: Arc<dyn CacheBackingStore>) -> Self {
        Self {
            backing: Some(store),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read a value no older than `required` allows
    pub async fn get_with_freshness_check(
        &self,
        namespace: &str,
        key: &str,
        required: Freshness,
    ) -> Option<Value> {
        let max_age = self.config.max_age(required);
        let entry_key = (namespace.to_string(), key.to_string());

        let (payload, present) = {
            let mut state = self.state.write().await;
            let now = Instant::now();
            let found = match state.entries.get_mut(&entry_key) {
                Some(entry)
                    if !entry.is_expired(now)
                        && max_age.map_or(true, |max| now.duration_since(entry.created_at) <= max) =>
                {
                    entry.access_count += 1;
                    entry.last_accessed = now;
                    (Some(entry.payload.clone()), true)
                }
                Some(_) => (None, true),
                None => (None, false),
            };
            if found.0.is_some() {
                state.stats.hits += 1;
            }
            found
        };

        if let Some(payload) = payload {
            self.patterns.write().await.record_access(namespace, key, true);
            return self.decode_or_drop(&entry_key, &payload).await;
        }

        if !present {
            if let Some(value) = self.read_through(&entry_key, max_age).await {
                self.patterns.write().await.record_access(namespace, key, true);
                return Some(value);
            }
        }

        self.state.write().await.stats.misses += 1;
        self.patterns.write().await.record_access(namespace, key, false);
        trace!(namespace, key, ?required, "Cache miss");
        None
    }

    /// Read any non-expired value
    pub async fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        self.get_with_freshness_check(namespace, key, Freshness::Stale)
            .await
    }

    /// Read a value even if expired, as long as it is within the stale grace period
    pub async fn get_stale(&self, namespace: &str, key: &str) -> Option<Value> {
        let entry_key = (namespace.to_string(), key.to_string());
        let payload = {
            let mut state = self.state.write().await;
            let now = Instant::now();
            let grace = self.config.stale_grace;
            let payload = state
                .entries
                .get(&entry_key)
                .filter(|entry| now < deadline(entry.expires_at, grace))
                .map(|entry| (entry.payload.clone(), entry.is_expired(now)));
            if let Some((_, true)) = payload {
                state.stats.stale_served += 1;
            }
            payload.map(|(payload, _)| payload)
        };

        match payload {
            Some(payload) => self.decode_or_drop(&entry_key, &payload).await,
            None => None,
        }
    }

    /// Store a value with the default strategy and priority
    pub async fn set(&self, namespace: &str, key: &str, value: &Value) -> Result<Duration> {
        self.set_with_strategy(namespace, key, value, None, CacheStrategy::MemoryOnly, 5)
            .await
    }

    /// Store a value, returning the TTL that was applied
    ///
    /// Without an explicit `ttl` an adaptive TTL is derived from the key's
    /// query pattern. Eviction runs before the insert whenever the projected
    /// size would exceed the memory budget. A value larger than the whole
    /// budget is rejected.
    pub async fn set_with_strategy(
        &self,
        namespace: &str,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
        strategy: CacheStrategy,
        priority: u8,
    ) -> Result<Duration> {
        let payload = compression::encode(
            value,
            self.config.compression,
            self.config.compression_threshold_bytes,
        )?;
        let size = payload.size_bytes();

        if size > self.config.max_memory_bytes {
            self.state.write().await.stats.rejected += 1;
            warn!(
                namespace,
                key,
                size,
                max_memory_bytes = self.config.max_memory_bytes,
                "Rejecting cache entry larger than memory budget"
            );
            return Err(RegistryError::cache(format!(
                "entry of {size} bytes exceeds cache budget of {} bytes",
                self.config.max_memory_bytes
            )));
        }

        let ttl = match ttl {
            Some(ttl) => ttl,
            None => self.adaptive_ttl(namespace, key).await,
        };
        let priority = priority.min(10);
        let now = Instant::now();
        let entry_key = (namespace.to_string(), key.to_string());

        {
            let mut state = self.state.write().await;
            state.remove(&entry_key);
            self.evict_for(&mut state, size, now);
            state.insert(
                entry_key,
                CacheEntry {
                    payload: payload.clone(),
                    created_at: now,
                    expires_at: deadline(now, ttl),
                    last_accessed: now,
                    access_count: 0,
                    priority,
                    strategy,
                },
            );
        }

        self.patterns.write().await.record_size(namespace, key, payload.raw_len);
        debug!(namespace, key, size, ?ttl, ?strategy, "Cached value");

        if strategy == CacheStrategy::WriteThrough {
            if let Some(store) = &self.backing {
                let created_at = Utc::now();
                let record = StoredRecord {
                    payload,
                    created_at,
                    expires_at: chrono::Duration::from_std(ttl.min(FAR_FUTURE))
                        .ok()
                        .and_then(|span| created_at.checked_add_signed(span))
                        .unwrap_or(created_at),
                    priority,
                };
                if let Err(e) = store.put(namespace, key, record).await {
                    self.state.write().await.stats.backing_errors += 1;
                    warn!(namespace, key, "Write-through to backing store failed: {}", e);
                }
            }
        }

        Ok(ttl)
    }

    /// TTL that would be applied to `key` if stored now without an explicit TTL
    ///
    /// Hot and expensive query shapes get a longer TTL; if caching the shape
    /// rarely produces hits, the boost is pulled halfway back toward
    /// `default_ttl`. The result is clamped to `[min_ttl, max_ttl]`.
    pub async fn adaptive_ttl(&self, namespace: &str, key: &str) -> Duration {
        let patterns = self.patterns.read().await;
        compute_adaptive_ttl(&self.config, patterns.lookup(namespace, key))
    }

    /// Feed an upstream response time into the key's query pattern
    pub async fn record_response_time(&self, namespace: &str, key: &str, elapsed: Duration) {
        self.patterns
            .write()
            .await
            .record_response_time(namespace, key, elapsed);
    }

    /// Remove one entry from memory and the backing store
    pub async fn invalidate(&self, namespace: &str, key: &str) -> bool {
        let removed = self
            .state
            .write()
            .await
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some();

        if let Some(store) = &self.backing {
            if let Err(e) = store.remove(namespace, key).await {
                warn!(namespace, key, "Failed to remove from backing store: {}", e);
            }
        }
        removed
    }

    /// Remove every entry in a namespace, returning the in-memory count removed
    pub async fn invalidate_namespace(&self, namespace: &str) -> usize {
        let removed = {
            let mut state = self.state.write().await;
            let keys: Vec<EntryKey> = state
                .entries
                .keys()
                .filter(|(ns, _)| ns == namespace)
                .cloned()
                .collect();
            for key in &keys {
                state.remove(key);
            }
            keys.len()
        };

        if let Some(store) = &self.backing {
            if let Err(e) = store.clear_namespace(namespace).await {
                warn!(namespace, "Failed to clear backing store namespace: {}", e);
            }
        }
        info!(namespace, removed, "Invalidated cache namespace");
        removed
    }

    /// Drop entries expired beyond the stale grace period
    pub async fn cleanup_expired(&self) -> usize {
        let mut state = self.state.write().await;
        let now = Instant::now();
        let grace = self.config.stale_grace;
        let expired: Vec<EntryKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| now >= deadline(entry.expires_at, grace))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        state.stats.expired_removed += expired.len() as u64;

        if !expired.is_empty() {
            debug!(removed = expired.len(), "Removed expired cache entries");
        }
        expired.len()
    }

    /// Refresh-ahead entries whose TTL runs out within `within`
    pub async fn expiring_soon(&self, within: Duration) -> Vec<(String, String)> {
        let state = self.state.read().await;
        let now = Instant::now();
        state
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.strategy == CacheStrategy::RefreshAhead
                    && entry.expires_at.saturating_duration_since(now) <= within
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Snapshot of cache statistics
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let mut stats = state.stats.clone();
        stats.entry_count = state.entries.len();
        stats.memory_bytes = state.total_bytes;
        stats.max_memory_bytes = self.config.max_memory_bytes;
        stats.compressed_entries = state
            .entries
            .values()
            .filter(|entry| entry.payload.is_compressed())
            .count();
        stats
    }

    /// Learned query patterns, most frequent first
    pub async fn patterns(&self) -> Vec<QueryPattern> {
        self.patterns.read().await.snapshot()
    }

    /// Bytes currently held
    pub async fn memory_usage(&self) -> usize {
        self.state.read().await.total_bytes
    }

    /// Run one set, get and verify round trip
    pub async fn health_check(&self) -> CacheHealth {
        let started = Instant::now();
        let probe_key = "probe".to_string();
        let probe = serde_json::json!({ "probe": uuid::Uuid::new_v4().to_string() });

        let outcome = match self
            .set_with_strategy(
                HEALTH_NAMESPACE,
                &probe_key,
                &probe,
                Some(Duration::from_secs(60)),
                CacheStrategy::MemoryOnly,
                0,
            )
            .await
        {
            Ok(_) => match self.get(HEALTH_NAMESPACE, &probe_key).await {
                Some(value) if value == probe => Ok(()),
                Some(_) => Err("round trip returned a different value".to_string()),
                None => Err("round trip value missing".to_string()),
            },
            Err(e) => Err(e.to_string()),
        };
        self.state
            .write()
            .await
            .remove(&(HEALTH_NAMESPACE.to_string(), probe_key));

        let latency = started.elapsed();
        let stats = self.stats().await;
        let (status, message) = match outcome {
            Ok(()) if latency > Duration::from_millis(100) => (
                HealthStatus::Degraded,
                Some(format!("slow round trip: {latency:?}")),
            ),
            Ok(()) => (HealthStatus::Healthy, None),
            Err(message) => (HealthStatus::Unhealthy, Some(message)),
        };

        CacheHealth {
            status,
            latency,
            memory_bytes: stats.memory_bytes,
            entry_count: stats.entry_count,
            message,
        }
    }

    /// Start the periodic cleanup task
    pub fn spawn_maintenance(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.config.maintenance_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        cache.cleanup_expired().await;
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Cache maintenance stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Evict lowest-scored entries until `incoming` more bytes fit
    fn evict_for(&self, state: &mut CacheState, incoming: usize, now: Instant) {
        let budget = self.config.max_memory_bytes;
        let max_entries = self.config.max_entries.max(1);
        if state.total_bytes + incoming <= budget && state.entries.len() < max_entries {
            return;
        }

        let max_access = state
            .entries
            .values()
            .map(|entry| entry.access_count)
            .max()
            .unwrap_or(0);

        let mut candidates: Vec<(f64, EntryKey)> = state
            .entries
            .iter()
            .map(|(key, entry)| (self.eviction_score(entry, now, max_access), key.clone()))
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut evicted = 0u64;
        for (score, key) in candidates {
            if state.total_bytes + incoming <= budget && state.entries.len() < max_entries {
                break;
            }
            if state.remove(&key).is_some() {
                evicted += 1;
                trace!(namespace = %key.0, key = %key.1, score, "Evicted cache entry");
            }
        }

        state.stats.evictions += evicted;
        debug!(
            evicted,
            memory_bytes = state.total_bytes,
            "Cache eviction completed"
        );
    }

    /// Lower score means evict first
    fn eviction_score(&self, entry: &CacheEntry, now: Instant, max_access: u64) -> f64 {
        if entry.is_expired(now) {
            return f64::NEG_INFINITY;
        }

        let weights = &self.config.eviction;
        let idle_secs = now.duration_since(entry.last_accessed).as_secs_f64();
        let recency = 1.0 / (1.0 + idle_secs / 60.0);
        let frequency = if max_access == 0 {
            0.0
        } else {
            (1.0 + entry.access_count as f64).ln() / (1.0 + max_access as f64).ln()
        };
        let priority = f64::from(entry.priority) / 10.0;
        let size = entry.size_bytes() as f64 / self.config.max_memory_bytes.max(1) as f64;

        weights.recency * recency + weights.frequency * frequency + weights.priority * priority
            - weights.size * size
    }

    async fn read_through(&self, entry_key: &EntryKey, max_age: Option<Duration>) -> Option<Value> {
        let store = self.backing.as_ref()?;
        let record = match store.get(&entry_key.0, &entry_key.1).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                self.state.write().await.stats.backing_errors += 1;
                warn!(namespace = %entry_key.0, key = %entry_key.1, "Backing store read failed: {}", e);
                return None;
            }
        };

        let wall_now = Utc::now();
        let age = (wall_now - record.created_at).to_std().unwrap_or_default();
        let remaining = (record.expires_at - wall_now).to_std().unwrap_or_default();
        if remaining.is_zero() || max_age.map_or(false, |max| age > max) {
            return None;
        }

        let value = match compression::decode(&record.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(namespace = %entry_key.0, key = %entry_key.1, "Dropping undecodable backing record: {}", e);
                return None;
            }
        };

        let size = record.payload.size_bytes();
        if size <= self.config.max_memory_bytes {
            let now = Instant::now();
            let mut state = self.state.write().await;
            state.remove(entry_key);
            self.evict_for(&mut state, size, now);
            state.insert(
                entry_key.clone(),
                CacheEntry {
                    payload: record.payload,
                    created_at: now.checked_sub(age).unwrap_or(now),
                    expires_at: deadline(now, remaining),
                    last_accessed: now,
                    access_count: 1,
                    priority: record.priority,
                    strategy: CacheStrategy::WriteThrough,
                },
            );
            state.stats.hits += 1;
            state.stats.backing_hits += 1;
        }

        debug!(namespace = %entry_key.0, key = %entry_key.1, "Served from backing store");
        Some(value)
    }

    async fn decode_or_drop(&self, entry_key: &EntryKey, payload: &StoredPayload) -> Option<Value> {
        match compression::decode(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(namespace = %entry_key.0, key = %entry_key.1, "Dropping undecodable cache entry: {}", e);
                self.state.write().await.remove(entry_key);
                None
            }
        }
    }
}

/// Longest lifetime an entry can have; larger spans saturate to it
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// `from + span` without overflowing the clock
fn deadline(from: Instant, span: Duration) -> Instant {
    from.checked_add(span.min(FAR_FUTURE))
        .or_else(|| from.checked_add(Duration::from_secs(365 * 24 * 3600)))
        .unwrap_or(from)
}

fn compute_adaptive_ttl(config: &CacheConfig, pattern: Option<&QueryPattern>) -> Duration {
    let default = config.default_ttl.as_secs_f64();
    let mut ttl = default;

    if let Some(pattern) = pattern {
        let tuning = &config.adaptive;
        if pattern.frequency >= tuning.hot_frequency
            && pattern.avg_response_time_ms >= tuning.slow_response_ms
        {
            ttl *= tuning.boost_multiplier.max(1.0);
        }
        if pattern.hit_samples >= tuning.min_hit_samples
            && pattern.cache_hit_rate < tuning.low_hit_rate
            && ttl > default
        {
            ttl = default + (ttl - default) * 0.5;
        }
    }

    let min = config.min_ttl.as_secs_f64();
    let max = config.max_ttl.as_secs_f64().max(min);
    Duration::from_secs_f64(ttl.clamp(min, max))
}
