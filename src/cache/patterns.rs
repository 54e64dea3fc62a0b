//! Query pattern learning
//!
//! Literal cache keys are folded into templatized shapes so that statistics
//! aggregate across many concrete queries: `search?q=pump&limit=10` and
//! `search?q=catheter&limit=25` both count toward `search?q=*&limit=*`.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

static QUERY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"=([^&]*)").expect("valid query value regex"));
static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid digits regex"));

/// Aggregated usage statistics for one query shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPattern {
    pub pattern_id: String,
    pub frequency: u64,
    /// Exponential moving average of upstream response time
    pub avg_response_time_ms: f64,
    /// Exponential moving average of cache hits (1.0) and misses (0.0)
    pub cache_hit_rate: f64,
    pub last_accessed: DateTime<Utc>,
    /// Most recent stored payload size
    pub data_size: usize,
    pub hit_samples: u64,
    pub response_samples: u64,
}

impl QueryPattern {
    pub(crate) fn new(pattern_id: String) -> Self {
        Self {
            pattern_id,
            frequency: 0,
            avg_response_time_ms: 0.0,
            cache_hit_rate: 0.0,
            last_accessed: Utc::now(),
            data_size: 0,
            hit_samples: 0,
            response_samples: 0,
        }
    }
}

/// Bounded table of query patterns
#[derive(Debug)]
pub struct QueryPatternTracker {
    patterns: HashMap<String, QueryPattern>,
    max_patterns: usize,
    alpha: f64,
}

impl QueryPatternTracker {
    /// `alpha` is the EMA smoothing factor in `(0, 1]`
    pub fn new(max_patterns: usize, alpha: f64) -> Self {
        Self {
            patterns: HashMap::new(),
            max_patterns: max_patterns.max(1),
            alpha: alpha.clamp(f64::EPSILON, 1.0),
        }
    }

    /// Templatized shape of a cache key
    pub fn pattern_id(namespace: &str, key: &str) -> String {
        let shape = if key.contains('=') {
            QUERY_VALUE.replace_all(key, "=*").into_owned()
        } else {
            DIGITS.replace_all(key, "#").into_owned()
        };
        format!("{namespace}:{shape}")
    }

    /// Count an access and fold its hit/miss into the hit-rate EMA
    pub fn record_access(&mut self, namespace: &str, key: &str, hit: bool) {
        let alpha = self.alpha;
        let pattern = self.entry(namespace, key);
        pattern.frequency += 1;
        pattern.last_accessed = Utc::now();

        let sample = if hit { 1.0 } else { 0.0 };
        pattern.cache_hit_rate = if pattern.hit_samples == 0 {
            sample
        } else {
            alpha * sample + (1.0 - alpha) * pattern.cache_hit_rate
        };
        pattern.hit_samples += 1;
    }

    /// Fold an upstream response time into the pattern's EMA
    pub fn record_response_time(&mut self, namespace: &str, key: &str, elapsed: Duration) {
        let alpha = self.alpha;
        let pattern = self.entry(namespace, key);
        let sample = elapsed.as_secs_f64() * 1000.0;
        pattern.avg_response_time_ms = if pattern.response_samples == 0 {
            sample
        } else {
            alpha * sample + (1.0 - alpha) * pattern.avg_response_time_ms
        };
        pattern.response_samples += 1;
        pattern.last_accessed = Utc::now();
    }

    pub fn record_size(&mut self, namespace: &str, key: &str, size: usize) {
        self.entry(namespace, key).data_size = size;
    }

    /// Pattern matching a concrete key, if one has been observed
    pub fn lookup(&self, namespace: &str, key: &str) -> Option<&QueryPattern> {
        self.patterns.get(&Self::pattern_id(namespace, key))
    }

    /// All patterns, most frequent first
    pub fn snapshot(&self) -> Vec<QueryPattern> {
        let mut patterns: Vec<QueryPattern> = self.patterns.values().cloned().collect();
        patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    fn entry(&mut self, namespace: &str, key: &str) -> &mut QueryPattern {
        let id = Self::pattern_id(namespace, key);
        if !self.patterns.contains_key(&id) && self.patterns.len() >= self.max_patterns {
            self.drop_least_used();
        }
        self.patterns
            .entry(id.clone())
            .or_insert_with(|| QueryPattern::new(id))
    }

    fn drop_least_used(&mut self) {
        let victim = self
            .patterns
            .values()
            .min_by(|a, b| {
                a.frequency
                    .cmp(&b.frequency)
                    .then(a.last_accessed.cmp(&b.last_accessed))
            })
            .map(|p| p.pattern_id.clone());

        if let Some(id) = victim {
            self.patterns.remove(&id);
        }
    }
}
