//! Adaptive caching for upstream registry responses
//!
//! [`IntelligentCache`] keeps encoded payloads in memory under a byte budget,
//! learns per-query-shape usage through [`QueryPatternTracker`], and can read
//! and write through an optional [`CacheBackingStore`].

pub mod backing_store;
pub mod compression;
pub mod intelligent_cache;
pub mod patterns;

pub use backing_store::{CacheBackingStore, InMemoryBackingStore, StoredRecord};
pub use compression::{CompressionType, StoredPayload};
pub use intelligent_cache::{
    AdaptiveTtlConfig, CacheConfig, CacheHealth, CacheStats, CacheStrategy, EvictionWeights,
    Freshness, IntelligentCache,
};
pub use patterns::{QueryPattern, QueryPatternTracker};
