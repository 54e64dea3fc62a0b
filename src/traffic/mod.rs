//! Admission control in front of the upstream registry
//!
//! Rate limiting, request deduplication and burst queueing. These components
//! only shape traffic; failure handling lives in [`crate::error_recovery`].

pub mod deduplication;
pub mod rate_limiter;
pub mod request_queue;

pub use deduplication::{canonicalize, DeduplicationConfig, DeduplicationStats, RequestDeduplicator};
pub use rate_limiter::{RateLimitConfig, RateLimiter, RateLimiterStats};
pub use request_queue::{QueueConfig, QueuePermit, QueueStats, RequestQueue};
