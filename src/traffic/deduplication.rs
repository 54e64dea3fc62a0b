//! Request deduplication for concurrent identical upstream calls
//!
//! The first caller for a fingerprint starts the operation on its own task and
//! registers a shared handle to the result. Later callers with the same
//! fingerprint await that handle instead of calling upstream again. Every
//! waiter, the first one included, receives an identical clone of the output.
//!
//! Waiters may give up at any time; the shared task keeps running for the
//! others and removes its own registry entry when it resolves.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Deduplication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    /// Length of the hex digest kept in fingerprints
    pub fingerprint_hex_len: usize,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            fingerprint_hex_len: 32,
        }
    }
}

/// Deduplication statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeduplicationStats {
    /// Operations actually executed
    pub executions: u64,
    /// Callers that joined an in-flight operation
    pub joined: u64,
    /// Operations currently in flight
    pub in_flight: usize,
}

type PendingRequest<O> = Shared<BoxFuture<'static, O>>;

/// Collapses concurrent identical requests into one execution
pub struct RequestDeduplicator<O>
where
    O: Clone + Send + Sync + 'static,
{
    config: DeduplicationConfig,
    pending: Arc<Mutex<HashMap<String, PendingRequest<O>>>>,
    executions: AtomicU64,
    joined: AtomicU64,
}

impl<O> RequestDeduplicator<O>
where
    O: Clone + Send + Sync + 'static,
{
    /// Create a new deduplicator with default configuration
    pub fn new() -> Self {
        Self::with_config(DeduplicationConfig::default())
    }

    /// Create a new deduplicator with custom configuration
    pub fn with_config(config: DeduplicationConfig) -> Self {
        Self {
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            executions: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Derive a stable fingerprint from an operation and its arguments
    pub fn fingerprint(&self, service: &str, operation: &str, args: &Value) -> String {
        let canonical = canonicalize(args);
        let mut hasher = Sha256::new();
        hasher.update(service.as_bytes());
        hasher.update([0u8]);
        hasher.update(operation.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.to_string().as_bytes());
        let digest = hex::encode(hasher.finalize());
        let len = self.config.fingerprint_hex_len.clamp(8, digest.len());

        format!("{service}:{operation}:{}", &digest[..len])
    }

    /// Run `operation` unless an identical one is already in flight
    pub async fn execute<F, Fut>(&self, fingerprint: &str, operation: F) -> O
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = O> + Send + 'static,
    {
        let shared = {
            let mut pending = self.pending.lock().await;

            if let Some(existing) = pending.get(fingerprint) {
                self.joined.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint, "Joining in-flight request");
                existing.clone()
            } else {
                self.executions.fetch_add(1, Ordering::Relaxed);

                let registry = self.pending.clone();
                let key = fingerprint.to_string();
                let fut = operation();
                let task = tokio::spawn(async move {
                    let output = fut.await;
                    registry.lock().await.remove(&key);
                    trace!(fingerprint = %key, "In-flight request resolved");
                    output
                });

                let shared = async move {
                    match task.await {
                        Ok(output) => output,
                        // The task is never aborted, so only a panic lands here.
                        Err(join_error) => {
                            warn!("Deduplicated operation panicked: {}", join_error);
                            std::panic::resume_unwind(join_error.into_panic())
                        }
                    }
                }
                .boxed()
                .shared();

                pending.insert(fingerprint.to_string(), shared.clone());
                shared
            }
        };

        shared.await
    }

    /// Number of operations currently in flight
    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Get deduplication statistics
    pub async fn get_stats(&self) -> DeduplicationStats {
        DeduplicationStats {
            executions: self.executions.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            in_flight: self.in_flight().await,
        }
    }
}

impl<O> Default for RequestDeduplicator<O>
where
    O: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize arguments so equivalent requests hash identically
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut normalized = Map::new();
            for key in keys {
                if let Some(inner) = map.get(key) {
                    if !inner.is_null() {
                        normalized.insert(key.clone(), canonicalize(inner));
                    }
                }
            }
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}
