//! Optional persistent store behind the in-memory cache

use super::compression::StoredPayload;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Record persisted in a backing store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub payload: StoredPayload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub priority: u8,
}

impl StoredRecord {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Key/value store the cache writes through to and reads through from
#[async_trait]
pub trait CacheBackingStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredRecord>>;

    async fn put(&self, namespace: &str, key: &str, record: StoredRecord) -> Result<()>;

    async fn remove(&self, namespace: &str, key: &str) -> Result<()>;

    /// Remove every key in a namespace, returning how many were removed
    async fn clear_namespace(&self, namespace: &str) -> Result<usize>;
}

/// Process-local backing store
#[derive(Debug, Default)]
pub struct InMemoryBackingStore {
    records: RwLock<HashMap<(String, String), StoredRecord>>,
}

impl InMemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackingStore for InMemoryBackingStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(namespace.to_string(), key.to_string()))
            .filter(|record| !record.is_expired())
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, record: StoredRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert((namespace.to_string(), key.to_string()), record);
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        self.records
            .write()
            .await
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|(ns, _), _| ns != namespace);
        Ok(before - records.len())
    }
}
