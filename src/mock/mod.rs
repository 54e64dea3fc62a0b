//! Mock implementations for testing
//!
//! This module provides a scripted registry client for testing purposes.

use crate::client::{RegistryClient, SearchRequest, SearchResults};
use crate::error::{RegistryError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Mock registry client for testing
///
/// Successful answers are synthesized from the request. Failures can be
/// scripted per call (`push_failure`) or made sticky (`fail_with`).
#[derive(Default)]
pub struct MockRegistryClient {
    delay: Option<Duration>,
    sticky_failure: Mutex<Option<RegistryError>>,
    scripted_failures: Mutex<VecDeque<RegistryError>>,
    healthy: AtomicBool,
    search_calls: AtomicU64,
    details_calls: AtomicU64,
    lookup_calls: AtomicU64,
}

impl MockRegistryClient {
    /// Create new mock client
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Delay every call, for concurrency tests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every call with `error` until cleared with `None`
    pub fn fail_with(&self, error: Option<RegistryError>) {
        if let Ok(mut sticky) = self.sticky_failure.lock() {
            *sticky = error;
        }
    }

    /// Fail the next call with `error`; queued failures run in order
    pub fn push_failure(&self, error: RegistryError) {
        if let Ok(mut queue) = self.scripted_failures.lock() {
            queue.push_back(error);
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn search_calls(&self) -> u64 {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn details_calls(&self) -> u64 {
        self.details_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> u64 {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, counter: &AtomicU64) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripted_failures
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }

        let sticky = self
            .sticky_failure
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().cloned());
        match sticky {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RegistryClient for MockRegistryClient {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        self.respond(&self.search_calls).await?;
        let count = request.limit.min(3);
        Ok(SearchResults {
            total: count as u64,
            results: (0..count)
                .map(|i| json!({ "id": format!("K{i:06}"), "query": request.query }))
                .collect(),
        })
    }

    async fn get_details(&self, id: &str) -> Result<Value> {
        self.respond(&self.details_calls).await?;
        Ok(json!({ "id": id, "device_name": format!("Device {id}") }))
    }

    async fn lookup(&self, code: &str) -> Result<Value> {
        self.respond(&self.lookup_calls).await?;
        Ok(json!({ "code": code, "device_class": 2 }))
    }

    async fn health_check(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::connection("mock registry marked unhealthy"))
        }
    }
}
