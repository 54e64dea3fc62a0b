//! Scripted registry client
//!
//! Replies are consumed in order per operation; once a script runs dry the
//! client answers successfully with synthesized data.

use async_trait::async_trait;
use registry_resilience::client::{RegistryClient, SearchRequest, SearchResults};
use registry_resilience::{RegistryError, Result};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Fail(RegistryError),
    Hang,
}

#[derive(Default)]
struct Script {
    search: VecDeque<Reply>,
    details: VecDeque<Reply>,
    lookup: VecDeque<Reply>,
}

/// Registry client driven by per-operation scripts
pub struct ScriptedRegistry {
    script: Mutex<Script>,
    latency: Duration,
    total_results: u64,
    healthy: AtomicBool,
    searches: AtomicUsize,
    details: AtomicUsize,
    lookups: AtomicUsize,
}

impl Default for ScriptedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRegistry {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            latency: Duration::ZERO,
            total_results: 3,
            healthy: AtomicBool::new(true),
            searches: AtomicUsize::new(0),
            details: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Upstream total reported by every search
    pub fn with_total_results(mut self, total: u64) -> Self {
        self.total_results = total;
        self
    }

    pub fn script_search(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().unwrap().search.extend(replies);
    }

    pub fn script_details(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().unwrap().details.extend(replies);
    }

    pub fn script_lookup(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().unwrap().lookup.extend(replies);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn details_calls(&self) -> usize {
        self.details.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    async fn play(&self, next: Option<Reply>) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match next.unwrap_or(Reply::Ok) {
            Reply::Ok => Ok(()),
            Reply::Fail(error) => Err(error),
            Reply::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RegistryClient for ScriptedRegistry {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().search.pop_front();
        self.play(next).await?;

        let shown = request.limit.min(self.total_results as usize).min(5);
        Ok(SearchResults {
            total: self.total_results,
            results: (0..shown)
                .map(|i| json!({ "id": format!("K{:06}", i), "name": request.query }))
                .collect(),
        })
    }

    async fn get_details(&self, id: &str) -> Result<Value> {
        self.details.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().details.pop_front();
        self.play(next).await?;
        Ok(json!({ "id": id, "device_name": "Infusion Pump", "class": 2 }))
    }

    async fn lookup(&self, code: &str) -> Result<Value> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().lookup.pop_front();
        self.play(next).await?;
        Ok(json!({ "code": code, "review_panel": "GU" }))
    }

    async fn health_check(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::connection("registry unreachable"))
        }
    }
}
