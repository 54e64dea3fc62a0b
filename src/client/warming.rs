//! Background cache warming
//!
//! A warming cycle refreshes every configured query plus every refresh-ahead
//! cache entry close to expiry. Failures are counted and logged; they never
//! stop the loop. Cancellation is observed between cycles only, so a cycle
//! that has started always runs to completion.

use super::enhanced::EnhancedClient;
use super::SearchRequest;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A query kept warm by the warmer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WarmQuery {
    Search(SearchRequest),
    Details { id: String },
    Lookup { code: String },
}

/// Cache warming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmingConfig {
    /// Whether a warmer should be started for this configuration
    pub enabled: bool,

    /// Time between warming cycles
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Queries refreshed every cycle
    pub queries: Vec<WarmQuery>,

    /// Refresh-ahead entries expiring within this window are refreshed
    #[serde(with = "humantime_serde")]
    pub refresh_ahead_window: Duration,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(300),
            queries: Vec::new(),
            refresh_ahead_window: Duration::from_secs(120),
        }
    }
}

/// Warming statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmingStats {
    pub cycles: u64,
    pub refreshed: u64,
    pub failures: u64,
    pub last_cycle: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Handle to a running warmer
pub struct WarmingHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl WarmingHandle {
    /// Whether the warming task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the warmer, waiting for an in-progress cycle to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!("Cache warming task ended abnormally: {}", e);
        }
    }
}

/// Periodic cache warmer
pub struct CacheWarmer;

impl CacheWarmer {
    /// Spawn the warming loop; the first cycle runs immediately
    pub fn spawn(client: Arc<EnhancedClient>, config: WarmingConfig) -> WarmingHandle {
        let token = CancellationToken::new();
        let shutdown = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(config.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                queries = config.queries.len(),
                interval = ?config.interval,
                "Cache warmer started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        Self::run_cycle(&client, &config).await;
                    }
                }
            }

            info!("Cache warmer stopped");
        });

        WarmingHandle { token, task }
    }

    /// Run one warming cycle
    pub async fn run_cycle(client: &EnhancedClient, config: &WarmingConfig) {
        let mut refreshed = 0u64;
        let mut failures = 0u64;
        let mut last_error = None;

        let mut record = |label: &str, result: Result<()>| match result {
            Ok(()) => refreshed += 1,
            Err(e) => {
                warn!(target_key = label, "Cache warming refresh failed: {}", e);
                failures += 1;
                last_error = Some(e.to_string());
            }
        };

        for query in &config.queries {
            let result = match query {
                WarmQuery::Search(request) => client.refresh_search(request.clone()).await.map(|_| ()),
                WarmQuery::Details { id } => client.refresh_details(id).await.map(|_| ()),
                WarmQuery::Lookup { code } => client.refresh_lookup(code).await.map(|_| ()),
            };
            record(&format!("{query:?}"), result);
        }

        let expiring = client
            .cache()
            .expiring_soon(config.refresh_ahead_window)
            .await;
        for (namespace, key) in expiring {
            let result = client.refresh_key(&namespace, &key).await;
            record(&format!("{namespace}:{key}"), result);
        }

        let stats = client.warming_stats();
        let mut stats = stats.write().await;
        stats.cycles += 1;
        stats.refreshed += refreshed;
        stats.failures += failures;
        stats.last_cycle = Some(Utc::now());
        if last_error.is_some() {
            stats.last_error = last_error;
        }
        debug!(refreshed, failures, "Cache warming cycle complete");
    }
}
