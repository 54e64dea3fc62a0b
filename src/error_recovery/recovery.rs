//! Typed recovery probes
//!
//! Strategies are registered for one or more [`ErrorKind`]s and kept in a
//! dispatch table ordered by priority. On a terminal failure the highest
//! priority strategy for the error's kind runs its probe; a successful probe
//! entitles the caller to exactly one more attempt of the original operation.

use crate::error::{ErrorKind, RegistryError};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Probe that decides whether the dependency is usable again
pub type ProbeFn = Arc<dyn Fn(RegistryError) -> BoxFuture<'static, bool> + Send + Sync>;

/// Result of a recovery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAttempt {
    /// Recovery is disabled or no strategy handles the error's kind
    Skipped,
    /// The probe succeeded; one more attempt is permitted
    Recovered,
    /// The probe failed or timed out
    Failed,
}

impl RecoveryAttempt {
    pub fn is_recovered(&self) -> bool {
        matches!(self, RecoveryAttempt::Recovered)
    }

    /// Whether a probe actually ran
    pub fn probed(&self) -> bool {
        !matches!(self, RecoveryAttempt::Skipped)
    }
}

/// Recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Run recovery probes on terminal failures
    pub enabled: bool,
    /// Longest a probe may run; a timed out probe counts as failed
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// A named recovery probe for a set of error kinds
#[derive(Clone)]
pub struct RecoveryStrategy {
    pub name: String,
    pub kinds: Vec<ErrorKind>,
    /// Higher runs first
    pub priority: i32,
    probe: ProbeFn,
}

impl std::fmt::Debug for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryStrategy")
            .field("name", &self.name)
            .field("kinds", &self.kinds)
            .field("priority", &self.priority)
            .finish()
    }
}

impl RecoveryStrategy {
    pub fn new<F, Fut>(name: impl Into<String>, kinds: Vec<ErrorKind>, priority: i32, probe: F) -> Self
    where
        F: Fn(RegistryError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self {
            name: name.into(),
            kinds,
            priority,
            probe: Arc::new(move |error| probe(error).boxed()),
        }
    }

    /// Wait a fixed delay, then allow one retry
    pub fn wait_then_retry(
        name: impl Into<String>,
        kinds: Vec<ErrorKind>,
        priority: i32,
        wait: Duration,
    ) -> Self {
        Self::new(name, kinds, priority, move |_| async move {
            sleep(wait).await;
            true
        })
    }

    /// Wait out an open circuit if it reopens within `max_wait`
    pub fn wait_for_circuit(priority: i32, max_wait: Duration) -> Self {
        Self::new(
            "wait_for_circuit",
            vec![ErrorKind::CircuitOpen],
            priority,
            move |error| async move {
                match error {
                    RegistryError::CircuitOpen { retry_after, .. } if retry_after <= max_wait => {
                        sleep(retry_after).await;
                        true
                    }
                    _ => false,
                }
            },
        )
    }

    async fn run(&self, error: RegistryError) -> bool {
        (self.probe)(error).await
    }
}

/// Recovery statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    /// Failures no strategy was registered for
    pub unmatched: u64,
    /// Probe runs per strategy name
    pub by_strategy: HashMap<String, u64>,
}

/// Priority-ordered recovery dispatcher
pub struct ErrorRecoveryEngine {
    config: RecoveryConfig,
    table: RwLock<HashMap<ErrorKind, Vec<Arc<RecoveryStrategy>>>>,
    stats: RwLock<RecoveryStats>,
}

impl ErrorRecoveryEngine {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            table: RwLock::new(HashMap::new()),
            stats: RwLock::new(RecoveryStats::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Register a strategy for each of its kinds
    pub async fn register(&self, strategy: RecoveryStrategy) {
        let strategy = Arc::new(strategy);
        let mut table = self.table.write().await;

        for kind in &strategy.kinds {
            let slot = table.entry(*kind).or_default();
            slot.push(strategy.clone());
            slot.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        debug!(name = %strategy.name, kinds = ?strategy.kinds, "Registered recovery strategy");
    }

    /// Run the best matching probe; `Recovered` permits one more attempt
    pub async fn attempt_recovery(&self, error: &RegistryError) -> RecoveryAttempt {
        if !self.config.enabled {
            return RecoveryAttempt::Skipped;
        }

        let kind = error.root_cause().kind();
        let strategy = self
            .table
            .read()
            .await
            .get(&kind)
            .and_then(|strategies| strategies.first().cloned());

        let Some(strategy) = strategy else {
            self.stats.write().await.unmatched += 1;
            debug!(?kind, "No recovery strategy registered");
            return RecoveryAttempt::Skipped;
        };

        {
            let mut stats = self.stats.write().await;
            stats.attempts += 1;
            *stats.by_strategy.entry(strategy.name.clone()).or_insert(0) += 1;
        }

        let recovered = match timeout(
            self.config.probe_timeout,
            strategy.run(error.root_cause().clone()),
        )
        .await
        {
            Ok(recovered) => recovered,
            Err(_) => {
                self.stats.write().await.timeouts += 1;
                warn!(strategy = %strategy.name, "Recovery probe timed out");
                false
            }
        };

        let mut stats = self.stats.write().await;
        if recovered {
            stats.successes += 1;
            info!(strategy = %strategy.name, ?kind, "Recovery probe succeeded");
            RecoveryAttempt::Recovered
        } else {
            stats.failures += 1;
            debug!(strategy = %strategy.name, ?kind, "Recovery probe failed");
            RecoveryAttempt::Failed
        }
    }

    /// Get recovery statistics
    pub async fn get_stats(&self) -> RecoveryStats {
        self.stats.read().await.clone()
    }
}

impl Default for ErrorRecoveryEngine {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}
