//! Outcome telemetry for resilient calls
//!
//! Every call through the resilience pipeline reports exactly one
//! [`OutcomeEvent`] to a [`MetricsSink`]. The [`OutcomeRecorder`] guard is
//! created when a call starts and reports `Cancelled` from `Drop` if the call
//! is abandoned before an explicit outcome is recorded.

use crate::error::{PipelineStage, RegistryError};
use crate::error_recovery::fallback::FallbackSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Terminal outcome of a resilient call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "source")]
pub enum CallOutcome {
    /// Upstream answered, possibly after retries
    Success,
    /// A recovery probe succeeded and the single extra retry answered
    Recovered,
    /// A fallback source answered instead of upstream
    FallbackUsed(FallbackSource),
    /// Every layer failed
    Failed,
    /// The caller abandoned the call
    Cancelled,
}

impl CallOutcome {
    /// Stable label for counters
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Recovered => "recovered",
            Self::FallbackUsed(_) => "fallback",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One reported call outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub id: Uuid,
    pub service: String,
    pub operation: String,
    pub outcome: CallOutcome,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub stages: Vec<PipelineStage>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Fire-and-forget receiver of outcome events
pub trait MetricsSink: Send + Sync {
    /// Record an event; must not block or fail
    fn record(&self, event: OutcomeEvent);
}

/// Sink that logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, event: OutcomeEvent) {
        match event.outcome {
            CallOutcome::Success | CallOutcome::Recovered => debug!(
                service = %event.service,
                operation = %event.operation,
                outcome = event.outcome.label(),
                duration_ms = event.duration.as_millis() as u64,
                "Call completed"
            ),
            CallOutcome::FallbackUsed(source) => info!(
                service = %event.service,
                operation = %event.operation,
                ?source,
                stages = ?event.stages,
                "Call served from fallback"
            ),
            CallOutcome::Failed | CallOutcome::Cancelled => warn!(
                service = %event.service,
                operation = %event.operation,
                outcome = event.outcome.label(),
                stages = ?event.stages,
                error = event.error.as_deref().unwrap_or(""),
                "Call did not complete"
            ),
        }
    }
}

/// Bounded in-memory sink for dashboards and tests
#[derive(Debug)]
pub struct InMemorySink {
    capacity: usize,
    inner: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    events: VecDeque<OutcomeEvent>,
    counts: HashMap<&'static str, u64>,
}

impl InMemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(InMemoryState::default()),
        }
    }

    /// Recent events, oldest first
    pub fn events(&self) -> Vec<OutcomeEvent> {
        match self.inner.lock() {
            Ok(state) => state.events.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().events.iter().cloned().collect(),
        }
    }

    /// Lifetime count of events with the given outcome label
    pub fn count(&self, label: &str) -> u64 {
        let read = |state: &InMemoryState| state.counts.get(label).copied().unwrap_or(0);
        match self.inner.lock() {
            Ok(state) => read(&state),
            Err(poisoned) => read(&poisoned.into_inner()),
        }
    }

    /// Lifetime counts keyed by outcome label
    pub fn counts(&self) -> HashMap<String, u64> {
        let collect = |state: &InMemoryState| {
            state
                .counts
                .iter()
                .map(|(label, count)| (label.to_string(), *count))
                .collect()
        };
        match self.inner.lock() {
            Ok(state) => collect(&state),
            Err(poisoned) => collect(&poisoned.into_inner()),
        }
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MetricsSink for InMemorySink {
    fn record(&self, event: OutcomeEvent) {
        let mut state = match self.inner.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state.counts.entry(event.outcome.label()).or_insert(0) += 1;
        if state.events.len() >= self.capacity {
            state.events.pop_front();
        }
        state.events.push_back(event);
    }
}

/// Scoped guard that reports one outcome per call
pub struct OutcomeRecorder {
    sink: Arc<dyn MetricsSink>,
    service: String,
    operation: String,
    started: Instant,
    reported: bool,
}

impl OutcomeRecorder {
    pub fn start(sink: Arc<dyn MetricsSink>, service: &str, operation: &str) -> Self {
        Self {
            sink,
            service: service.to_string(),
            operation: operation.to_string(),
            started: Instant::now(),
            reported: false,
        }
    }

    /// Report a successful outcome
    pub fn finish(mut self, outcome: CallOutcome, stages: &[PipelineStage]) {
        self.emit(outcome, stages, None);
    }

    /// Report a terminal failure
    pub fn fail(mut self, error: &RegistryError) {
        let stages = error.stages().to_vec();
        self.emit(CallOutcome::Failed, &stages, Some(error.to_string()));
    }

    fn emit(&mut self, outcome: CallOutcome, stages: &[PipelineStage], error: Option<String>) {
        if self.reported {
            return;
        }
        self.reported = true;
        self.sink.record(OutcomeEvent {
            id: Uuid::new_v4(),
            service: self.service.clone(),
            operation: self.operation.clone(),
            outcome,
            duration: self.started.elapsed(),
            stages: stages.to_vec(),
            error,
            timestamp: Utc::now(),
        });
    }
}

impl Drop for OutcomeRecorder {
    fn drop(&mut self) {
        if !self.reported {
            self.emit(CallOutcome::Cancelled, &[], None);
        }
    }
}
