//! Monitoring hooks for the access layer

pub mod telemetry;

use serde::{Deserialize, Serialize};

pub use telemetry::{
    CallOutcome, InMemorySink, MetricsSink, OutcomeEvent, OutcomeRecorder, TracingSink,
};

/// Coarse health classification reported to dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Worst of two statuses
    pub fn combine(self, other: HealthStatus) -> HealthStatus {
        self.max(other)
    }
}
