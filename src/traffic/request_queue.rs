//! FIFO admission queue for smoothing bursts of upstream calls

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Request queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Upstream calls allowed to execute at once
    pub max_concurrent: usize,
    /// Callers allowed to wait for admission
    pub max_queued: usize,
    /// Longest a caller waits before giving up
    #[serde(with = "humantime_serde")]
    pub queue_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            max_queued: 256,
            queue_timeout: Duration::from_secs(30),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub admitted: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub waiting: usize,
    pub peak_waiting: usize,
}

/// Admission permit; the slot is released when dropped
#[derive(Debug)]
pub struct QueuePermit {
    _permit: OwnedSemaphorePermit,
}

/// Fair FIFO admission queue
#[derive(Debug)]
pub struct RequestQueue {
    config: QueueConfig,
    slots: Arc<Semaphore>,
    waiting: AtomicUsize,
    peak_waiting: AtomicUsize,
    admitted: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
}

/// Decrements the waiting gauge on every exit path
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RequestQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            waiting: AtomicUsize::new(0),
            peak_waiting: AtomicUsize::new(0),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    /// Wait in line for an execution slot
    pub async fn enter(&self) -> Result<QueuePermit> {
        let queued = self.waiting.fetch_add(1, Ordering::AcqRel) + 1;
        let _guard = WaitingGuard(&self.waiting);

        if queued > self.config.max_queued {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(queued, max_queued = self.config.max_queued, "Request queue full");
            return Err(RegistryError::rate_limited("request queue is full"));
        }
        self.peak_waiting.fetch_max(queued, Ordering::Relaxed);

        match timeout(self.config.queue_timeout, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => {
                self.admitted.fetch_add(1, Ordering::Relaxed);
                debug!(queued, "Request admitted from queue");
                Ok(QueuePermit { _permit: permit })
            }
            Ok(Err(_)) => Err(RegistryError::internal("request queue closed")),
            Err(_) => {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                Err(RegistryError::timeout(format!(
                    "waited more than {:?} in request queue",
                    self.config.queue_timeout
                )))
            }
        }
    }

    pub fn get_stats(&self) -> QueueStats {
        QueueStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            waiting: self.waiting.load(Ordering::Relaxed),
            peak_waiting: self.peak_waiting.load(Ordering::Relaxed),
        }
    }
}
