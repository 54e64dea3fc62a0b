//! Sliding-window rate limiting for upstream calls
//!
//! The limiter never rejects: `acquire` only delays the caller until a slot
//! inside the window frees up. Timestamps of granted acquisitions are kept in
//! order so that no interval of length `window_duration` ever contains more
//! than `max_requests` grants.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u32,

    /// Length of the sliding window
    #[serde(with = "humantime_serde")]
    pub window_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 240,                        // upstream allows 240 requests
            window_duration: Duration::from_secs(60), // per minute
        }
    }
}

/// Rate limiter statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimiterStats {
    /// Acquisitions granted
    pub granted: u64,
    /// Acquisitions that had to wait at least once
    pub delayed: u64,
    /// Total time spent waiting for slots
    #[serde(with = "humantime_serde")]
    pub total_wait: Duration,
}

#[derive(Debug)]
struct RateWindow {
    timestamps: VecDeque<Instant>,
    stats: RateLimiterStats,
}

impl RateWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.timestamps.front() {
            if now.duration_since(*oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<RateWindow>,
}

impl RateLimiter {
    /// Create a new rate limiter with default config
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// Create a new rate limiter with custom config
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            window: Mutex::new(RateWindow {
                timestamps: VecDeque::with_capacity(config.max_requests as usize),
                stats: RateLimiterStats::default(),
            }),
            config,
        }
    }

    /// Wait until a slot is free, then record the grant
    pub async fn acquire(&self) {
        let started = Instant::now();
        let mut waited = false;

        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                window.prune(now, self.config.window_duration);

                if window.timestamps.len() < self.config.max_requests as usize {
                    window.timestamps.push_back(now);
                    window.stats.granted += 1;
                    if waited {
                        window.stats.delayed += 1;
                        window.stats.total_wait += now.duration_since(started);
                    }
                    trace!(
                        in_window = window.timestamps.len(),
                        max_requests = self.config.max_requests,
                        "Rate limit slot granted"
                    );
                    return;
                }

                // The window is full, so there is an oldest timestamp.
                match window.timestamps.front() {
                    Some(oldest) => self
                        .config
                        .window_duration
                        .saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };

            // Re-evaluate after sleeping; another acquirer may take the slot first.
            waited = true;
            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            sleep(wait).await;
        }
    }

    /// Take a slot if one is free right now
    pub async fn try_acquire(&self) -> bool {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        window.prune(now, self.config.window_duration);

        if window.timestamps.len() < self.config.max_requests as usize {
            window.timestamps.push_back(now);
            window.stats.granted += 1;
            true
        } else {
            false
        }
    }

    /// Slots currently free in the window
    pub async fn available_slots(&self) -> u32 {
        let mut window = self.window.lock().await;
        window.prune(Instant::now(), self.config.window_duration);
        self.config
            .max_requests
            .saturating_sub(window.timestamps.len() as u32)
    }

    /// Get rate limiter statistics
    pub async fn get_statistics(&self) -> RateLimiterStats {
        self.window.lock().await.stats.clone()
    }

    /// Active configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
