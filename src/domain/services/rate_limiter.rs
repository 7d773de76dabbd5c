//! Adaptive outbound rate limiter
//!
//! Keeps a rolling window of request timestamps and blocks callers until the
//! window has room. The allowed rate shrinks after batches with too many
//! failures and grows back after healthy ones.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub use crate::config::RateLimiterConfig;

#[derive(Debug)]
struct RateLimiterState {
    recent_requests: VecDeque<Instant>,
    current_rate: f64,
}

impl RateLimiterState {
    fn purge(&mut self, window: Duration, now: Instant) {
        while let Some(front) = self.recent_requests.front() {
            if now.duration_since(*front) >= window {
                self.recent_requests.pop_front();
            } else {
                break;
            }
        }
    }

    /// Slots available in the window; at least one so the limiter never wedges
    fn capacity(&self) -> usize {
        (self.current_rate.floor() as usize).max(1)
    }
}

pub struct AdaptiveRateLimiter {
    config: RateLimiterConfig,
    state: Mutex<RateLimiterState>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let current_rate = config.initial_rate.clamp(config.min_rate, config.max_rate);
        Self {
            config,
            state: Mutex::new(RateLimiterState {
                recent_requests: VecDeque::new(),
                current_rate,
            }),
        }
    }

    /// Wait until the window has room, then claim a slot.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.purge(self.config.window, now);

                if state.recent_requests.len() < state.capacity() {
                    state.recent_requests.push_back(now);
                    return;
                }

                state
                    .recent_requests
                    .front()
                    .map(|oldest| (*oldest + self.config.window).saturating_duration_since(now))
                    .unwrap_or(Duration::ZERO)
            };

            debug!(wait_ms = wait.as_millis() as u64, "Rate limit window full, waiting");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Adjust the allowed rate from a finished batch. Empty batches carry no
    /// signal and leave the rate untouched.
    pub async fn record_batch(&self, failures: usize, total: usize) -> f64 {
        let mut state = self.state.lock().await;
        if total == 0 {
            return state.current_rate;
        }

        let ratio = failures as f64 / total as f64;
        let previous = state.current_rate;
        state.current_rate = if ratio > self.config.failure_ratio_threshold {
            (previous * self.config.decrease_factor).max(self.config.min_rate)
        } else {
            (previous * self.config.increase_factor).min(self.config.max_rate)
        };

        info!(
            failure_ratio = ratio,
            previous_rate = previous,
            current_rate = state.current_rate,
            "Adjusted outbound rate"
        );
        state.current_rate
    }

    pub async fn current_rate(&self) -> f64 {
        self.state.lock().await.current_rate
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let mut state = self.state.lock().await;
        state.purge(self.config.window, Instant::now());
        RateLimiterSnapshot {
            requests_in_window: state.recent_requests.len(),
            current_rate: state.current_rate,
            min_rate: self.config.min_rate,
            max_rate: self.config.max_rate,
            window_ms: self.config.window.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterSnapshot {
    pub requests_in_window: usize,
    pub current_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub window_ms: u64,
}
