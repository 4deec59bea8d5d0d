use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::config::RateLimitConfig;

/// Sliding-window admission control shared by every free engine worker.
///
/// Holds the timestamps of recent admissions. `acquire` keeps the lock while
/// it waits, so callers are admitted one at a time in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_calls: usize,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_calls: usize) -> Self {
        Self {
            window,
            max_calls: max_calls.max(1),
            admitted: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.window(), config.max_calls)
    }

    /// Wait until another call fits in the window, then record it
    pub async fn acquire(&self) {
        let mut admitted = self.admitted.lock().await;

        loop {
            let now = Instant::now();
            while let Some(&oldest) = admitted.front() {
                if now.duration_since(oldest) >= self.window {
                    admitted.pop_front();
                } else {
                    break;
                }
            }

            if admitted.len() < self.max_calls {
                admitted.push_back(now);
                return;
            }

            // Window full: wait for the oldest admission to age out
            if let Some(&oldest) = admitted.front() {
                debug!("Rate limit window full, waiting {:?}", (oldest + self.window) - now);
                sleep_until(oldest + self.window).await;
            }
        }
    }
}
