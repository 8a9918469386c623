//! Sliding-window request limiter.
//!
//! Admits at most N requests per trailing window of W seconds. The window
//! is exact (timestamps, not token buckets), so bursts right after a quiet
//! period are allowed up to N.
//!
//! Fairness among concurrent waiters is best-effort: waiters race for the
//! next window edge, there is no FIFO queue.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RateLimit;
use crate::error::{Error, Result};

/// Sliding-window admission control for one resource stream.
pub struct SlidingWindowLimiter {
    enabled: bool,
    max_requests: usize,
    window: Duration,
    // Admission timestamps, oldest first; all strictly within the window.
    admissions: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    /// Limiter allowing `max_requests` per `window_seconds` trailing window.
    pub fn new(max_requests: u32, window_seconds: f64) -> Self {
        Self {
            enabled: max_requests > 0 && window_seconds > 0.0,
            max_requests: max_requests as usize,
            window: Duration::from_secs_f64(window_seconds.max(0.0)),
            admissions: Mutex::new(VecDeque::new()),
        }
    }

    /// Pass-through limiter that admits everything immediately.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_requests: 0,
            window: Duration::ZERO,
            admissions: Mutex::new(VecDeque::new()),
        }
    }

    pub fn from_config(config: &RateLimit) -> Self {
        if config.enabled {
            Self::new(config.requests, config.window_seconds)
        } else {
            Self::disabled()
        }
    }

    /// Block until this request is admitted, or until `cancel` fires.
    ///
    /// The lock is held only for the timestamp bookkeeping; the sleep
    /// happens outside it so other waiters can make progress.
    pub async fn wait_if_needed(&self, cancel: &CancellationToken) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let sleep_for = {
                let mut admissions = self.admissions.lock();
                let now = Instant::now();
                while let Some(oldest) = admissions.front() {
                    if now.duration_since(*oldest) >= self.window {
                        admissions.pop_front();
                    } else {
                        break;
                    }
                }
                if admissions.len() < self.max_requests {
                    admissions.push_back(now);
                    return Ok(());
                }
                // Window is full: sleep until the oldest admission ages out,
                // then race the other waiters for the freed slot.
                let oldest = *admissions.front().expect("window is full");
                self.window - now.duration_since(oldest)
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }
}
