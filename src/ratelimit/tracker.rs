//! Observed rate-limit state.
//!
//! When the upstream service replies 429 the client records the Retry-After
//! deadline here; anything that wants to know "are we currently throttled?"
//! reads a snapshot. Expiry is lazy: the first reader past the deadline
//! clears the state.
//!
//! The check-and-clear in [`RateLimitTracker::get_info`] happens under a
//! single exclusive acquisition. Upgrading a read lock to a write lock here
//! is a known deadlock (and double-unlock) trap under contention, so the
//! tracker uses one plain mutex instead of a read-write guard.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Value snapshot of an active throttle.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitInfo {
    /// The Retry-After the server asked for, in seconds
    pub retry_after_seconds: f64,
    /// Seconds still remaining until the deadline
    pub remaining_seconds: f64,
    /// When the 429 was observed
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ThrottleState {
    retry_after_seconds: f64,
    deadline: Instant,
    detected_at: DateTime<Utc>,
}

/// Single-writer, many-reader store of "we were throttled until T".
#[derive(Default)]
pub struct RateLimitTracker {
    state: Mutex<Option<ThrottleState>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a throttle deadline `retry_after_seconds` from now.
    pub fn update(&self, retry_after_seconds: f64) {
        let retry_after_seconds = retry_after_seconds.max(0.0);
        let mut state = self.state.lock();
        *state = Some(ThrottleState {
            retry_after_seconds,
            deadline: Instant::now() + Duration::from_secs_f64(retry_after_seconds),
            detected_at: Utc::now(),
        });
    }

    /// Snapshot of the active throttle, or `None` once the deadline passed.
    ///
    /// A reader observing an expired deadline clears the state atomically,
    /// so at most one caller sees the transition.
    pub fn get_info(&self) -> Option<RateLimitInfo> {
        let mut state = self.state.lock();
        match state.as_ref() {
            None => None,
            Some(throttle) => {
                let now = Instant::now();
                if now >= throttle.deadline {
                    *state = None;
                    None
                } else {
                    Some(RateLimitInfo {
                        retry_after_seconds: throttle.retry_after_seconds,
                        remaining_seconds: (throttle.deadline - now).as_secs_f64(),
                        detected_at: throttle.detected_at,
                    })
                }
            }
        }
    }

    /// Whether a throttle is currently active.
    pub fn is_throttled(&self) -> bool {
        self.get_info().is_some()
    }

    /// Manual reset, called on each upstream success.
    pub fn clear(&self) {
        *self.state.lock() = None;
    }
}
