//! Admission control for upstream services.
//!
//! Two cooperating pieces: [`SlidingWindowLimiter`] throttles outgoing
//! requests before they happen, and [`RateLimitTracker`] records throttling
//! the server has already told us about (HTTP 429 + Retry-After).

mod limiter;
mod tracker;

pub use limiter::SlidingWindowLimiter;
pub use tracker::{RateLimitInfo, RateLimitTracker};
