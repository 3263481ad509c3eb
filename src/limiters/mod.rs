//! Rate limiting strategies and their shared contract.
//!
//! Each strategy is a leaf: it owns its per-key state and depends on nothing
//! but the clock it was given. Callers pick one, construct it with policy
//! parameters, and drive it through [`RateLimiter`].

mod fixed_window;
mod keymap;
mod leaky_bucket;
mod sliding_window_counter;
mod sliding_window_log;
mod token_bucket;

pub use fixed_window::{FixedWindowLimiter, FixedWindowStats};
pub use leaky_bucket::{LeakyBucketLimiter, LeakyBucketStats};
pub use sliding_window_counter::{SlidingWindowCounterLimiter, SlidingWindowCounterStats};
pub use sliding_window_log::{SlidingWindowLogLimiter, SlidingWindowLogStats};
pub use token_bucket::{TokenBucketLimiter, TokenBucketStats};

use serde::Serialize;

/// Trait for admission-control strategies.
///
/// This abstracts over the five limiter implementations so callers can hold
/// any of them behind one type, e.g. in a policy registry.
///
/// Both operations are synchronous and never block beyond the limiter's
/// internal lock. "Denied" is a normal outcome, not an error: the caller
/// decides whether and when to retry.
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Decide whether one unit of work for `key` may proceed now.
    ///
    /// Admission and its side effect (counter increment, timestamp append,
    /// token deduction, or enqueue) are committed atomically. Time-based
    /// bookkeeping (window reset, refill, leak) happens on every call
    /// regardless of the outcome. Unknown keys are created on first access
    /// with an empty window / full bucket baseline, never an error.
    fn is_allowed(&self, key: &str) -> bool;

    /// Read-only snapshot of the admission state for `key`.
    ///
    /// Never mutates the counters that determine admission; derived,
    /// clock-dependent quantities may be recomputed from the current time.
    fn stats(&self, key: &str) -> LimiterStats;
}

/// A strategy-specific snapshot of one key's admission state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LimiterStats {
    FixedWindow(FixedWindowStats),
    SlidingWindowLog(SlidingWindowLogStats),
    SlidingWindowCounter(SlidingWindowCounterStats),
    TokenBucket(TokenBucketStats),
    LeakyBucket(LeakyBucketStats),
}

impl LimiterStats {
    /// Capacity left before further requests are rejected.
    pub fn remaining(&self) -> f64 {
        match self {
            LimiterStats::FixedWindow(s) => f64::from(s.remaining),
            LimiterStats::SlidingWindowLog(s) => f64::from(s.remaining),
            LimiterStats::SlidingWindowCounter(s) => s.remaining,
            LimiterStats::TokenBucket(s) => s.available_tokens,
            LimiterStats::LeakyBucket(s) => (s.capacity - s.queue_depth) as f64,
        }
    }

    /// The configured threshold admission is judged against.
    pub fn threshold(&self) -> f64 {
        match self {
            LimiterStats::FixedWindow(s) => f64::from(s.limit),
            LimiterStats::SlidingWindowLog(s) => f64::from(s.limit),
            LimiterStats::SlidingWindowCounter(s) => f64::from(s.limit),
            LimiterStats::TokenBucket(s) => s.capacity,
            LimiterStats::LeakyBucket(s) => s.capacity as f64,
        }
    }
}
