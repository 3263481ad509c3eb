//! Sliding window counter strategy.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::keymap::KeyedStates;
use super::{LimiterStats, RateLimiter};
use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

/// Approximates a sliding window from two adjacent fixed buckets.
///
/// Instead of logging every timestamp, the limiter keeps the request count of
/// the current window and of the immediately preceding one. The preceding
/// count is weighted by how much of it still overlaps the trailing window:
///
/// ```text
/// weight         = 1 - elapsed_in_current_window / window
/// weighted_count = previous * weight + current
/// ```
///
/// The weight decays linearly from 1 at the window start to 0 at its end.
/// The result can under- or over-admit relative to the exact log by an amount
/// bounded by how unevenly the previous window's requests were distributed;
/// in exchange the per-key state is two integers and an index.
#[derive(Debug)]
pub struct SlidingWindowCounterLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    states: KeyedStates<CounterState>,
}

#[derive(Debug)]
struct CounterState {
    current: u32,
    previous: u32,
    current_start: u64,
}

/// Snapshot of one key's two-bucket window state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlidingWindowCounterStats {
    /// Weighted count as of now
    pub weighted_count: f64,
    /// Admissions recorded in the current window
    pub current_window_requests: u32,
    /// Final count of the preceding adjacent window
    pub previous_window_requests: u32,
    /// Configured limit
    pub limit: u32,
    /// Capacity left before the weighted count reaches the limit
    pub remaining: f64,
}

impl SlidingWindowCounterLimiter {
    /// Create a limiter admitting at most `limit` weighted requests per `window`.
    pub fn new(limit: u32, window: Duration) -> Result<Self> {
        Self::with_clock(limit, window, Arc::new(SystemClock::new()))
    }

    /// Like [`new`](Self::new), but reading time from `clock`.
    pub fn with_clock(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        if limit == 0 {
            return Err(FloodgateError::Config("limit must be positive".into()));
        }
        if window.is_zero() {
            return Err(FloodgateError::Config("window must be positive".into()));
        }
        Ok(Self {
            limit,
            window,
            clock,
            states: KeyedStates::new(),
        })
    }

    /// Admit or reject one request for `key`.
    ///
    /// On rollover, `previous` takes the old `current` only when the new
    /// window is exactly one index later; a gap of two or more windows means
    /// the key was idle and `previous` is zeroed. Admission compares the
    /// weighted count strictly against the limit; equality denies. Only
    /// `current` is ever incremented.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = self.clock.now().as_secs_f64();
        let window_secs = self.window.as_secs_f64();
        let index = (now / window_secs) as u64;

        let allowed = self.states.update(
            key,
            || CounterState {
                current: 0,
                previous: 0,
                current_start: index,
            },
            |state| {
                if state.current_start != index {
                    if index == state.current_start + 1 {
                        state.previous = state.current;
                    } else {
                        state.previous = 0;
                    }
                    state.current = 0;
                    state.current_start = index;
                }

                let weight = 1.0 - (now - index as f64 * window_secs) / window_secs;
                let weighted = f64::from(state.previous) * weight + f64::from(state.current);
                if weighted < f64::from(self.limit) {
                    state.current += 1;
                    true
                } else {
                    false
                }
            },
        );

        if !allowed {
            debug!(key = %key, limit = self.limit, "weighted count at limit");
        }
        allowed
    }

    /// Recompute the weighted view of `key` from the stored buckets.
    ///
    /// The weight reflects the current time, so the snapshot drifts as the
    /// window fills; the stored counts themselves are untouched by reads.
    pub fn stats(&self, key: &str) -> SlidingWindowCounterStats {
        let now = self.clock.now().as_secs_f64();
        let window_secs = self.window.as_secs_f64();
        let index = (now / window_secs) as u64;
        let weight = 1.0 - (now - index as f64 * window_secs) / window_secs;

        self.states.read(key, |state| {
            let (current, previous) = match state {
                Some(s) => (s.current, s.previous),
                None => (0, 0),
            };
            let weighted = f64::from(previous) * weight + f64::from(current);
            SlidingWindowCounterStats {
                weighted_count: weighted,
                current_window_requests: current,
                previous_window_requests: previous,
                limit: self.limit,
                remaining: (f64::from(self.limit) - weighted).max(0.0),
            }
        })
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.states.len()
    }

    /// Drop all per-key state. Primarily useful for testing.
    pub fn clear(&self) {
        self.states.clear()
    }
}

impl RateLimiter for SlidingWindowCounterLimiter {
    fn is_allowed(&self, key: &str) -> bool {
        SlidingWindowCounterLimiter::is_allowed(self, key)
    }

    fn stats(&self, key: &str) -> LimiterStats {
        LimiterStats::SlidingWindowCounter(SlidingWindowCounterLimiter::stats(self, key))
    }
}
