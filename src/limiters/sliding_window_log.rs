//! Sliding window log strategy.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use super::keymap::KeyedStates;
use super::{LimiterStats, RateLimiter};
use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

/// Stores the exact timestamp of every admitted request and counts those
/// within a trailing window.
///
/// The most accurate of the strategies and the most memory-hungry: steady
/// state holds up to `limit` timestamps per active key, but a key that bursts
/// under the limit can briefly hold more until expiry catches up on a later
/// call. Timestamps are appended in non-decreasing order, so expiry only ever
/// pops from the front of the log.
#[derive(Debug)]
pub struct SlidingWindowLogLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    states: KeyedStates<VecDeque<f64>>,
}

/// Snapshot of one key's request log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlidingWindowLogStats {
    /// Logged requests still inside the trailing window
    pub requests_made: u32,
    /// Configured limit for the trailing window
    pub limit: u32,
    /// Admissions left in the trailing window
    pub remaining: u32,
    /// Enqueue time of the oldest logged request, if any. May predate the
    /// window; expired entries are purged on admission checks, not reads.
    pub oldest_request: Option<Duration>,
}

impl SlidingWindowLogLimiter {
    /// Create a limiter admitting at most `limit` requests per trailing `window`.
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
    /// Entries older than `now - window` are purged from the front of the log
    /// before the decision; on admission `now` is appended.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = self.clock.now().as_secs_f64();
        let cutoff = now - self.window.as_secs_f64();

        self.states.update(key, VecDeque::new, |log| {
            while log.front().map_or(false, |&t| t < cutoff) {
                log.pop_front();
            }
            if (log.len() as u32) < self.limit {
                log.push_back(now);
                true
            } else {
                trace!(key = %key, logged = log.len(), "sliding window log full");
                false
            }
        })
    }

    /// Count the active entries for `key` without mutating the log.
    pub fn stats(&self, key: &str) -> SlidingWindowLogStats {
        let now = self.clock.now().as_secs_f64();
        let cutoff = now - self.window.as_secs_f64();

        self.states.read(key, |log| {
            let active = log.map_or(0, |l| l.iter().filter(|&&t| t >= cutoff).count() as u32);
            SlidingWindowLogStats {
                requests_made: active,
                limit: self.limit,
                remaining: self.limit.saturating_sub(active),
                oldest_request: log
                    .and_then(|l| l.front().copied())
                    .map(Duration::from_secs_f64),
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

impl RateLimiter for SlidingWindowLogLimiter {
    fn is_allowed(&self, key: &str) -> bool {
        SlidingWindowLogLimiter::is_allowed(self, key)
    }

    fn stats(&self, key: &str) -> LimiterStats {
        LimiterStats::SlidingWindowLog(SlidingWindowLogLimiter::stats(self, key))
    }
}
