//! Leaky bucket strategy.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use super::keymap::KeyedStates;
use super::{LimiterStats, RateLimiter};
use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

/// A bounded queue drained at a constant rate.
///
/// Admission depends on queue occupancy rather than token availability: a
/// request joins the queue if there is room and is rejected otherwise, while
/// queued entries "leak" (count as processed) oldest first at `leak_rate`
/// entries per second.
///
/// Leaking happens lazily inside calls, never on a background timer, so leak
/// timing has a resolution bounded by call frequency: only whole entries
/// leak, and the leak clock restarts on every call. A key that is never
/// queried again never drains until it is queried.
#[derive(Debug)]
pub struct LeakyBucketLimiter {
    capacity: usize,
    leak_rate: f64,
    clock: Arc<dyn Clock>,
    states: KeyedStates<LeakState>,
}

#[derive(Debug)]
struct LeakState {
    queue: VecDeque<f64>,
    last_leak: f64,
}

/// Snapshot of one key's queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeakyBucketStats {
    /// Entries currently queued
    pub queue_depth: usize,
    /// Maximum queue length
    pub capacity: usize,
    /// Entries leaked per second
    pub leak_rate: f64,
    /// When the queue last leaked
    pub last_leak: Duration,
}

impl LeakyBucketLimiter {
    /// Create a limiter whose queues hold at most `capacity` entries and
    /// drain at `leak_rate` entries per second.
    pub fn new(capacity: usize, leak_rate: f64) -> Result<Self> {
        Self::with_clock(capacity, leak_rate, Arc::new(SystemClock::new()))
    }

    /// Like [`new`](Self::new), but reading time from `clock`.
    pub fn with_clock(capacity: usize, leak_rate: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if capacity == 0 {
            return Err(FloodgateError::Config("capacity must be positive".into()));
        }
        if !(leak_rate > 0.0) || !leak_rate.is_finite() {
            return Err(FloodgateError::Config("leak_rate must be positive".into()));
        }
        Ok(Self {
            capacity,
            leak_rate,
            clock,
            states: KeyedStates::new(),
        })
    }

    /// Admit or reject one request for `key`.
    ///
    /// `floor(elapsed * leak_rate)` entries drain from the front before the
    /// decision; `last_leak` advances to now even when that floor is zero,
    /// so sub-unit leak progress is discarded rather than banked.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = self.clock.now().as_secs_f64();

        self.states.update(
            key,
            || LeakState {
                queue: VecDeque::new(),
                last_leak: now,
            },
            |state| {
                let elapsed = now - state.last_leak;
                let to_leak = (elapsed * self.leak_rate).floor() as u64;
                let drained = to_leak.min(state.queue.len() as u64);
                for _ in 0..drained {
                    state.queue.pop_front();
                }
                state.last_leak = now;

                if state.queue.len() < self.capacity {
                    state.queue.push_back(now);
                    true
                } else {
                    trace!(key = %key, depth = state.queue.len(), "queue full");
                    false
                }
            },
        )
    }

    /// Snapshot the stored queue for `key`; reads do not drain.
    pub fn stats(&self, key: &str) -> LeakyBucketStats {
        let now = self.clock.now();

        self.states.read(key, |state| {
            let (depth, last_leak) = match state {
                Some(s) => (s.queue.len(), Duration::from_secs_f64(s.last_leak)),
                None => (0, now),
            };
            LeakyBucketStats {
                queue_depth: depth,
                capacity: self.capacity,
                leak_rate: self.leak_rate,
                last_leak,
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

impl RateLimiter for LeakyBucketLimiter {
    fn is_allowed(&self, key: &str) -> bool {
        LeakyBucketLimiter::is_allowed(self, key)
    }

    fn stats(&self, key: &str) -> LimiterStats {
        LimiterStats::LeakyBucket(LeakyBucketLimiter::stats(self, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter_at(capacity: usize, leak_rate: f64) -> (LeakyBucketLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let limiter = LeakyBucketLimiter::with_clock(capacity, leak_rate, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_queue_fills_to_capacity_then_rejects() {
        let (limiter, _clock) = limiter_at(3, 1.0);

        for _ in 0..3 {
            assert!(limiter.is_allowed("user1"));
        }
        assert!(!limiter.is_allowed("user1"));
        assert_eq!(limiter.stats("user1").queue_depth, 3);
    }

    #[test]
    fn test_queue_drains_fully_after_capacity_over_rate_seconds() {
        let (limiter, clock) = limiter_at(3, 1.0);

        for _ in 0..3 {
            assert!(limiter.is_allowed("user1"));
        }

        // capacity/leak_rate seconds later the whole queue drains before the
        // new request is evaluated.
        clock.advance(Duration::from_secs(3));
        assert!(limiter.is_allowed("user1"));
        assert_eq!(limiter.stats("user1").queue_depth, 1);
    }

    #[test]
    fn test_partial_drain_frees_one_slot() {
        let (limiter, clock) = limiter_at(2, 1.0);

        assert!(limiter.is_allowed("user1"));
        assert!(limiter.is_allowed("user1"));
        assert!(!limiter.is_allowed("user1"));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.is_allowed("user1"));
        assert!(!limiter.is_allowed("user1"));
    }

    #[test]
    fn test_sub_unit_elapsed_time_never_leaks() {
        // Calls arriving faster than the leak period each reset the leak
        // clock with floor(elapsed * rate) == 0, so the queue never drains
        // no matter how much total time accumulates.
        let (limiter, clock) = limiter_at(2, 1.0);

        assert!(limiter.is_allowed("user1"));
        assert!(limiter.is_allowed("user1"));

        for _ in 0..4 {
            clock.advance(Duration::from_millis(500));
            assert!(!limiter.is_allowed("user1"));
        }
        assert_eq!(limiter.stats("user1").queue_depth, 2);
    }

    #[test]
    fn test_rejection_still_advances_the_leak_clock() {
        let (limiter, clock) = limiter_at(1, 1.0);

        assert!(limiter.is_allowed("user1"));

        clock.advance(Duration::from_millis(600));
        assert!(!limiter.is_allowed("user1"));

        // Only 400ms remain since the rejected call reset last_leak, so
        // nothing has leaked yet.
        clock.advance(Duration::from_millis(400));
        assert!(!limiter.is_allowed("user1"));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.is_allowed("user1"));
    }

    #[test]
    fn test_entries_leak_oldest_first() {
        let (limiter, clock) = limiter_at(3, 1.0);

        assert!(limiter.is_allowed("user1"));
        clock.advance(Duration::from_secs(2));
        assert!(limiter.is_allowed("user1"));

        let stats = limiter.stats("user1");
        // The t=0 entry leaked during the two-second gap; the survivor is
        // the one enqueued at t=2.
        assert_eq!(stats.queue_depth, 1);
        assert_eq!(stats.last_leak, Duration::from_secs(2));
    }

    #[test]
    fn test_stats_for_unseen_key_show_an_empty_queue() {
        let (limiter, _clock) = limiter_at(3, 1.0);

        let stats = limiter.stats("nobody");
        assert_eq!(stats.queue_depth, 0);
        assert_eq!(stats.capacity, 3);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_stats_are_idempotent() {
        let (limiter, _clock) = limiter_at(3, 1.0);
        limiter.is_allowed("user1");

        assert_eq!(limiter.stats("user1"), limiter.stats("user1"));
    }

    #[test]
    fn test_non_positive_parameters_are_configuration_errors() {
        assert!(matches!(
            LeakyBucketLimiter::new(0, 1.0).unwrap_err(),
            FloodgateError::Config(_)
        ));
        assert!(matches!(
            LeakyBucketLimiter::new(3, 0.0).unwrap_err(),
            FloodgateError::Config(_)
        ));
        assert!(matches!(
            LeakyBucketLimiter::new(3, -1.0).unwrap_err(),
            FloodgateError::Config(_)
        ));
    }
}
