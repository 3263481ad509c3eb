//! Fixed window counter strategy.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::keymap::KeyedStates;
use super::{LimiterStats, RateLimiter};
use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

/// Counts requests in aligned, non-overlapping time buckets.
///
/// The cheapest strategy to run: one counter and one window index per key.
/// The trade-off is boundary behavior: a burst of `limit` requests at the end
/// of one window followed by `limit` more at the start of the next is
/// admitted in full, allowing up to twice the limit across the boundary.
/// Callers that cannot tolerate that should use one of the sliding window
/// strategies instead.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    states: KeyedStates<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: u64,
}

/// Snapshot of one key's fixed window state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixedWindowStats {
    /// Requests admitted in the window the counter belongs to
    pub requests_made: u32,
    /// Configured per-window limit
    pub limit: u32,
    /// Admissions left in that window
    pub remaining: u32,
    /// Index of the window the counter belongs to
    pub window_start: u64,
}

impl FixedWindowLimiter {
    /// Create a limiter admitting at most `limit` requests per `window`.
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
    /// The counter resets exactly once whenever the wall-clock window index
    /// has moved past the stored one, however many windows were skipped in
    /// between.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = self.clock.now().as_secs_f64();
        let index = (now / self.window.as_secs_f64()) as u64;

        let allowed = self.states.update(
            key,
            || WindowState {
                count: 0,
                window_start: index,
            },
            |state| {
                if state.window_start != index {
                    state.count = 0;
                    state.window_start = index;
                }
                if state.count < self.limit {
                    state.count += 1;
                    true
                } else {
                    false
                }
            },
        );

        if !allowed {
            debug!(key = %key, limit = self.limit, "fixed window limit exceeded");
        }
        allowed
    }

    /// Snapshot the stored window state for `key`.
    ///
    /// Counters are not rolled forward by reads: a count from an
    /// already-elapsed window is reported as stored until the next
    /// [`is_allowed`](Self::is_allowed) call resets it.
    pub fn stats(&self, key: &str) -> FixedWindowStats {
        let now = self.clock.now().as_secs_f64();
        let index = (now / self.window.as_secs_f64()) as u64;

        self.states.read(key, |state| {
            let (count, window_start) = match state {
                Some(s) => (s.count, s.window_start),
                None => (0, index),
            };
            FixedWindowStats {
                requests_made: count,
                limit: self.limit,
                remaining: self.limit.saturating_sub(count),
                window_start,
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

impl RateLimiter for FixedWindowLimiter {
    fn is_allowed(&self, key: &str) -> bool {
        FixedWindowLimiter::is_allowed(self, key)
    }

    fn stats(&self, key: &str) -> LimiterStats {
        LimiterStats::FixedWindow(FixedWindowLimiter::stats(self, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn limiter_at(limit: u32, window_secs: u64) -> (FixedWindowLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let limiter =
            FixedWindowLimiter::with_clock(limit, Duration::from_secs(window_secs), clock.clone())
                .unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_first_request_for_unseen_key_is_admitted() {
        let (limiter, _clock) = limiter_at(1, 10);
        assert!(limiter.is_allowed("fresh"));
    }

    #[test]
    fn test_limit_is_enforced_within_a_window() {
        let (limiter, _clock) = limiter_at(5, 10);

        for _ in 0..5 {
            assert!(limiter.is_allowed("user1"));
        }
        assert!(!limiter.is_allowed("user1"));

        let stats = limiter.stats("user1");
        assert_eq!(stats.requests_made, 5);
        assert_eq!(stats.remaining, 0);
    }

    #[test]
    fn test_counter_resets_when_window_advances() {
        let (limiter, clock) = limiter_at(2, 10);

        assert!(limiter.is_allowed("user1"));
        assert!(limiter.is_allowed("user1"));
        assert!(!limiter.is_allowed("user1"));

        clock.advance(Duration::from_secs(10));
        assert!(limiter.is_allowed("user1"));
        assert_eq!(limiter.stats("user1").requests_made, 1);
    }

    #[test]
    fn test_boundary_burst_admits_double_the_limit() {
        // The documented flaw: limit=5/window=10s admits 5 requests at t=9.9
        // and 5 more at t=10.1, 10 within 200ms of wall time.
        let (limiter, clock) = limiter_at(5, 10);

        clock.set(Duration::from_millis(9900));
        for _ in 0..5 {
            assert!(limiter.is_allowed("user1"));
        }

        clock.set(Duration::from_millis(10100));
        for _ in 0..5 {
            assert!(limiter.is_allowed("user1"));
        }
        assert!(!limiter.is_allowed("user1"));
    }

    #[test]
    fn test_idle_gap_resets_only_once() {
        let (limiter, clock) = limiter_at(3, 10);

        assert!(limiter.is_allowed("user1"));

        // Skip several whole windows; the next call lands in window 5 with a
        // fresh counter, with no catch-up accounting for the skipped ones.
        clock.set(Duration::from_secs(50));
        assert!(limiter.is_allowed("user1"));

        let stats = limiter.stats("user1");
        assert_eq!(stats.requests_made, 1);
        assert_eq!(stats.window_start, 5);
    }

    #[test]
    fn test_keys_have_independent_budgets() {
        let (limiter, _clock) = limiter_at(1, 10);

        assert!(limiter.is_allowed("alice"));
        assert!(!limiter.is_allowed("alice"));
        assert!(limiter.is_allowed("bob"));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_rejection_does_not_consume_budget() {
        let (limiter, _clock) = limiter_at(2, 10);

        assert!(limiter.is_allowed("user1"));
        assert!(limiter.is_allowed("user1"));
        for _ in 0..10 {
            assert!(!limiter.is_allowed("user1"));
        }
        assert_eq!(limiter.stats("user1").requests_made, 2);
    }

    #[test]
    fn test_stats_are_idempotent_and_do_not_insert() {
        let (limiter, _clock) = limiter_at(5, 10);

        let first = limiter.stats("nobody");
        let second = limiter.stats("nobody");
        assert_eq!(first, second);
        assert_eq!(first.requests_made, 0);
        assert_eq!(first.remaining, 5);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_zero_limit_is_a_configuration_error() {
        let err = FixedWindowLimiter::new(0, Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, FloodgateError::Config(_)));
    }

    #[test]
    fn test_zero_window_is_a_configuration_error() {
        let err = FixedWindowLimiter::new(5, Duration::ZERO).unwrap_err();
        assert!(matches!(err, FloodgateError::Config(_)));
    }

    #[test]
    fn test_concurrent_callers_never_exceed_the_limit() {
        // Real clock: the window is far longer than the test, so every call
        // lands in window 0 and exactly `limit` admissions may succeed.
        let limiter = Arc::new(FixedWindowLimiter::new(100, Duration::from_secs(3600)).unwrap());
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    for _ in 0..50 {
                        if limiter.is_allowed("shared") {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(admitted.load(Ordering::SeqCst), 100);
    }
}
