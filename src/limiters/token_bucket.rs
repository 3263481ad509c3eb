//! Token bucket strategy.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use super::keymap::KeyedStates;
use super::{LimiterStats, RateLimiter};
use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

/// A continuously refilling pool of permits, consumed per request.
///
/// Each key's bucket starts full and gains `refill_rate` tokens per second up
/// to `capacity`; a request is admitted when enough tokens are available and
/// deducts them. Unused tokens accumulate, so a key that has been quiet can
/// burst up to `capacity` at once while its sustained rate stays at
/// `refill_rate`.
///
/// Tokens are tracked as real numbers: fractional refill is meaningful and is
/// never truncated.
///
/// # Example
///
/// ```
/// use floodgate::limiters::TokenBucketLimiter;
///
/// # fn main() -> floodgate::error::Result<()> {
/// // 100-token burst headroom, 10 tokens/s sustained.
/// let limiter = TokenBucketLimiter::new(100.0, 10.0)?;
/// assert!(limiter.is_allowed_n("user123:/posts", 20));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_rate: f64,
    clock: Arc<dyn Clock>,
    states: KeyedStates<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: f64,
}

/// Snapshot of one key's bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenBucketStats {
    /// Tokens in the bucket as of the last admission check; reads do not
    /// apply pending refill
    pub available_tokens: f64,
    /// Maximum tokens the bucket can hold
    pub capacity: f64,
    /// Tokens added per second
    pub refill_rate: f64,
    /// When the bucket last refilled
    pub last_refill: Duration,
}

impl TokenBucketLimiter {
    /// Create a limiter whose buckets hold `capacity` tokens and refill at
    /// `refill_rate` tokens per second.
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self> {
        Self::with_clock(capacity, refill_rate, Arc::new(SystemClock::new()))
    }

    /// Like [`new`](Self::new), but reading time from `clock`.
    pub fn with_clock(capacity: f64, refill_rate: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if !(capacity > 0.0) || !capacity.is_finite() {
            return Err(FloodgateError::Config("capacity must be positive".into()));
        }
        if !(refill_rate > 0.0) || !refill_rate.is_finite() {
            return Err(FloodgateError::Config("refill_rate must be positive".into()));
        }
        Ok(Self {
            capacity,
            refill_rate,
            clock,
            states: KeyedStates::new(),
        })
    }

    /// Admit or reject a request for `key` costing one token.
    pub fn is_allowed(&self, key: &str) -> bool {
        self.is_allowed_n(key, 1)
    }

    /// Admit or reject a request for `key` costing `cost` tokens.
    ///
    /// The refill step runs on every call, before the decision and regardless
    /// of its outcome. A `cost` greater than `capacity` can never be
    /// satisfied and is reported as an ordinary rejection, not an error.
    ///
    /// # Panics
    ///
    /// Panics if `cost` is zero.
    pub fn is_allowed_n(&self, key: &str, cost: u32) -> bool {
        assert!(cost > 0, "cost must be a positive number of tokens");
        let now = self.clock.now().as_secs_f64();
        let cost = f64::from(cost);

        let allowed = self.states.update(
            key,
            || BucketState {
                tokens: self.capacity,
                last_refill: now,
            },
            |bucket| {
                let elapsed = now - bucket.last_refill;
                bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
                bucket.last_refill = now;
                if bucket.tokens >= cost {
                    bucket.tokens -= cost;
                    true
                } else {
                    false
                }
            },
        );

        if !allowed {
            trace!(key = %key, cost, "not enough tokens");
        }
        allowed
    }

    /// Snapshot the stored bucket for `key`.
    pub fn stats(&self, key: &str) -> TokenBucketStats {
        let now = self.clock.now();

        self.states.read(key, |bucket| {
            let (tokens, last_refill) = match bucket {
                Some(b) => (b.tokens, Duration::from_secs_f64(b.last_refill)),
                None => (self.capacity, now),
            };
            TokenBucketStats {
                available_tokens: tokens,
                capacity: self.capacity,
                refill_rate: self.refill_rate,
                last_refill,
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

impl RateLimiter for TokenBucketLimiter {
    fn is_allowed(&self, key: &str) -> bool {
        TokenBucketLimiter::is_allowed(self, key)
    }

    fn stats(&self, key: &str) -> LimiterStats {
        LimiterStats::TokenBucket(TokenBucketLimiter::stats(self, key))
    }
}
