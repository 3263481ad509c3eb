//! Admission policy configuration and the scope registry.
//!
//! This module wires named call sites ("scopes": a login endpoint, an API
//! route) to configured limiter strategies. Policies load from YAML:
//!
//! ```yaml
//! scopes:
//!   login:
//!     strategy: fixed_window
//!     limit: 5
//!     window_secs: 300
//!   api:
//!     strategy: token_bucket
//!     capacity: 100
//!     refill_rate: 10
//! ```
//!
//! A [`Registry`] built from such a config holds one limiter per scope and
//! routes each `(scope, identity)` pair through the scope's limiter.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};
use crate::limiters::{
    FixedWindowLimiter, LeakyBucketLimiter, LimiterStats, RateLimiter,
    SlidingWindowCounterLimiter, SlidingWindowLogLimiter, TokenBucketLimiter,
};

/// Strategy choice and parameters for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyPolicy {
    FixedWindow { limit: u32, window_secs: f64 },
    SlidingWindowLog { limit: u32, window_secs: f64 },
    SlidingWindowCounter { limit: u32, window_secs: f64 },
    TokenBucket { capacity: f64, refill_rate: f64 },
    LeakyBucket { capacity: usize, leak_rate: f64 },
}

impl StrategyPolicy {
    /// Build the configured limiter with the default system clock.
    pub fn build(&self) -> Result<Box<dyn RateLimiter>> {
        self.build_with_clock(Arc::new(SystemClock::new()))
    }

    /// Build the configured limiter reading time from `clock`.
    pub fn build_with_clock(&self, clock: Arc<dyn Clock>) -> Result<Box<dyn RateLimiter>> {
        match *self {
            StrategyPolicy::FixedWindow { limit, window_secs } => Ok(Box::new(
                FixedWindowLimiter::with_clock(limit, window_duration(window_secs)?, clock)?,
            )),
            StrategyPolicy::SlidingWindowLog { limit, window_secs } => Ok(Box::new(
                SlidingWindowLogLimiter::with_clock(limit, window_duration(window_secs)?, clock)?,
            )),
            StrategyPolicy::SlidingWindowCounter { limit, window_secs } => {
                Ok(Box::new(SlidingWindowCounterLimiter::with_clock(
                    limit,
                    window_duration(window_secs)?,
                    clock,
                )?))
            }
            StrategyPolicy::TokenBucket {
                capacity,
                refill_rate,
            } => Ok(Box::new(TokenBucketLimiter::with_clock(
                capacity,
                refill_rate,
                clock,
            )?)),
            StrategyPolicy::LeakyBucket {
                capacity,
                leak_rate,
            } => Ok(Box::new(LeakyBucketLimiter::with_clock(
                capacity, leak_rate, clock,
            )?)),
        }
    }
}

fn window_duration(window_secs: f64) -> Result<Duration> {
    if !(window_secs > 0.0) || !window_secs.is_finite() {
        return Err(FloodgateError::Config(format!(
            "window_secs must be positive, got {}",
            window_secs
        )));
    }
    Ok(Duration::from_secs_f64(window_secs))
}

/// A complete admission policy: one strategy per scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Map of scope name to its strategy policy
    #[serde(default)]
    pub scopes: HashMap<String, StrategyPolicy>,
}

impl PolicyConfig {
    /// Create an empty policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a policy from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading admission policy");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a policy from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse policy config: {}", e)))
    }

    /// Get the policy for a specific scope.
    pub fn get_scope(&self, scope: &str) -> Option<&StrategyPolicy> {
        self.scopes.get(scope)
    }
}

/// One built limiter per configured scope.
///
/// Identities within a scope share that scope's limiter, so their budgets
/// are tracked independently per identity but judged under the same policy.
#[derive(Debug)]
pub struct Registry {
    limiters: HashMap<String, Box<dyn RateLimiter>>,
}

impl Registry {
    /// Build limiters for every scope in `config`.
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        Self::from_config_with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Like [`from_config`](Self::from_config), with every limiter reading
    /// time from the same `clock`.
    pub fn from_config_with_clock(config: &PolicyConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut limiters = HashMap::new();
        for (scope, policy) in &config.scopes {
            debug!(scope = %scope, policy = ?policy, "Building limiter for scope");
            limiters.insert(scope.clone(), policy.build_with_clock(clock.clone())?);
        }
        Ok(Self { limiters })
    }

    /// Admit or reject a request from `identity` against `scope`'s policy.
    ///
    /// A scope with no configured policy admits everything.
    pub fn check(&self, scope: &str, identity: &str) -> bool {
        match self.limiters.get(scope) {
            Some(limiter) => limiter.is_allowed(identity),
            None => {
                trace!(scope = %scope, "No policy for scope, admitting");
                true
            }
        }
    }

    /// Snapshot `identity`'s state under `scope`, if the scope is configured.
    pub fn stats(&self, scope: &str, identity: &str) -> Option<LimiterStats> {
        self.limiters.get(scope).map(|l| l.stats(identity))
    }

    /// Number of configured scopes.
    pub fn scope_count(&self) -> usize {
        self.limiters.len()
    }
}
