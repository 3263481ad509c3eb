//! Floodgate - Per-Key Admission Control
//!
//! This crate implements a family of rate limiting strategies that decide,
//! for a given caller identity, whether a new unit of work may proceed right
//! now. It is the component a service places in front of expensive or
//! abuse-prone operations, such as API calls or login attempts, to bound
//! their rate per key.
//!
//! Five interchangeable strategies cover the usual accuracy/memory/latency
//! trade-offs: fixed window, sliding window log, sliding window counter,
//! token bucket, and leaky bucket. All are thread-safe, synchronous, and
//! advance their time-based state only when called.
//!
//! ```
//! use std::time::Duration;
//! use floodgate::limiters::FixedWindowLimiter;
//!
//! # fn main() -> floodgate::error::Result<()> {
//! // 5 login attempts per 5 minutes, per account.
//! let limiter = FixedWindowLimiter::new(5, Duration::from_secs(300))?;
//! if limiter.is_allowed("login:user456") {
//!     // handle the request
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod limiters;
pub mod policy;
