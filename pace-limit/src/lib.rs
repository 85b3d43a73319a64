//! # pace-limit
//!
//! `pace-limit` paces callers so that their long-run admission rate does not
//! exceed a target, while tolerating a bounded burst after idle periods.
//!
//! ## Core Philosophy
//!
//! Rather than rejecting excess calls, a limiter *delays* them: every call to
//! [`Limiter::take`] blocks until the caller may proceed and returns the instant
//! it was authorized. The pacing is a leaky bucket: each admission adds one
//! interval (`window / rate`) of debt, elapsed time pays it back, and a positive
//! debt is slept off. Idle time may bank up to `slack` intervals of credit, which
//! later callers spend as a burst.
//!
//! ## Key Concepts
//!
//! * **One algorithm, several disciplines**: [`MutexLimiter`], [`AtomicLimiter`]
//!   and [`PackedLimiter`] implement the same pacing with a lock, an atomic
//!   snapshot swap, and a single packed atomic word respectively.
//! * **Sleep outside the hot path**: the lock-free limiters commit their state
//!   first and sleep afterwards, so waiting callers do not hold anyone up.
//! * **Pluggable time**: all reading of the clock and all sleeping goes through
//!   a [`Clock`], so tests can drive a [`MockClock`] instead of waiting.
//! * **No runtime failures**: only construction can fail, with a [`ConfigError`].
//!
//! ## Example
//!
//! ```rust
//! use pace_limit::Limiter;
//!
//! let limiter = pace_limit::builder(100).without_slack().atomic().unwrap();
//!
//! let mut previous = limiter.take();
//! for _ in 0..3 {
//!     let now = limiter.take();
//!     assert!(now.duration_since(previous) >= std::time::Duration::from_millis(10));
//!     previous = now;
//! }
//! ```

use std::fmt::Debug;

mod atomic;
pub mod clock;
mod config;
mod error;
mod mutex;
mod packed;
mod state;
mod unlimited;
mod unsync;


pub use atomic::AtomicLimiter;
pub use clock::Clock;
pub use clock::MockClock;
pub use clock::SystemClock;
pub use config::Builder;
pub use config::Config;
pub use config::DEFAULT_SLACK;
pub use config::DEFAULT_WINDOW;
pub use config::Strategy;
pub use error::ConfigError;
pub use mutex::MutexLimiter;
pub use packed::PackedLimiter;
pub use quanta::Instant;
pub use unlimited::Unlimited;
pub use unsync::UnsyncLimiter;

/// The single operation every pacing strategy provides.
///
/// Shared limiters are `Send + Sync` and are meant to be shared via `Arc`.
pub trait Limiter: Debug {
    /// Block until the caller may proceed, and return the instant the call
    /// was authorized.
    ///
    /// The first call on a fresh limiter never blocks.
    fn take(&self) -> Instant;
}

/// A limiter admitting `rate` calls per second with the default slack, using
/// the [`AtomicLimiter`] strategy.
pub fn new(rate: u64) -> Result<AtomicLimiter, ConfigError> {
    builder(rate).atomic()
}

/// Start configuring a limiter admitting `rate` calls per window.
pub fn builder(rate: u64) -> Builder {
    Builder::new(rate)
}

/// A limiter that never throttles.
pub fn unlimited() -> Unlimited {
    Unlimited::new()
}
