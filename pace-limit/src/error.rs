use std::time::Duration;

/// Reasons a limiter could not be constructed.
///
/// These are the only failures the crate produces: once built, a limiter's
/// [`take`](crate::Limiter::take) always completes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The rate must admit at least one call per window.
    #[error("rate must be greater than zero")]
    ZeroRate,

    /// The window must be a positive duration.
    #[error("window must be greater than zero")]
    ZeroWindow,

    /// The window divided by the rate rounds down to less than a nanosecond,
    /// which would make the limiter admit everything.
    #[error("a window of {window:?} is too short to pace {rate} calls")]
    IntervalTooShort {
        /// The configured rate.
        rate: u64,
        /// The configured window.
        window: Duration,
    },

    /// The window divided by the rate is too long to be counted in signed
    /// nanoseconds.
    #[error("a window of {window:?} is too long to pace {rate} calls")]
    IntervalTooLong {
        /// The configured rate.
        rate: u64,
        /// The configured window.
        window: Duration,
    },

    /// The burst allowance does not fit the limiter's nanosecond bookkeeping.
    #[error("a slack of {slack} calls of {per_request:?} each is too large")]
    SlackOverflow {
        /// The configured slack, in calls.
        slack: u32,
        /// The interval between calls.
        per_request: Duration,
    },
}
