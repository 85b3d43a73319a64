use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::AtomicLimiter;
use crate::Limiter;
use crate::MutexLimiter;
use crate::PackedLimiter;
use crate::UnsyncLimiter;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::error::ConfigError;
use crate::state::Pacing;

/// Default burst allowance, in calls.
pub const DEFAULT_SLACK: u32 = 10;

/// Default window the rate is measured over.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// The concurrency discipline a limiter uses to update its state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// A mutex held for the whole call, sleep included. See [`MutexLimiter`].
    Mutex,
    /// Compare-and-swap of an immutable state snapshot. See [`AtomicLimiter`].
    #[default]
    Atomic,
    /// Compare-and-swap of a single packed word. See [`PackedLimiter`].
    Packed,
}

/// Collects limiter options.
///
/// Options are applied in call order onto the defaults (one second window,
/// slack of [`DEFAULT_SLACK`], the system clock); a later option overrides an
/// earlier one. Nothing is validated until the builder is finished.
///
/// ```rust
/// use std::time::Duration;
///
/// // Two calls per minute, no bursts.
/// let limiter = pace_limit::builder(2)
///     .per(Duration::from_secs(60))
///     .without_slack()
///     .atomic()
///     .unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct Builder {
    rate: u64,
    window: Duration,
    slack: u32,
    clock: Option<Arc<dyn Clock>>,
}

impl Builder {
    pub fn new(rate: u64) -> Self {
        Self {
            rate,
            window: DEFAULT_WINDOW,
            slack: DEFAULT_SLACK,
            clock: None,
        }
    }

    /// Measure the rate over `window` instead of one second.
    pub fn per(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Allow up to `slack` calls of banked credit after an idle period.
    pub fn with_slack(mut self, slack: u32) -> Self {
        self.slack = slack;
        self
    }

    /// Never bank credit: every call is spaced from the previous one.
    pub fn without_slack(self) -> Self {
        self.with_slack(0)
    }

    /// Read time and sleep through `clock` instead of the system clock.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Like [`Builder::with_clock`], for a clock that is already shared.
    pub fn with_shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the options.
    pub fn config(self) -> Result<Config, ConfigError> {
        if self.rate == 0 {
            return Err(ConfigError::ZeroRate);
        }
        if self.window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }

        let per_request = i64::try_from(self.window.as_nanos() / u128::from(self.rate))
            .map_err(|_| ConfigError::IntervalTooLong {
                rate: self.rate,
                window: self.window,
            })?;
        if per_request == 0 {
            return Err(ConfigError::IntervalTooShort {
                rate: self.rate,
                window: self.window,
            });
        }

        let max_slack = per_request
            .checked_mul(i64::from(self.slack))
            .map(|slack| -slack)
            .ok_or(ConfigError::SlackOverflow {
                slack: self.slack,
                per_request: Duration::from_nanos(per_request as u64),
            })?;

        let config = Config {
            rate: self.rate,
            window: self.window,
            slack: self.slack,
            pacing: Pacing {
                per_request,
                max_slack,
            },
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::new())),
        };
        debug!(
            rate = config.rate,
            window = ?config.window,
            slack = config.slack,
            per_request = ?config.per_request(),
            "limiter configured"
        );
        Ok(config)
    }

    /// Build a [`MutexLimiter`].
    pub fn mutex(self) -> Result<MutexLimiter, ConfigError> {
        self.config().map(MutexLimiter::new)
    }

    /// Build an [`AtomicLimiter`].
    pub fn atomic(self) -> Result<AtomicLimiter, ConfigError> {
        self.config().map(AtomicLimiter::new)
    }

    /// Build a [`PackedLimiter`].
    pub fn packed(self) -> Result<PackedLimiter, ConfigError> {
        self.config().map(PackedLimiter::new)
    }

    /// Build an [`UnsyncLimiter`].
    pub fn unsync(self) -> Result<UnsyncLimiter, ConfigError> {
        self.config().map(UnsyncLimiter::new)
    }

    /// Build a shareable limiter using `strategy`, chosen at runtime.
    pub fn build(self, strategy: Strategy) -> Result<Box<dyn Limiter + Send + Sync>, ConfigError> {
        let config = self.config()?;
        Ok(match strategy {
            Strategy::Mutex => Box::new(MutexLimiter::new(config)),
            Strategy::Atomic => Box::new(AtomicLimiter::new(config)),
            Strategy::Packed => Box::new(PackedLimiter::new(config)),
        })
    }
}

/// Validated, immutable limiter parameters.
#[derive(Clone, Debug)]
pub struct Config {
    rate: u64,
    window: Duration,
    slack: u32,
    pacing: Pacing,
    clock: Arc<dyn Clock>,
}

impl Config {
    pub fn builder(rate: u64) -> Builder {
        Builder::new(rate)
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn slack(&self) -> u32 {
        self.slack
    }

    /// The ideal spacing between admissions, `window / rate`, truncated to
    /// whole nanoseconds.
    pub fn per_request(&self) -> Duration {
        Duration::from_nanos(self.pacing.per_request as u64)
    }

    /// The most burst credit the limiter will bank, `slack * per_request`.
    ///
    /// Internally this is the (non-positive) lower bound of the debt.
    pub fn max_slack(&self) -> Duration {
        Duration::from_nanos(self.pacing.max_slack.unsigned_abs())
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn pacing(&self) -> Pacing {
        self.pacing
    }
}
