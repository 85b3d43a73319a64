use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use quanta::Instant;
use tracing::trace;

use crate::Limiter;
use crate::clock::Clock;
use crate::config::Config;
use crate::state::Pacing;
use crate::state::nanos;

/// Marks a limiter that has not admitted anything yet.
const UNINITIALIZED: i64 = i64::MIN;

/// A lock-free limiter whose whole state is one atomic word.
///
/// # Encoding
///
/// The word holds the *theoretical arrival time*: the last authorized instant
/// plus the current debt, as signed nanoseconds relative to an anchor instant
/// taken when the limiter was built. `i64::MIN` means "no call yet". Time is
/// kept at full nanosecond precision and the encoding covers roughly 292 years
/// either side of the anchor.
///
/// Folding the debt into the instant turns the pacing step into
/// `tat' = max(tat + per_request, now - slack * per_request)`; the call is authorized at
/// `max(tat', now)` and sleeps for `tat' - now` when that is positive.
///
/// The word does not remember the last authorized instant on its own, so each
/// attempt loads the word before reading the clock. Every committed admission
/// was then computed from a reading no earlier than the one before it, and
/// authorized instants never decrease in commit order. Sequential use matches
/// [`AtomicLimiter`](crate::AtomicLimiter) instant for instant.
#[derive(Debug)]
pub struct PackedLimiter {
    /// Theoretical arrival time, padded to its own cache line.
    tat: CachePadded<AtomicI64>,
    pacing: Pacing,
    clock: Arc<dyn Clock>,
    anchor: Instant,
}

impl PackedLimiter {
    pub fn new(config: Config) -> Self {
        let clock = Arc::clone(config.clock());
        let anchor = clock.now();
        Self {
            tat: CachePadded::new(AtomicI64::new(UNINITIALIZED)),
            pacing: config.pacing(),
            clock,
            anchor,
        }
    }

    /// Nanoseconds from the anchor to `instant`.
    #[inline]
    fn offset(&self, instant: Instant) -> i64 {
        match instant.checked_duration_since(self.anchor) {
            Some(after) => nanos(after),
            None => -nanos(self.anchor.duration_since(instant)),
        }
    }

    /// Compute the word that follows `tat` for a call at offset `now`, and the
    /// delay that call must sleep.
    #[inline]
    fn advance(&self, tat: i64, now: i64) -> (i64, i64) {
        if tat == UNINITIALIZED {
            return (now, 0);
        }
        let next = tat
            .saturating_add(self.pacing.per_request)
            .max(now.saturating_add(self.pacing.max_slack));
        (next, next.saturating_sub(now).max(0))
    }
}

impl Limiter for PackedLimiter {
    #[inline]
    fn take(&self) -> Instant {
        let mut attempts = 0u32;
        let (now, delay) = loop {
            attempts += 1;
            // Read the word before the clock: anything committed before the
            // load used an earlier reading, anything after it fails the swap.
            let tat = self.tat.load(Ordering::Acquire);
            let now = self.clock.now();
            let (next, delay) = self.advance(tat, self.offset(now));

            if self
                .tat
                .compare_exchange_weak(tat, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break (now, Duration::from_nanos(delay as u64));
            }
        };

        if attempts > 1 {
            trace!(attempts, "pacing state contended");
        }
        if !delay.is_zero() {
            trace!(?delay, "throttling");
            self.clock.sleep(delay);
        }
        now + delay
    }
}
