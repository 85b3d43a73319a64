use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_utils::CachePadded;
use quanta::Instant;
use tracing::trace;

use crate::Limiter;
use crate::clock::Clock;
use crate::config::Config;
use crate::state::Pacing;
use crate::state::PacingState;

/// A lock-free limiter that swaps immutable state snapshots.
///
/// Each call computes the next state from the snapshot it loaded and publishes
/// it with a compare-and-swap. A caller that loses the race starts over with a
/// fresh reading of the clock. Winners sleep after publishing, so other callers
/// keep making progress while earlier ones wait out their delay.
///
/// A caller that keeps losing the race keeps retrying; there is no fallback to
/// a lock.
#[derive(Debug)]
pub struct AtomicLimiter {
    /// Padded to its own cache line so neighbouring data does not contend with it.
    state: CachePadded<ArcSwap<PacingState>>,
    pacing: Pacing,
    clock: Arc<dyn Clock>,
}

impl AtomicLimiter {
    pub fn new(config: Config) -> Self {
        Self {
            state: CachePadded::new(ArcSwap::from_pointee(PacingState::default())),
            pacing: config.pacing(),
            clock: Arc::clone(config.clock()),
        }
    }
}

impl Limiter for AtomicLimiter {
    #[inline]
    fn take(&self) -> Instant {
        let mut attempts = 0u32;
        let (admission, now) = loop {
            attempts += 1;
            let now = self.clock.now();
            let current = self.state.load();
            let admission = self.pacing.admit(**current, now);

            let previous = self
                .state
                .compare_and_swap(&current, Arc::new(admission.state));
            if Arc::ptr_eq(&previous, &current) {
                break (admission, now);
            }
        };

        if attempts > 1 {
            trace!(attempts, "pacing state contended");
        }
        if !admission.delay.is_zero() {
            trace!(delay = ?admission.delay, "throttling");
            self.clock.sleep(admission.delay);
        }
        admission.authorized(now)
    }
}
