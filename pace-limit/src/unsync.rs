use std::cell::Cell;
use std::sync::Arc;

use quanta::Instant;
use tracing::trace;

use crate::Limiter;
use crate::clock::Clock;
use crate::config::Config;
use crate::state::Pacing;
use crate::state::PacingState;

/// A limiter for a single owner, with no synchronization at all.
///
/// The state lives in a [`Cell`], so the limiter can be moved to another thread
/// but never shared between threads.
#[derive(Debug)]
pub struct UnsyncLimiter {
    state: Cell<PacingState>,
    pacing: Pacing,
    clock: Arc<dyn Clock>,
}

impl UnsyncLimiter {
    pub fn new(config: Config) -> Self {
        Self {
            state: Cell::new(PacingState::default()),
            pacing: config.pacing(),
            clock: Arc::clone(config.clock()),
        }
    }
}

impl Limiter for UnsyncLimiter {
    fn take(&self) -> Instant {
        let now = self.clock.now();
        let admission = self.pacing.admit(self.state.get(), now);
        self.state.set(admission.state);

        if !admission.delay.is_zero() {
            trace!(delay = ?admission.delay, "throttling");
            self.clock.sleep(admission.delay);
        }
        admission.authorized(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::Duration;

    use crate::clock::MockClock;
    use crate::config::Builder;

    #[test]
    fn paces_a_single_owner() {
        let clock = MockClock::new();
        let start = clock.now();
        let rl = Builder::new(4)
            .without_slack()
            .with_clock(clock.clone())
            .unsync()
            .unwrap();

        let owner = thread::spawn(move || (0..3).map(|_| rl.take()).collect::<Vec<_>>());
        assert!(clock.wait_for_sleepers(1, Duration::from_secs(5)));
        clock.advance(Duration::from_secs(1));

        let offsets: Vec<_> = owner
            .join()
            .unwrap()
            .into_iter()
            .map(|at| at.duration_since(start))
            .collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(250),
                Duration::from_millis(500)
            ]
        );
    }
}
