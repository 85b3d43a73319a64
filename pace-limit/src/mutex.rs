use std::sync::Arc;

use parking_lot::Mutex;
use quanta::Instant;
use tracing::trace;

use crate::Limiter;
use crate::clock::Clock;
use crate::config::Config;
use crate::state::Pacing;
use crate::state::PacingState;

/// A limiter that serializes every call behind a single mutex.
///
/// The lock is held for the whole call, including the sleep, so at most one
/// caller is ever computing or waiting. Aggregate throughput is exactly the
/// configured rate, at the cost of queueing every other caller on the lock.
#[derive(Debug)]
pub struct MutexLimiter {
    state: Mutex<PacingState>,
    pacing: Pacing,
    clock: Arc<dyn Clock>,
}

impl MutexLimiter {
    pub fn new(config: Config) -> Self {
        Self {
            state: Mutex::new(PacingState::default()),
            pacing: config.pacing(),
            clock: Arc::clone(config.clock()),
        }
    }
}

impl Limiter for MutexLimiter {
    fn take(&self) -> Instant {
        let mut state = self.state.lock();

        let now = self.clock.now();
        let admission = self.pacing.admit(*state, now);
        *state = admission.state;

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
    fn first_take_is_not_throttled() {
        let clock = MockClock::new();
        let rl = Builder::new(1)
            .per(Duration::from_secs(3600))
            .with_clock(clock.clone())
            .mutex()
            .unwrap();

        assert_eq!(rl.take(), clock.now());
        assert_eq!(clock.sleepers(), 0);
    }

    #[test]
    fn only_one_caller_sleeps_at_a_time() {
        let clock = MockClock::new();
        let start = clock.now();
        let rl = Arc::new(
            Builder::new(10)
                .without_slack()
                .with_clock(clock.clone())
                .mutex()
                .unwrap(),
        );
        rl.take();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let rl = Arc::clone(&rl);
                thread::spawn(move || rl.take())
            })
            .collect();

        assert!(clock.wait_for_sleepers(1, Duration::from_secs(5)));
        // The other callers queue on the lock, not on the clock.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.sleepers(), 1);

        clock.advance(Duration::from_secs(1));
        let mut admitted: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        admitted.sort();

        let offsets: Vec<_> = admitted.iter().map(|at| at.duration_since(start)).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300)
            ]
        );
    }
}
