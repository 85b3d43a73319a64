//! Time sources consumed by the limiters.
//!
//! Every limiter reads the time and suspends the calling thread exclusively
//! through a [`Clock`]. [`SystemClock`] is the real thing; [`MockClock`] only
//! moves when told to, which makes admission counts at given virtual instants
//! exactly reproducible in tests.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Condvar;
use parking_lot::Mutex;
use quanta::Instant;
use quanta::Mock;

/// How long [`MockClock::advance`] waits, in real time, for a released sleeper
/// to come back to rest before moving on without it.
const SETTLE: Duration = Duration::from_millis(50);

/// The time capability a limiter is built with.
pub trait Clock: Debug + Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;

    /// Block the calling thread for at least `duration`.
    ///
    /// A zero duration returns immediately.
    fn sleep(&self, duration: Duration);
}

/// Wall clock time, read through a `quanta` clock.
#[derive(Clone, Debug)]
pub struct SystemClock {
    clock: quanta::Clock,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            clock: quanta::Clock::new(),
        }
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        self.clock.now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// A virtual clock that only moves forward through [`MockClock::advance`].
///
/// Cloning yields another handle onto the same virtual time, so a test can keep
/// one handle while a limiter owns another. Virtual time starts at zero.
#[derive(Clone, Debug)]
pub struct MockClock {
    inner: Arc<MockInner>,
    /// Set on handles made by [`MockClock::serialized`].
    lane: Option<u64>,
}

struct MockInner {
    clock: quanta::Clock,
    mock: Arc<Mock>,
    timers: Mutex<Timers>,
    changed: Condvar,
}

impl Debug for MockInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockInner")
            .field("now", &self.clock.now())
            .field("sleepers", &self.timers.lock().pending.len())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Timers {
    /// Suspended sleepers keyed by (deadline, registration order), with the
    /// lane of the handle they slept on.
    pending: BTreeMap<(Instant, u64), Option<u64>>,
    next_id: u64,
    next_lane: u64,
}

impl Timers {
    /// Sleepers that count towards recovery after releasing one from `lane`:
    /// the whole clock for plain handles, the lane itself otherwise.
    fn resting(&self, lane: Option<u64>) -> usize {
        match lane {
            None => self.pending.len(),
            Some(_) => self.pending.values().filter(|l| **l == lane).count(),
        }
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    pub fn new() -> Self {
        let (clock, mock) = quanta::Clock::mock();
        Self {
            inner: Arc::new(MockInner {
                clock,
                mock,
                timers: Mutex::new(Timers::default()),
                changed: Condvar::new(),
            }),
            lane: None,
        }
    }

    /// Another handle onto the same virtual time, for a limiter that queues
    /// its callers behind a lock, such as [`MutexLimiter`](crate::MutexLimiter).
    ///
    /// Releasing a sleeper hands the lock to the next queued caller, which the
    /// clock cannot see until that caller sleeps in turn. When a sleeper on
    /// this handle is released, [`MockClock::advance`] waits for this handle to
    /// have as many sleepers as before, rather than the clock as a whole. Give
    /// each such limiter its own handle.
    pub fn serialized(&self) -> Self {
        let mut timers = self.inner.timers.lock();
        timers.next_lane += 1;
        Self {
            inner: Arc::clone(&self.inner),
            lane: Some(timers.next_lane),
        }
    }

    /// Move virtual time forward by `duration`.
    ///
    /// Sleepers whose deadline falls inside the interval are released one at a
    /// time in deadline order, with virtual time set to that deadline. After
    /// each release the clock waits for the number of suspended sleepers to
    /// recover, i.e. for the released thread (or one it unblocked) to sleep
    /// again, before releasing the next one. For a sleeper on a
    /// [`serialized`](MockClock::serialized) handle only sleepers on that
    /// handle count. A released thread that never sleeps again is given a
    /// short real-time grace period.
    pub fn advance(&self, duration: Duration) {
        let inner = &self.inner;
        let mut timers = inner.timers.lock();
        let target = inner.clock.now() + duration;

        while let Some((&(deadline, id), &lane)) = timers.pending.first_key_value() {
            if deadline > target {
                break;
            }
            let resting = timers.resting(lane);
            timers.pending.remove(&(deadline, id));
            self.move_to(deadline);
            inner.changed.notify_all();

            let give_up = std::time::Instant::now() + SETTLE;
            while timers.resting(lane) < resting {
                if inner.changed.wait_until(&mut timers, give_up).timed_out() {
                    break;
                }
            }
        }
        self.move_to(target);
    }

    /// Number of threads currently suspended in [`Clock::sleep`].
    pub fn sleepers(&self) -> usize {
        self.inner.timers.lock().pending.len()
    }

    /// Block until at least `count` threads are suspended in
    /// [`Clock::sleep`], or until `timeout` of real time has passed.
    ///
    /// Returns whether the count was reached.
    pub fn wait_for_sleepers(&self, count: usize, timeout: Duration) -> bool {
        let give_up = std::time::Instant::now() + timeout;
        let mut timers = self.inner.timers.lock();
        while timers.pending.len() < count {
            if self
                .inner
                .changed
                .wait_until(&mut timers, give_up)
                .timed_out()
            {
                return timers.pending.len() >= count;
            }
        }
        true
    }

    // Callers hold the timers lock.
    fn move_to(&self, instant: Instant) {
        let now = self.inner.clock.now();
        if instant > now {
            self.inner.mock.increment(instant.duration_since(now));
        }
    }
}

impl Clock for MockClock {
    #[inline]
    fn now(&self) -> Instant {
        self.inner.clock.now()
    }

    fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let inner = &self.inner;
        let mut timers = inner.timers.lock();
        let key = (inner.clock.now() + duration, timers.next_id);
        timers.next_id += 1;
        timers.pending.insert(key, self.lane);
        inner.changed.notify_all();

        while timers.pending.contains_key(&key) {
            inner.changed.wait(&mut timers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn system_clock_sleeps_at_least_the_duration() {
        let clock = SystemClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(20));
        assert!(clock.now().duration_since(start) >= Duration::from_millis(20));
    }

    #[test]
    fn mock_clock_only_moves_when_advanced() {
        let clock = MockClock::new();
        let start = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now().duration_since(start), Duration::from_millis(250));
    }

    #[test]
    fn mock_clock_zero_sleep_does_not_block() {
        let clock = MockClock::new();
        clock.sleep(Duration::ZERO);
        assert_eq!(clock.sleepers(), 0);
    }

    #[test]
    fn mock_clock_releases_sleepers_in_deadline_order() {
        let clock = MockClock::new();
        let start = clock.now();
        let (tx, rx) = mpsc::channel();

        let mut handles = vec![];
        for millis in [30u64, 10, 20] {
            let clock = clock.clone();
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                clock.sleep(Duration::from_millis(millis));
                tx.send((millis, clock.now())).unwrap();
            }));
        }
        drop(tx);

        assert!(clock.wait_for_sleepers(3, Duration::from_secs(5)));
        clock.advance(Duration::from_millis(25));
        assert_eq!(clock.sleepers(), 1);
        assert_eq!(clock.now().duration_since(start), Duration::from_millis(25));

        clock.advance(Duration::from_millis(25));
        for handle in handles {
            handle.join().unwrap();
        }

        let woken: Vec<_> = rx.iter().collect();
        let order: Vec<u64> = woken.iter().map(|(millis, _)| *millis).collect();
        assert_eq!(order, vec![10, 20, 30]);
        // Each sleeper observes the virtual time of its own deadline.
        for (millis, at) in woken {
            assert_eq!(at.duration_since(start), Duration::from_millis(millis));
        }
    }

    #[test]
    fn mock_clock_follows_a_sleeper_that_sleeps_again() {
        let clock = MockClock::new();
        let start = clock.now();

        let sleeper = {
            let clock = clock.clone();
            thread::spawn(move || {
                let mut seen = vec![];
                for _ in 0..5 {
                    clock.sleep(Duration::from_millis(10));
                    seen.push(clock.now().duration_since(start));
                }
                seen
            })
        };

        assert!(clock.wait_for_sleepers(1, Duration::from_secs(5)));
        clock.advance(Duration::from_millis(100));

        let seen = sleeper.join().unwrap();
        let expected: Vec<_> = (1..=5).map(|n| Duration::from_millis(10 * n)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn serialized_handle_waits_for_the_next_caller_in_the_queue() {
        let clock = MockClock::new();
        let serial = clock.serialized();
        let start = clock.now();
        let turn = Arc::new(Mutex::new(()));

        // The first caller holds the turn across a short sleep, then goes on
        // to sleep for a long time elsewhere on the clock.
        let first = {
            let (clock, serial, turn) = (clock.clone(), serial.clone(), Arc::clone(&turn));
            thread::spawn(move || {
                let guard = turn.lock();
                serial.sleep(Duration::from_millis(10));
                drop(guard);
                clock.sleep(Duration::from_secs(1));
            })
        };
        assert!(clock.wait_for_sleepers(1, Duration::from_secs(5)));

        let second = {
            let (serial, turn) = (serial.clone(), Arc::clone(&turn));
            thread::spawn(move || {
                let _guard = turn.lock();
                let at = serial.now();
                serial.sleep(Duration::from_millis(10));
                at
            })
        };

        // The first caller sleeping again elsewhere must not let time run past
        // the instant the second one takes its turn.
        clock.advance(Duration::from_millis(500));
        assert_eq!(
            second.join().unwrap().duration_since(start),
            Duration::from_millis(10)
        );

        clock.advance(Duration::from_secs(1));
        first.join().unwrap();
        assert_eq!(clock.sleepers(), 0);
    }

    #[test]
    fn serialized_handles_share_virtual_time() {
        let clock = MockClock::new();
        let serial = clock.serialized();
        clock.advance(Duration::from_millis(5));
        assert_eq!(serial.now(), clock.now());
        assert_ne!(serial.lane, clock.serialized().lane);
    }

    #[test]
    fn wait_for_sleepers_gives_up() {
        let clock = MockClock::new();
        assert!(!clock.wait_for_sleepers(1, Duration::from_millis(10)));
    }
}
