use quanta::Instant;

use crate::Limiter;

/// A limiter that never throttles.
///
/// Useful to switch pacing off without touching call sites.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unlimited;

impl Unlimited {
    pub fn new() -> Self {
        Self
    }
}

impl Limiter for Unlimited {
    #[inline]
    fn take(&self) -> Instant {
        Instant::now()
    }
}
