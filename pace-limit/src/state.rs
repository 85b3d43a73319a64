use std::time::Duration;

use quanta::Instant;

/// The mutable record every strategy reads and commits.
///
/// `last` is the instant the most recent call was authorized to proceed, `None`
/// until the first call. `debt` is signed scheduling slack in nanoseconds:
/// negative values are banked burst credit, positive values are owed delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PacingState {
    pub(crate) last: Option<Instant>,
    pub(crate) debt: i64,
}

/// The outcome of one admission: the state to commit and how long the caller
/// must sleep before proceeding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Admission {
    pub(crate) state: PacingState,
    pub(crate) delay: Duration,
}

impl Admission {
    /// The instant this call is authorized to proceed.
    #[inline]
    pub(crate) fn authorized(&self, now: Instant) -> Instant {
        self.state.last.unwrap_or(now)
    }
}

/// Fixed parameters of the pacing algorithm, derived from a validated config.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Pacing {
    /// Ideal spacing between admissions, in nanoseconds. Always positive.
    pub(crate) per_request: i64,
    /// Lower bound for debt, in nanoseconds. Always zero or negative.
    pub(crate) max_slack: i64,
}

impl Pacing {
    /// Compute the state that follows `state` for a call arriving at `now`.
    ///
    /// The debt grows by `per_request` for every admission and shrinks by the
    /// time elapsed since the last one. It never drops below `max_slack`, and a
    /// positive debt is paid in full by sleeping, so it is reset to zero.
    ///
    /// If `now` predates `state.last` (another caller's admission is already
    /// scheduled ahead of us) it is raised to `state.last`, which keeps the
    /// committed `last` from moving backwards. The delay is always measured from
    /// the real `now` to the newly authorized instant.
    #[inline]
    pub(crate) fn admit(&self, state: PacingState, now: Instant) -> Admission {
        let Some(last) = state.last else {
            return Admission {
                state: PacingState {
                    last: Some(now),
                    debt: 0,
                },
                delay: Duration::ZERO,
            };
        };

        let arrival = now.max(last);
        let elapsed = nanos(arrival.duration_since(last));
        let debt = state
            .debt
            .saturating_add(self.per_request)
            .saturating_sub(elapsed)
            .max(self.max_slack);

        let next = if debt > 0 {
            PacingState {
                last: Some(arrival + Duration::from_nanos(debt as u64)),
                debt: 0,
            }
        } else {
            PacingState {
                last: Some(arrival),
                debt,
            }
        };

        Admission {
            state: next,
            delay: next.last.map_or(Duration::ZERO, |at| at.duration_since(now)),
        }
    }
}

/// Saturating conversion of a duration to signed nanoseconds.
#[inline]
pub(crate) fn nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}
