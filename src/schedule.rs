//! Schedules: recipes for sequences of delays.
//!
//! A [`Schedule`] does not hold an iterator. It holds a factory that builds
//! a fresh one each time [`Schedule::iterate`] runs, so one schedule can
//! drive any number of independent, possibly concurrent, repetitions. The
//! factory is itself an effect and may request abilities, for instance to
//! read a configured interval with `Need`.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use stateless::{Runtime, recurs, spaced};
//! use stateless::error::ErrNil;
//!
//! let schedule = recurs(3, spaced(Duration::from_millis(10)));
//! let deltas = Runtime::new().run(schedule.iterate::<ErrNil>()).unwrap();
//!
//! assert_eq!(deltas.collect::<Vec<_>>(), vec![Duration::from_millis(10); 3]);
//! ```

use crate::effect::Effect;
use crate::error::{ErrNil, ErrorSet};
use std::fmt::{self, Debug, Formatter};
use std::iter;
use std::sync::Arc;
use std::time::Duration;

/// A sequence of delays produced by one iteration of a schedule.
pub type Deltas = Box<dyn Iterator<Item = Duration>>;

type Factory = dyn Fn() -> Effect<ErrNil, Deltas> + Send + Sync;

/// A reusable recipe for a sequence of delays.
#[derive(Clone)]
pub struct Schedule {
    factory: Arc<Factory>,
}

impl Schedule {
    /// A schedule whose delays are produced by the effect `factory` builds.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Effect<ErrNil, Deltas> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }

    /// A schedule over the iterator `factory` returns.
    #[allow(clippy::should_implement_trait)]
    pub fn from_iter<F, I>(factory: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Duration>,
        I::IntoIter: 'static,
    {
        Self::new(move || {
            let deltas: Deltas = Box::new(factory().into_iter());
            Effect::pure(deltas)
        })
    }

    /// Exactly the given delays, in order.
    #[must_use]
    pub fn fixed(deltas: Vec<Duration>) -> Self {
        Self::from_iter(move || deltas.clone())
    }

    /// `interval` forever.
    #[must_use]
    pub fn spaced(interval: Duration) -> Self {
        Self::from_iter(move || iter::repeat(interval))
    }

    /// `base`, then each delay multiplied by `factor`, until a delay no
    /// longer fits in a [`Duration`].
    #[must_use]
    pub fn exponential(base: Duration, factor: f64) -> Self {
        Self::from_iter(move || {
            iter::successors(Some(base), move |previous| {
                Duration::try_from_secs_f64(previous.as_secs_f64() * factor).ok()
            })
        })
    }

    /// Builds a fresh sequence of delays.
    pub fn iterate<E: ErrorSet>(&self) -> Effect<E, Deltas> {
        (self.factory)().widen::<E, ()>()
    }

    /// At most the first `count` delays.
    #[must_use]
    pub fn take(self, count: usize) -> Self {
        self.adapt(move |deltas| Box::new(deltas.take(count)))
    }

    /// Every delay, capped at `max`.
    #[must_use]
    pub fn capped(self, max: Duration) -> Self {
        self.adapt(move |deltas| Box::new(deltas.map(move |delta| delta.min(max))))
    }

    fn adapt<F>(self, adaptor: F) -> Self
    where
        F: Fn(Deltas) -> Deltas + Copy + Send + Sync + 'static,
    {
        let inner = self.factory;
        Self::new(move || inner().fmap(adaptor))
    }
}

impl Debug for Schedule {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("Schedule").finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(Schedule: Send, Sync, Clone);

/// `interval` forever.
#[must_use]
pub fn spaced(interval: Duration) -> Schedule {
    Schedule::spaced(interval)
}

/// The first `count` delays of `schedule`.
#[must_use]
pub fn recurs(count: usize, schedule: Schedule) -> Schedule {
    schedule.take(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;
    use crate::ability::Need;
    use crate::need;
    use rstest::rstest;

    fn deltas(schedule: &Schedule) -> Vec<Duration> {
        Runtime::new().run(schedule.iterate::<ErrNil>()).unwrap().collect()
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[rstest]
    #[case(recurs(0, spaced(ms(5))), vec![])]
    #[case(recurs(2, spaced(ms(5))), vec![ms(5), ms(5)])]
    #[case(Schedule::fixed(vec![ms(1), ms(2)]), vec![ms(1), ms(2)])]
    #[case(Schedule::exponential(ms(10), 2.0).take(4), vec![ms(10), ms(20), ms(40), ms(80)])]
    #[case(Schedule::exponential(ms(10), 3.0).capped(ms(50)).take(3), vec![ms(10), ms(30), ms(50)])]
    fn schedules_produce_their_delays(#[case] schedule: Schedule, #[case] expected: Vec<Duration>) {
        assert_eq!(deltas(&schedule), expected);
    }

    #[rstest]
    fn every_iteration_starts_afresh() {
        let schedule = Schedule::fixed(vec![ms(1), ms(2), ms(3)]);
        let mut first = Runtime::new().run(schedule.iterate::<ErrNil>()).unwrap();
        assert_eq!(first.next(), Some(ms(1)));
        assert_eq!(deltas(&schedule), vec![ms(1), ms(2), ms(3)]);
        assert_eq!(first.next(), Some(ms(2)));
    }

    #[rstest]
    fn exponential_ends_when_delays_overflow() {
        let schedule = Schedule::exponential(Duration::from_secs(u64::MAX / 4), 2.0);
        assert!(deltas(&schedule).len() <= 3);
    }

    #[rstest]
    fn factories_may_request_abilities() {
        let schedule = Schedule::new(|| {
            need::<Duration, ErrNil>().fmap(|interval| Box::new(iter::repeat(interval).take(2)) as Deltas)
        });
        let runtime = Runtime::new().supply(ms(7));
        assert!(runtime.handlers().handles::<Need<Duration>>());
        let produced: Vec<_> = runtime.run(schedule.iterate::<ErrNil>()).unwrap().collect();
        assert_eq!(produced, vec![ms(7), ms(7)]);
    }
}
