//! Repetition and retrying of effects along a [`Schedule`].
//!
//! Both combinators take a function that builds the effect and return a new
//! function. Every call of the returned function iterates the schedule
//! afresh and builds new effects, so it can be run any number of times.
//! Delays are waited with the [`Sleep`](crate::ability::Sleep) ability.

use crate::ability::sleep;
use crate::effect::Effect;
use crate::error::ErrorSet;
use crate::schedule::{Deltas, Schedule};
use std::rc::Rc;
use tracing::{debug, warn};

/// Runs the effect, then once more after each delay of `schedule`,
/// collecting every result in order.
///
/// The first recoverable error stops the repetition and propagates;
/// results collected so far are discarded.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use stateless::{Effect, Runtime, handler_fn, recurs, repeat, spaced};
/// use stateless::ability::Sleep;
/// use stateless::error::ErrNil;
///
/// let ping = repeat(recurs(2, spaced(Duration::from_secs(1))), || {
///     Effect::<ErrNil, &str>::pure("pong")
/// });
///
/// // Answer `Sleep` without sleeping.
/// let runtime = Runtime::new().with_handler(handler_fn(|_: Sleep| ()));
/// assert_eq!(runtime.run(ping()).unwrap(), vec!["pong"; 3]);
/// ```
pub fn repeat<E, R, F>(schedule: Schedule, function: F) -> impl Fn() -> Effect<E, Vec<R>>
where
    E: ErrorSet,
    R: 'static,
    F: Fn() -> Effect<E, R> + 'static,
{
    let function = Rc::new(function);
    move || {
        let function = Rc::clone(&function);
        schedule.iterate::<E>().flat_map(move |deltas| {
            let first = Rc::clone(&function);
            (*first)().flat_map(move |result| repeat_step(deltas, function, vec![result]))
        })
    }
}

fn repeat_step<E, R, F>(mut deltas: Deltas, function: Rc<F>, mut results: Vec<R>) -> Effect<E, Vec<R>>
where
    E: ErrorSet,
    R: 'static,
    F: Fn() -> Effect<E, R> + 'static,
{
    let Some(delay) = deltas.next() else {
        debug!(repetitions = results.len(), "schedule exhausted");
        return Effect::pure(results);
    };
    debug!(repetition = results.len(), ?delay, "repeating after delay");
    sleep::<E>(delay).flat_map(move |()| {
        (*function)().flat_map(move |result| {
            results.push(result);
            repeat_step(deltas, function, results)
        })
    })
}

/// Runs the effect until it succeeds, waiting the next delay of `schedule`
/// after each recoverable error.
///
/// Once the schedule is exhausted, the last error propagates.
///
/// # Examples
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
/// use stateless::{Effect, Runtime, errors, handler_fn, recurs, retry, spaced};
/// use stateless::ability::Sleep;
///
/// #[derive(Debug)]
/// struct Flaky;
///
/// let attempts = Rc::new(Cell::new(0));
/// let counter = Rc::clone(&attempts);
/// let connect = retry(recurs(5, spaced(Duration::from_secs(1))), move || {
///     let counter = Rc::clone(&counter);
///     Effect::<errors![Flaky], u32>::lazy(move || {
///         counter.set(counter.get() + 1);
///         if counter.get() < 3 { Effect::fail(Flaky) } else { Effect::pure(counter.get()) }
///     })
/// });
///
/// let runtime = Runtime::new().with_handler(handler_fn(|_: Sleep| ()));
/// assert_eq!(runtime.run(connect()).unwrap(), 3);
/// assert_eq!(attempts.get(), 3);
/// ```
pub fn retry<E, R, F>(schedule: Schedule, function: F) -> impl Fn() -> Effect<E, R>
where
    E: ErrorSet,
    R: 'static,
    F: Fn() -> Effect<E, R> + 'static,
{
    let function = Rc::new(function);
    move || {
        let function = Rc::clone(&function);
        schedule
            .iterate::<E>()
            .flat_map(move |deltas| retry_step(deltas, function, 1))
    }
}

fn retry_step<E, R, F>(mut deltas: Deltas, function: Rc<F>, attempt: usize) -> Effect<E, R>
where
    E: ErrorSet,
    R: 'static,
    F: Fn() -> Effect<E, R> + 'static,
{
    (*function)()
        .catch_all()
        .widen::<E, ()>()
        .flat_map(move |outcome| match outcome {
            Ok(value) => Effect::pure(value),
            Err(error) => match deltas.next() {
                Some(delay) => {
                    debug!(attempt, ?delay, ?error, "retrying after delay");
                    sleep::<E>(delay).then(Effect::lazy(move || retry_step(deltas, function, attempt + 1)))
                }
                None => {
                    warn!(attempts = attempt, ?error, "retries exhausted");
                    Effect::raise(error)
                }
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::Sleep;
    use crate::error::ErrNil;
    use crate::handler::handler_fn;
    use crate::schedule::{recurs, spaced};
    use crate::{Runtime, errors};
    use parking_lot::Mutex;
    use rstest::rstest;
    use std::cell::Cell;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct Broken(u32);

    fn recording() -> (Runtime, Arc<Mutex<Vec<Duration>>>) {
        let slept = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&slept);
        let runtime = Runtime::new().with_handler(handler_fn(move |Sleep(delay): Sleep| recorder.lock().push(delay)));
        (runtime, slept)
    }

    fn counting<E: ErrorSet>(calls: &Rc<Cell<u32>>, body: fn(u32) -> Effect<E, u32>) -> impl Fn() -> Effect<E, u32> + 'static {
        let calls = Rc::clone(calls);
        move || {
            let calls = Rc::clone(&calls);
            Effect::lazy(move || {
                calls.set(calls.get() + 1);
                body(calls.get())
            })
        }
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(4)]
    fn repeat_runs_once_more_than_the_schedule(#[case] count: usize) {
        let (runtime, slept) = recording();
        let calls = Rc::new(Cell::new(0));
        let repeated = repeat(
            recurs(count, spaced(Duration::from_millis(3))),
            counting::<ErrNil>(&calls, Effect::pure),
        );
        let results = runtime.run(repeated()).unwrap();
        assert_eq!(results.len(), count + 1);
        assert_eq!(*slept.lock(), vec![Duration::from_millis(3); count]);
        assert_eq!(results, (1..=count as u32 + 1).collect::<Vec<_>>());
    }

    #[rstest]
    fn repeat_stops_at_the_first_error() {
        let (runtime, slept) = recording();
        let calls = Rc::new(Cell::new(0));
        let repeated = repeat(
            recurs(5, spaced(Duration::from_millis(1))),
            counting::<errors![Broken]>(&calls, |call| {
                if call == 2 { Effect::fail(Broken(call)) } else { Effect::pure(call) }
            }),
        );
        let error = runtime.run(repeated()).unwrap_err().failed();
        assert!(matches!(error, Some(crate::error::ErrCons::Head(Broken(2)))));
        assert_eq!(calls.get(), 2);
        assert_eq!(slept.lock().len(), 1);
    }

    #[rstest]
    #[case(0)]
    #[case(2)]
    #[case(3)]
    fn retry_stops_at_the_first_success(#[case] failures: u32) {
        let (runtime, slept) = recording();
        let calls = Rc::new(Cell::new(0));
        let body: fn(u32) -> Effect<errors![Broken], u32> = match failures {
            0 => |call| Effect::pure(call),
            2 => |call| if call <= 2 { Effect::fail(Broken(call)) } else { Effect::pure(call) },
            _ => |call| if call <= 3 { Effect::fail(Broken(call)) } else { Effect::pure(call) },
        };
        let retried = retry(recurs(3, spaced(Duration::from_millis(2))), counting(&calls, body));
        assert_eq!(runtime.run(retried()).unwrap(), failures + 1);
        assert_eq!(calls.get(), failures + 1);
        assert_eq!(slept.lock().len(), failures as usize);
    }

    #[rstest]
    fn retry_propagates_the_last_error_when_exhausted() {
        let (runtime, _) = recording();
        let calls = Rc::new(Cell::new(0));
        let retried = retry(
            recurs(2, spaced(Duration::ZERO)),
            counting::<errors![Broken]>(&calls, |call| Effect::fail(Broken(call))),
        );
        let error = runtime.run(retried()).unwrap_err().failed();
        assert!(matches!(error, Some(crate::error::ErrCons::Head(Broken(3)))));
    }

    #[rstest]
    fn returned_functions_restart_the_schedule() {
        let (runtime, slept) = recording();
        let calls = Rc::new(Cell::new(0));
        let repeated = repeat(recurs(1, spaced(Duration::from_millis(9))), counting::<ErrNil>(&calls, Effect::pure));
        runtime.run(repeated()).unwrap();
        runtime.run(repeated()).unwrap();
        assert_eq!(calls.get(), 4);
        assert_eq!(slept.lock().len(), 2);
    }
}
