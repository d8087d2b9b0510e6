//! The typed effect description.
//!
//! `Effect<E, R>` describes a computation that may request abilities, may
//! fail with one of the recoverable errors in the row `E`, and otherwise
//! produces an `R`. Building an effect runs nothing; drive it with a
//! [`Runtime`](crate::Runtime) or step it by hand through a
//! [`Computation`](super::Computation).
//!
//! # Examples
//!
//! ```rust
//! use stateless::{Effect, Runtime};
//! use stateless::error::ErrNil;
//!
//! let program: Effect<ErrNil, i32> = Effect::pure(20)
//!     .flat_map(|x| Effect::sync(move || x + 1))
//!     .fmap(|x| x * 2);
//!
//! assert_eq!(Runtime::new().run(program).unwrap(), 42);
//! ```

use super::machine::{Node, Value, rethrow};
use crate::ability::{Ability, AbilityRequest, Need, Supply};
use crate::error::{Contains, Embed, ErrNil, ErrorSet, Fault};
use crate::handler::{Handler, HandlerStack, erase};
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;

/// A description of an effectful computation.
///
/// - `E`: the error row of recoverable errors it may fail with
/// - `R`: the type it produces on success
///
/// Effects are move-only: every combinator consumes its receiver.
pub struct Effect<E, R> {
    pub(crate) node: Node,
    _marker: PhantomData<fn() -> (E, R)>,
}

/// An effect that cannot fail recoverably.
pub type Success<R> = Effect<ErrNil, R>;

impl<E, R> Debug for Effect<E, R> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "Effect<{}, {}>",
            std::any::type_name::<E>(),
            std::any::type_name::<R>()
        )
    }
}

// =============================================================================
// Construction
// =============================================================================

impl<E: ErrorSet, R: 'static> Effect<E, R> {
    #[inline]
    pub(crate) const fn from_node(node: Node) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    /// An effect that immediately produces `value`.
    #[inline]
    pub fn pure(value: R) -> Self {
        Self::from_node(Node::done(value))
    }

    /// Defers building the effect until it is run.
    ///
    /// The thunk runs once, when the driver reaches this step.
    #[inline]
    pub fn lazy<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Self + 'static,
    {
        Self::from_node(Node::defer(move || thunk().node))
    }

    /// A primitive step: runs `function` when the driver reaches it.
    ///
    /// ```rust
    /// use std::cell::Cell;
    /// use std::rc::Rc;
    /// use stateless::{Effect, Runtime};
    /// use stateless::error::ErrNil;
    ///
    /// let calls = Rc::new(Cell::new(0));
    /// let counter = Rc::clone(&calls);
    /// let program: Effect<ErrNil, ()> = Effect::sync(move || counter.set(counter.get() + 1));
    ///
    /// assert_eq!(calls.get(), 0);
    /// Runtime::new().run(program).unwrap();
    /// assert_eq!(calls.get(), 1);
    /// ```
    #[inline]
    pub fn sync<F>(function: F) -> Self
    where
        F: FnOnce() -> R + 'static,
    {
        Self::from_node(Node::defer(move || Node::done(function())))
    }

    /// Fails with an error value of the row itself.
    #[inline]
    pub fn raise(error: E) -> Self {
        Self::from_node(Node::fail(error))
    }

    /// Fails with `error`, one of the error types of the row.
    ///
    /// ```rust
    /// use stateless::{Effect, Runtime, errors};
    ///
    /// #[derive(Debug, PartialEq)]
    /// struct NotFound(u32);
    ///
    /// let program: Effect<errors![NotFound], String> = Effect::fail(NotFound(7));
    /// let error = Runtime::new().run(program).unwrap_err().failed();
    /// assert!(matches!(error, Some(stateless::error::ErrCons::Head(NotFound(7)))));
    /// ```
    #[inline]
    pub fn fail<T, I>(error: T) -> Self
    where
        E: Contains<T, I>,
    {
        Self::raise(E::inject(error))
    }

    /// Turns a ready `Result` into an effect.
    pub fn from_result<T, I>(result: Result<R, T>) -> Self
    where
        E: Contains<T, I>,
    {
        match result {
            Ok(value) => Self::pure(value),
            Err(error) => Self::fail(error),
        }
    }

    /// Runs a plain fallible function when reached, raising its `Err` as a
    /// recoverable error.
    ///
    /// Only the declared error type is converted; panics propagate.
    ///
    /// ```rust
    /// use stateless::{Effect, Runtime, errors};
    /// use std::num::ParseIntError;
    ///
    /// let parse = |text: &'static str| -> Effect<errors![ParseIntError], i32> {
    ///     Effect::throws(move || text.parse::<i32>())
    /// };
    ///
    /// assert_eq!(Runtime::new().run(parse("12")).unwrap(), 12);
    /// assert!(Runtime::new().run(parse("x")).unwrap_err().failed().is_some());
    /// ```
    pub fn throws<T, I, F>(function: F) -> Self
    where
        E: Contains<T, I>,
        T: 'static,
        F: FnOnce() -> Result<R, T> + 'static,
    {
        Self::from_node(Node::defer(move || match function() {
            Ok(value) => Node::done(value),
            Err(error) => Node::fail(E::inject(error)),
        }))
    }

    /// Requests `ability` and produces the handler's answer.
    #[inline]
    pub fn perform<A>(ability: A) -> Self
    where
        A: Ability<Output = R>,
    {
        Self::from_node(Node::Request(AbilityRequest::new(ability)))
    }

    /// Aborts with an unrecoverable fault.
    #[inline]
    pub(crate) const fn abort(fault: Fault) -> Self {
        Self::from_node(Node::Abort(fault))
    }

    /// Runs every effect left to right, collecting the results in order.
    pub fn sequence<I>(effects: I) -> Effect<E, Vec<R>>
    where
        I: IntoIterator<Item = Self>,
        I::IntoIter: 'static,
    {
        fn step<E: ErrorSet, R: 'static>(
            mut effects: impl Iterator<Item = Effect<E, R>> + 'static,
            mut results: Vec<R>,
        ) -> Effect<E, Vec<R>> {
            match effects.next() {
                None => Effect::pure(results),
                Some(effect) => effect.flat_map(move |value| {
                    results.push(value);
                    step(effects, results)
                }),
            }
        }

        let effects = effects.into_iter();
        let capacity = effects.size_hint().0;
        Effect::lazy(move || step(effects, Vec::with_capacity(capacity)))
    }
}

// =============================================================================
// Sequencing
// =============================================================================

impl<E: ErrorSet, R: 'static> Effect<E, R> {
    /// Transforms the result.
    #[inline]
    pub fn fmap<S, F>(self, function: F) -> Effect<E, S>
    where
        S: 'static,
        F: FnOnce(R) -> S + 'static,
    {
        Effect::from_node(self.node.bind(move |value: Value| match value.downcast::<R>() {
            Ok(value) => Node::done(function(*value)),
            Err(_) => Node::mismatch("Effect::fmap"),
        }))
    }

    /// Continues with the effect `function` builds from the result.
    #[inline]
    pub fn flat_map<S, F>(self, function: F) -> Effect<E, S>
    where
        S: 'static,
        F: FnOnce(R) -> Effect<E, S> + 'static,
    {
        Effect::from_node(self.node.bind(move |value: Value| match value.downcast::<R>() {
            Ok(value) => function(*value).node,
            Err(_) => Node::mismatch("Effect::flat_map"),
        }))
    }

    /// Alias for [`flat_map`](Self::flat_map).
    #[inline]
    pub fn and_then<S, F>(self, function: F) -> Effect<E, S>
    where
        S: 'static,
        F: FnOnce(R) -> Effect<E, S> + 'static,
    {
        self.flat_map(function)
    }

    /// Runs `next` after this effect, discarding this effect's result.
    #[inline]
    pub fn then<S: 'static>(self, next: Effect<E, S>) -> Effect<E, S> {
        self.flat_map(move |_| next)
    }

    /// Runs both effects left to right and combines their results.
    pub fn map2<S, T, F>(self, other: Effect<E, S>, function: F) -> Effect<E, T>
    where
        S: 'static,
        T: 'static,
        F: FnOnce(R, S) -> T + 'static,
    {
        self.flat_map(move |left| other.fmap(move |right| function(left, right)))
    }

    /// Runs both effects left to right and pairs their results.
    pub fn product<S: 'static>(self, other: Effect<E, S>) -> Effect<E, (R, S)> {
        self.map2(other, |left, right| (left, right))
    }

    /// Observes the result without changing it.
    pub fn inspect<F>(self, function: F) -> Self
    where
        F: FnOnce(&R) + 'static,
    {
        self.fmap(move |value| {
            function(&value);
            value
        })
    }
}

// =============================================================================
// Error Channel
// =============================================================================

impl<E: ErrorSet, R: 'static> Effect<E, R> {
    /// Catches the error type `T`, narrowing the row.
    ///
    /// A failure with `T` becomes the result `Err(t)` and success becomes
    /// `Ok(r)`. Errors of the remaining types keep propagating.
    ///
    /// ```rust
    /// use stateless::{Effect, Runtime, errors};
    ///
    /// #[derive(Debug)]
    /// struct Missing;
    /// #[derive(Debug)]
    /// struct Denied;
    ///
    /// let lookup: Effect<errors![Missing, Denied], u8> = Effect::fail(Missing);
    /// let caught: Effect<errors![Denied], Result<u8, Missing>> = lookup.catch::<Missing, _>();
    ///
    /// assert!(matches!(Runtime::new().run(caught), Ok(Err(Missing))));
    /// ```
    pub fn catch<T, I>(self) -> Effect<E::Remainder, Result<R, T>>
    where
        E: Contains<T, I>,
        T: 'static,
    {
        let guarded = self.fmap(Ok::<R, T>).node;
        Effect::from_node(guarded.recover(|error: Value| match error.downcast::<E>() {
            Ok(error) => match <E as Contains<T, I>>::take(*error) {
                Ok(caught) => Ok(Node::done(Err::<R, T>(caught))),
                Err(remainder) => Err(rethrow(remainder)),
            },
            Err(_) => Ok(Node::mismatch("Effect::catch")),
        }))
    }

    /// Catches every recoverable error of the row.
    pub fn catch_all(self) -> Effect<ErrNil, Result<R, E>> {
        let guarded = self.fmap(Ok::<R, E>).node;
        Effect::from_node(guarded.recover(|error: Value| match error.downcast::<E>() {
            Ok(error) => Ok(Node::done(Err::<R, E>(*error))),
            Err(_) => Ok(Node::mismatch("Effect::catch_all")),
        }))
    }

    /// Re-expresses the error row as a wider row containing all its types.
    ///
    /// ```rust
    /// use stateless::{Effect, errors};
    ///
    /// #[derive(Debug)]
    /// struct Timeout;
    /// #[derive(Debug)]
    /// struct Parse;
    ///
    /// let narrow: Effect<errors![Timeout], ()> = Effect::fail(Timeout);
    /// let wide: Effect<errors![Parse, Timeout], ()> = narrow.widen();
    /// # let _ = wide;
    /// ```
    pub fn widen<E2, I: 'static>(self) -> Effect<E2, R>
    where
        E: Embed<E2, I>,
        E2: ErrorSet,
    {
        self.map_error(<E as Embed<E2, I>>::embed)
    }

    /// Converts every recoverable error with `function`.
    pub fn map_error<E2, F>(self, function: F) -> Effect<E2, R>
    where
        E2: ErrorSet,
        F: FnOnce(E) -> E2 + 'static,
    {
        Effect::from_node(self.node.recover(move |error: Value| match error.downcast::<E>() {
            Ok(error) => Err(rethrow(function(*error))),
            Err(_) => Ok(Node::mismatch("Effect::map_error")),
        }))
    }

    /// Recovers from every recoverable error by continuing with another
    /// effect.
    pub fn or_else<E2, F>(self, function: F) -> Effect<E2, R>
    where
        E2: ErrorSet,
        F: FnOnce(E) -> Effect<E2, R> + 'static,
    {
        self.catch_all().widen::<E2, ()>().flat_map(move |outcome| match outcome {
            Ok(value) => Effect::pure(value),
            Err(error) => function(error),
        })
    }
}

// =============================================================================
// Handlers
// =============================================================================

impl<E: ErrorSet, R: 'static> Effect<E, R> {
    /// Scopes `handler` around this effect.
    ///
    /// Requests of ability `A` raised inside are offered to `handler`
    /// before any handler further out; other requests pass through.
    #[inline]
    pub fn handle<A, H>(self, handler: H) -> Self
    where
        A: Ability,
        H: Handler<A>,
    {
        Self::from_node(self.node.scope(erase(handler)))
    }

    /// Scopes a [`Supply`] of `instance` for `Need<T>` around this effect.
    pub fn supply<T: Clone + Send + Sync + 'static>(self, instance: T) -> Self {
        self.handle::<Need<T>, _>(Supply::new(instance))
    }

    /// Scopes every handler of `stack` around this effect; the most recent
    /// handler of the stack is innermost.
    pub fn handle_all(self, stack: &HandlerStack) -> Self {
        let node = stack
            .entries()
            .iter()
            .rev()
            .fold(self.node, |node, handler| node.scope(std::sync::Arc::clone(handler)));
        Self::from_node(node)
    }

    /// Prepares a step-by-step cursor over this effect.
    pub fn into_computation(self) -> super::Computation<E, R> {
        super::Computation::new(self.node)
    }
}

static_assertions::assert_not_impl_any!(Effect<ErrNil, i32>: Clone, Copy);
