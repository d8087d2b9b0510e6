//! Handlers: the code that answers ability requests.
//!
//! A [`Handler<A>`] is offered every request of ability `A` that reaches it
//! and either resolves it or defers it to the next handler further out.
//! Handlers are bound around a single effect with
//! [`Effect::handle`](crate::Effect::handle), or collected in a
//! [`HandlerStack`] that a driver consults at the outermost boundary.
//!
//! # Examples
//!
//! ```rust
//! use stateless::{Ability, Effect, Runtime, handler_fn, handler_when};
//! use stateless::error::ErrNil;
//!
//! struct Fetch(u32);
//!
//! impl Ability for Fetch {
//!     type Output = String;
//!     const NAME: &'static str = "Fetch";
//! }
//!
//! // The inner handler answers id 1 and defers the rest outward.
//! let cached = handler_when(|fetch: &Fetch| fetch.0 == 1, |_: Fetch| "cached".to_owned());
//! let program: Effect<ErrNil, (String, String)> = Effect::perform(Fetch(1))
//!     .product(Effect::perform(Fetch(2)))
//!     .handle(cached);
//!
//! let runtime = Runtime::new().with_handler(handler_fn(|fetch: Fetch| format!("remote {}", fetch.0)));
//! assert_eq!(
//!     runtime.run(program).unwrap(),
//!     ("cached".to_owned(), "remote 2".to_owned())
//! );
//! ```

mod stack;

pub use stack::HandlerStack;
pub(crate) use stack::{ErasedHandler, dispatch, erase};

use crate::ability::{Ability, Resolution};
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;

/// Interprets requests of ability `A`.
///
/// # Laws
///
/// ## Deferral Transparency
///
/// A handler that defers every request behaves as if it were not bound:
///
/// ```text
/// effect.handle(defer_all).run() == effect.run()
/// ```
pub trait Handler<A: Ability>: Send + Sync + 'static {
    /// Resolves the request or hands it back.
    fn handle(&self, request: A) -> Resolution<A>;
}

/// Handler built from a function that always resolves.
pub struct FnHandler<A, F> {
    function: F,
    _ability: PhantomData<fn(A)>,
}

impl<A, F> Debug for FnHandler<A, F> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "FnHandler<{}>", std::any::type_name::<A>())
    }
}

impl<A, F> Handler<A> for FnHandler<A, F>
where
    A: Ability,
    F: Fn(A) -> A::Output + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, request: A) -> Resolution<A> {
        Resolution::Resolved((self.function)(request))
    }
}

/// Creates a handler for `A` that resolves every request with `function`.
pub fn handler_fn<A, F>(function: F) -> FnHandler<A, F>
where
    A: Ability,
    F: Fn(A) -> A::Output + Send + Sync + 'static,
{
    FnHandler {
        function,
        _ability: PhantomData,
    }
}

/// Handler that resolves only requests accepted by a predicate.
pub struct WhenHandler<A, P, F> {
    predicate: P,
    function: F,
    _ability: PhantomData<fn(A)>,
}

impl<A, P, F> Debug for WhenHandler<A, P, F> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "WhenHandler<{}>", std::any::type_name::<A>())
    }
}

impl<A, P, F> Handler<A> for WhenHandler<A, P, F>
where
    A: Ability,
    P: Fn(&A) -> bool + Send + Sync + 'static,
    F: Fn(A) -> A::Output + Send + Sync + 'static,
{
    fn handle(&self, request: A) -> Resolution<A> {
        if (self.predicate)(&request) {
            Resolution::Resolved((self.function)(request))
        } else {
            Resolution::Deferred(request)
        }
    }
}

/// Creates a handler for `A` that resolves requests matching `predicate`
/// with `function` and defers the rest.
pub fn handler_when<A, P, F>(predicate: P, function: F) -> WhenHandler<A, P, F>
where
    A: Ability,
    P: Fn(&A) -> bool + Send + Sync + 'static,
    F: Fn(A) -> A::Output + Send + Sync + 'static,
{
    WhenHandler {
        predicate,
        function,
        _ability: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Debug)]
    struct Square(i64);

    impl Ability for Square {
        type Output = i64;
        const NAME: &'static str = "Square";
    }

    #[rstest]
    fn handler_fn_always_resolves() {
        let handler = handler_fn(|Square(value): Square| value * value);
        match handler.handle(Square(4)) {
            Resolution::Resolved(value) => assert_eq!(value, 16),
            Resolution::Deferred(_) => panic!("handler_fn never defers"),
        }
    }

    #[rstest]
    #[case(3, true)]
    #[case(-3, false)]
    fn handler_when_defers_rejected_requests(#[case] input: i64, #[case] resolved: bool) {
        let handler = handler_when(|Square(value): &Square| *value >= 0, |Square(value)| value * value);
        let resolution = handler.handle(Square(input));
        assert_eq!(resolution.is_resolved(), resolved);
        if let Resolution::Deferred(Square(value)) = resolution {
            assert_eq!(value, input);
        }
    }
}
