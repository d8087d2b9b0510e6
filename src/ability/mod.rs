//! Abilities: requests a computation makes of its environment.
//!
//! An ability is a plain value describing something the computation needs
//! (a dependency, a pause, the result of a forked task). Performing it
//! suspends the computation until a handler supplies the ability's
//! [`Output`](Ability::Output). Handlers are selected purely by the
//! ability's type identity.
//!
//! # Examples
//!
//! ```rust
//! use stateless::{Ability, Effect, Runtime, handler_fn};
//! use stateless::error::ErrNil;
//!
//! struct Greet(&'static str);
//!
//! impl Ability for Greet {
//!     type Output = String;
//!     const NAME: &'static str = "Greet";
//! }
//!
//! let program: Effect<ErrNil, String> = Effect::perform(Greet("world"));
//! let runtime = Runtime::new().with_handler(handler_fn(|greet: Greet| format!("hello, {}", greet.0)));
//!
//! assert_eq!(runtime.run(program).unwrap(), "hello, world");
//! ```

mod clock;
mod need;

pub use clock::{Sleep, ThreadSleep, sleep};
pub use need::{Need, Supply, SupplyEffect, need};

use std::any::{Any, TypeId, type_name};
use std::fmt::{self, Debug, Formatter};

/// A request a computation can suspend on.
///
/// `Output` is the type of value a handler resumes the computation with.
pub trait Ability: 'static {
    /// Value produced by handling the request.
    type Output: 'static;

    /// Human-readable name used in diagnostics.
    const NAME: &'static str;
}

/// The outcome of offering a request to a handler.
pub enum Resolution<A: Ability> {
    /// The handler produced the ability's output.
    Resolved(A::Output),
    /// The handler declined; the request is passed to the next handler out.
    Deferred(A),
}

impl<A: Ability> Resolution<A> {
    /// Whether the handler produced an output.
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

impl<A: Ability> Debug for Resolution<A> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(_) => write!(formatter, "Resolved({})", A::NAME),
            Self::Deferred(_) => write!(formatter, "Deferred({})", A::NAME),
        }
    }
}

/// A type-erased ability request, as seen by drivers.
///
/// Carries the ability's type identity, its declared name, the type of
/// value it must be resumed with, and the request itself.
pub struct AbilityRequest {
    ability: TypeId,
    name: &'static str,
    type_name: &'static str,
    output: TypeId,
    output_name: &'static str,
    payload: Box<dyn Any>,
}

impl AbilityRequest {
    /// Wraps a concrete request.
    pub fn new<A: Ability>(request: A) -> Self {
        Self {
            ability: TypeId::of::<A>(),
            name: A::NAME,
            type_name: type_name::<A>(),
            output: TypeId::of::<A::Output>(),
            output_name: type_name::<A::Output>(),
            payload: Box::new(request),
        }
    }

    /// Type identity of the requested ability.
    #[must_use]
    pub const fn ability(&self) -> TypeId {
        self.ability
    }

    /// The ability's declared name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The ability's full Rust type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type identity of the value the computation must be resumed with.
    #[must_use]
    pub const fn output(&self) -> TypeId {
        self.output
    }

    /// Type name of the value the computation must be resumed with.
    #[must_use]
    pub const fn output_name(&self) -> &'static str {
        self.output_name
    }

    /// Whether this is a request for ability `A`.
    #[must_use]
    pub fn is<A: Ability>(&self) -> bool {
        self.ability == TypeId::of::<A>()
    }

    /// Borrows the request as an `A`.
    #[must_use]
    pub fn downcast_ref<A: Ability>(&self) -> Option<&A> {
        self.payload.downcast_ref::<A>()
    }

    /// Recovers the concrete request.
    ///
    /// # Errors
    ///
    /// Returns the request unchanged when it is not an `A`.
    pub fn downcast<A: Ability>(self) -> Result<A, Self> {
        let Self {
            ability,
            name,
            type_name,
            output,
            output_name,
            payload,
        } = self;
        match payload.downcast::<A>() {
            Ok(request) => Ok(*request),
            Err(payload) => Err(Self {
                ability,
                name,
                type_name,
                output,
                output_name,
                payload,
            }),
        }
    }
}

impl Debug for AbilityRequest {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AbilityRequest")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("output", &self.output_name)
            .finish_non_exhaustive()
    }
}
