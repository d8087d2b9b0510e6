//! Drivers that run effects to completion.
//!
//! [`Runtime`] is the synchronous driver: it starts the computation,
//! answers every ability request that escapes the effect's own handler
//! scopes from its [`HandlerStack`], and returns the result, the
//! recoverable error, or the structural failure that ended the run.
//!
//! # Examples
//!
//! ```rust
//! use stateless::{Effect, Runtime, errors, need};
//!
//! #[derive(Debug)]
//! struct Overdrawn;
//!
//! fn withdraw(amount: u32) -> Effect<errors![Overdrawn], u32> {
//!     need::<u32, _>().flat_map(move |balance| {
//!         if amount > balance {
//!             Effect::fail(Overdrawn)
//!         } else {
//!             Effect::pure(balance - amount)
//!         }
//!     })
//! }
//!
//! let runtime = Runtime::new().supply(100_u32);
//! assert_eq!(runtime.run(withdraw(30)).unwrap(), 70);
//! assert!(runtime.run(withdraw(300)).unwrap_err().failed().is_some());
//! ```

#[cfg(feature = "async")]
mod asynchronous;

#[cfg(feature = "async")]
pub use asynchronous::{AsyncHandler, AsyncRuntime, TokioAwait, TokioSleep};

use crate::ability::{Ability, ThreadSleep};
use crate::effect::{Effect, Suspension};
use crate::error::{AbilityTypeMismatchError, ErrorSet, RunError, UnhandledAbilityError};
use crate::handler::{Handler, HandlerStack};
use crate::parallel::BlockingAwait;
use std::any::Any;
use tracing::{debug, trace};

/// The synchronous driver.
#[derive(Clone, Debug)]
pub struct Runtime {
    handlers: HandlerStack,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// A runtime with the built-in handlers: [`ThreadSleep`] for
    /// [`Sleep`](crate::ability::Sleep) and [`BlockingAwait`] for awaiting
    /// forked tasks. Handlers added later take precedence.
    #[must_use]
    pub fn new() -> Self {
        Self::from_handlers(HandlerStack::new().with(ThreadSleep).with(BlockingAwait))
    }

    /// A runtime without any handler.
    #[must_use]
    pub const fn empty() -> Self {
        Self::from_handlers(HandlerStack::new())
    }

    /// A runtime consulting exactly `handlers`.
    #[must_use]
    pub const fn from_handlers(handlers: HandlerStack) -> Self {
        Self { handlers }
    }

    /// Adds a handler on top of the existing ones.
    #[must_use]
    pub fn with_handler<A: Ability, H: Handler<A>>(mut self, handler: H) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Adds every handler of `stack` on top of the existing ones.
    #[must_use]
    pub fn with_handlers(mut self, stack: &HandlerStack) -> Self {
        self.handlers = self.handlers.extend(stack);
        self
    }

    /// Supplies `instance` for `Need<T>`.
    #[must_use]
    pub fn supply<T: Clone + Send + Sync + 'static>(mut self, instance: T) -> Self {
        self.handlers = self.handlers.supply(instance);
        self
    }

    /// Supplies `Need<T>` with the value of an effect run over the handlers
    /// added so far. See [`HandlerStack::supply_effect`].
    #[must_use]
    pub fn supply_effect<T, E, F>(mut self, factory: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        E: ErrorSet,
        F: Fn() -> Effect<E, T> + Send + Sync + 'static,
    {
        self.handlers = self.handlers.supply_effect(factory);
        self
    }

    /// Supplies a dynamically typed instance for `Need<T>`.
    ///
    /// # Errors
    ///
    /// Returns [`AbilityTypeMismatchError`] if `instance` is not a `T`.
    pub fn supply_any<T: Clone + Send + Sync + 'static>(
        mut self,
        instance: Box<dyn Any + Send + Sync>,
    ) -> Result<Self, AbilityTypeMismatchError> {
        self.handlers = self.handlers.supply_any::<T>(instance)?;
        Ok(self)
    }

    /// The handlers consulted at the outermost boundary.
    #[must_use]
    pub const fn handlers(&self) -> &HandlerStack {
        &self.handlers
    }

    /// Runs `effect` to completion.
    ///
    /// # Errors
    ///
    /// - [`RunError::Failed`] with the original error value when the effect
    ///   ends with an uncaught recoverable error
    /// - [`RunError::UnhandledAbility`] when no handler resolves a request
    /// - [`RunError::Fault`] when the effect aborts
    pub fn run<E: ErrorSet, R: 'static>(&self, effect: Effect<E, R>) -> Result<R, RunError<E>> {
        let mut computation = effect.into_computation();
        let mut step = computation.start();
        let mut resumptions = 0_usize;
        loop {
            match step? {
                Suspension::Complete(result) => {
                    trace!(resumptions, "computation completed");
                    return Ok(result);
                }
                Suspension::Error(error) => {
                    debug!(resumptions, ?error, "computation failed");
                    return Err(RunError::Failed(error));
                }
                Suspension::Ability(request) => match self.handlers.resolve(request) {
                    Ok(output) => {
                        resumptions += 1;
                        step = computation.resume(output);
                    }
                    Err(request) => {
                        debug!(ability = request.name(), "no handler resolved ability");
                        return Err(UnhandledAbilityError::new(request.name(), request.type_name()).into());
                    }
                },
            }
        }
    }
}
