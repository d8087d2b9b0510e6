//! Dependency injection through the `Need` ability.
//!
//! `need::<T, _>()` suspends until some handler provides a `T`; [`Supply`]
//! is the handler that always answers with a clone of one instance, and
//! [`SupplyEffect`] answers with the cached result of an effect that itself
//! needs other abilities.
//!
//! # Examples
//!
//! ```rust
//! use stateless::{Effect, Runtime, need};
//! use stateless::error::ErrNil;
//!
//! #[derive(Clone)]
//! struct Config {
//!     retries: u32,
//! }
//!
//! let program: Effect<ErrNil, u32> = need::<Config, _>().fmap(|config| config.retries * 2);
//!
//! let result = Runtime::new().supply(Config { retries: 3 }).run(program);
//! assert_eq!(result.unwrap(), 6);
//! ```

use super::{Ability, Resolution};
use crate::effect::Effect;
use crate::error::{AbilityTypeMismatchError, ErrorSet};
use crate::handler::{Handler, HandlerStack};
use crate::runtime::Runtime;
use parking_lot::Mutex;
use std::any::{Any, type_name};
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Request for an instance of `T`.
pub struct Need<T>(PhantomData<fn() -> T>);

impl<T> Need<T> {
    /// Creates the request.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Need<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Need<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Need<T> {}

impl<T> Debug for Need<T> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "Need<{}>", type_name::<T>())
    }
}

impl<T: 'static> Ability for Need<T> {
    type Output = T;
    const NAME: &'static str = "Need";
}

/// Requests an instance of `T` from the surrounding handlers.
pub fn need<T: 'static, E: ErrorSet>() -> Effect<E, T> {
    Effect::perform(Need::<T>::new())
}

/// Handler answering `Need<T>` with a clone of one instance.
#[derive(Clone)]
pub struct Supply<T> {
    instance: T,
}

impl<T: Clone + Send + Sync + 'static> Supply<T> {
    /// Wraps the instance to supply.
    #[must_use]
    pub const fn new(instance: T) -> Self {
        Self { instance }
    }

    /// Builds a supplier from a dynamically typed instance.
    ///
    /// # Errors
    ///
    /// Returns [`AbilityTypeMismatchError`] when the instance is not a `T`.
    pub fn from_any(instance: Box<dyn Any + Send + Sync>) -> Result<Self, AbilityTypeMismatchError> {
        instance
            .downcast::<T>()
            .map(|instance| Self::new(*instance))
            .map_err(|_| AbilityTypeMismatchError::of::<T>())
    }

    /// The supplied instance.
    pub const fn instance(&self) -> &T {
        &self.instance
    }
}

impl<T: Debug> Debug for Supply<T> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Supply")
            .field("instance", &self.instance)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Handler<Need<T>> for Supply<T> {
    fn handle(&self, _request: Need<T>) -> Resolution<Need<T>> {
        Resolution::Resolved(self.instance.clone())
    }
}

/// Handler answering `Need<T>` with the result of an effect.
///
/// The effect is built and run on the first request, over the handlers
/// given at construction, and its value is answered to every later
/// request. A run that fails is logged and the request deferred; the next
/// request runs the effect again.
pub struct SupplyEffect<T, E, F> {
    handlers: HandlerStack,
    factory: F,
    value: Mutex<Option<T>>,
    _marker: PhantomData<fn() -> E>,
}

impl<T, E, F> SupplyEffect<T, E, F>
where
    T: Clone + Send + Sync + 'static,
    E: ErrorSet,
    F: Fn() -> Effect<E, T> + Send + Sync + 'static,
{
    /// Runs the effects `factory` builds over `handlers`.
    #[must_use]
    pub fn new(handlers: HandlerStack, factory: F) -> Self {
        Self {
            handlers,
            factory,
            value: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    /// Whether the effect already produced the value.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.value.lock().is_some()
    }
}

impl<T, E, F> Debug for SupplyEffect<T, E, F> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SupplyEffect")
            .field("supplies", &type_name::<T>())
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl<T, E, F> Handler<Need<T>> for SupplyEffect<T, E, F>
where
    T: Clone + Send + Sync + 'static,
    E: ErrorSet,
    F: Fn() -> Effect<E, T> + Send + Sync + 'static,
{
    fn handle(&self, request: Need<T>) -> Resolution<Need<T>> {
        let mut value = self.value.lock();
        if let Some(value) = value.as_ref() {
            return Resolution::Resolved(value.clone());
        }
        debug!(need = type_name::<T>(), "running the effect that supplies a need");
        match Runtime::from_handlers(self.handlers.clone()).run((self.factory)()) {
            Ok(produced) => {
                *value = Some(produced.clone());
                Resolution::Resolved(produced)
            }
            Err(error) => {
                warn!(need = type_name::<T>(), ?error, "effect supplying a need did not produce it");
                Resolution::Deferred(request)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrNil;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[rstest]
    fn supply_resolves_with_a_clone() {
        let supply = Supply::new(String::from("db://local"));
        match supply.handle(Need::new()) {
            Resolution::Resolved(value) => assert_eq!(value, "db://local"),
            Resolution::Deferred(_) => panic!("supply must always resolve"),
        }
        assert_eq!(supply.instance(), "db://local");
    }

    #[rstest]
    fn from_any_accepts_the_matching_type() {
        let supply = Supply::<u64>::from_any(Box::new(7_u64)).unwrap();
        assert_eq!(*supply.instance(), 7);
    }

    #[rstest]
    fn from_any_rejects_other_types() {
        let error = Supply::<u64>::from_any(Box::new("seven")).unwrap_err();
        assert_eq!(error.expected(), "u64");
    }

    #[rstest]
    fn need_debug_names_the_type() {
        assert_eq!(format!("{:?}", Need::<u8>::new()), "Need<u8>");
    }

    #[rstest]
    fn supply_effect_runs_once_over_its_handlers() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        let supplier = SupplyEffect::new(HandlerStack::new().supply(4_u32), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            need::<u32, ErrNil>().fmap(|base| u64::from(base) * 10)
        });
        assert!(!supplier.is_resolved());
        for _ in 0..3 {
            match supplier.handle(Need::new()) {
                Resolution::Resolved(value) => assert_eq!(value, 40),
                Resolution::Deferred(_) => panic!("the effect has every ability it needs"),
            }
        }
        assert!(supplier.is_resolved());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    fn supply_effect_defers_when_its_effect_cannot_run() {
        let supplier = SupplyEffect::new(HandlerStack::new(), need::<u32, ErrNil>);
        assert!(matches!(supplier.handle(Need::new()), Resolution::Deferred(_)));
        assert!(!supplier.is_resolved());
    }
}
