use super::Handler;
use crate::ability::{Ability, AbilityRequest, Need, Resolution, Supply, SupplyEffect};
use crate::effect::Effect;
use crate::error::{AbilityTypeMismatchError, ErrorSet};
use std::any::{Any, TypeId};
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

// =============================================================================
// Type Erasure
// =============================================================================

/// A handler with its ability type erased.
pub(crate) trait ErasedHandler: Send + Sync {
    fn ability(&self) -> TypeId;

    fn ability_name(&self) -> &'static str;

    /// Resolves the request, or returns it for the next handler.
    fn try_handle(&self, request: AbilityRequest) -> Result<Box<dyn Any>, AbilityRequest>;
}

struct Bound<A, H> {
    handler: H,
    _ability: PhantomData<fn(A)>,
}

impl<A: Ability, H: Handler<A>> ErasedHandler for Bound<A, H> {
    fn ability(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn ability_name(&self) -> &'static str {
        A::NAME
    }

    fn try_handle(&self, request: AbilityRequest) -> Result<Box<dyn Any>, AbilityRequest> {
        let request = request.downcast::<A>()?;
        match self.handler.handle(request) {
            Resolution::Resolved(output) => Ok(Box::new(output)),
            Resolution::Deferred(request) => Err(AbilityRequest::new(request)),
        }
    }
}

pub(crate) fn erase<A: Ability, H: Handler<A>>(handler: H) -> Arc<dyn ErasedHandler> {
    Arc::new(Bound {
        handler,
        _ability: PhantomData,
    })
}

/// Offers `request` to `handlers`, innermost (last) first.
pub(crate) fn dispatch<'a, I>(handlers: I, mut request: AbilityRequest) -> Result<Box<dyn Any>, AbilityRequest>
where
    I: Iterator<Item = &'a Arc<dyn ErasedHandler>>,
{
    for handler in handlers {
        if handler.ability() != request.ability() {
            continue;
        }
        match handler.try_handle(request) {
            Ok(output) => {
                trace!(ability = handler.ability_name(), "ability resolved");
                return Ok(output);
            }
            Err(deferred) => request = deferred,
        }
    }
    Err(request)
}

// =============================================================================
// HandlerStack
// =============================================================================

/// An ordered collection of handlers.
///
/// The most recently pushed handler for an ability is consulted first; if
/// it defers, older handlers of the same ability are tried in turn.
/// Cloning is cheap and clones share handler instances.
///
/// # Examples
///
/// ```rust
/// use stateless::{HandlerStack, handler_fn};
/// use stateless::ability::Need;
///
/// let stack = HandlerStack::new()
///     .supply(1_u8)
///     .with(handler_fn(|_: Need<u16>| 2_u16));
///
/// assert_eq!(stack.len(), 2);
/// assert!(stack.handles::<Need<u8>>());
/// assert!(!stack.handles::<Need<u32>>());
/// ```
#[derive(Clone, Default)]
pub struct HandlerStack {
    entries: Vec<Arc<dyn ErasedHandler>>,
}

impl HandlerStack {
    /// Creates an empty stack.
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Pushes `handler`, returning the extended stack.
    #[must_use]
    pub fn with<A: Ability, H: Handler<A>>(mut self, handler: H) -> Self {
        self.push(handler);
        self
    }

    /// Pushes `handler` on top of the stack.
    pub fn push<A: Ability, H: Handler<A>>(&mut self, handler: H) {
        self.entries.push(erase(handler));
    }

    /// Pushes a [`Supply`] of `instance` for `Need<T>`.
    #[must_use]
    pub fn supply<T: Clone + Send + Sync + 'static>(self, instance: T) -> Self {
        self.with::<Need<T>, _>(Supply::new(instance))
    }

    /// Pushes a [`Supply`] built from a dynamically typed instance.
    ///
    /// # Errors
    ///
    /// Returns [`AbilityTypeMismatchError`] if `instance` is not a `T`; the
    /// stack is not modified.
    pub fn supply_any<T: Clone + Send + Sync + 'static>(
        self,
        instance: Box<dyn Any + Send + Sync>,
    ) -> Result<Self, AbilityTypeMismatchError> {
        let supply = Supply::<T>::from_any(instance)?;
        Ok(self.with::<Need<T>, _>(supply))
    }

    /// Pushes a [`SupplyEffect`] for `Need<T>`: the first request runs the
    /// effect `factory` builds over the handlers bound so far, and its value
    /// answers that request and every later one.
    #[must_use]
    pub fn supply_effect<T, E, F>(self, factory: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        E: ErrorSet,
        F: Fn() -> Effect<E, T> + Send + Sync + 'static,
    {
        let supplier = SupplyEffect::new(self.clone(), factory);
        self.with::<Need<T>, _>(supplier)
    }

    /// Pushes every handler of `other` on top of this stack, keeping their order.
    #[must_use]
    pub fn extend(mut self, other: &Self) -> Self {
        self.entries.extend(other.entries.iter().cloned());
        self
    }

    /// Number of bound handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no handler is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether some handler for ability `A` is bound.
    #[must_use]
    pub fn handles<A: Ability>(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.ability() == TypeId::of::<A>())
    }

    /// Offers `request` to the handlers, most recent first.
    ///
    /// # Errors
    ///
    /// Returns the request when no handler resolves it.
    pub fn resolve(&self, request: AbilityRequest) -> Result<Box<dyn Any>, AbilityRequest> {
        dispatch(self.entries.iter().rev(), request)
    }

    pub(crate) fn entries(&self) -> &[Arc<dyn ErasedHandler>] {
        &self.entries
    }
}

impl Debug for HandlerStack {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_list()
            .entries(self.entries.iter().map(|entry| entry.ability_name()))
            .finish()
    }
}

static_assertions::assert_impl_all!(HandlerStack: Send, Sync, Clone);
