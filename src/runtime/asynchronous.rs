//! An asynchronous driver on tokio.
//!
//! [`AsyncRuntime`] drives the same [`Computation`](crate::Computation) as
//! [`Runtime`], but may answer ability requests with futures. Async
//! handlers are consulted first, most recent first; requests they defer
//! fall through to the synchronous handler stack.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use stateless::{Effect, sleep};
//! use stateless::error::ErrNil;
//! use stateless::runtime::AsyncRuntime;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let program: Effect<ErrNil, u8> = sleep(Duration::from_millis(1)).then(Effect::pure(3));
//! assert_eq!(AsyncRuntime::new().run(program).await.unwrap(), 3);
//! # }
//! ```

use super::Runtime;
use crate::ability::{Ability, AbilityRequest, Resolution, Sleep};
use crate::effect::{Effect, Suspension};
use crate::error::{ErrorSet, RunError, TaskFailure, TaskFailureReason, UnhandledAbilityError};
use crate::parallel::Await;
use futures::FutureExt;
use futures::future::{self, LocalBoxFuture};
use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, trace};

/// Interprets requests of ability `A` asynchronously.
///
/// The returned future must not borrow the handler; clone what it needs.
pub trait AsyncHandler<A: Ability>: Send + Sync + 'static {
    /// Resolves the request or hands it back.
    fn handle(&self, request: A) -> LocalBoxFuture<'static, Resolution<A>>;
}

type Answer = Result<Box<dyn Any>, AbilityRequest>;

trait ErasedAsyncHandler: Send + Sync {
    fn ability_name(&self) -> &'static str;

    fn try_handle(&self, request: AbilityRequest) -> LocalBoxFuture<'static, Answer>;
}

struct BoundAsync<A, H> {
    handler: H,
    _marker: PhantomData<fn(A)>,
}

impl<A: Ability, H: AsyncHandler<A>> ErasedAsyncHandler for BoundAsync<A, H> {
    fn ability_name(&self) -> &'static str {
        A::NAME
    }

    fn try_handle(&self, request: AbilityRequest) -> LocalBoxFuture<'static, Answer> {
        match request.downcast::<A>() {
            Ok(ability) => self
                .handler
                .handle(ability)
                .map(|resolution| match resolution {
                    Resolution::Resolved(output) => Ok(Box::new(output) as Box<dyn Any>),
                    Resolution::Deferred(ability) => Err(AbilityRequest::new(ability)),
                })
                .boxed_local(),
            Err(request) => future::ready(Err(request)).boxed_local(),
        }
    }
}

/// The asynchronous driver.
#[derive(Clone)]
pub struct AsyncRuntime {
    runtime: Runtime,
    handlers: Vec<Arc<dyn ErasedAsyncHandler>>,
}

impl Default for AsyncRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRuntime {
    /// A runtime answering [`Sleep`] with [`TokioSleep`] and [`Await`] with
    /// [`TokioAwait`], over the [`Runtime::new`] handler stack.
    #[must_use]
    pub fn new() -> Self {
        Self::from_runtime(Runtime::new())
            .with_async_handler(TokioSleep)
            .with_async_handler(TokioAwait)
    }

    /// A runtime without async handlers, falling back to `runtime`.
    #[must_use]
    pub const fn from_runtime(runtime: Runtime) -> Self {
        Self {
            runtime,
            handlers: Vec::new(),
        }
    }

    /// Adds an async handler on top of the existing ones.
    #[must_use]
    pub fn with_async_handler<A: Ability, H: AsyncHandler<A>>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(BoundAsync {
            handler,
            _marker: PhantomData,
        }));
        self
    }

    /// The synchronous fallback.
    #[must_use]
    pub const fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Applies `update` to the synchronous fallback.
    #[must_use]
    pub fn map_runtime<F: FnOnce(Runtime) -> Runtime>(mut self, update: F) -> Self {
        self.runtime = update(self.runtime);
        self
    }

    async fn resolve(&self, mut request: AbilityRequest) -> Answer {
        for handler in self.handlers.iter().rev() {
            trace!(ability = request.name(), handler = handler.ability_name(), "offering request to async handler");
            match handler.try_handle(request).await {
                Ok(output) => return Ok(output),
                Err(deferred) => request = deferred,
            }
        }
        self.runtime.handlers().resolve(request)
    }

    /// Runs `effect` to completion.
    ///
    /// # Errors
    ///
    /// As [`Runtime::run`].
    pub async fn run<E: ErrorSet, R: 'static>(&self, effect: Effect<E, R>) -> Result<R, RunError<E>> {
        let mut computation = effect.into_computation();
        let mut step = computation.start();
        loop {
            match step? {
                Suspension::Complete(result) => return Ok(result),
                Suspension::Error(error) => {
                    debug!(?error, "computation failed");
                    return Err(RunError::Failed(error));
                }
                Suspension::Ability(request) => match self.resolve(request).await {
                    Ok(output) => step = computation.resume(output),
                    Err(request) => {
                        debug!(ability = request.name(), "no handler resolved ability");
                        return Err(UnhandledAbilityError::new(request.name(), request.type_name()).into());
                    }
                },
            }
        }
    }
}

impl Debug for AsyncRuntime {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let names = self.handlers.iter().rev().map(|handler| handler.ability_name()).collect::<Vec<_>>();
        formatter
            .debug_struct("AsyncRuntime")
            .field("async_handlers", &names)
            .field("runtime", &self.runtime)
            .finish()
    }
}

/// Resolves [`Sleep`] with `tokio::time::sleep`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleep;

impl AsyncHandler<Sleep> for TokioSleep {
    fn handle(&self, Sleep(duration): Sleep) -> LocalBoxFuture<'static, Resolution<Sleep>> {
        async move {
            tokio::time::sleep(duration).await;
            Resolution::Resolved(())
        }
        .boxed_local()
    }
}

/// Resolves [`Await`] on tokio's blocking thread pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioAwait;

impl AsyncHandler<Await> for TokioAwait {
    fn handle(&self, request: Await) -> LocalBoxFuture<'static, Resolution<Await>> {
        let task = request.task().to_owned();
        async move {
            let outcome = tokio::task::spawn_blocking(move || request.join())
                .await
                .unwrap_or_else(|error| Err(TaskFailure::new(task, TaskFailureReason::Panicked(error.to_string()))));
            Resolution::Resolved(outcome)
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrNil;
    use crate::need;
    use rstest::rstest;

    struct Ask;

    impl Ability for Ask {
        type Output = &'static str;
        const NAME: &'static str = "Ask";
    }

    struct Answer(&'static str);

    impl AsyncHandler<Ask> for Answer {
        fn handle(&self, _: Ask) -> LocalBoxFuture<'static, Resolution<Ask>> {
            future::ready(Resolution::Resolved(self.0)).boxed_local()
        }
    }

    struct Decline;

    impl AsyncHandler<Ask> for Decline {
        fn handle(&self, request: Ask) -> LocalBoxFuture<'static, Resolution<Ask>> {
            future::ready(Resolution::Deferred(request)).boxed_local()
        }
    }

    #[rstest]
    #[tokio::test]
    async fn most_recent_async_handler_wins() {
        let runtime = AsyncRuntime::new()
            .with_async_handler(Answer("first"))
            .with_async_handler(Answer("second"));
        let program: Effect<ErrNil, &str> = Effect::perform(Ask);
        assert_eq!(runtime.run(program).await.unwrap(), "second");
    }

    #[rstest]
    #[tokio::test]
    async fn deferred_requests_fall_back_to_the_sync_stack() {
        let runtime = AsyncRuntime::new()
            .with_async_handler(Decline)
            .map_runtime(|runtime| runtime.supply(8_u8));
        let program: Effect<ErrNil, (u8, &str)> = need::<u8, _>().product(Effect::perform(Ask));
        let error = runtime.run(program).await.unwrap_err();
        assert!(matches!(error, RunError::UnhandledAbility(unhandled) if unhandled.ability() == "Ask"));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn sleep_uses_tokio_time() {
        let started = tokio::time::Instant::now();
        let program: Effect<ErrNil, ()> = crate::sleep(std::time::Duration::from_secs(60));
        AsyncRuntime::new().run(program).await.unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_secs(60));
    }
}
