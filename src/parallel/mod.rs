//! Forking effects onto thread and process executors.
//!
//! A [`Task`] bundles work for an executor. [`fork`] submits it through the
//! [`Parallel`] executors found with `Need<Parallel>` and produces a
//! [`TaskHandle`] immediately; [`wait`] performs the [`Await`] ability to
//! block on the outcome. A task that fails remotely aborts the awaiting
//! computation with [`Fault::TaskFailed`].
//!
//! Thread tasks run the effect in a fresh driver on a pool thread, over the
//! pool's own handler stack. Process tasks name a registered [`TaskFn`] and
//! cross to a worker program as JSON; see [`worker`].
//!
//! # Examples
//!
//! ```rust
//! use stateless::{Effect, Runtime};
//! use stateless::config::ParallelConfig;
//! use stateless::error::ErrNil;
//! use stateless::parallel::{self, Parallel, TaskFn};
//!
//! fn square(value: u64) -> Effect<ErrNil, u64> {
//!     Effect::pure(value * value)
//! }
//!
//! const SQUARE: TaskFn<u64, ErrNil, u64> = TaskFn::new("square", square);
//!
//! let config = ParallelConfig::default().with_thread_pool_size(2);
//! let squares = Parallel::scoped(&config, |executors| {
//!     let program: Effect<ErrNil, Vec<u64>> =
//!         parallel::parallel((1..=4).map(|value| SQUARE.thread(value)).collect());
//!     Runtime::new().supply(executors.clone()).run(program)
//! })
//! .unwrap()
//! .unwrap();
//!
//! assert_eq!(squares, vec![1, 4, 9, 16]);
//! ```

mod executor;
mod process_pool;
mod task;
mod thread_pool;
pub mod worker;

pub use executor::{
    Completer, Completion, Executor, Parallel, Pending, PoolError, SubmitError, UnitOfWork,
};
pub use process_pool::{ProcessPool, WorkerCommand};
pub use task::{ExecutionKind, NativeWork, Task, TaskFn, TaskHandle};
pub use thread_pool::ThreadPool;

use crate::ability::{Ability, Resolution, need};
use crate::effect::Effect;
use crate::error::{ErrorSet, Fault, TaskFailure, TaskFailureReason};
use crate::handler::Handler;
use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use tracing::warn;

type Joiner = Box<dyn FnOnce() -> Result<Box<dyn Any + Send>, TaskFailure> + Send>;

/// The ability to block until a forked task finishes.
///
/// Performed by [`wait`]; handled by [`BlockingAwait`] in the synchronous
/// runtime.
pub struct Await {
    task: String,
    join: Joiner,
}

impl Ability for Await {
    type Output = Result<Box<dyn Any + Send>, TaskFailure>;
    const NAME: &'static str = "Await";
}

impl Await {
    /// Awaits `handle`.
    pub fn new<R: Send + 'static>(handle: TaskHandle<R>) -> Self {
        Self {
            task: handle.task().to_owned(),
            join: Box::new(move || handle.join().map(|value| Box::new(value) as Box<dyn Any + Send>)),
        }
    }

    /// Awaits whatever `join` blocks on, reported under the name `task`.
    pub(crate) fn from_joiner<F>(task: impl Into<String>, join: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn Any + Send>, TaskFailure> + Send + 'static,
    {
        Self {
            task: task.into(),
            join: Box::new(join),
        }
    }

    /// Name of the awaited task.
    #[must_use]
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Blocks until the task finishes.
    ///
    /// # Errors
    ///
    /// Returns the task's [`TaskFailure`].
    pub fn join(self) -> Result<Box<dyn Any + Send>, TaskFailure> {
        (self.join)()
    }
}

impl Debug for Await {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Await")
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

/// Resolves [`Await`] by blocking the driving thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockingAwait;

impl Handler<Await> for BlockingAwait {
    fn handle(&self, request: Await) -> Resolution<Await> {
        Resolution::Resolved(request.join())
    }
}

/// Submits `task` to the executors supplied as `Need<Parallel>`.
///
/// Produces the handle as soon as the task is accepted. Aborts with
/// [`Fault::NonTransferable`] or [`Fault::ExecutorUnavailable`] if it is not.
pub fn fork<E: ErrorSet, R: Send + 'static>(task: Task<R>) -> Effect<E, TaskHandle<R>> {
    need::<Parallel, E>().flat_map(move |executors| match executors.submit(task) {
        Ok(handle) => Effect::pure(handle),
        Err(fault) => {
            warn!(%fault, "task was not submitted");
            Effect::abort(fault)
        }
    })
}

/// Waits for a forked task and produces its value.
///
/// Aborts with [`Fault::TaskFailed`] if the task failed remotely.
pub fn wait<E: ErrorSet, R: Send + 'static>(handle: TaskHandle<R>) -> Effect<E, R> {
    let task = handle.task().to_owned();
    Effect::perform(Await::new(handle)).flat_map(move |outcome| match outcome {
        Ok(value) => match value.downcast::<R>() {
            Ok(value) => Effect::pure(*value),
            Err(_) => Effect::abort(
                TaskFailure::new(task, TaskFailureReason::Decode("unexpected result type".to_owned())).into(),
            ),
        },
        Err(failure) => {
            warn!(task = failure.task(), reason = %failure.reason(), "awaited task failed");
            Effect::abort(Fault::TaskFailed(failure))
        }
    })
}

/// Forks every task, then waits for all of them, producing the results in
/// task order.
///
/// All tasks are submitted before the first wait. The first failure, in
/// task order, aborts the computation.
pub fn parallel<E: ErrorSet, R: Send + 'static>(tasks: Vec<Task<R>>) -> Effect<E, Vec<R>> {
    Effect::sequence(tasks.into_iter().map(fork::<E, R>))
        .flat_map(|handles| Effect::sequence(handles.into_iter().map(wait::<E, R>)))
}
