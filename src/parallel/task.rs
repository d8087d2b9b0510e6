use super::executor::{Completion, Pending};
use crate::Runtime;
use crate::effect::Effect;
use crate::error::{ErrorSet, TaskFailure, TaskFailureReason};
use crate::handler::HandlerStack;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::{self, Debug, Display, Formatter};

/// Where a task runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    /// On a worker thread of this process.
    Thread,
    /// In a separate worker process.
    Process,
}

impl Display for ExecutionKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Thread => "thread",
            Self::Process => "process",
        })
    }
}

/// Work that runs against a handler stack inside this process.
pub type NativeWork =
    Box<dyn FnOnce(&HandlerStack) -> Result<Box<dyn Any + Send>, TaskFailure> + Send>;

pub(super) type Decoder<R> = fn(serde_json::Value) -> Result<R, serde_json::Error>;

/// A named effectful function that can be shipped to an executor.
///
/// The name identifies the function in a worker [`Registry`](super::worker::Registry),
/// so it must be unique among registered task functions.
///
/// # Examples
///
/// ```rust
/// use stateless::{Effect, Runtime};
/// use stateless::error::ErrNil;
/// use stateless::parallel::TaskFn;
///
/// fn double(value: u64) -> Effect<ErrNil, u64> {
///     Effect::pure(value * 2)
/// }
///
/// const DOUBLE: TaskFn<u64, ErrNil, u64> = TaskFn::new("double", double);
///
/// assert_eq!(DOUBLE.name(), "double");
/// assert_eq!(Runtime::new().run(DOUBLE.call(21)).unwrap(), 42);
/// ```
pub struct TaskFn<A, E, R> {
    name: &'static str,
    function: fn(A) -> Effect<E, R>,
}

impl<A, E, R> Clone for TaskFn<A, E, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, E, R> Copy for TaskFn<A, E, R> {}

impl<A, E, R> Debug for TaskFn<A, E, R> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TaskFn")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<A, E, R> TaskFn<A, E, R> {
    /// Names `function`.
    #[must_use]
    pub const fn new(name: &'static str, function: fn(A) -> Effect<E, R>) -> Self {
        Self { name, function }
    }

    /// The registered name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub(super) const fn function(&self) -> fn(A) -> Effect<E, R> {
        self.function
    }
}

impl<A: 'static, E: ErrorSet, R: 'static> TaskFn<A, E, R> {
    /// Builds the effect in-process.
    pub fn call(&self, args: A) -> Effect<E, R> {
        (self.function)(args)
    }

    /// A task running on a thread executor.
    pub fn thread(&self, args: A) -> Task<R>
    where
        A: Send,
        R: Send,
    {
        let function = self.function;
        let name = self.name;
        Task {
            name: name.to_owned(),
            kind: ExecutionKind::Thread,
            job: Job::Native(Box::new(move |handlers: &HandlerStack| {
                Runtime::from_handlers(handlers.clone())
                    .run(function(args))
                    .map(|value| Box::new(value) as Box<dyn Any + Send>)
                    .map_err(|error| TaskFailure::from_run(name, error))
            })),
        }
    }

    /// A task running in a worker process.
    ///
    /// The arguments are serialized now; a failure is reported when the
    /// task is forked.
    pub fn process(&self, args: A) -> Task<R>
    where
        A: Serialize,
        R: DeserializeOwned + Send,
    {
        Task {
            name: self.name.to_owned(),
            kind: ExecutionKind::Process,
            job: Job::Serialized {
                payload: serde_json::to_value(&args).map_err(|error| error.to_string()),
                decode: serde_json::from_value::<R>,
            },
        }
    }
}

pub(super) enum Job<R> {
    Native(NativeWork),
    Serialized {
        payload: Result<serde_json::Value, String>,
        decode: Decoder<R>,
    },
}

/// An immutable bundle of work for an executor, consumed by
/// [`fork`](super::fork).
pub struct Task<R> {
    pub(super) name: String,
    pub(super) kind: ExecutionKind,
    pub(super) job: Job<R>,
}

impl<R: Send + 'static> Task<R> {
    /// A task from an arbitrary closure.
    ///
    /// Closures can only run on thread executors; forking one as a
    /// [`ExecutionKind::Process`] task fails with
    /// [`NonTransferableTaskError`](crate::error::NonTransferableTaskError).
    pub fn from_closure<E, F>(kind: ExecutionKind, name: impl Into<String>, effect: F) -> Self
    where
        E: ErrorSet,
        F: FnOnce() -> Effect<E, R> + Send + 'static,
    {
        let name = name.into();
        let task = name.clone();
        Self {
            name,
            kind,
            job: Job::Native(Box::new(move |handlers: &HandlerStack| {
                Runtime::from_handlers(handlers.clone())
                    .run(Effect::lazy(effect))
                    .map(|value| Box::new(value) as Box<dyn Any + Send>)
                    .map_err(|error| TaskFailure::from_run(task, error))
            })),
        }
    }
}

impl<R> Task<R> {
    /// The task's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the task runs.
    #[must_use]
    pub const fn kind(&self) -> ExecutionKind {
        self.kind
    }
}

impl<R> Debug for Task<R> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Task")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

pub(super) enum Decode<R> {
    Native,
    Json(Decoder<R>),
}

/// A submitted task; await it with [`wait`](super::wait).
pub struct TaskHandle<R> {
    task: String,
    pending: Pending,
    decode: Decode<R>,
}

impl<R: 'static> TaskHandle<R> {
    pub(super) const fn new(task: String, pending: Pending, decode: Decode<R>) -> Self {
        Self {
            task,
            pending,
            decode,
        }
    }

    /// Name of the task.
    #[must_use]
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Whether the outcome is already available.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.pending.is_ready()
    }

    /// Blocks until the task finishes.
    ///
    /// # Errors
    ///
    /// Returns the [`TaskFailure`] describing a remote failure.
    pub fn join(self) -> Result<R, TaskFailure> {
        let Self {
            task,
            pending,
            decode,
        } = self;
        match (pending.wait()?, decode) {
            (Completion::Native(value), Decode::Native) => value.downcast::<R>().map(|value| *value).map_err(|_| {
                TaskFailure::new(task, TaskFailureReason::Decode("unexpected result type".to_owned()))
            }),
            (Completion::Serialized(value), Decode::Json(decode)) => {
                decode(value).map_err(|error| TaskFailure::new(task, TaskFailureReason::Decode(error.to_string())))
            }
            (Completion::Native(_), Decode::Json(_)) | (Completion::Serialized(_), Decode::Native) => Err(
                TaskFailure::new(task, TaskFailureReason::Decode("executor returned the wrong kind of result".to_owned())),
            ),
        }
    }
}

impl<R> Debug for TaskHandle<R> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TaskHandle")
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}
