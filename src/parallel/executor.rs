use super::process_pool::ProcessPool;
use super::task::{Decode, ExecutionKind, Job, NativeWork, Task, TaskHandle};
use super::thread_pool::ThreadPool;
use super::worker::WorkerRequest;
use crate::config::ParallelConfig;
use crate::error::{Fault, NonTransferableTaskError, TaskFailure, TaskFailureReason};
use crossbeam_channel::{Receiver, Sender};
use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

// =============================================================================
// Executor Interface
// =============================================================================

/// One submitted piece of work.
pub enum UnitOfWork {
    /// Runs in this process against the executor's handler stack.
    Native {
        /// Task name.
        task: String,
        /// The work itself.
        work: NativeWork,
    },
    /// A named function plus serialized arguments for a worker process.
    Serialized {
        /// Task name.
        task: String,
        /// The request sent to the worker.
        request: WorkerRequest,
    },
}

impl UnitOfWork {
    /// Name of the task.
    #[must_use]
    pub fn task(&self) -> &str {
        match self {
            Self::Native { task, .. } | Self::Serialized { task, .. } => task,
        }
    }
}

impl Debug for UnitOfWork {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native { task, .. } => formatter.debug_struct("Native").field("task", task).finish_non_exhaustive(),
            Self::Serialized { task, request } => formatter
                .debug_struct("Serialized")
                .field("task", task)
                .field("request", request)
                .finish(),
        }
    }
}

/// The successful outcome of a unit of work.
pub enum Completion {
    /// A value produced in this process.
    Native(Box<dyn Any + Send>),
    /// A serialized value produced by a worker process.
    Serialized(serde_json::Value),
}

impl Debug for Completion {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => formatter.write_str("Native(..)"),
            Self::Serialized(value) => formatter.debug_tuple("Serialized").field(value).finish(),
        }
    }
}

type Outcome = Result<Completion, TaskFailure>;

/// Sending half of a [`Pending`] outcome, held by the executor.
#[derive(Debug)]
pub struct Completer {
    sender: Sender<Outcome>,
}

impl Completer {
    /// Reports the outcome. Ignored if nobody awaits the task any more.
    pub fn complete(self, outcome: Result<Completion, TaskFailure>) {
        let _ = self.sender.send(outcome);
    }
}

/// The awaitable half of a submitted unit of work.
#[derive(Debug)]
pub struct Pending {
    task: String,
    receiver: Receiver<Outcome>,
}

impl Pending {
    /// Creates a connected completer and pending outcome for `task`.
    #[must_use]
    pub fn channel(task: impl Into<String>) -> (Completer, Self) {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        (
            Completer { sender },
            Self {
                task: task.into(),
                receiver,
            },
        )
    }

    /// Whether the outcome has arrived.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Blocks until the outcome arrives.
    ///
    /// # Errors
    ///
    /// Returns the task's failure, or [`TaskFailureReason::Disconnected`]
    /// if the executor dropped the work without reporting.
    pub fn wait(self) -> Result<Completion, TaskFailure> {
        let Self { task, receiver } = self;
        receiver
            .recv()
            .unwrap_or_else(|_| Err(TaskFailure::new(task, TaskFailureReason::Disconnected)))
    }
}

/// Why an executor refused work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The executor was closed.
    #[error("executor is closed")]
    Closed,
    /// The executor cannot run this form of work.
    #[error("{executor} executor cannot run {work} work")]
    Unsupported {
        /// Kind of the executor.
        executor: ExecutionKind,
        /// Kind of the refused work.
        work: ExecutionKind,
    },
}

/// Failure to open an executor.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A pool needs at least one worker.
    #[error("{0} pool size must be at least 1")]
    ZeroSize(ExecutionKind),
    /// The underlying thread pool could not be built.
    #[error("failed to build pool threads: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

/// Something that accepts units of work and reports their outcomes.
///
/// Implementations must report exactly one outcome per accepted unit,
/// through the [`Completer`] paired with the returned [`Pending`].
pub trait Executor: Send + Sync {
    /// The kind of task this executor runs.
    fn kind(&self) -> ExecutionKind;

    /// Accepts `work`, returning immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError`] if the executor is closed or cannot run the
    /// work.
    fn submit(&self, work: UnitOfWork) -> Result<Pending, SubmitError>;

    /// Stops accepting work. Accepted work still completes.
    fn close(&self);

    /// Whether [`close`](Self::close) was called.
    fn is_closed(&self) -> bool;
}

// =============================================================================
// Parallel
// =============================================================================

/// The executors available to [`fork`](super::fork), supplied to effects
/// as `Need<Parallel>`.
///
/// Cloning shares the executors.
#[derive(Clone, Default)]
pub struct Parallel {
    threads: Option<Arc<dyn Executor>>,
    processes: Option<Arc<dyn Executor>>,
}

impl Parallel {
    /// No executors; every submission fails until some are added.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the pools described by `config`.
    ///
    /// A process pool is opened only when a worker command is configured.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] if a pool cannot be built.
    pub fn open(config: &ParallelConfig) -> Result<Self, PoolError> {
        let parallel = Self::new().with_executor(Arc::new(ThreadPool::new(config.thread_pool_size)?));
        match &config.worker {
            Some(command) => Ok(parallel.with_executor(Arc::new(ProcessPool::new(
                command.clone(),
                config.process_pool_size,
            )?))),
            None => Ok(parallel),
        }
    }

    /// Opens the pools described by `config`, passes them to `body`, and
    /// closes them when `body` returns or unwinds.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] if a pool cannot be built.
    pub fn scoped<T, F>(config: &ParallelConfig, body: F) -> Result<T, PoolError>
    where
        F: FnOnce(&Self) -> T,
    {
        struct CloseOnExit(Parallel);

        impl Drop for CloseOnExit {
            fn drop(&mut self) {
                self.0.close();
            }
        }

        let guard = CloseOnExit(Self::open(config)?);
        Ok(body(&guard.0))
    }

    /// Routes tasks of the executor's kind to `executor`.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        match executor.kind() {
            ExecutionKind::Thread => self.threads = Some(executor),
            ExecutionKind::Process => self.processes = Some(executor),
        }
        self
    }

    /// The executor for `kind`, if any.
    #[must_use]
    pub fn executor(&self, kind: ExecutionKind) -> Option<&Arc<dyn Executor>> {
        match kind {
            ExecutionKind::Thread => self.threads.as_ref(),
            ExecutionKind::Process => self.processes.as_ref(),
        }
    }

    /// Closes every executor.
    pub fn close(&self) {
        for executor in self.threads.iter().chain(self.processes.iter()) {
            executor.close();
        }
    }

    /// Submits `task` to the executor of its kind.
    ///
    /// # Errors
    ///
    /// - [`Fault::NonTransferable`] if the task cannot cross to its executor
    /// - [`Fault::ExecutorUnavailable`] if no open executor accepts it
    pub fn submit<R: Send + 'static>(&self, task: Task<R>) -> Result<TaskHandle<R>, Fault> {
        let Task { name, kind, job } = task;
        let (work, decode) = match job {
            Job::Native(_) if kind == ExecutionKind::Process => {
                return Err(NonTransferableTaskError::new(name, kind, "closures cannot cross a process boundary").into());
            }
            Job::Native(work) => (
                UnitOfWork::Native {
                    task: name.clone(),
                    work,
                },
                Decode::Native,
            ),
            Job::Serialized { payload, decode } => {
                let payload = payload.map_err(|reason| NonTransferableTaskError::new(name.as_str(), kind, reason))?;
                (
                    UnitOfWork::Serialized {
                        task: name.clone(),
                        request: WorkerRequest::new(name.as_str(), payload),
                    },
                    Decode::Json(decode),
                )
            }
        };
        let executor = self.executor(kind).ok_or_else(|| Fault::ExecutorUnavailable {
            kind,
            reason: "no executor configured".to_owned(),
        })?;
        debug!(task = %name, %kind, "submitting task");
        let pending = executor.submit(work).map_err(|error| Fault::ExecutorUnavailable {
            kind,
            reason: error.to_string(),
        })?;
        Ok(TaskHandle::new(name, pending, decode))
    }
}

impl Debug for Parallel {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Parallel")
            .field("threads", &self.threads.is_some())
            .field("processes", &self.processes.is_some())
            .finish()
    }
}

static_assertions::assert_impl_all!(Parallel: Send, Sync, Clone);
