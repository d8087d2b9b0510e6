use super::executor::{Completion, Executor, Pending, PoolError, SubmitError, UnitOfWork};
use super::task::ExecutionKind;
use crate::Runtime;
use crate::error::TaskFailure;
use crate::handler::HandlerStack;
use std::fmt::{self, Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// A fixed-size pool of worker threads.
///
/// Each task runs in a fresh driver over the pool's handler stack, which
/// starts with the [`Runtime::new`] built-ins. Panics inside a task are
/// caught and reported as [`TaskFailure`]s.
pub struct ThreadPool {
    pool: rayon::ThreadPool,
    handlers: HandlerStack,
    closed: AtomicBool,
    size: usize,
}

impl ThreadPool {
    /// Opens a pool of `size` threads.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] if `size` is zero or the threads cannot start.
    pub fn new(size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::ZeroSize(ExecutionKind::Thread));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|index| format!("stateless-thread-{index}"))
            .build()?;
        Ok(Self {
            pool,
            handlers: Runtime::new().handlers().clone(),
            closed: AtomicBool::new(false),
            size,
        })
    }

    /// Adds handlers every task on this pool runs with.
    #[must_use]
    pub fn with_handlers(mut self, handlers: &HandlerStack) -> Self {
        self.handlers = self.handlers.extend(handlers);
        self
    }

    /// Number of threads.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Handlers tasks run with.
    #[must_use]
    pub const fn handlers(&self) -> &HandlerStack {
        &self.handlers
    }
}

impl Executor for ThreadPool {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Thread
    }

    fn submit(&self, work: UnitOfWork) -> Result<Pending, SubmitError> {
        if self.is_closed() {
            return Err(SubmitError::Closed);
        }
        let UnitOfWork::Native { task, work } = work else {
            return Err(SubmitError::Unsupported {
                executor: ExecutionKind::Thread,
                work: ExecutionKind::Process,
            });
        };
        let (completer, pending) = Pending::channel(task.as_str());
        let handlers = self.handlers.clone();
        self.pool.spawn(move || {
            trace!(task = %task, "running task on thread pool");
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&handlers)))
                .unwrap_or_else(|payload| Err(TaskFailure::panicked(task.as_str(), payload.as_ref())));
            completer.complete(outcome.map(Completion::Native));
        });
        Ok(pending)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Debug for ThreadPool {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ThreadPool")
            .field("size", &self.size)
            .field("handlers", &self.handlers)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskFailureReason;
    use rstest::rstest;
    use std::any::Any;

    fn native(task: &str, work: impl FnOnce(&HandlerStack) -> Result<Box<dyn Any + Send>, TaskFailure> + Send + 'static) -> UnitOfWork {
        UnitOfWork::Native {
            task: task.to_owned(),
            work: Box::new(work),
        }
    }

    #[rstest]
    fn zero_sized_pool_is_rejected() {
        assert!(matches!(ThreadPool::new(0), Err(PoolError::ZeroSize(ExecutionKind::Thread))));
    }

    #[rstest]
    fn work_runs_with_the_pool_handlers() {
        let pool = ThreadPool::new(1).unwrap().with_handlers(&HandlerStack::new().supply(9_u8));
        let pending = pool
            .submit(native("count", |handlers| Ok(Box::new(handlers.len()))))
            .unwrap();
        let Completion::Native(value) = pending.wait().unwrap() else {
            panic!("thread pools complete natively");
        };
        assert_eq!(*value.downcast::<usize>().unwrap(), pool.handlers().len());
    }

    #[rstest]
    fn panics_are_reported_as_failures() {
        let pool = ThreadPool::new(1).unwrap();
        let pending = pool.submit(native("explode", |_| panic!("kaboom"))).unwrap();
        let failure = pending.wait().unwrap_err();
        assert_eq!(failure.reason(), &TaskFailureReason::Panicked("kaboom".to_owned()));
        assert_eq!(failure.task(), "explode");
    }
}
