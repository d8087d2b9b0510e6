use super::executor::{Completion, Executor, Pending, PoolError, SubmitError, UnitOfWork};
use super::task::ExecutionKind;
use super::worker::{self, WorkerRequest};
use crate::error::{TaskFailure, TaskFailureReason};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// How to start a worker process.
///
/// The program must call [`worker::serve`] with a registry containing every
/// task function submitted to the pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    /// Executable to start.
    pub program: PathBuf,
    /// Arguments passed to every worker.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl WorkerCommand {
    /// Runs `program` without arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        command
    }
}

/// Runs serialized tasks in worker processes, one process per task.
///
/// At most `size` workers run at once. Only tasks built with
/// [`TaskFn::process`](super::TaskFn::process) are accepted.
pub struct ProcessPool {
    dispatcher: rayon::ThreadPool,
    command: Arc<WorkerCommand>,
    closed: AtomicBool,
    size: usize,
}

impl ProcessPool {
    /// Opens a pool running at most `size` workers started by `command`.
    ///
    /// No process starts until work is submitted.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] if `size` is zero or the dispatch threads
    /// cannot start.
    pub fn new(command: WorkerCommand, size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::ZeroSize(ExecutionKind::Process));
        }
        let dispatcher = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|index| format!("stateless-process-{index}"))
            .build()?;
        Ok(Self {
            dispatcher,
            command: Arc::new(command),
            closed: AtomicBool::new(false),
            size,
        })
    }

    /// Maximum number of concurrent workers.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// The worker command.
    #[must_use]
    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }
}

impl Executor for ProcessPool {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Process
    }

    fn submit(&self, work: UnitOfWork) -> Result<Pending, SubmitError> {
        if self.is_closed() {
            return Err(SubmitError::Closed);
        }
        let UnitOfWork::Serialized { task, request } = work else {
            return Err(SubmitError::Unsupported {
                executor: ExecutionKind::Process,
                work: ExecutionKind::Thread,
            });
        };
        let (completer, pending) = Pending::channel(task.as_str());
        let command = Arc::clone(&self.command);
        self.dispatcher.spawn(move || {
            completer.complete(run_worker(&command, &task, &request));
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

impl Debug for ProcessPool {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ProcessPool")
            .field("command", &self.command)
            .field("size", &self.size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Kills the worker if it is still running when dropped.
struct Reaper(Option<Child>);

impl Reaper {
    fn take(&mut self) -> Option<Child> {
        self.0.take()
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn worker_failure(task: &str, message: impl Into<String>) -> TaskFailure {
    TaskFailure::new(task, TaskFailureReason::Worker(message.into()))
}

fn run_worker(command: &WorkerCommand, task: &str, request: &WorkerRequest) -> Result<Completion, TaskFailure> {
    let encoded = serde_json::to_vec(request).map_err(|error| worker_failure(task, error.to_string()))?;
    let child = command.command().spawn().map_err(|error| {
        warn!(task, program = %command.program.display(), %error, "failed to start worker");
        worker_failure(task, format!("failed to start worker: {error}"))
    })?;
    debug!(task, pid = child.id(), "started worker");
    let mut reaper = Reaper(Some(child));

    if let Some(mut stdin) = reaper.0.as_mut().and_then(|child| child.stdin.take()) {
        stdin
            .write_all(&encoded)
            .map_err(|error| worker_failure(task, format!("failed to send request: {error}")))?;
    }

    let Some(child) = reaper.take() else {
        return Err(worker_failure(task, "worker vanished"));
    };
    let output = child
        .wait_with_output()
        .map_err(|error| worker_failure(task, format!("failed to collect output: {error}")))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    match worker::parse_outcome(&stdout) {
        Some(outcome) => {
            debug!(task, status = %output.status, "worker finished");
            outcome.into_completion(task)
        }
        None => {
            warn!(task, status = %output.status, "worker exited without an outcome");
            Err(worker_failure(task, format!("worker exited ({}) without reporting an outcome", output.status)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn zero_sized_pool_is_rejected() {
        assert!(matches!(
            ProcessPool::new(WorkerCommand::new("worker"), 0),
            Err(PoolError::ZeroSize(ExecutionKind::Process))
        ));
    }

    #[rstest]
    fn command_builder_accumulates() {
        let command = WorkerCommand::new("worker").arg("--serve").env("MODE", "test");
        assert_eq!(command.args, vec!["--serve".to_owned()]);
        assert_eq!(command.env.get("MODE").map(String::as_str), Some("test"));
    }

    #[rstest]
    fn native_work_is_unsupported() {
        let pool = ProcessPool::new(WorkerCommand::new("worker"), 1).unwrap();
        let work = UnitOfWork::Native {
            task: "closure".to_owned(),
            work: Box::new(|_| Ok(Box::new(()))),
        };
        assert_eq!(
            pool.submit(work).unwrap_err(),
            SubmitError::Unsupported {
                executor: ExecutionKind::Process,
                work: ExecutionKind::Thread,
            }
        );
    }

    #[rstest]
    fn missing_program_is_a_worker_failure() {
        let pool = ProcessPool::new(WorkerCommand::new("/nonexistent/stateless-worker"), 1).unwrap();
        let work = UnitOfWork::Serialized {
            task: "lost".to_owned(),
            request: WorkerRequest::new("lost", json!(null)),
        };
        let failure = pool.submit(work).unwrap().wait().unwrap_err();
        assert!(matches!(failure.reason(), TaskFailureReason::Worker(message) if message.starts_with("failed to start worker")));
    }

    #[rstest]
    fn command_deserializes_with_defaults() {
        let command: WorkerCommand = serde_json::from_value(json!({ "program": "bin/worker" })).unwrap();
        assert_eq!(command, WorkerCommand::new("bin/worker"));
    }
}
