//! The worker side of process execution.
//!
//! A worker program builds a [`Registry`] of the task functions it can run
//! and calls [`serve`]. It reads one [`WorkerRequest`] as JSON from stdin,
//! runs the named function to completion, and writes the
//! [`WorkerOutcome`] on stdout as a single line prefixed with
//! [`OUTCOME_MARKER`]. Anything else the task prints is ignored by the
//! pool.
//!
//! # Examples
//!
//! ```rust
//! use stateless::Effect;
//! use stateless::error::ErrNil;
//! use stateless::parallel::TaskFn;
//! use stateless::parallel::worker::{self, Registry, WorkerOutcome};
//!
//! fn add((left, right): (i64, i64)) -> Effect<ErrNil, i64> {
//!     Effect::pure(left + right)
//! }
//!
//! let registry = Registry::new().register(TaskFn::new("add", add));
//!
//! let mut output = Vec::new();
//! worker::serve_from(&registry, &br#"{"function":"add","payload":[2,3]}"#[..], &mut output).unwrap();
//!
//! let outcome = worker::parse_outcome(&String::from_utf8(output).unwrap());
//! assert_eq!(outcome, Some(WorkerOutcome::Completed(serde_json::json!(5))));
//! ```

use super::executor::Completion;
use super::task::TaskFn;
use crate::Runtime;
use crate::error::{ErrorSet, RunError, TaskFailure, TaskFailureReason, panic_message};
use crate::handler::HandlerStack;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Prefix of the stdout line carrying the outcome.
pub const OUTCOME_MARKER: &str = "@@stateless-outcome@@ ";

/// A request to run one registered task function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Registered task name.
    pub function: String,
    /// The serialized arguments.
    pub payload: Value,
}

impl WorkerRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(function: impl Into<String>, payload: Value) -> Self {
        Self {
            function: function.into(),
            payload,
        }
    }
}

/// How a worker run ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerOutcome {
    /// The function completed with this serialized result.
    Completed(Value),
    /// The function ended with an error or fault.
    Failed(String),
    /// The function panicked.
    Panicked(String),
    /// No function of this name is registered.
    UnknownFunction(String),
    /// The request or its arguments could not be decoded.
    InvalidPayload(String),
}

impl WorkerOutcome {
    /// Converts to the pool-side outcome of `task`.
    ///
    /// # Errors
    ///
    /// Returns a [`TaskFailure`] for every outcome but `Completed`.
    pub fn into_completion(self, task: &str) -> Result<Completion, TaskFailure> {
        let reason = match self {
            Self::Completed(value) => return Ok(Completion::Serialized(value)),
            Self::Failed(message) => TaskFailureReason::Error(message),
            Self::Panicked(message) => TaskFailureReason::Panicked(message),
            Self::UnknownFunction(name) => TaskFailureReason::Worker(format!("no task named `{name}` is registered")),
            Self::InvalidPayload(message) => TaskFailureReason::Worker(format!("invalid payload: {message}")),
        };
        Err(TaskFailure::new(task, reason))
    }
}

type Entry = Box<dyn Fn(Value, &HandlerStack) -> WorkerOutcome + Send + Sync>;

/// The task functions a worker can run, keyed by name.
pub struct Registry {
    entries: HashMap<&'static str, Entry>,
    handlers: HandlerStack,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An empty registry whose tasks run with the [`Runtime::new`] built-ins.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            handlers: Runtime::new().handlers().clone(),
        }
    }

    /// Adds handlers every task runs with.
    #[must_use]
    pub fn with_handlers(mut self, handlers: &HandlerStack) -> Self {
        self.handlers = self.handlers.extend(handlers);
        self
    }

    /// Registers `task` under its name, replacing any previous entry.
    #[must_use]
    pub fn register<A, E, R>(mut self, task: TaskFn<A, E, R>) -> Self
    where
        A: DeserializeOwned + 'static,
        E: ErrorSet,
        R: Serialize + 'static,
    {
        let function = task.function();
        let entry: Entry = Box::new(move |payload: Value, handlers: &HandlerStack| {
            let args = match serde_json::from_value::<A>(payload) {
                Ok(args) => args,
                Err(error) => return WorkerOutcome::InvalidPayload(error.to_string()),
            };
            match Runtime::from_handlers(handlers.clone()).run(function(args)) {
                Ok(value) => serde_json::to_value(&value).map_or_else(
                    |error| WorkerOutcome::Failed(format!("result is not serializable: {error}")),
                    WorkerOutcome::Completed,
                ),
                Err(RunError::Failed(error)) => WorkerOutcome::Failed(format!("{error:?}")),
                Err(error) => WorkerOutcome::Failed(error.to_string()),
            }
        });
        self.entries.insert(task.name(), entry);
        self
    }

    /// Whether a task of this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Runs the requested function to completion.
    pub fn execute(&self, request: WorkerRequest) -> WorkerOutcome {
        let WorkerRequest { function, payload } = request;
        let Some(entry) = self.entries.get(function.as_str()) else {
            warn!(task = %function, "unknown task requested");
            return WorkerOutcome::UnknownFunction(function);
        };
        debug!(task = %function, "executing task");
        panic::catch_unwind(AssertUnwindSafe(|| entry(payload, &self.handlers)))
            .unwrap_or_else(|payload| WorkerOutcome::Panicked(panic_message(payload.as_ref())))
    }
}

impl Debug for Registry {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let mut names = self.entries.keys().collect::<Vec<_>>();
        names.sort_unstable();
        formatter
            .debug_struct("Registry")
            .field("tasks", &names)
            .field("handlers", &self.handlers)
            .finish()
    }
}

/// Serves one request from stdin to stdout.
///
/// # Errors
///
/// Returns an I/O error if stdin or stdout fail.
pub fn serve(registry: &Registry) -> io::Result<()> {
    serve_from(registry, io::stdin().lock(), io::stdout().lock())
}

/// Serves one request read from `input`, writing the outcome line to
/// `output`.
///
/// # Errors
///
/// Returns an I/O error if reading or writing fails.
pub fn serve_from<I: Read, O: Write>(registry: &Registry, mut input: I, mut output: O) -> io::Result<()> {
    let mut raw = String::new();
    input.read_to_string(&mut raw)?;
    let outcome = match serde_json::from_str::<WorkerRequest>(&raw) {
        Ok(request) => registry.execute(request),
        Err(error) => WorkerOutcome::InvalidPayload(error.to_string()),
    };
    let encoded = serde_json::to_string(&outcome).map_err(io::Error::other)?;
    writeln!(output)?;
    writeln!(output, "{OUTCOME_MARKER}{encoded}")?;
    output.flush()
}

/// Finds the outcome line in a worker's stdout.
#[must_use]
pub fn parse_outcome(stdout: &str) -> Option<WorkerOutcome> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(OUTCOME_MARKER))
        .and_then(|encoded| serde_json::from_str(encoded).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Effect;
    use crate::errors;
    use crate::error::ErrNil;
    use rstest::rstest;
    use serde_json::json;

    #[derive(Debug)]
    struct Negative;

    fn root(value: f64) -> Effect<errors![Negative], f64> {
        if value < 0.0 {
            Effect::fail(Negative)
        } else {
            Effect::pure(value.sqrt())
        }
    }

    fn explode(_: ()) -> Effect<ErrNil, ()> {
        Effect::sync(|| panic!("worker blew up"))
    }

    fn registry() -> Registry {
        Registry::new()
            .register(TaskFn::new("root", root))
            .register(TaskFn::new("explode", explode))
    }

    #[rstest]
    #[case(WorkerRequest::new("root", json!(16.0)), WorkerOutcome::Completed(json!(4.0)))]
    #[case(WorkerRequest::new("root", json!(-1.0)), WorkerOutcome::Failed("Negative".to_owned()))]
    #[case(WorkerRequest::new("root", json!("sixteen")), WorkerOutcome::InvalidPayload(String::new()))]
    #[case(WorkerRequest::new("missing", json!(null)), WorkerOutcome::UnknownFunction("missing".to_owned()))]
    #[case(WorkerRequest::new("explode", json!(null)), WorkerOutcome::Panicked("worker blew up".to_owned()))]
    fn execute_reports_each_outcome(#[case] request: WorkerRequest, #[case] expected: WorkerOutcome) {
        let outcome = registry().execute(request);
        match (outcome, expected) {
            (WorkerOutcome::InvalidPayload(_), WorkerOutcome::InvalidPayload(_)) => {}
            (outcome, expected) => assert_eq!(outcome, expected),
        }
    }

    #[rstest]
    fn outcome_line_survives_surrounding_output() {
        let mut output = b"task chatter without newline".to_vec();
        serve_from(&registry(), &br#"{"function":"root","payload":9.0}"#[..], &mut output).unwrap();
        let stdout = format!("{}\nmore chatter\n", String::from_utf8(output).unwrap());
        assert_eq!(parse_outcome(&stdout), Some(WorkerOutcome::Completed(json!(3.0))));
    }

    #[rstest]
    fn malformed_request_is_an_invalid_payload() {
        let mut output = Vec::new();
        serve_from(&registry(), &b"not json"[..], &mut output).unwrap();
        let outcome = parse_outcome(&String::from_utf8(output).unwrap());
        assert!(matches!(outcome, Some(WorkerOutcome::InvalidPayload(_))));
    }

    #[rstest]
    fn failures_convert_to_task_failures() {
        let failure = WorkerOutcome::UnknownFunction("gone".to_owned())
            .into_completion("gone")
            .unwrap_err();
        assert_eq!(failure.to_string(), "task `gone` failed: worker failure: no task named `gone` is registered");
    }

    #[rstest]
    fn registry_lists_registered_names() {
        let registry = registry();
        assert!(registry.contains("root"));
        assert!(!registry.contains("add"));
    }
}
