//! Structural errors of the runtime.
//!
//! These are distinct from the recoverable errors carried in an effect's
//! error row: they describe misuse of a [`Computation`](crate::Computation)
//! cursor, abilities nobody handles, and unrecoverable [`Fault`]s such as a
//! failed remote task. None of them can be caught from inside an effect.

use crate::effect::ComputationState;
use crate::parallel::ExecutionKind;
use std::any::Any;
use std::fmt::Debug;
use thiserror::Error;

/// Extracts the message of a caught panic.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

/// An ability request reached the driver and no handler resolved it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no handler resolved ability `{ability}` ({type_name})")]
pub struct UnhandledAbilityError {
    ability: &'static str,
    type_name: &'static str,
}

impl UnhandledAbilityError {
    /// Creates a new error for the named ability.
    #[must_use]
    pub const fn new(ability: &'static str, type_name: &'static str) -> Self {
        Self { ability, type_name }
    }

    /// The ability's declared name.
    #[must_use]
    pub const fn ability(&self) -> &'static str {
        self.ability
    }

    /// The full Rust type name of the ability.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// A dynamically supplied instance does not cover the requested ability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("supplied instance is not a `{expected}`")]
pub struct AbilityTypeMismatchError {
    expected: &'static str,
}

impl AbilityTypeMismatchError {
    /// Creates the error for an instance that was expected to be a `T`.
    #[must_use]
    pub fn of<T: ?Sized>() -> Self {
        Self {
            expected: std::any::type_name::<T>(),
        }
    }

    /// Name of the expected type.
    #[must_use]
    pub const fn expected(&self) -> &'static str {
        self.expected
    }
}

/// A computation cursor was advanced in a state that does not allow it.
///
/// Raised for `start` after the first step, `resume` before `start`, and
/// any advance of a computation that completed, failed or aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {operation}: computation is {state}")]
pub struct ReuseError {
    operation: &'static str,
    state: ComputationState,
}

impl ReuseError {
    /// Creates a reuse error for `operation` attempted in `state`.
    #[must_use]
    pub const fn new(operation: &'static str, state: ComputationState) -> Self {
        Self { operation, state }
    }

    /// The rejected operation.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        self.operation
    }

    /// The state the computation was in.
    #[must_use]
    pub const fn state(&self) -> ComputationState {
        self.state
    }
}

/// A suspended computation was resumed with a value of the wrong type.
///
/// The computation is left suspended and can be resumed again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ability `{ability}` must be resumed with `{expected}`")]
pub struct ResumeTypeError {
    ability: &'static str,
    expected: &'static str,
}

impl ResumeTypeError {
    /// Creates the error for `ability`, whose output type is `expected`.
    #[must_use]
    pub const fn new(ability: &'static str, expected: &'static str) -> Self {
        Self { ability, expected }
    }

    /// The suspended ability's name.
    #[must_use]
    pub const fn ability(&self) -> &'static str {
        self.ability
    }

    /// The output type the ability declares.
    #[must_use]
    pub const fn expected(&self) -> &'static str {
        self.expected
    }
}

/// A task cannot be handed to the executor it was submitted to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task `{task}` cannot be transferred to a {kind} executor: {reason}")]
pub struct NonTransferableTaskError {
    task: String,
    kind: ExecutionKind,
    reason: String,
}

impl NonTransferableTaskError {
    /// Creates the error.
    #[must_use]
    pub fn new(task: impl Into<String>, kind: ExecutionKind, reason: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            kind,
            reason: reason.into(),
        }
    }

    /// Name of the rejected task.
    #[must_use]
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Executor kind the task was submitted to.
    #[must_use]
    pub const fn kind(&self) -> ExecutionKind {
        self.kind
    }
}

/// Why a forked task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailureReason {
    /// The task ended with an uncaught recoverable error.
    #[error("uncaught error: {0}")]
    Error(String),
    /// The task panicked.
    #[error("panicked: {0}")]
    Panicked(String),
    /// The task aborted with an unrecoverable fault of its own.
    #[error("fault: {0}")]
    Fault(String),
    /// The task could not run, or its worker broke the protocol.
    #[error("worker failure: {0}")]
    Worker(String),
    /// The task's result could not be decoded.
    #[error("undecodable result: {0}")]
    Decode(String),
    /// The executor dropped the task before reporting an outcome.
    #[error("executor dropped the task")]
    Disconnected,
}

/// A forked task failed remotely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task `{task}` failed: {reason}")]
pub struct TaskFailure {
    task: String,
    reason: TaskFailureReason,
}

impl TaskFailure {
    /// Creates a failure of `task`.
    #[must_use]
    pub fn new(task: impl Into<String>, reason: TaskFailureReason) -> Self {
        Self {
            task: task.into(),
            reason,
        }
    }

    /// Creates a failure from a caught panic payload.
    #[must_use]
    pub fn panicked(task: impl Into<String>, payload: &(dyn Any + Send)) -> Self {
        Self::new(task, TaskFailureReason::Panicked(panic_message(payload)))
    }

    /// Describes how a task's own run ended unsuccessfully.
    pub fn from_run<E: Debug>(task: impl Into<String>, error: RunError<E>) -> Self {
        let reason = match error {
            RunError::Failed(error) => TaskFailureReason::Error(format!("{error:?}")),
            RunError::UnhandledAbility(error) => TaskFailureReason::Worker(error.to_string()),
            RunError::Fault(fault) => TaskFailureReason::Fault(fault.to_string()),
        };
        Self::new(task, reason)
    }

    /// Name of the failed task.
    #[must_use]
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Why the task failed.
    #[must_use]
    pub const fn reason(&self) -> &TaskFailureReason {
        &self.reason
    }
}

/// An unrecoverable fault. Terminates the run and is never part of an
/// error row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// A task could not be submitted to its executor.
    #[error(transparent)]
    NonTransferable(#[from] NonTransferableTaskError),
    /// A forked task failed; raised where the task is awaited.
    #[error(transparent)]
    TaskFailed(#[from] TaskFailure),
    /// The executor for a task kind is closed or was never configured.
    #[error("{kind} executor unavailable: {reason}")]
    ExecutorUnavailable {
        /// Requested executor kind.
        kind: ExecutionKind,
        /// Why it cannot accept work.
        reason: String,
    },
    /// A type-erased value did not have the type its step expected.
    #[error("interpreter type mismatch in {context}")]
    Interpreter {
        /// Where the mismatch was detected.
        context: &'static str,
    },
}

/// Error returned when stepping a [`Computation`](crate::Computation).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The step is not allowed in the current state.
    #[error(transparent)]
    Reuse(#[from] ReuseError),
    /// The resumption value has the wrong type.
    #[error(transparent)]
    ResumeType(#[from] ResumeTypeError),
    /// The computation aborted with a fault.
    #[error(transparent)]
    Fault(#[from] Fault),
}

/// Error returned by a driver run.
#[derive(Debug, Error)]
pub enum RunError<E> {
    /// The computation ended with an uncaught recoverable error.
    #[error("computation failed: {0:?}")]
    Failed(E),
    /// An ability request was not resolved by any handler.
    #[error(transparent)]
    UnhandledAbility(#[from] UnhandledAbilityError),
    /// The computation aborted with an unrecoverable fault.
    #[error(transparent)]
    Fault(#[from] Fault),
}

impl<E> RunError<E> {
    /// Returns the recoverable error, if that is what ended the run.
    pub fn failed(self) -> Option<E> {
        match self {
            Self::Failed(error) => Some(error),
            Self::UnhandledAbility(_) | Self::Fault(_) => None,
        }
    }

    /// Returns the fault, if the run aborted.
    pub const fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Fault(fault) => Some(fault),
            Self::Failed(_) | Self::UnhandledAbility(_) => None,
        }
    }

    /// Whether no handler resolved some ability request.
    pub const fn is_unhandled(&self) -> bool {
        matches!(self, Self::UnhandledAbility(_))
    }
}

impl<E> From<StepError> for RunError<E> {
    fn from(error: StepError) -> Self {
        match error {
            StepError::Fault(fault) => Self::Fault(fault),
            StepError::Reuse(_) => Self::Fault(Fault::Interpreter {
                context: "driver stepped a finished computation",
            }),
            StepError::ResumeType(_) => Self::Fault(Fault::Interpreter {
                context: "handler output type",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn reuse_error_names_operation_and_state() {
        let error = ReuseError::new("resume", ComputationState::Completed);
        assert_eq!(error.to_string(), "cannot resume: computation is completed");
    }

    #[rstest]
    fn panic_payload_strings_are_preserved() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let failure = TaskFailure::panicked("work", payload.as_ref());
        assert_eq!(
            failure.reason(),
            &TaskFailureReason::Panicked("boom".to_owned())
        );

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let failure = TaskFailure::panicked("work", payload.as_ref());
        assert_eq!(failure.to_string(), "task `work` failed: panicked: owned");
    }

    #[rstest]
    fn run_error_accessors() {
        let failed: RunError<&str> = RunError::Failed("nope");
        assert!(!failed.is_unhandled());
        assert!(failed.fault().is_none());
        assert_eq!(failed.failed(), Some("nope"));

        let unhandled: RunError<&str> = UnhandledAbilityError::new("Need", "Need<u8>").into();
        assert!(unhandled.is_unhandled());
    }

    #[rstest]
    fn fault_from_task_failure_is_transparent() {
        let fault = Fault::from(TaskFailure::new("job", TaskFailureReason::Disconnected));
        assert_eq!(fault.to_string(), "task `job` failed: executor dropped the task");
    }
}
