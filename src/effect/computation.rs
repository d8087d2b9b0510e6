//! Step-by-step cursor over an effect.
//!
//! A [`Computation`] is what drivers advance. It moves through
//!
//! ```text
//! Fresh --start--> Suspended --resume--> Suspended ... --> Completed | Failed | Aborted
//! ```
//!
//! and rejects every other transition with a [`ReuseError`], so a finished
//! computation never yields stale data and no step ever runs twice.
//!
//! # Examples
//!
//! ```rust
//! use stateless::{Effect, Suspension, need};
//! use stateless::error::ErrNil;
//!
//! let program: Effect<ErrNil, usize> = need::<String, _>().fmap(|name| name.len());
//! let mut computation = program.into_computation();
//!
//! let Ok(Suspension::Ability(request)) = computation.start() else { panic!() };
//! assert_eq!(request.name(), "Need");
//!
//! let Ok(Suspension::Complete(length)) = computation.resume_with(String::from("ada")) else { panic!() };
//! assert_eq!(length, 3);
//! assert!(computation.start().is_err());
//! ```

use super::machine::{Exit, Machine, Node};
use crate::ability::AbilityRequest;
use crate::error::{ErrorSet, Fault, ResumeTypeError, ReuseError, StepError};
use std::any::{Any, TypeId};
use std::fmt::{self, Debug, Display, Formatter};
use std::marker::PhantomData;

/// Where a [`Computation`] is in its life cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComputationState {
    /// Not started yet.
    Fresh,
    /// Waiting for the answer to an ability request.
    Suspended,
    /// Produced its result.
    Completed,
    /// Ended with a recoverable error.
    Failed,
    /// Ended with an unrecoverable fault.
    Aborted,
}

impl ComputationState {
    /// Whether no further step is possible.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl Display for ComputationState {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fresh => "fresh",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        formatter.write_str(name)
    }
}

/// What a computation stopped at.
#[derive(Debug)]
pub enum Suspension<E, R> {
    /// Waiting on an ability; resume with its output.
    Ability(AbilityRequest),
    /// Ended with a recoverable error of the row.
    Error(E),
    /// Ended with its result.
    Complete(R),
}

struct Awaiting {
    ability: &'static str,
    output: TypeId,
    output_name: &'static str,
}

/// A suspendable, single-use run of an [`Effect`](super::Effect).
pub struct Computation<E, R> {
    machine: Machine,
    state: ComputationState,
    awaiting: Option<Awaiting>,
    _marker: PhantomData<fn() -> (E, R)>,
}

impl<E: ErrorSet, R: 'static> Computation<E, R> {
    pub(crate) fn new(node: Node) -> Self {
        Self {
            machine: Machine::new(node),
            state: ComputationState::Fresh,
            awaiting: None,
            _marker: PhantomData,
        }
    }

    /// The current life-cycle state.
    #[must_use]
    pub const fn state(&self) -> ComputationState {
        self.state
    }

    /// Runs up to the first suspension, error, or result.
    ///
    /// # Errors
    ///
    /// - [`StepError::Reuse`] if the computation was already started
    /// - [`StepError::Fault`] if it aborts
    pub fn start(&mut self) -> Result<Suspension<E, R>, StepError> {
        if self.state != ComputationState::Fresh {
            return Err(ReuseError::new("start", self.state).into());
        }
        self.advance()
    }

    /// Resumes a suspended computation with the ability's output.
    ///
    /// # Errors
    ///
    /// - [`StepError::Reuse`] unless the computation is suspended
    /// - [`StepError::ResumeType`] if `value` is not the ability's output
    ///   type; the computation stays suspended
    /// - [`StepError::Fault`] if it aborts
    pub fn resume(&mut self, value: Box<dyn Any>) -> Result<Suspension<E, R>, StepError> {
        let Some(awaiting) = self.awaiting.as_ref().filter(|_| self.state == ComputationState::Suspended) else {
            return Err(ReuseError::new("resume", self.state).into());
        };
        if Any::type_id(&*value) != awaiting.output {
            return Err(ResumeTypeError::new(awaiting.ability, awaiting.output_name).into());
        }
        self.awaiting = None;
        self.machine.feed(value);
        self.advance()
    }

    /// Resumes with a concrete value.
    ///
    /// # Errors
    ///
    /// Same as [`resume`](Self::resume).
    pub fn resume_with<T: 'static>(&mut self, value: T) -> Result<Suspension<E, R>, StepError> {
        self.resume(Box::new(value))
    }

    fn advance(&mut self) -> Result<Suspension<E, R>, StepError> {
        match self.machine.advance() {
            Exit::Complete(value) => {
                self.state = ComputationState::Completed;
                value
                    .downcast::<R>()
                    .map(|value| Suspension::Complete(*value))
                    .map_err(|_| Fault::Interpreter { context: "computation result" }.into())
            }
            Exit::Error(error) => {
                self.state = ComputationState::Failed;
                error
                    .downcast::<E>()
                    .map(|error| Suspension::Error(*error))
                    .map_err(|_| Fault::Interpreter { context: "computation error" }.into())
            }
            Exit::Abort(fault) => {
                self.state = ComputationState::Aborted;
                Err(fault.into())
            }
            Exit::Suspend(request) => {
                self.state = ComputationState::Suspended;
                self.awaiting = Some(Awaiting {
                    ability: request.name(),
                    output: request.output(),
                    output_name: request.output_name(),
                });
                Ok(Suspension::Ability(request))
            }
        }
    }
}

impl<E, R> Debug for Computation<E, R> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Computation")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_not_impl_any!(Computation<crate::error::ErrNil, i32>: Clone, Copy);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::Need;
    use crate::effect::Effect;
    use crate::error::ErrNil;
    use crate::{errors, need};
    use rstest::rstest;

    #[derive(Debug, PartialEq)]
    struct Broken;

    fn demand() -> Computation<ErrNil, u32> {
        need::<u32, _>().fmap(|value| value + 1).into_computation()
    }

    #[rstest]
    fn start_suspends_on_the_first_request() {
        let mut computation = demand();
        assert_eq!(computation.state(), ComputationState::Fresh);
        match computation.start() {
            Ok(Suspension::Ability(request)) => assert!(request.is::<Need<u32>>()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(computation.state(), ComputationState::Suspended);
    }

    #[rstest]
    fn resume_completes_and_finishes_the_cursor() {
        let mut computation = demand();
        computation.start().unwrap();
        assert!(matches!(computation.resume_with(41_u32), Ok(Suspension::Complete(42))));
        assert!(computation.state().is_finished());
    }

    #[rstest]
    fn starting_twice_is_a_reuse_error() {
        let mut computation = demand();
        computation.start().unwrap();
        let error = computation.start().unwrap_err();
        assert_eq!(
            error,
            StepError::Reuse(ReuseError::new("start", ComputationState::Suspended))
        );
    }

    #[rstest]
    fn resume_before_start_is_a_reuse_error() {
        let mut computation = demand();
        assert!(matches!(
            computation.resume_with(1_u32),
            Err(StepError::Reuse(error)) if error.state() == ComputationState::Fresh
        ));
    }

    #[rstest]
    fn resuming_a_finished_computation_yields_no_stale_data() {
        let mut computation = demand();
        computation.start().unwrap();
        computation.resume_with(1_u32).unwrap();
        assert!(matches!(computation.resume_with(1_u32), Err(StepError::Reuse(_))));
        assert!(matches!(computation.start(), Err(StepError::Reuse(_))));
    }

    #[rstest]
    fn wrong_resume_type_keeps_the_computation_suspended() {
        let mut computation = demand();
        computation.start().unwrap();
        assert!(matches!(
            computation.resume_with("not a number"),
            Err(StepError::ResumeType(_))
        ));
        assert_eq!(computation.state(), ComputationState::Suspended);
        assert!(matches!(computation.resume_with(2_u32), Ok(Suspension::Complete(3))));
    }

    #[rstest]
    fn error_signal_is_terminal() {
        let mut computation = Effect::<errors![Broken], ()>::fail(Broken).into_computation();
        assert!(matches!(computation.start(), Ok(Suspension::Error(_))));
        assert_eq!(computation.state(), ComputationState::Failed);
        assert!(matches!(computation.resume_with(()), Err(StepError::Reuse(_))));
    }

    #[rstest]
    fn pure_effect_completes_on_start() {
        let mut computation = Effect::<ErrNil, &str>::pure("done").into_computation();
        assert!(matches!(computation.start(), Ok(Suspension::Complete("done"))));
    }
}
