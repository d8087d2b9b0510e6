//! Error rows, membership proofs and runtime errors.
//!
//! Recoverable errors travel through an effect's error row `E` and are
//! turned back into values with [`Effect::catch`](crate::Effect::catch) or
//! [`Effect::catch_all`](crate::Effect::catch_all). Everything else in this
//! module describes structural failures of driving a computation.

mod fault;
mod member;
mod row;

pub use fault::{
    AbilityTypeMismatchError, Fault, NonTransferableTaskError, ReuseError, ResumeTypeError,
    RunError, StepError, TaskFailure, TaskFailureReason, UnhandledAbilityError,
};
pub(crate) use fault::panic_message;
pub use member::{Contains, Embed, Here, There};
pub use row::{ErrCons, ErrNil, ErrorSet};
