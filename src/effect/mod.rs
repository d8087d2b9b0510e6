//! Effect descriptions and the cursor that runs them.
//!
//! - [`Effect`]: the composable, move-only description
//! - [`Computation`]: a single-use cursor advanced by drivers
//! - [`Suspension`]: what a cursor stopped at

mod computation;
mod eff;
mod machine;

pub use computation::{Computation, ComputationState, Suspension};
pub use eff::{Effect, Success};
pub(crate) use machine::{RunId, current_run};
