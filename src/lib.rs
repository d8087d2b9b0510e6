//! # stateless
//!
//! An algebraic effects runtime. Programs are built as [`Effect`] values
//! that describe what they need without performing it, and a driver runs
//! them against handlers that decide how each need is met.
//!
//! ## Overview
//!
//! - **Abilities**: typed requests a computation suspends on, answered by
//!   [`Handler`]s selected by the ability's type
//! - **Error rows**: the recoverable errors an effect may fail with are part
//!   of its type, built with [`errors!`] and narrowed by [`Effect::catch`]
//! - **Drivers**: [`Runtime`] runs effects synchronously;
//!   [`runtime::AsyncRuntime`] runs them on tokio
//! - **Schedules**: [`repeat`] and [`retry`] along a [`Schedule`] of delays
//! - **Memoization**: [`memoize`] effectful functions with a shared LRU cache
//! - **Parallelism**: [`fork`] tasks onto thread or process pools and
//!   [`wait`] for their results
//!
//! ## Feature Flags
//!
//! - `async` (default): the tokio-based [`runtime::AsyncRuntime`]
//! - `full`: enable all features
//!
//! ## Example
//!
//! ```rust
//! use stateless::prelude::*;
//!
//! #[derive(Debug)]
//! struct UnknownUser(u32);
//!
//! #[derive(Clone)]
//! struct Directory(Vec<&'static str>);
//!
//! fn user_name(id: u32) -> Effect<errors![UnknownUser], &'static str> {
//!     need::<Directory, _>().flat_map(move |directory| {
//!         match directory.0.get(id as usize) {
//!             Some(name) => Effect::pure(*name),
//!             None => Effect::fail(UnknownUser(id)),
//!         }
//!     })
//! }
//!
//! let runtime = Runtime::new().supply(Directory(vec!["ada", "grace"]));
//! assert_eq!(runtime.run(user_name(1)).unwrap(), "grace");
//!
//! let lookup = user_name(7).catch::<UnknownUser, _>();
//! assert!(matches!(runtime.run(lookup), Ok(Err(UnknownUser(7)))));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types, traits and functions.
///
/// # Usage
///
/// ```rust
/// use stateless::prelude::*;
/// ```
pub mod prelude {
    pub use crate::ability::{Ability, Need, Resolution, Sleep, need, sleep};
    pub use crate::combinators::{repeat, retry};
    pub use crate::effect::{Computation, Effect, Success, Suspension};
    pub use crate::error::{ErrNil, RunError};
    pub use crate::errors;
    pub use crate::handler::{Handler, HandlerStack, handler_fn, handler_when};
    pub use crate::memoize::memoize;
    pub use crate::parallel::{Task, TaskFn, fork, parallel, wait};
    pub use crate::runtime::Runtime;
    pub use crate::schedule::{Schedule, recurs, spaced};
}

pub mod ability;
pub mod combinators;
pub mod config;
pub mod effect;
pub mod error;
pub mod handler;
pub mod memoize;
pub mod parallel;
pub mod runtime;
pub mod schedule;

pub use ability::{Ability, AbilityRequest, Resolution, need, sleep};
pub use combinators::{repeat, retry};
pub use effect::{Computation, ComputationState, Effect, Success, Suspension};
pub use handler::{Handler, HandlerStack, handler_fn, handler_when};
pub use memoize::{Memoized, memoize, memoize_with_capacity};
pub use parallel::{fork, parallel, wait};
pub use runtime::Runtime;
pub use schedule::{Schedule, recurs, spaced};
