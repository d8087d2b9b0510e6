//! Membership proofs for error rows.
//!
//! [`Contains<T, Index>`] proves that the error type `T` is one of the
//! variants of a row, with `Index` ([`Here`] or [`There<I>`]) recording its
//! position so the proof can be inferred without overlapping impls.
//! [`Embed<Target, Indices>`] proves that every variant of a row is also a
//! variant of `Target`, which is what widening an effect's error set needs.
//!
//! # Examples
//!
//! ```rust
//! use stateless::errors;
//! use stateless::error::{Contains, Embed, ErrCons};
//!
//! #[derive(Debug, PartialEq)]
//! struct Parse(u32);
//! #[derive(Debug, PartialEq)]
//! struct Io;
//!
//! type Row = errors![Parse, Io];
//!
//! let error = <Row as Contains<Io, _>>::inject(Io);
//! assert!(matches!(error, ErrCons::Tail(ErrCons::Head(Io))));
//!
//! // Taking a type that is not carried hands back the narrowed row.
//! let narrowed = <Row as Contains<Parse, _>>::take(error).unwrap_err();
//! assert!(matches!(narrowed, ErrCons::Head(Io)));
//!
//! // A smaller row embeds into a larger one.
//! let small: errors![Io] = ErrCons::Head(Io);
//! let widened: Row = small.embed();
//! assert!(matches!(widened, ErrCons::Tail(ErrCons::Head(Io))));
//! ```

use super::row::{ErrCons, ErrNil, ErrorSet};
use std::fmt::Debug;
use std::marker::PhantomData;

/// Index: the error is at the head of the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Here;

/// Index: the error is in the tail of the row, at index `I`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct There<I>(PhantomData<I>);

impl<I> There<I> {
    /// Creates a new `There` index.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

/// Proof that the error type `T` is a variant of this row.
///
/// # Laws
///
/// ```text
/// take(inject(t)) == Ok(t)
/// ```
pub trait Contains<T, Index>: ErrorSet + Sized {
    /// The row with `T` removed.
    type Remainder: ErrorSet;

    /// Wraps `value` as an error of this row.
    fn inject(value: T) -> Self;

    /// Extracts a `T`, or returns the error re-expressed in the remainder.
    ///
    /// # Errors
    ///
    /// Returns the narrowed row when the carried error is not a `T`.
    fn take(self) -> Result<T, Self::Remainder>;

    /// Borrows the carried error if it is a `T`.
    fn get(&self) -> Option<&T>;
}

impl<H: Debug + 'static, T: ErrorSet> Contains<H, Here> for ErrCons<H, T> {
    type Remainder = T;

    #[inline]
    fn inject(value: H) -> Self {
        Self::Head(value)
    }

    #[inline]
    fn take(self) -> Result<H, T> {
        match self {
            Self::Head(head) => Ok(head),
            Self::Tail(tail) => Err(tail),
        }
    }

    #[inline]
    fn get(&self) -> Option<&H> {
        match self {
            Self::Head(head) => Some(head),
            Self::Tail(_) => None,
        }
    }
}

impl<H, T, X, I> Contains<X, There<I>> for ErrCons<H, T>
where
    H: Debug + 'static,
    T: Contains<X, I>,
{
    type Remainder = ErrCons<H, T::Remainder>;

    #[inline]
    fn inject(value: X) -> Self {
        Self::Tail(T::inject(value))
    }

    #[inline]
    fn take(self) -> Result<X, Self::Remainder> {
        match self {
            Self::Head(head) => Err(ErrCons::Head(head)),
            Self::Tail(tail) => tail.take().map_err(ErrCons::Tail),
        }
    }

    #[inline]
    fn get(&self) -> Option<&X> {
        match self {
            Self::Head(_) => None,
            Self::Tail(tail) => tail.get(),
        }
    }
}

/// Proof that every error of this row is also an error of `Target`.
///
/// `Indices` is a nested tuple of [`Contains`] indices, one per variant,
/// and is always inferred.
pub trait Embed<Target, Indices> {
    /// Re-expresses this error as an error of `Target`.
    fn embed(self) -> Target;
}

impl<Target> Embed<Target, ()> for ErrNil {
    fn embed(self) -> Target {
        match self {}
    }
}

impl<H, T, Target, HeadIndex, TailIndices> Embed<Target, (HeadIndex, TailIndices)> for ErrCons<H, T>
where
    Target: Contains<H, HeadIndex>,
    T: Embed<Target, TailIndices>,
{
    fn embed(self) -> Target {
        match self {
            Self::Head(head) => Target::inject(head),
            Self::Tail(tail) => tail.embed(),
        }
    }
}
