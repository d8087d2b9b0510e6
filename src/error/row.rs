//! Error rows: the statically tracked set of recoverable errors.
//!
//! An error row is a type-level coproduct. [`ErrNil`] is the empty row (it
//! has no values, so an effect typed with it cannot fail recoverably) and
//! [`ErrCons<H, T>`] is "either an `H` or one of the errors in `T`".
//!
//! Rows are usually spelled with the [`errors!`](crate::errors) macro.
//!
//! # Examples
//!
//! ```rust
//! use stateless::errors;
//! use stateless::error::{ErrCons, ErrNil};
//!
//! #[derive(Debug)]
//! struct NotFound;
//! #[derive(Debug)]
//! struct Timeout;
//!
//! type Row = errors![NotFound, Timeout];
//! fn same<T>(_: std::marker::PhantomData<T>, _: std::marker::PhantomData<T>) {}
//! same(
//!     std::marker::PhantomData::<Row>,
//!     std::marker::PhantomData::<ErrCons<NotFound, ErrCons<Timeout, ErrNil>>>,
//! );
//! ```

use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};

/// Marker for types usable as the error row of an effect.
///
/// Implemented for [`ErrNil`] and for every [`ErrCons`] whose head is
/// `Debug + 'static` and whose tail is itself a row.
pub trait ErrorSet: Debug + 'static {
    /// Number of error types in the row.
    const LEN: usize;
}

/// The empty error row.
///
/// `ErrNil` is uninhabited: an `Effect<ErrNil, R>` can only complete,
/// request abilities, or abort with a fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrNil {}

impl ErrorSet for ErrNil {
    const LEN: usize = 0;
}

impl Display for ErrNil {
    fn fmt(&self, _formatter: &mut Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}

impl Error for ErrNil {}

/// A non-empty error row: an `H`, or one of the errors of `T`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrCons<H, T> {
    /// The error is the head type of the row.
    Head(H),
    /// The error is somewhere in the tail of the row.
    Tail(T),
}

impl<H: Debug + 'static, T: ErrorSet> ErrorSet for ErrCons<H, T> {
    const LEN: usize = T::LEN + 1;
}

// Debug and Display show the carried error only, not the nesting.
impl<H: Debug, T: Debug> Debug for ErrCons<H, T> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Head(head) => Debug::fmt(head, formatter),
            Self::Tail(tail) => Debug::fmt(tail, formatter),
        }
    }
}

impl<H: Display, T: Display> Display for ErrCons<H, T> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Head(head) => Display::fmt(head, formatter),
            Self::Tail(tail) => Display::fmt(tail, formatter),
        }
    }
}

impl<H: Error + 'static, T: Error + 'static> Error for ErrCons<H, T> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Head(head) => Some(head),
            Self::Tail(tail) => tail.source(),
        }
    }
}

/// Builds an error row from a list of error types.
///
/// - `errors![]` is [`ErrNil`]
/// - `errors![A]` is `ErrCons<A, ErrNil>`
/// - `errors![A, B, ...]` nests `ErrCons` from left to right
///
/// # Examples
///
/// ```rust
/// use stateless::errors;
/// use stateless::error::ErrorSet;
///
/// #[derive(Debug)]
/// struct Parse;
/// #[derive(Debug)]
/// struct Io;
///
/// assert_eq!(<errors![]>::LEN, 0);
/// assert_eq!(<errors![Parse]>::LEN, 1);
/// assert_eq!(<errors![Parse, Io,]>::LEN, 2);
/// ```
#[macro_export]
macro_rules! errors {
    () => { $crate::error::ErrNil };
    ($error:ty) => {
        $crate::error::ErrCons<$error, $crate::error::ErrNil>
    };
    ($error:ty, $($rest:ty),+ $(,)?) => {
        $crate::error::ErrCons<$error, $crate::errors!($($rest),+)>
    };
}
