//! Outcome and Maybe
//!
//! Every fallible asynchronous operation in this crate returns an
//! [`Outcome`]; optional results are [`Maybe`]. Both are the standard
//! `Result`/`Option` so the full combinator set (`is_ok`, `map`, `and_then`,
//! `or_else`, `unwrap_or`, ...) is available with its usual semantics:
//!
//! - `map` applies only on `Ok` and leaves an `Err` untouched; the closure
//!   is never invoked for an `Err`.
//! - `and_then` short-circuits on `Err`, `or_else` short-circuits on `Ok`.
//!
//! [`OutcomeExt`] adds the two operations the standard types lack: mapping
//! with a fallible function whose failure folds into `Err`, and a fatal
//! unwrap that names the failure kind.

use std::fmt::Display;

/// Value or failure.
pub type Outcome<T, E> = Result<T, E>;

/// Value or absence.
pub type Maybe<T> = Option<T>;

/// Extra combinators over [`Outcome`].
pub trait OutcomeExt<T, E> {
    /// Map the `Ok` value with a fallible function.
    ///
    /// A failure returned by `f` becomes the `Err` of the result, converted
    /// into `E`. An existing `Err` passes through and `f` is not called.
    fn try_map<U, F, E2>(self, f: F) -> Outcome<U, E>
    where
        F: FnOnce(T) -> Result<U, E2>,
        E: From<E2>;

    /// Unwrap the value, aborting the current task with `UnwrapOnErr`
    /// and the error text if this is an `Err`.
    fn unwrap_or_fatal(self) -> T;
}

impl<T, E: Display> OutcomeExt<T, E> for Outcome<T, E> {
    fn try_map<U, F, E2>(self, f: F) -> Outcome<U, E>
    where
        F: FnOnce(T) -> Result<U, E2>,
        E: From<E2>,
    {
        match self {
            Ok(value) => f(value).map_err(E::from),
            Err(e) => Err(e),
        }
    }

    fn unwrap_or_fatal(self) -> T {
        match self {
            Ok(value) => value,
            Err(e) => panic!("UnwrapOnErr: {e}"),
        }
    }
}
