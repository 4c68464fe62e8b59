// SPDX-License-Identifier: EPL-2.0 OR GPL-2.0-or-later
// ---------------------------------------------------------------------------
//! This pub module defines [TapeError], the error type returned by the
//! fallible entry points of [crate::tape::Tape].
//!
//! Link to [parent module](super)
// ---------------------------------------------------------------------------
//
use std::fmt;
//
// TapeError
/// An error raised by a [crate::tape::Tape] operation.
///
/// `adtrace` does not depend on `thiserror` or `anyhow`: this enum and its
/// manual `Display`/`Error` impls follow the dependency-free error style
/// used throughout this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TapeError {
    /// [crate::tape::Tape::activate] was called on a thread that already
    /// has an active tape for this value type.
    TapeAlreadyActive,
    /// An operation that requires an active tape (e.g. registering a
    /// variable) was attempted with none active.
    NoActiveTape,
    /// A position or slot argument fell outside the range the tape
    /// currently considers valid.
    OutOfRange,
    /// [crate::tape::Tape::compute_adjoints_to] was called before the
    /// derivative vector had been sized and cleared.
    DerivativesNotInitialized,
    /// [crate::tape::Tape::pop_callback] (or an equivalent internal pop)
    /// was attempted on an empty callback stack.
    EmptyCallbackStack,
}
//
impl fmt::Display for TapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TapeError::TapeAlreadyActive =>
                "a tape is already active on this thread for this value type",
            TapeError::NoActiveTape =>
                "no tape is active on this thread for this value type",
            TapeError::OutOfRange =>
                "position or slot argument is out of range for this tape",
            TapeError::DerivativesNotInitialized =>
                "derivative vector has not been initialized for this sweep",
            TapeError::EmptyCallbackStack =>
                "callback stack is empty",
        };
        f.write_str(msg)
    }
}
//
impl std::error::Error for TapeError {}
//
/// A convenience alias for `Result<T, TapeError>`.
pub type Result<T> = std::result::Result<T, TapeError>;
