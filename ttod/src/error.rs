//! The dispatcher's own init-boundary error type.
//!
//! Per-call transient/permanent strategy failures are signaled through [`crate::TtodOutcome`],
//! not `Result` — spec.md §7 treats those as a cheap, non-exceptional control path. This type is
//! only used where the dispatcher itself has something worth reporting as a hard error.

use std::fmt;

/// An error raised at [`crate::Dispatcher`] construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtodError {
    /// No strategy initialized successfully and the fallback was explicitly disallowed. In
    /// practice this never happens since the fallback `gettimeofday` path always exists, but the
    /// type is kept honest for callers that construct a dispatcher with no strategies at all.
    NoStrategiesAvailable,
}

impl fmt::Display for TtodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TtodError::NoStrategiesAvailable => {
                write!(f, "no TTOD strategy initialized and no fallback configured")
            }
        }
    }
}

impl std::error::Error for TtodError {}
