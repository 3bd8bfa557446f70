//! Unified error type for the WiFi manager.
//!
//! Every fallible operation in the crate funnels into a single `Error` enum,
//! keeping the public API's error handling uniform. All variants are `Copy`
//! so they can be passed through the worker loop without allocation.

use core::fmt;

/// Every fallible operation in the manager returns one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The command is illegal in the current state, or a required sync
    /// primitive has not been initialized.
    InvalidState,
    /// A synchronous call's outcome bits did not set within the deadline.
    /// Best-effort rollback has already been issued where applicable.
    Timeout,
    /// The driver reported an immediate error, or the worker raised a
    /// `*_FAILED` outcome bit.
    Failed,
    /// Could not allocate the queue or outcome-bit group.
    NoMem,
    /// Persistence layer: the requested key does not exist.
    NotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState => write!(f, "invalid state"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::Failed => write!(f, "operation failed"),
            Self::NoMem => write!(f, "out of memory"),
            Self::NotFound => write!(f, "not found"),
        }
    }
}

impl std::error::Error for Error {}

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
