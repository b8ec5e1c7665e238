//! Error handling for the process and scheduling core

use core::fmt;

/// Common error type used throughout the scheduling core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Process table has no UNUSED slot
    NoFreeProc,
    /// Trap frame, address space or kernel stack allocation failed
    OutOfMemory,
    /// Copy across the user/kernel boundary hit an invalid address
    BadAddress,
    /// Caller has no child matching the request
    NoChildren,
    /// Caller was marked killed while blocked
    Killed,
    /// No live process carries the requested pid
    NoSuchProcess,
    /// Raw policy value outside the four known policies
    InvalidPolicy(i32),
    /// Configuration rejected by validation
    InvalidConfig(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoFreeProc => write!(f, "Process table full"),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::BadAddress => write!(f, "Bad address"),
            Error::NoChildren => write!(f, "No child processes"),
            Error::Killed => write!(f, "Process killed"),
            Error::NoSuchProcess => write!(f, "No such process"),
            Error::InvalidPolicy(raw) => write!(f, "Invalid scheduling policy: {}", raw),
            Error::InvalidConfig(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl core::error::Error for Error {}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;
