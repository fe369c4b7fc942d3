//! Error kinds produced by the reactor and buffered-I/O layers.
//!
//! The kinds mirror the taxonomy a C event library would use: allocation
//! failure, a non-recoverable backend error, and the three buffered-event
//! conditions (EOF, I/O error, timeout). Transient conditions (`EINTR`,
//! `EAGAIN`) are handled internally by the backends and never surface here.

use std::fmt;
use std::io;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by `revent`.
#[derive(Debug)]
pub enum Error {
    /// A buffer allocation or reallocation could not be satisfied.
    AllocFailed,
    /// The OS readiness call (`select`/`poll`) failed for a non-transient
    /// reason.
    BackendError(io::Error),
    /// A buffered event's input side hit end-of-file.
    IoEof,
    /// A buffered event's read or write hit a non-transient I/O error.
    IoError(io::Error),
    /// A per-event timeout elapsed before the requested condition.
    IoTimeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AllocFailed => write!(f, "buffer allocation failed"),
            Error::BackendError(err) => write!(f, "backend error: {err}"),
            Error::IoEof => write!(f, "end of file"),
            Error::IoError(err) => write!(f, "I/O error: {err}"),
            Error::IoTimeout => write!(f, "timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BackendError(err) | Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(Error::AllocFailed.to_string(), "buffer allocation failed");
        assert_eq!(Error::IoEof.to_string(), "end of file");
        assert_eq!(Error::IoTimeout.to_string(), "timed out");
    }

    #[test]
    fn from_io_error_wraps() {
        let io_err = io::Error::new(io::ErrorKind::Other, "boom");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
    }
}
