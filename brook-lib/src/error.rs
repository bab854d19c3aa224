//! Error types for streaming playback.

use std::fmt::{Display, Formatter};

/// Failure reported by a native audio backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// A buffer or voice id did not name a live backend object.
    InvalidName,
    /// A parameter value was rejected by the backend.
    InvalidValue,
    /// The call was not legal for the object's current state.
    InvalidOperation,
    /// The backend ran out of memory.
    OutOfMemory,
    /// Device-level failure with a backend-specific message.
    Device(String),
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "invalid object name"),
            Self::InvalidValue => write!(f, "invalid parameter value"),
            Self::InvalidOperation => write!(f, "invalid operation"),
            Self::OutOfMemory => write!(f, "backend out of memory"),
            Self::Device(msg) => write!(f, "device error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// Error type for voice, engine, and player operations.
#[derive(Debug)]
pub enum Error {
    /// Invalid construction-time settings.
    Config(String),
    /// A backend call failed. Queue bookkeeping always reflects the last
    /// successful backend call.
    Backend(BackendError),
    /// The producer does not support the requested positioning operation.
    Unsupported(&'static str),
    /// The voice, engine, or player has already been released.
    Disposed(&'static str),
    /// More buffers were requested than the queue logically holds.
    QueueUnderflow { requested: usize, queued: usize },
    /// The producer failed while supplying sample data. Fatal to the update
    /// cycle that observed it, not to the stream.
    Producer(std::io::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Backend(err) => write!(f, "backend error: {}", err),
            Self::Unsupported(what) => write!(f, "{} is not supported by this producer", what),
            Self::Disposed(what) => write!(f, "{} has already been released", what),
            Self::QueueUnderflow { requested, queued } => write!(
                f,
                "cannot remove {} buffers from a queue of {}",
                requested, queued
            ),
            Self::Producer(err) => write!(f, "producer error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<BackendError> for Error {
    fn from(value: BackendError) -> Self {
        Self::Backend(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Producer(value)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_converts() {
        let err: Error = BackendError::InvalidName.into();
        assert!(matches!(err, Error::Backend(BackendError::InvalidName)));
    }

    #[test]
    fn underflow_message_names_both_counts() {
        let err = Error::QueueUnderflow {
            requested: 5,
            queued: 2,
        };
        assert_eq!(err.to_string(), "cannot remove 5 buffers from a queue of 2");
    }
}
