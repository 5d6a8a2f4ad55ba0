//! Error taxonomy for the assistant.
//!
//! Every variant here is recoverable. Acquisition and service failures are
//! absorbed by the mode loop, connection failures by the source selector. The
//! only terminating condition is an explicit quit command, which is not an error.

use std::time::Duration;
use thiserror::Error;

/// Opening a frame source failed.
#[derive(Debug, Error)]
#[error("failed to open {source_name}: {reason}")]
pub struct ConnectionError {
    pub source_name: String,
    pub reason: String,
}

impl ConnectionError {
    pub fn new(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

/// A single frame acquisition failed.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame read timed out")]
    Timeout,
    #[error("frame read failed: {0}")]
    Io(String),
    #[error("jpeg decode failed: {0}")]
    Decode(String),
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl FrameError {
    /// Map a reader error onto the acquisition taxonomy.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => FrameError::Timeout,
            _ => FrameError::Io(err.to_string()),
        }
    }
}

impl From<ConnectionError> for FrameError {
    fn from(err: ConnectionError) -> Self {
        FrameError::Io(err.to_string())
    }
}

/// The external description (or speech output) service failed.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service call timed out after {0:?}")]
    Timeout(Duration),
    #[error("service transport error: {0}")]
    Transport(String),
    #[error("service returned an empty response")]
    EmptyResponse,
}

impl ServiceError {
    /// Fixed user-facing message announced in place of a description.
    pub fn apology(&self) -> &'static str {
        match self {
            ServiceError::Timeout(_) => "The image analysis timed out. Please try again.",
            ServiceError::Transport(_) => "Error analyzing the image. Please try again.",
            ServiceError::EmptyResponse => "I couldn't analyze the image. Please try again.",
        }
    }
}

/// Speech-to-text (or typed question) input failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("no input before timeout")]
    Timeout,
    #[error("input could not be understood")]
    Unrecognized,
    #[error("input channel error: {0}")]
    Transport(String),
}
