//! Frame ingestion sources.
//!
//! This module provides the camera backends the assistant can read from:
//! - ESP32 network cameras streaming JPEG over HTTP (persistent stream or snapshot)
//! - Local capture devices (V4L2 with feature `ingest-v4l2`, synthetic `stub://` otherwise)
//!
//! Every backend implements `FrameSource`. The `SourceSelector` composes them
//! with a bounded reconnect-then-fallback policy.
//!
//! The ingestion layer is responsible for:
//! - Owning the connection and its `ConnectionState`
//! - Framing the byte stream into JPEG payloads (`demux`)
//! - Decoding payloads into `Frame` values
//!
//! The ingestion layer MUST NOT:
//! - Buffer more than the frame currently being read
//! - Retry without bound inside a single read

pub mod demux;
pub mod esp32;
pub mod selector;
pub mod webcam;

pub use demux::{extract_payload, StreamBuffer};
pub use esp32::{CaptureMode, Esp32Config, Esp32Source};
pub use selector::SourceSelector;
pub use webcam::{WebcamConfig, WebcamSource};

use crate::error::{ConnectionError, FrameError};
use crate::frame::Frame;

/// Connection lifecycle of a single source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_failed: u64,
    pub source: String,
}

/// A single camera backend.
pub trait FrameSource: Send {
    /// Human readable name used in announcements.
    fn name(&self) -> &str;

    fn state(&self) -> ConnectionState;

    /// Open the connection. Moves the state to `Connecting`.
    fn open(&mut self) -> Result<(), ConnectionError>;

    /// Read the next complete frame.
    fn read_frame(&mut self) -> Result<Frame, FrameError>;

    /// Release the connection. Always succeeds.
    fn close(&mut self);

    fn stats(&self) -> SourceStats;
}

/// Shared bookkeeping for `ConnectionState` transitions and counters.
#[derive(Debug)]
pub(crate) struct LinkState {
    state: ConnectionState,
    frames_captured: u64,
    frames_failed: u64,
}

impl LinkState {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            frames_captured: 0,
            frames_failed: 0,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn begin_open(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub(crate) fn frame_ok(&mut self) {
        self.state = ConnectionState::Connected;
        self.frames_captured += 1;
    }

    pub(crate) fn failed(&mut self) {
        self.state = ConnectionState::Failed;
        self.frames_failed += 1;
    }

    /// A payload arrived but could not be used; the link itself is fine.
    pub(crate) fn rejected(&mut self) {
        self.frames_failed += 1;
    }

    pub(crate) fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    pub(crate) fn stats(&self, source: &str) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            frames_failed: self.frames_failed,
            source: source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_state_follows_lifecycle() {
        let mut link = LinkState::new();
        assert_eq!(link.state(), ConnectionState::Disconnected);
        link.begin_open();
        assert_eq!(link.state(), ConnectionState::Connecting);
        link.frame_ok();
        assert_eq!(link.state(), ConnectionState::Connected);
        link.rejected();
        assert_eq!(link.state(), ConnectionState::Connected);
        link.failed();
        assert_eq!(link.state(), ConnectionState::Failed);
        link.begin_open();
        assert_eq!(link.state(), ConnectionState::Connecting);
        link.reset();
        assert_eq!(link.state(), ConnectionState::Disconnected);

        let stats = link.stats("cam");
        assert_eq!(stats.frames_captured, 1);
        assert_eq!(stats.frames_failed, 2);
        assert_eq!(stats.source, "cam");
    }
}
