//! Vision Assist
//!
//! Assistive vision for visually impaired users: frames from an ESP32 network
//! camera (or a local webcam) are checked for close obstacles and described by
//! a hosted vision-language model, and everything the user needs to know is
//! spoken aloud.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! 1. **Frame sources** (`ingest`): one camera backend each, owning its
//!    connection state. The network source frames its byte stream with the
//!    JPEG demuxer (`ingest::demux`).
//! 2. **Source selector** (`ingest::SourceSelector`): priority-ordered sources
//!    with one reconnect attempt before falling back to the next source.
//! 3. **Obstacle heuristic** (`obstacle`): brightness as a proxy for proximity,
//!    pure and frame-local, plus the announcement cooldown.
//! 4. **Speech sink** (`speech`): FIFO queue with a single worker, so spoken
//!    output never overlaps and callers never block on playback.
//! 5. **Mode controller** (`control`): state machine over Idle, Navigation,
//!    Interactive and ContinuousDescription driven by typed commands.
//!
//! Descriptions (`describe`) and presentation (`display`) sit behind narrow
//! traits. `pipeline` runs capture, processing and display as three threads
//! joined by single-slot channels for the headless monitor.
//!
//! No failure other than an explicit quit ends a session. Every recoverable
//! failure produces exactly one announcement.

pub mod config;
pub mod control;
pub mod describe;
pub mod display;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod obstacle;
pub mod pipeline;
pub mod speech;

pub use config::AssistConfig;
pub use control::{
    Command, CommandChannel, CommandSender, ControllerSettings, ControllerState, ModeController,
    OperatingMode, RunReport,
};
pub use describe::{
    ChatCompletionsConfig, ChatCompletionsDescriber, DescriptionRequest, VisionDescriber,
};
pub use display::{DisplaySink, NullDisplay, SnapshotDisplay};
pub use error::{ConnectionError, FrameError, InputError, ServiceError};
pub use frame::{ClosenessMap, Frame};
pub use ingest::{
    CaptureMode, ConnectionState, Esp32Config, Esp32Source, FrameSource, SourceSelector,
    SourceStats, WebcamConfig, WebcamSource,
};
pub use obstacle::{compute_closeness, ObstacleCooldown, ObstacleEvent};
pub use pipeline::{LatestSlot, Monitor, MonitorHandle, MonitorSettings, MonitorStats};
pub use speech::{
    Announcement, Announcer, CommandSpeech, ConsoleSpeech, SpeechInput, SpeechOutput, SpeechSink,
};
