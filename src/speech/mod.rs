//! Spoken output and input.
//!
//! - `SpeechSink`: FIFO queue drained by one worker thread, so announcements
//!   never overlap on the audio device and callers never block on playback.
//! - `Announcer`: cheap cloneable handle used to enqueue announcements.
//! - `SpeechOutput` / `SpeechInput`: narrow seams to the platform speech services.

mod input;
mod output;
mod sink;

pub use input::SpeechInput;
pub use output::{CommandSpeech, ConsoleSpeech, SpeechOutput};
pub use sink::{Announcement, Announcer, SpeechSink};
