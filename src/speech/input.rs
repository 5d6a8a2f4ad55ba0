//! Question input.

use std::time::Duration;

use crate::error::InputError;

/// Source of spoken (or typed) questions for interactive mode.
///
/// Implementations block for at most `timeout` and classify failures as
/// `InputError` values rather than panicking.
pub trait SpeechInput: Send {
    fn listen(&mut self, timeout: Duration) -> Result<String, InputError>;
}
