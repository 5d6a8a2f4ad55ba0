//! Speech queue.
//!
//! This module provides `SpeechSink`, a FIFO drained by a single worker
//! thread, and `Announcer`, a cloneable handle for enqueueing from anywhere.
//! Enqueueing never blocks; playback failures are logged and skipped.

use anyhow::{Context, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use super::SpeechOutput;

/// Immutable text payload queued for speaking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    text: String,
}

impl Announcement {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

enum SpeechMessage {
    Say(Announcement),
    Stop,
}

/// Handle for enqueueing announcements. Enqueue never blocks and never fails.
#[derive(Clone)]
pub struct Announcer {
    tx: Sender<SpeechMessage>,
}

impl Announcer {
    pub fn say(&self, text: impl Into<String>) {
        let announcement = Announcement::new(text);
        log::info!("announce: {}", announcement.text());
        if self.tx.send(SpeechMessage::Say(announcement)).is_err() {
            log::debug!("SpeechSink: worker stopped, announcement dropped");
        }
    }
}

/// Single-consumer speech queue.
pub struct SpeechSink {
    announcer: Announcer,
    worker: Option<JoinHandle<()>>,
    finished: Receiver<()>,
}

impl SpeechSink {
    /// Start the worker thread that owns `output`.
    pub fn spawn(mut output: Box<dyn SpeechOutput>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let (done_tx, finished) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("speech-sink".to_string())
            .spawn(move || {
                drain(output.as_mut(), rx);
                let _ = done_tx.send(());
            })
            .context("spawn speech worker")?;
        Ok(Self {
            announcer: Announcer { tx },
            worker: Some(worker),
            finished,
        })
    }

    pub fn announcer(&self) -> Announcer {
        self.announcer.clone()
    }

    pub fn enqueue(&self, text: impl Into<String>) {
        self.announcer.say(text);
    }

    /// Queue the stop sentinel behind pending announcements and wait up to
    /// `wait` for the worker to finish. Returns false if the worker was left
    /// running.
    pub fn shutdown(mut self, wait: Duration) -> bool {
        let _ = self.announcer.tx.send(SpeechMessage::Stop);
        let Some(worker) = self.worker.take() else {
            return true;
        };
        match self.finished.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.join().is_err() {
                    log::warn!("SpeechSink: worker panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "SpeechSink: worker still speaking after {:?}, detaching",
                    wait
                );
                false
            }
        }
    }
}

impl Drop for SpeechSink {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.announcer.tx.send(SpeechMessage::Stop);
        }
    }
}

fn drain(output: &mut dyn SpeechOutput, rx: Receiver<SpeechMessage>) {
    while let Ok(message) = rx.recv() {
        match message {
            SpeechMessage::Say(announcement) => {
                if let Err(err) = output.speak(announcement.text()) {
                    log::warn!(
                        "SpeechSink: failed to speak '{}': {}",
                        announcement.text(),
                        err
                    );
                }
            }
            SpeechMessage::Stop => break,
        }
    }
}
