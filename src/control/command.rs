//! User command vocabulary and the line-based command channel.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use crate::error::InputError;
use crate::speech::SpeechInput;

/// Single-letter user commands, accepted case-insensitively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Navigation,
    Interactive,
    ContinuousDescription,
    ToggleCamera,
    SpeechTest,
    Quit,
}

impl Command {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "a" => Some(Command::Navigation),
            "b" => Some(Command::Interactive),
            "c" => Some(Command::ContinuousDescription),
            "e" => Some(Command::ToggleCamera),
            "t" => Some(Command::SpeechTest),
            "q" => Some(Command::Quit),
            _ => None,
        }
    }
}

/// Words that leave the current mode and return to the menu.
pub fn is_exit_keyword(input: &str) -> bool {
    matches!(
        input.trim().to_ascii_lowercase().as_str(),
        "exit" | "stop" | "quit"
    )
}

/// Line-oriented control input.
///
/// Lines arrive from a reader thread (stdin in the binary) or from tests via
/// `CommandSender`. Automatic modes poll it without blocking; the menu and
/// interactive questions block on it.
pub struct CommandChannel {
    rx: Receiver<String>,
    tx: Sender<String>,
    closed: Arc<AtomicBool>,
}

/// Handle for injecting lines, e.g. from a Ctrl-C handler.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<String>,
    closed: Arc<AtomicBool>,
}

impl CommandSender {
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.tx.send(line.into()).is_ok()
    }

    /// Mark the input as exhausted. Lines already queued are still delivered.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            rx,
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Channel fed by a background thread reading lines from stdin.
    pub fn from_stdin() -> anyhow::Result<Self> {
        let channel = Self::new();
        let sender = channel.sender();
        std::thread::Builder::new()
            .name("stdin-commands".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    match line {
                        Ok(line) => {
                            if !sender.send(line) {
                                break;
                            }
                        }
                        Err(err) => {
                            log::warn!("stdin-commands: read failed: {}", err);
                            break;
                        }
                    }
                }
                log::debug!("stdin-commands: input closed");
                sender.close();
            })?;
        Ok(channel)
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Next pending line, if any. Never blocks.
    pub fn try_next(&self) -> Option<String> {
        match self.rx.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block up to `timeout` for the next line. Once the input is closed and
    /// drained this fails with `InputError::Transport`.
    pub fn next_timeout(&self, timeout: Duration) -> Result<String, InputError> {
        if let Ok(line) = self.rx.try_recv() {
            return Ok(line);
        }
        if self.is_closed() {
            return Err(InputError::Transport("command input closed".to_string()));
        }
        match self.rx.recv_timeout(timeout) {
            Ok(line) => Ok(line),
            Err(RecvTimeoutError::Timeout) => Err(InputError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                Err(InputError::Transport("command input closed".to_string()))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Typed questions stand in for speech recognition.
impl SpeechInput for CommandChannel {
    fn listen(&mut self, timeout: Duration) -> Result<String, InputError> {
        let line = self.next_timeout(timeout)?;
        let line = line.trim();
        if line.is_empty() {
            return Err(InputError::Unrecognized);
        }
        Ok(line.to_string())
    }
}
