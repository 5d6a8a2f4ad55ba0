//! Speech output backends.
//!
//! `ConsoleSpeech` prints announcements; `CommandSpeech` runs an external TTS
//! program once per announcement and waits for it to finish.

use std::process::{Command, Stdio};

use crate::error::ServiceError;

/// Platform speech synthesis. Blocking from the caller's perspective.
pub trait SpeechOutput: Send {
    fn speak(&mut self, text: &str) -> Result<(), ServiceError>;
}

/// How the text reaches the synthesizer process.
#[derive(Clone, Debug, PartialEq, Eq)]
enum TextPassing {
    /// Appended as the final argument.
    Argument,
    /// Exported in the named environment variable.
    Env(&'static str),
}

const WINDOWS_TEXT_VAR: &str = "VISION_ASSIST_UTTERANCE";

/// Speaks by running an external synthesizer (`say`, `espeak`, PowerShell).
#[derive(Clone, Debug)]
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
    passing: TextPassing,
}

impl CommandSpeech {
    /// The synthesizer shipped with the current platform.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::with_program("say", Vec::new())
        } else if cfg!(target_os = "windows") {
            Self {
                program: "powershell".to_string(),
                args: vec![
                    "-NoProfile".to_string(),
                    "-Command".to_string(),
                    format!(
                        "Add-Type -AssemblyName System.Speech; \
                         (New-Object System.Speech.Synthesis.SpeechSynthesizer).Speak($env:{})",
                        WINDOWS_TEXT_VAR
                    ),
                ],
                passing: TextPassing::Env(WINDOWS_TEXT_VAR),
            }
        } else {
            Self::with_program("espeak", Vec::new())
        }
    }

    /// Parse a whitespace separated command line such as `espeak -s 150`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::with_program(&program, parts.collect()))
    }

    fn with_program(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
            passing: TextPassing::Argument,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, text: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        match self.passing {
            TextPassing::Argument => {
                command.arg(text);
            }
            TextPassing::Env(var) => {
                command.env(var, text);
            }
        }
        command
    }
}

impl SpeechOutput for CommandSpeech {
    fn speak(&mut self, text: &str) -> Result<(), ServiceError> {
        let status = self.command(text).status().map_err(|err| {
            ServiceError::Transport(format!("failed to run {}: {}", self.program, err))
        })?;
        if !status.success() {
            return Err(ServiceError::Transport(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Ok(())
    }
}

/// Prints announcements instead of speaking them.
#[derive(Clone, Debug, Default)]
pub struct ConsoleSpeech;

impl SpeechOutput for ConsoleSpeech {
    fn speak(&mut self, text: &str) -> Result<(), ServiceError> {
        println!("🔊 {}", text);
        Ok(())
    }
}
