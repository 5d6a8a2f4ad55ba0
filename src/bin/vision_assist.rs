//! vision_assist - spoken navigation aid
//!
//! This binary:
//! 1. Loads configuration (file named by VISION_ASSIST_CONFIG, env, flags)
//! 2. Starts the speech queue
//! 3. Connects to the ESP32 camera, falling back to the local webcam
//! 4. Runs the mode controller on typed commands until `q` or Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use vision_assist::{
    AssistConfig, CaptureMode, ChatCompletionsDescriber, CommandChannel, CommandSpeech,
    ConsoleSpeech, DisplaySink, Esp32Source, FrameSource, ModeController, NullDisplay,
    SnapshotDisplay, SourceSelector, SpeechOutput, SpeechSink, WebcamSource,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "vision_assist",
    about = "Assistive vision: obstacle warnings and spoken scene descriptions"
)]
struct Args {
    /// ESP32 camera stream or capture URL
    #[arg(long, value_name = "URL")]
    camera_url: Option<String>,

    /// ESP32 capture mode (stream|snapshot)
    #[arg(long, value_name = "MODE")]
    camera_mode: Option<CaptureMode>,

    /// Skip the ESP32 camera and use the local webcam only
    #[arg(long, conflicts_with = "no_webcam")]
    no_camera: bool,

    /// Local capture device (e.g. /dev/video0, or stub://demo for a synthetic feed)
    #[arg(long, value_name = "DEVICE")]
    webcam: Option<String>,

    /// Do not fall back to the local webcam
    #[arg(long)]
    no_webcam: bool,

    /// Print announcements instead of speaking them
    #[arg(long, env = "VISION_ASSIST_SILENT")]
    silent: bool,

    /// Write camera.jpg / closeness.png snapshots into this directory
    #[arg(long, value_name = "DIR")]
    snapshot_dir: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

impl Args {
    fn apply(&self, cfg: &mut AssistConfig) {
        if let Some(url) = &self.camera_url {
            cfg.camera.url = url.clone();
        }
        if let Some(mode) = self.camera_mode {
            cfg.camera.mode = mode;
        }
        if self.no_camera {
            cfg.camera.enabled = false;
        }
        if let Some(device) = &self.webcam {
            cfg.webcam.device = device.clone();
        }
        if self.no_webcam {
            cfg.webcam.enabled = false;
        }
        if let Some(dir) = &self.snapshot_dir {
            cfg.display.snapshot_dir = Some(dir.clone());
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = AssistConfig::load().context("load configuration")?;
        args.apply(&mut cfg);
        cfg.validate().context("validate configuration")?;
        cfg
    };

    let speech = {
        let _stage = ui.stage("Start speech output");
        SpeechSink::spawn(speech_output(&cfg, args.silent))?
    };

    let sources = build_sources(&cfg);
    let mut selector = SourceSelector::new(sources, speech.announcer())?;
    {
        let mut stage = ui.stage("Connect camera");
        if let Err(err) = selector.connect() {
            // Not fatal: every mode iteration retries through the selector.
            log::warn!("no camera available yet: {}", err);
            stage.fail(err.to_string());
        }
    }

    if cfg.service.api_key.is_none() {
        log::warn!(
            "no API key set (VISION_ASSIST_API_KEY or TOGETHER_API_KEY); descriptions will likely fail"
        );
    }
    let describer = Arc::new(ChatCompletionsDescriber::new(cfg.describer_config()));

    let display: Box<dyn DisplaySink> = match &cfg.display.snapshot_dir {
        Some(dir) => {
            log::info!("writing snapshots to {}", dir.display());
            Box::new(SnapshotDisplay::new(dir, cfg.display.min_interval)?)
        }
        None => Box::new(NullDisplay),
    };

    let commands = CommandChannel::from_stdin()?;
    let interrupt = commands.sender();
    ctrlc::set_handler(move || {
        let _ = interrupt.send("q");
    })
    .expect("error setting Ctrl-C handler");

    ui.menu();
    let controller = ModeController::new(
        selector,
        speech,
        describer,
        display,
        commands,
        cfg.controller_settings(),
    );
    let report = controller.run();
    log::info!(
        "vision_assist finished: {} frames, {} acquisition failures, {} descriptions",
        report.frames,
        report.acquisition_failures,
        report.descriptions_requested
    );
    if !report.speech_drained {
        log::warn!("speech output was still busy at exit");
    }
    Ok(())
}

fn speech_output(cfg: &AssistConfig, silent: bool) -> Box<dyn SpeechOutput> {
    if silent {
        return Box::new(ConsoleSpeech);
    }
    let speech = cfg
        .speech
        .command
        .as_deref()
        .and_then(CommandSpeech::from_command_line)
        .unwrap_or_else(CommandSpeech::platform_default);
    log::info!("speaking through {}", speech.program());
    Box::new(speech)
}

/// ESP32 first, local webcam as fallback.
fn build_sources(cfg: &AssistConfig) -> Vec<Box<dyn FrameSource>> {
    let mut sources: Vec<Box<dyn FrameSource>> = Vec::new();
    if cfg.camera.enabled {
        match Esp32Source::new(cfg.esp32_config()) {
            Ok(source) => sources.push(Box::new(source)),
            Err(err) => log::warn!("skipping ESP32 camera: {}", err),
        }
    }
    if cfg.webcam.enabled {
        sources.push(Box::new(WebcamSource::new(cfg.webcam_config())));
    }
    sources
}
