//! stream_monitor - headless camera monitor
//!
//! Runs the capture → obstacle heuristic → display pipeline on the configured
//! camera without the interactive assistant. Useful for aiming the camera and
//! checking stream health. Stops on Ctrl-C or after `--seconds`.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use vision_assist::{
    AssistConfig, CommandSpeech, ConsoleSpeech, DisplaySink, Esp32Source, FrameSource, Monitor,
    MonitorSettings, NullDisplay, SnapshotDisplay, SourceSelector, SpeechOutput, SpeechSink,
    WebcamSource,
};

#[path = "../ui.rs"]
mod ui;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "stream_monitor",
    about = "Capture frames, flag obstacles and write snapshots without the assistant"
)]
struct Args {
    /// ESP32 camera stream or capture URL
    #[arg(long, value_name = "URL")]
    camera_url: Option<String>,

    /// Local capture device (e.g. /dev/video0, or stub://demo)
    #[arg(long, value_name = "DEVICE")]
    webcam: Option<String>,

    /// Use the local webcam only
    #[arg(long)]
    webcam_only: bool,

    /// Stop after this many seconds (0 runs until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    seconds: u64,

    /// Write camera.jpg / closeness.png snapshots into this directory
    #[arg(long, value_name = "DIR")]
    snapshot_dir: Option<PathBuf>,

    /// Speak source notices instead of printing them
    #[arg(long)]
    speak: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
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
        if let Some(url) = &args.camera_url {
            cfg.camera.url = url.clone();
        }
        if let Some(device) = &args.webcam {
            cfg.webcam.device = device.clone();
        }
        if args.webcam_only {
            cfg.camera.enabled = false;
            cfg.webcam.enabled = true;
        }
        if let Some(dir) = &args.snapshot_dir {
            cfg.display.snapshot_dir = Some(dir.clone());
        }
        cfg.validate().context("validate configuration")?;
        cfg
    };

    let output: Box<dyn SpeechOutput> = if args.speak {
        Box::new(
            cfg.speech
                .command
                .as_deref()
                .and_then(CommandSpeech::from_command_line)
                .unwrap_or_else(CommandSpeech::platform_default),
        )
    } else {
        Box::new(ConsoleSpeech)
    };
    let speech = SpeechSink::spawn(output)?;

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
    let mut selector = SourceSelector::new(sources, speech.announcer())?;
    {
        let mut stage = ui.stage("Connect camera");
        if let Err(err) = selector.connect() {
            log::warn!("no camera available yet: {}", err);
            stage.fail(err.to_string());
        }
    }

    let display: Box<dyn DisplaySink> = match &cfg.display.snapshot_dir {
        Some(dir) => Box::new(SnapshotDisplay::new(dir, cfg.display.min_interval)?),
        None => Box::new(NullDisplay),
    };

    let handle = Monitor::spawn(
        selector,
        display,
        MonitorSettings {
            retry_pause: cfg.timing.retry_pause,
            poll_interval: cfg.timing.poll_interval,
        },
    )?;
    let shutdown = handle.shutdown_flag();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    log::info!("stream_monitor running (Ctrl-C to stop)");
    let started = Instant::now();
    let limit = (args.seconds > 0).then(|| Duration::from_secs(args.seconds));
    let mut last_report = Instant::now();
    while !handle.is_stopping() {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        std::thread::sleep(Duration::from_millis(200));
        if last_report.elapsed() >= STATS_INTERVAL {
            last_report = Instant::now();
            let stats = handle.stats();
            log::info!(
                "captured {} processed {} displayed {} overwritten {} obstacles {} failures {}",
                stats.frames_captured,
                stats.frames_processed,
                stats.frames_displayed,
                stats.frames_overwritten,
                stats.obstacle_frames,
                stats.acquisition_failures
            );
        }
    }

    let stats = {
        let _stage = ui.stage("Stop pipeline");
        handle.stop()?
    };
    speech.shutdown(cfg.speech.shutdown_wait);
    println!(
        "frames captured: {}, processed: {}, displayed: {}, overwritten: {}, obstacle frames: {}",
        stats.frames_captured,
        stats.frames_processed,
        stats.frames_displayed,
        stats.frames_overwritten,
        stats.obstacle_frames
    );
    Ok(())
}
