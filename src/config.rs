use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::control::ControllerSettings;
use crate::describe::{ChatCompletionsConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT};
use crate::ingest::{CaptureMode, Esp32Config, WebcamConfig};

const DEFAULT_CAMERA_URL: &str = "http://192.168.4.1:81/stream";
const DEFAULT_CAMERA_TIMEOUT_SECS: u64 = 10;
const DEFAULT_WEBCAM_DEVICE: &str = "/dev/video0";
const DEFAULT_WEBCAM_WIDTH: u32 = 640;
const DEFAULT_WEBCAM_HEIGHT: u32 = 480;
const DEFAULT_SERVICE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_WAIT_MS: u64 = 1000;
const DEFAULT_OBSTACLE_COOLDOWN_SECS: u64 = 3;
const DEFAULT_DESCRIPTION_INTERVAL_SECS: u64 = 10;
const DEFAULT_RETRY_PAUSE_MS: u64 = 1000;
const DEFAULT_WARNING_REPEATS: u32 = 3;
const DEFAULT_QUESTION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_DISPLAY_INTERVAL_MS: u64 = 500;

/// Grace period past the service timeout before the controller stops waiting.
const SERVICE_DEADLINE_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, Default)]
struct AssistConfigFile {
    camera: Option<CameraConfigFile>,
    webcam: Option<WebcamConfigFile>,
    service: Option<ServiceConfigFile>,
    speech: Option<SpeechConfigFile>,
    timing: Option<TimingConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    mode: Option<CaptureMode>,
    connect_timeout_secs: Option<u64>,
    read_timeout_secs: Option<u64>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct WebcamConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    endpoint: Option<String>,
    model: Option<String>,
    system_prompt: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SpeechConfigFile {
    command: Option<String>,
    shutdown_wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    obstacle_cooldown_secs: Option<u64>,
    description_interval_secs: Option<u64>,
    retry_pause_ms: Option<u64>,
    warning_repeats: Option<u32>,
    question_timeout_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    snapshot_dir: Option<PathBuf>,
    min_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AssistConfig {
    pub camera: CameraSettings,
    pub webcam: WebcamSettings,
    pub service: ServiceSettings,
    pub speech: SpeechSettings,
    pub timing: TimingSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    pub mode: CaptureMode,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct WebcamSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub endpoint: String,
    pub model: String,
    pub system_prompt: String,
    pub timeout: Duration,
    /// Only ever read from the environment.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SpeechSettings {
    /// External synthesizer command line; `None` means the platform default.
    pub command: Option<String>,
    pub shutdown_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct TimingSettings {
    pub obstacle_cooldown: Duration,
    pub description_interval: Duration,
    pub retry_pause: Duration,
    pub warning_repeats: u32,
    pub question_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub snapshot_dir: Option<PathBuf>,
    pub min_interval: Duration,
}

impl AssistConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VISION_ASSIST_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AssistConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            url: camera_file
                .url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            mode: camera_file.mode.unwrap_or_default(),
            connect_timeout: Duration::from_secs(
                camera_file
                    .connect_timeout_secs
                    .unwrap_or(DEFAULT_CAMERA_TIMEOUT_SECS),
            ),
            read_timeout: Duration::from_secs(
                camera_file
                    .read_timeout_secs
                    .unwrap_or(DEFAULT_CAMERA_TIMEOUT_SECS),
            ),
            enabled: camera_file.enabled.unwrap_or(true),
        };

        let webcam_file = file.webcam.unwrap_or_default();
        let webcam = WebcamSettings {
            device: webcam_file
                .device
                .unwrap_or_else(|| DEFAULT_WEBCAM_DEVICE.to_string()),
            width: webcam_file.width.unwrap_or(DEFAULT_WEBCAM_WIDTH),
            height: webcam_file.height.unwrap_or(DEFAULT_WEBCAM_HEIGHT),
            enabled: webcam_file.enabled.unwrap_or(true),
        };

        let service_file = file.service.unwrap_or_default();
        let service = ServiceSettings {
            endpoint: service_file
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: service_file
                .model
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt: service_file
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            timeout: Duration::from_secs(
                service_file
                    .timeout_secs
                    .unwrap_or(DEFAULT_SERVICE_TIMEOUT_SECS),
            ),
            api_key: None,
        };

        let speech_file = file.speech.unwrap_or_default();
        let speech = SpeechSettings {
            command: speech_file.command,
            shutdown_wait: Duration::from_millis(
                speech_file
                    .shutdown_wait_ms
                    .unwrap_or(DEFAULT_SHUTDOWN_WAIT_MS),
            ),
        };

        let timing_file = file.timing.unwrap_or_default();
        let timing = TimingSettings {
            obstacle_cooldown: Duration::from_secs(
                timing_file
                    .obstacle_cooldown_secs
                    .unwrap_or(DEFAULT_OBSTACLE_COOLDOWN_SECS),
            ),
            description_interval: Duration::from_secs(
                timing_file
                    .description_interval_secs
                    .unwrap_or(DEFAULT_DESCRIPTION_INTERVAL_SECS),
            ),
            retry_pause: Duration::from_millis(
                timing_file.retry_pause_ms.unwrap_or(DEFAULT_RETRY_PAUSE_MS),
            ),
            warning_repeats: timing_file
                .warning_repeats
                .unwrap_or(DEFAULT_WARNING_REPEATS),
            question_timeout: Duration::from_secs(
                timing_file
                    .question_timeout_secs
                    .unwrap_or(DEFAULT_QUESTION_TIMEOUT_SECS),
            ),
            poll_interval: Duration::from_millis(
                timing_file
                    .poll_interval_ms
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
        };

        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            snapshot_dir: display_file.snapshot_dir,
            min_interval: Duration::from_millis(
                display_file
                    .min_interval_ms
                    .unwrap_or(DEFAULT_DISPLAY_INTERVAL_MS),
            ),
        };

        Ok(Self {
            camera,
            webcam,
            service,
            speech,
            timing,
            display,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("VISION_ASSIST_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(mode) = std::env::var("VISION_ASSIST_CAMERA_MODE") {
            self.camera.mode = mode
                .parse()
                .map_err(|e| anyhow!("VISION_ASSIST_CAMERA_MODE: {}", e))?;
        }
        if let Ok(device) = std::env::var("VISION_ASSIST_WEBCAM_DEVICE") {
            if !device.trim().is_empty() {
                self.webcam.device = device;
            }
        }
        if let Ok(endpoint) = std::env::var("VISION_ASSIST_SERVICE_URL") {
            if !endpoint.trim().is_empty() {
                self.service.endpoint = endpoint;
            }
        }
        if let Ok(model) = std::env::var("VISION_ASSIST_MODEL") {
            if !model.trim().is_empty() {
                self.service.model = model;
            }
        }
        self.service.api_key = ["VISION_ASSIST_API_KEY", "TOGETHER_API_KEY"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find(|value| !value.trim().is_empty());
        if let Ok(command) = std::env::var("VISION_ASSIST_SPEECH_COMMAND") {
            if !command.trim().is_empty() {
                self.speech.command = Some(command);
            }
        }
        if let Ok(dir) = std::env::var("VISION_ASSIST_SNAPSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.display.snapshot_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(cooldown) = std::env::var("VISION_ASSIST_OBSTACLE_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.parse().map_err(|_| {
                anyhow!("VISION_ASSIST_OBSTACLE_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.timing.obstacle_cooldown = Duration::from_secs(seconds);
        }
        Ok(())
    }

    /// Check cross-field constraints. Called again by binaries after applying
    /// command-line overrides.
    pub fn validate(&mut self) -> Result<()> {
        if !self.camera.enabled && !self.webcam.enabled {
            return Err(anyhow!("at least one of camera or webcam must be enabled"));
        }
        if self.camera.enabled {
            validate_http_url("camera.url", &self.camera.url)?;
        }
        validate_http_url("service.endpoint", &self.service.endpoint)?;
        if self.webcam.enabled && self.webcam.device.trim().is_empty() {
            return Err(anyhow!("webcam.device must not be empty"));
        }
        if self.timing.warning_repeats == 0 {
            return Err(anyhow!("timing.warning_repeats must be at least 1"));
        }
        for (name, value) in [
            ("camera.connect_timeout_secs", self.camera.connect_timeout),
            ("camera.read_timeout_secs", self.camera.read_timeout),
            ("service.timeout_secs", self.service.timeout),
            ("speech.shutdown_wait_ms", self.speech.shutdown_wait),
            ("timing.obstacle_cooldown_secs", self.timing.obstacle_cooldown),
            ("timing.description_interval_secs", self.timing.description_interval),
            ("timing.retry_pause_ms", self.timing.retry_pause),
            ("timing.question_timeout_secs", self.timing.question_timeout),
            ("timing.poll_interval_ms", self.timing.poll_interval),
        ] {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        self.service.model = self.service.model.trim().to_string();
        if self.service.model.is_empty() {
            return Err(anyhow!("service.model must not be empty"));
        }
        Ok(())
    }

    pub fn esp32_config(&self) -> Esp32Config {
        Esp32Config {
            url: self.camera.url.clone(),
            mode: self.camera.mode,
            connect_timeout: self.camera.connect_timeout,
            read_timeout: self.camera.read_timeout,
        }
    }

    pub fn webcam_config(&self) -> WebcamConfig {
        WebcamConfig {
            device: self.webcam.device.clone(),
            width: self.webcam.width,
            height: self.webcam.height,
        }
    }

    pub fn describer_config(&self) -> ChatCompletionsConfig {
        ChatCompletionsConfig {
            endpoint: self.service.endpoint.clone(),
            model: self.service.model.clone(),
            system_prompt: self.service.system_prompt.clone(),
            api_key: self.service.api_key.clone(),
            timeout: self.service.timeout,
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            obstacle_cooldown: self.timing.obstacle_cooldown,
            description_interval: self.timing.description_interval,
            retry_pause: self.timing.retry_pause,
            warning_repeats: self.timing.warning_repeats,
            question_timeout: self.timing.question_timeout,
            poll_interval: self.timing.poll_interval,
            service_deadline: self.service.timeout + SERVICE_DEADLINE_SLACK,
            shutdown_wait: self.speech.shutdown_wait,
        }
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).map_err(|e| anyhow!("{} is not a valid url: {}", field, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!(
            "{} must use http or https, got '{}'",
            field,
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<AssistConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
