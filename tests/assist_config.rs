use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use vision_assist::config::AssistConfig;
use vision_assist::CaptureMode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VISION_ASSIST_CONFIG",
        "VISION_ASSIST_CAMERA_URL",
        "VISION_ASSIST_CAMERA_MODE",
        "VISION_ASSIST_WEBCAM_DEVICE",
        "VISION_ASSIST_SERVICE_URL",
        "VISION_ASSIST_MODEL",
        "VISION_ASSIST_SPEECH_COMMAND",
        "VISION_ASSIST_SNAPSHOT_DIR",
        "VISION_ASSIST_OBSTACLE_COOLDOWN_SECS",
        "VISION_ASSIST_API_KEY",
        "TOGETHER_API_KEY",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, body: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, body.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = AssistConfig::load().expect("load defaults");

    assert_eq!(cfg.camera.url, "http://192.168.4.1:81/stream");
    assert_eq!(cfg.camera.mode, CaptureMode::Stream);
    assert!(cfg.camera.enabled);
    assert_eq!(cfg.webcam.device, "/dev/video0");
    assert_eq!(cfg.service.model, "meta-llama/Llama-Vision-Free");
    assert!(cfg.service.api_key.is_none());
    assert_eq!(cfg.timing.obstacle_cooldown, Duration::from_secs(3));
    assert_eq!(cfg.timing.description_interval, Duration::from_secs(10));
    assert_eq!(cfg.timing.warning_repeats, 3);
    assert!(cfg.display.snapshot_dir.is_none());

    let settings = cfg.controller_settings();
    assert_eq!(settings.service_deadline, Duration::from_secs(35));
    assert_eq!(settings.shutdown_wait, Duration::from_secs(1));
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "camera": {
                "url": "http://10.0.0.7/capture",
                "mode": "snapshot",
                "read_timeout_secs": 4
            },
            "webcam": { "device": "stub://bench", "width": 320, "height": 240 },
            "service": { "model": "vision-small", "timeout_secs": 12 },
            "timing": { "warning_repeats": 2, "poll_interval_ms": 50 },
            "display": { "snapshot_dir": "/tmp/va-snapshots" }
        }"#,
    );

    std::env::set_var("VISION_ASSIST_CONFIG", file.path());
    std::env::set_var("VISION_ASSIST_MODEL", "vision-large");
    std::env::set_var("VISION_ASSIST_OBSTACLE_COOLDOWN_SECS", "5");
    std::env::set_var("TOGETHER_API_KEY", "fallback-key");

    let cfg = AssistConfig::load().expect("load config");

    assert_eq!(cfg.camera.url, "http://10.0.0.7/capture");
    assert_eq!(cfg.camera.mode, CaptureMode::Snapshot);
    assert_eq!(cfg.camera.read_timeout, Duration::from_secs(4));
    assert_eq!(cfg.camera.connect_timeout, Duration::from_secs(10));
    assert_eq!(cfg.webcam.device, "stub://bench");
    assert_eq!(cfg.webcam.width, 320);
    assert_eq!(cfg.service.model, "vision-large");
    assert_eq!(cfg.service.timeout, Duration::from_secs(12));
    assert_eq!(cfg.service.api_key.as_deref(), Some("fallback-key"));
    assert_eq!(cfg.timing.warning_repeats, 2);
    assert_eq!(cfg.timing.poll_interval, Duration::from_millis(50));
    assert_eq!(cfg.timing.obstacle_cooldown, Duration::from_secs(5));
    assert_eq!(
        cfg.display.snapshot_dir.as_deref(),
        Some(std::path::Path::new("/tmp/va-snapshots"))
    );

    let esp32 = cfg.esp32_config();
    assert_eq!(esp32.mode, CaptureMode::Snapshot);
    let describer = cfg.describer_config();
    assert_eq!(describer.model, "vision-large");

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".toml",
        r#"
[camera]
enabled = false

[webcam]
device = "stub://desk"

[speech]
command = "espeak -s 150"
shutdown_wait_ms = 250
"#,
    );
    std::env::set_var("VISION_ASSIST_CONFIG", file.path());
    std::env::set_var("VISION_ASSIST_API_KEY", "primary-key");
    std::env::set_var("TOGETHER_API_KEY", "fallback-key");

    let cfg = AssistConfig::load().expect("load toml config");

    assert!(!cfg.camera.enabled);
    assert_eq!(cfg.webcam.device, "stub://desk");
    assert_eq!(cfg.speech.command.as_deref(), Some("espeak -s 150"));
    assert_eq!(cfg.speech.shutdown_wait, Duration::from_millis(250));
    assert_eq!(cfg.service.api_key.as_deref(), Some("primary-key"));

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VISION_ASSIST_CAMERA_URL", "rtsp://camera-1/stream");
    assert!(AssistConfig::load().is_err());
    clear_env();

    std::env::set_var("VISION_ASSIST_CAMERA_MODE", "burst");
    assert!(AssistConfig::load().is_err());
    clear_env();

    std::env::set_var("VISION_ASSIST_OBSTACLE_COOLDOWN_SECS", "soon");
    assert!(AssistConfig::load().is_err());
    clear_env();

    let file = write_config(".json", r#"{ "timing": { "warning_repeats": 0 } }"#);
    std::env::set_var("VISION_ASSIST_CONFIG", file.path());
    assert!(AssistConfig::load().is_err());
    clear_env();

    let file = write_config(
        ".json",
        r#"{ "camera": { "enabled": false }, "webcam": { "enabled": false } }"#,
    );
    std::env::set_var("VISION_ASSIST_CONFIG", file.path());
    assert!(AssistConfig::load().is_err());
    clear_env();

    let file = write_config(".json", r#"{ "timing": { "poll_interval_ms": 0 } }"#);
    std::env::set_var("VISION_ASSIST_CONFIG", file.path());
    assert!(AssistConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VISION_ASSIST_CONFIG", "/nonexistent/vision-assist.json");
    let err = AssistConfig::load().expect_err("missing file");
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
