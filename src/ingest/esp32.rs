//! ESP32 network camera source.
//!
//! This module provides `Esp32Source` for reading frames from ESP32-CAM style
//! boards over HTTP.
//!
//! Two capture modes are supported:
//! - `Stream`: one long-lived GET whose body is an endless run of JPEG images
//!   (multipart MJPEG or bare JPEGs), framed with `StreamBuffer`
//! - `Snapshot`: one GET per frame against a capture endpoint, each body one JPEG
//!
//! Connect and read timeouts bound every network suspension point.

use std::io::Read;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use super::demux::StreamBuffer;
use super::{FrameSource, LinkState, SourceStats};
use crate::error::{ConnectionError, FrameError};
use crate::frame::Frame;

/// Largest snapshot body accepted from a capture endpoint.
const MAX_SNAPSHOT_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    Stream,
    Snapshot,
}

impl std::str::FromStr for CaptureMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stream" => Ok(CaptureMode::Stream),
            "snapshot" | "capture" => Ok(CaptureMode::Snapshot),
            other => Err(format!(
                "unknown capture mode '{}'; expected stream or snapshot",
                other
            )),
        }
    }
}

/// Configuration for an ESP32 source.
#[derive(Clone, Debug)]
pub struct Esp32Config {
    /// Base stream URL or capture endpoint (http or https).
    pub url: String,
    pub mode: CaptureMode,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for Esp32Config {
    fn default() -> Self {
        Self {
            url: "http://192.168.4.1:81/stream".to_string(),
            mode: CaptureMode::Stream,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
        }
    }
}

/// ESP32 frame source.
pub struct Esp32Source {
    config: Esp32Config,
    name: String,
    agent: ureq::Agent,
    stream: Option<Box<dyn Read + Send + Sync>>,
    buffer: StreamBuffer,
    link: LinkState,
}

impl Esp32Source {
    pub fn new(config: Esp32Config) -> Result<Self, ConnectionError> {
        let url = Url::parse(&config.url)
            .map_err(|err| ConnectionError::new(&config.url, format!("invalid url: {}", err)))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ConnectionError::new(
                    &config.url,
                    format!("unsupported scheme '{}'; expected http(s)", other),
                ))
            }
        }
        let name = format!("ESP32 camera at {}", url.host_str().unwrap_or("unknown host"));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .build();
        Ok(Self {
            config,
            name,
            agent,
            stream: None,
            buffer: StreamBuffer::new(),
            link: LinkState::new(),
        })
    }

    pub fn config(&self) -> &Esp32Config {
        &self.config
    }

    fn get(&self) -> Result<ureq::Response, ConnectionError> {
        self.agent
            .get(&self.config.url)
            .call()
            .map_err(|err| ConnectionError::new(&self.name, describe_ureq_error(&err)))
    }

    fn read_stream_frame(&mut self) -> Result<Frame, FrameError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FrameError::Io(format!("{} not connected", self.name)))?;
        let payload = self.buffer.read_payload(stream)?;
        // The remainder stays buffered even if this payload fails to decode.
        Frame::decode_jpeg(&payload)
    }

    fn read_snapshot_frame(&mut self) -> Result<Frame, FrameError> {
        let response = self.get()?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|err| FrameError::from_io(&err))?;
        if bytes.is_empty() {
            return Err(FrameError::Io("empty jpeg snapshot".to_string()));
        }
        Frame::decode_jpeg(&bytes)
    }
}

impl FrameSource for Esp32Source {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> super::ConnectionState {
        self.link.state()
    }

    fn open(&mut self) -> Result<(), ConnectionError> {
        self.link.begin_open();
        self.buffer.clear();
        match self.config.mode {
            CaptureMode::Stream => match self.get() {
                Ok(response) => {
                    log::info!(
                        "Esp32Source: stream opened at {} ({})",
                        self.config.url,
                        response.content_type()
                    );
                    self.stream = Some(response.into_reader());
                    Ok(())
                }
                Err(err) => {
                    self.link.failed();
                    Err(err)
                }
            },
            CaptureMode::Snapshot => {
                log::info!("Esp32Source: snapshot mode against {}", self.config.url);
                Ok(())
            }
        }
    }

    fn read_frame(&mut self) -> Result<Frame, FrameError> {
        let result = match self.config.mode {
            CaptureMode::Stream => self.read_stream_frame(),
            CaptureMode::Snapshot => self.read_snapshot_frame(),
        };
        match &result {
            Ok(_) => self.link.frame_ok(),
            Err(FrameError::Decode(reason)) => {
                log::warn!("Esp32Source: dropped undecodable payload: {}", reason);
                self.link.rejected();
            }
            Err(err) => {
                log::warn!("Esp32Source: read from {} failed: {}", self.config.url, err);
                self.link.failed();
            }
        }
        result
    }

    fn close(&mut self) {
        self.stream = None;
        self.buffer.clear();
        self.link.reset();
    }

    fn stats(&self) -> SourceStats {
        self.link.stats(&self.config.url)
    }
}

fn describe_ureq_error(err: &ureq::Error) -> String {
    match err {
        ureq::Error::Status(code, response) => {
            format!("http status {} {}", code, response.status_text())
        }
        ureq::Error::Transport(transport) => transport.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ConnectionState;

    #[test]
    fn capture_mode_parses_case_insensitively() {
        assert_eq!("Stream".parse::<CaptureMode>(), Ok(CaptureMode::Stream));
        assert_eq!("SNAPSHOT".parse::<CaptureMode>(), Ok(CaptureMode::Snapshot));
        assert!("rtsp".parse::<CaptureMode>().is_err());
    }

    #[test]
    fn rejects_non_http_urls() {
        let config = Esp32Config {
            url: "udp://10.0.0.2:5000".to_string(),
            ..Esp32Config::default()
        };
        assert!(Esp32Source::new(config).is_err());
    }

    #[test]
    fn read_before_open_fails_without_panicking() {
        let mut source = Esp32Source::new(Esp32Config::default()).expect("valid config");
        assert_eq!(source.state(), ConnectionState::Disconnected);
        let err = source.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
        assert_eq!(source.state(), ConnectionState::Failed);
        source.close();
        assert_eq!(source.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn name_mentions_host() {
        let source = Esp32Source::new(Esp32Config::default()).expect("valid config");
        assert_eq!(source.name(), "ESP32 camera at 192.168.4.1");
    }
}
