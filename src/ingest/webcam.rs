//! Local webcam frame source.
//!
//! This module provides `WebcamSource` for capturing frames from a local device.
//!
//! Backends:
//! - `stub://...` paths use a synthetic generator (demos and tests, no hardware)
//! - device paths (e.g. `/dev/video0`) use V4L2 and require the `ingest-v4l2` feature
//!
//! Each `read_frame` issues exactly one capture call.

use super::{ConnectionState, FrameSource, LinkState, SourceStats};
use crate::error::{ConnectionError, FrameError};
use crate::frame::{Frame, CHANNELS};

/// Configuration for a local capture device.
#[derive(Clone, Debug)]
pub struct WebcamConfig {
    /// Device path (e.g. "/dev/video0") or `stub://name`.
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Local webcam source.
pub struct WebcamSource {
    name: String,
    backend: WebcamBackend,
    link: LinkState,
}

enum WebcamBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(device::DeviceCamera),
    #[cfg(not(feature = "ingest-v4l2"))]
    Unsupported(WebcamConfig),
}

impl WebcamSource {
    pub fn new(config: WebcamConfig) -> Self {
        let name = format!("local webcam {}", config.device);
        let backend = if config.device.starts_with("stub://") {
            WebcamBackend::Synthetic(SyntheticCamera::new(config))
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                WebcamBackend::Device(device::DeviceCamera::new(config))
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                WebcamBackend::Unsupported(config)
            }
        };
        Self {
            name,
            backend,
            link: LinkState::new(),
        }
    }
}

impl FrameSource for WebcamSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ConnectionState {
        self.link.state()
    }

    fn open(&mut self) -> Result<(), ConnectionError> {
        self.link.begin_open();
        let result = match &mut self.backend {
            WebcamBackend::Synthetic(camera) => {
                log::info!(
                    "WebcamSource: connected to {} (synthetic)",
                    camera.config.device
                );
                Ok(())
            }
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(camera) => camera.open(),
            #[cfg(not(feature = "ingest-v4l2"))]
            WebcamBackend::Unsupported(config) => Err(ConnectionError::new(
                &config.device,
                "local device capture requires the ingest-v4l2 feature",
            )),
        };
        if result.is_err() {
            self.link.failed();
        }
        result
    }

    fn read_frame(&mut self) -> Result<Frame, FrameError> {
        let result = match &mut self.backend {
            WebcamBackend::Synthetic(camera) => camera.capture(),
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(camera) => camera.capture(),
            #[cfg(not(feature = "ingest-v4l2"))]
            WebcamBackend::Unsupported(config) => Err(FrameError::DeviceUnavailable(format!(
                "{} cannot be opened without the ingest-v4l2 feature",
                config.device
            ))),
        };
        match &result {
            Ok(_) => self.link.frame_ok(),
            Err(_) => self.link.failed(),
        }
        result
    }

    fn close(&mut self) {
        #[cfg(feature = "ingest-v4l2")]
        {
            if let WebcamBackend::Device(camera) = &mut self.backend {
                camera.close();
            }
        }
        self.link.reset();
    }

    fn stats(&self) -> SourceStats {
        let device = match &self.backend {
            WebcamBackend::Synthetic(camera) => &camera.config.device,
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(camera) => &camera.config.device,
            #[cfg(not(feature = "ingest-v4l2"))]
            WebcamBackend::Unsupported(config) => &config.device,
        };
        self.link.stats(device)
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://)
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: WebcamConfig,
    frame_count: u64,
}

impl SyntheticCamera {
    fn new(config: WebcamConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    /// Horizontal gradient that drifts one step per frame.
    fn capture(&mut self) -> Result<Frame, FrameError> {
        self.frame_count += 1;
        let width = self.config.width.max(1);
        let height = self.config.height.max(1);
        let mut pixels = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for _y in 0..height {
            for x in 0..width {
                let level = ((x as u64 * 256 / width as u64 + self.frame_count) % 256) as u8;
                pixels.extend_from_slice(&[level, level, level]);
            }
        }
        Frame::from_rgb(width, height, pixels)
    }
}

// ----------------------------------------------------------------------------
// V4L2 device camera
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
mod device {
    use ouroboros::self_referencing;

    use super::WebcamConfig;
    use crate::error::{ConnectionError, FrameError};
    use crate::frame::{Frame, CHANNELS};

    pub(super) struct DeviceCamera {
        pub(super) config: WebcamConfig,
        state: Option<DeviceState>,
        active_width: u32,
        active_height: u32,
    }

    #[self_referencing]
    struct DeviceState {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    impl DeviceCamera {
        pub(super) fn new(config: WebcamConfig) -> Self {
            Self {
                active_width: config.width,
                active_height: config.height,
                config,
                state: None,
            }
        }

        pub(super) fn open(&mut self) -> Result<(), ConnectionError> {
            use v4l::buffer::Type;
            use v4l::video::Capture;

            let fail = |reason: String| ConnectionError::new(&self.config.device, reason);

            let device = v4l::Device::with_path(&self.config.device)
                .map_err(|err| fail(format!("open device: {}", err)))?;
            let mut format = device
                .format()
                .map_err(|err| fail(format!("read format: {}", err)))?;
            format.width = self.config.width;
            format.height = self.config.height;
            format.fourcc = v4l::FourCC::new(b"RGB3");

            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!(
                        "WebcamSource: failed to set format on {}: {}",
                        self.config.device,
                        err
                    );
                    device
                        .format()
                        .map_err(|err| fail(format!("read format after set failure: {}", err)))?
                }
            };

            let state = DeviceStateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                },
            }
            .try_build()
            .map_err(|err| fail(format!("create buffer stream: {}", err)))?;

            self.active_width = format.width;
            self.active_height = format.height;
            self.state = Some(state);
            log::info!(
                "WebcamSource: connected to {} ({}x{})",
                self.config.device,
                self.active_width,
                self.active_height
            );
            Ok(())
        }

        pub(super) fn capture(&mut self) -> Result<Frame, FrameError> {
            use v4l::io::traits::CaptureStream;

            let state = self.state.as_mut().ok_or_else(|| {
                FrameError::DeviceUnavailable(format!("{} not opened", self.config.device))
            })?;
            let (buf, _meta) = state
                .with_mut(|fields| fields.stream.next())
                .map_err(|err| FrameError::DeviceUnavailable(err.to_string()))?;

            let expected = self.active_width as usize * self.active_height as usize * CHANNELS;
            if buf.len() < expected {
                return Err(FrameError::DeviceUnavailable(format!(
                    "capture returned {} of {} bytes",
                    buf.len(),
                    expected
                )));
            }
            Frame::from_rgb(
                self.active_width,
                self.active_height,
                buf[..expected].to_vec(),
            )
        }

        pub(super) fn close(&mut self) {
            self.state = None;
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
