//! Decoded frames and derived pixel maps.
//!
//! - `Frame`: owned, immutable RGB8 image decoded from one JPEG payload.
//! - `ClosenessMap`: single-channel byte matrix produced by the obstacle heuristic.
//!
//! A frame is never mutated after construction. Callers that need to hand the
//! same frame to several consumers wrap it in an `Arc`.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::{GenericImageView, ImageEncoder};
use std::path::Path;
use std::time::Instant;

use crate::error::FrameError;

/// Channels per pixel in a `Frame`.
pub const CHANNELS: usize = 3;

/// JPEG quality used when re-encoding frames for the description service.
const ENCODE_QUALITY: u8 = 85;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Immutable height x width x 3 pixel buffer. Pixel data is fixed at
/// construction time.
#[derive(Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    captured_at: Instant,
}

impl Frame {
    /// Wrap raw RGB8 pixels. The buffer length must match the dimensions.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * CHANNELS;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(FrameError::Decode(format!(
                "pixel buffer of {} bytes does not match {}x{} rgb",
                pixels.len(),
                width,
                height
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    /// Decode one complete JPEG payload.
    pub fn decode_jpeg(bytes: &[u8]) -> Result<Self, FrameError> {
        let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
            .map_err(|err| FrameError::Decode(err.to_string()))?;
        let (width, height) = image.dimensions();
        Self::from_rgb(width, height, image.into_rgb8().into_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Re-encode as JPEG for transmission.
    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.pixels.len() / 8);
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, ENCODE_QUALITY)
            .write_image(
                &self.pixels,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .context("encode frame as jpeg")?;
        Ok(out)
    }

    /// Save the frame to disk; format follows the file extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        image::save_buffer(
            path,
            &self.pixels,
            self.width,
            self.height,
            image::ExtendedColorType::Rgb8,
        )
        .with_context(|| format!("write frame to {}", path.display()))
    }
}

/// Encode JPEG bytes as a `data:` URI.
pub fn jpeg_data_uri(jpeg: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", BASE64_STANDARD.encode(jpeg))
}

// ----------------------------------------------------------------------------
// ClosenessMap
// ----------------------------------------------------------------------------

/// Per-pixel brightness proxy, one byte per pixel, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosenessMap {
    width: u32,
    height: u32,
    values: Vec<u8>,
}

impl ClosenessMap {
    pub(crate) fn new(width: u32, height: u32, values: Vec<u8>) -> Self {
        debug_assert_eq!(values.len(), width as usize * height as usize);
        Self {
            width,
            height,
            values,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Number of entries strictly above `threshold`.
    pub fn count_above(&self, threshold: u8) -> usize {
        self.values.iter().filter(|&&v| v > threshold).count()
    }

    /// Save as a grayscale image; format follows the file extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        image::save_buffer(
            path,
            &self.values,
            self.width,
            self.height,
            image::ExtendedColorType::L8,
        )
        .with_context(|| format!("write closeness map to {}", path.display()))
    }
}
