//! Camera backend drivers
//!
//! Exactly one mechanism is selected at startup from configuration. Every
//! variant implements the same contract: produce one encoded still on demand,
//! or fail with a typed [`CaptureError`]. Drivers never retry; the daemon
//! decides when to call again.

pub mod native;
pub mod process;
pub mod synthetic;
pub mod v4l2;

pub use native::NativeBackend;
pub use process::{JpegSplitter, ProcessBackend};
pub use synthetic::{SyntheticBackend, SyntheticScript};
pub use v4l2::V4l2Backend;

use crate::config::CameraConfig;
use crate::errors::{CameraError, CaptureError};
use crate::types::Frame;
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};

/// Capture mechanism tag used in configuration and health reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mechanism {
    /// Platform camera API (V4L2 / AVFoundation / MediaFoundation) through nokhwa
    Native,
    /// Raw video-capture device node
    V4l2,
    /// External program writing an MJPEG stream to stdout
    Process,
    /// Generated test pattern
    Synthetic,
}

impl Mechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::Native => "native",
            Mechanism::V4l2 => "v4l2",
            Mechanism::Process => "process",
            Mechanism::Synthetic => "synthetic",
        }
    }
}

/// Whether the configured mechanism can currently produce frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverStatus {
    pub available: bool,
    pub reason: Option<String>,
}

impl DriverStatus {
    pub fn available() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
        }
    }

    pub fn unknown() -> Self {
        Self {
            available: false,
            reason: None,
        }
    }
}

/// The configured capture mechanism
pub enum Driver {
    Native(NativeBackend),
    V4l2(V4l2Backend),
    Process(ProcessBackend),
    Synthetic(SyntheticBackend),
}

impl Driver {
    /// Build the driver named by the configuration.
    ///
    /// Only a missing mechanism is fatal; missing dependencies surface later as
    /// `device-not-found` captures.
    pub fn from_config(config: &CameraConfig) -> Result<Self, CameraError> {
        let mechanism = config.mechanism.ok_or_else(|| {
            CameraError::InitializationError("No capture mechanism configured".to_string())
        })?;

        let [width, height] = config.resolution;
        let driver = match mechanism {
            Mechanism::Native => Driver::Native(
                NativeBackend::new(config.device_index)
                    .with_resolution(width, height)
                    .with_quality(config.jpeg_quality)
                    .with_timeout(config.capture_timeout()),
            ),
            Mechanism::V4l2 => Driver::V4l2(V4l2Backend::new(
                config.device_path.clone(),
                width,
                height,
                config.jpeg_quality,
            )),
            Mechanism::Process => Driver::Process(ProcessBackend::new(
                config.command.clone(),
                config.capture_timeout(),
            )?),
            Mechanism::Synthetic => {
                Driver::Synthetic(SyntheticBackend::new(width, height, config.jpeg_quality))
            }
        };

        log::info!("Camera driver configured: {}", mechanism.as_str());
        Ok(driver)
    }

    pub fn mechanism(&self) -> Mechanism {
        match self {
            Driver::Native(_) => Mechanism::Native,
            Driver::V4l2(_) => Mechanism::V4l2,
            Driver::Process(_) => Mechanism::Process,
            Driver::Synthetic(_) => Mechanism::Synthetic,
        }
    }

    /// Capture one frame. Blocking; call from a blocking context.
    pub fn capture(&mut self) -> Result<Frame, CaptureError> {
        match self {
            Driver::Native(backend) => backend.capture(),
            Driver::V4l2(backend) => backend.capture(),
            Driver::Process(backend) => backend.capture(),
            Driver::Synthetic(backend) => backend.capture(),
        }
    }

    /// Report availability without touching the camera
    pub fn status(&self) -> DriverStatus {
        match self {
            Driver::Native(backend) => backend.status(),
            Driver::V4l2(backend) => backend.status(),
            Driver::Process(backend) => backend.status(),
            Driver::Synthetic(_) => DriverStatus::available(),
        }
    }

    /// Close the device so another process can claim it
    pub fn release(&mut self) {
        match self {
            Driver::Native(backend) => backend.release(),
            Driver::V4l2(backend) => backend.release(),
            Driver::Process(backend) => backend.release(),
            Driver::Synthetic(_) => {}
        }
    }
}

/// True when `data` starts with a JPEG SOI marker
pub fn is_jpeg(data: &[u8]) -> bool {
    data.len() >= 3 && data[0] == 0xFF && data[1] == 0xD8 && data[2] == 0xFF
}

/// Encode packed RGB8 pixels as JPEG
pub fn encode_jpeg(
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    quality: u8,
) -> Result<Vec<u8>, CaptureError> {
    let img = image::RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
        CaptureError::busy(format!(
            "Frame buffer does not match {}x{} RGB",
            width, height
        ))
    })?;

    let mut out = Vec::with_capacity((width * height / 4) as usize);
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    image::DynamicImage::ImageRgb8(img)
        .write_with_encoder(encoder)
        .map_err(|e| CaptureError::busy(format!("JPEG encoding failed: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_jpeg_produces_soi() {
        let jpeg = encode_jpeg(4, 2, vec![128u8; 4 * 2 * 3], 80).unwrap();
        assert!(is_jpeg(&jpeg));
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_encode_jpeg_rejects_short_buffer() {
        assert!(encode_jpeg(4, 4, vec![0u8; 10], 80).is_err());
    }

    #[test]
    fn test_missing_mechanism_is_fatal() {
        let config = CameraConfig {
            mechanism: None,
            ..CameraConfig::default()
        };
        assert!(Driver::from_config(&config).is_err());
    }

    #[test]
    fn test_synthetic_from_config() {
        let config = CameraConfig {
            mechanism: Some(Mechanism::Synthetic),
            resolution: [64, 48],
            ..CameraConfig::default()
        };
        let mut driver = Driver::from_config(&config).unwrap();
        assert_eq!(driver.mechanism(), Mechanism::Synthetic);
        assert!(driver.status().available);
        let frame = driver.capture().unwrap();
        assert!(is_jpeg(&frame.data));
    }
}
