//! Raw video-capture device backend
//!
//! Opens the device node directly, negotiates MJPEG when the sensor offers it
//! and falls back to YUYV, which is converted and re-encoded. Only Linux has
//! the device interface; elsewhere every capture is a permanent
//! `device-not-found`.

use super::DriverStatus;
use crate::errors::CaptureError;
use crate::types::Frame;
use std::path::PathBuf;

/// Device-node capture backend
pub struct V4l2Backend {
    path: PathBuf,
    width: u32,
    height: u32,
    quality: u8,
    #[cfg(target_os = "linux")]
    session: Option<linux::Session>,
}

impl V4l2Backend {
    pub fn new(path: PathBuf, width: u32, height: u32, quality: u8) -> Self {
        Self {
            path,
            width,
            height,
            quality,
            #[cfg(target_os = "linux")]
            session: None,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    #[cfg(target_os = "linux")]
    pub fn capture(&mut self) -> Result<Frame, CaptureError> {
        if self.session.is_none() {
            self.session = Some(linux::Session::open(&self.path, self.width, self.height)?);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(CaptureError::busy("Device session not open"));
        };

        match session.read_jpeg(self.quality) {
            Ok(data) => Ok(Frame::new(data)),
            Err(e) => {
                // Reopen on the next call
                self.session = None;
                Err(e)
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn capture(&mut self) -> Result<Frame, CaptureError> {
        let _ = (self.width, self.height, self.quality);
        Err(CaptureError::unavailable(format!(
            "Device node capture is not supported on {}",
            crate::types::Platform::current().as_str()
        )))
    }

    pub fn status(&self) -> DriverStatus {
        if !cfg!(target_os = "linux") {
            return DriverStatus::unavailable("Device node capture requires Linux");
        }
        match std::fs::metadata(&self.path) {
            Ok(_) => DriverStatus::available(),
            Err(e) => DriverStatus::unavailable(format!("{}: {}", self.path.display(), e)),
        }
    }

    pub fn release(&mut self) {
        #[cfg(target_os = "linux")]
        if self.session.take().is_some() {
            log::info!("Released {}", self.path.display());
        }
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::super::encode_jpeg;
    use crate::errors::CaptureError;
    use std::path::Path;
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream;
    use v4l::io::traits::CaptureStream;
    use v4l::video::Capture;
    use v4l::{Device, FourCC};

    const BUFFER_COUNT: u32 = 4;

    pub(super) struct Session {
        // Stream holds its own handle to the device; keep the device for format queries.
        _device: Device,
        stream: Stream<'static>,
        width: u32,
        height: u32,
        mjpeg: bool,
    }

    impl Session {
        pub(super) fn open(path: &Path, width: u32, height: u32) -> Result<Self, CaptureError> {
            let context = path.display().to_string();
            let device =
                Device::with_path(path).map_err(|e| CaptureError::from_io(&context, &e))?;

            let mut format = device
                .format()
                .map_err(|e| CaptureError::from_io(&context, &e))?;
            format.width = width;
            format.height = height;
            format.fourcc = FourCC::new(b"MJPG");

            let mut negotiated = device
                .set_format(&format)
                .map_err(|e| CaptureError::from_io(&context, &e))?;

            if negotiated.fourcc != FourCC::new(b"MJPG") {
                format.fourcc = FourCC::new(b"YUYV");
                negotiated = device
                    .set_format(&format)
                    .map_err(|e| CaptureError::from_io(&context, &e))?;
                if negotiated.fourcc != FourCC::new(b"YUYV") {
                    return Err(CaptureError::unavailable(format!(
                        "{} offers neither MJPG nor YUYV (got {})",
                        context, negotiated.fourcc
                    )));
                }
            }

            let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
                .map_err(|e| CaptureError::from_io(&context, &e))?;

            log::info!(
                "Opened {} at {}x{} {}",
                context,
                negotiated.width,
                negotiated.height,
                negotiated.fourcc
            );

            Ok(Self {
                _device: device,
                stream,
                width: negotiated.width,
                height: negotiated.height,
                mjpeg: negotiated.fourcc == FourCC::new(b"MJPG"),
            })
        }

        pub(super) fn read_jpeg(&mut self, quality: u8) -> Result<Vec<u8>, CaptureError> {
            let (buf, meta) = self
                .stream
                .next()
                .map_err(|e| CaptureError::from_io("read frame", &e))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let data = &buf[..used];

            if self.mjpeg {
                if data.is_empty() {
                    return Err(CaptureError::busy("Device returned an empty frame"));
                }
                return Ok(data.to_vec());
            }

            let rgb = yuyv_to_rgb(data, self.width, self.height)?;
            encode_jpeg(self.width, self.height, rgb, quality)
        }
    }

    pub(super) fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CaptureError> {
        let pixels = (width as usize) * (height as usize);
        if data.len() < pixels * 2 {
            return Err(CaptureError::busy(format!(
                "Short YUYV frame: {} bytes for {}x{}",
                data.len(),
                width,
                height
            )));
        }

        let mut rgb = Vec::with_capacity(pixels * 3);
        for chunk in data[..pixels * 2].chunks_exact(4) {
            let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
            rgb.extend_from_slice(&yuv_pixel(y0, u, v));
            rgb.extend_from_slice(&yuv_pixel(y1, u, v));
        }
        Ok(rgb)
    }

    fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
        let y = y as f32;
        let u = u as f32 - 128.0;
        let v = v as f32 - 128.0;
        let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
        [
            clamp(y + 1.402 * v),
            clamp(y - 0.344_136 * u - 0.714_136 * v),
            clamp(y + 1.772 * u),
        ]
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureReason;

    #[test]
    fn test_missing_node_is_not_found() {
        let mut backend = V4l2Backend::new(PathBuf::from("/dev/boothcam-missing0"), 640, 480, 80);
        assert!(!backend.status().available);
        let err = backend.capture().unwrap_err();
        assert_eq!(err.reason, FailureReason::DeviceNotFound);
    }
}
