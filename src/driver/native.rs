//! Platform camera API backend (nokhwa)
//!
//! nokhwa's `Camera` is not `Send`, so it lives on a dedicated worker thread
//! that owns it for its whole life. The backend talks to that thread over a
//! command channel; a capture waits at most `timeout` for the reply.

use super::{encode_jpeg, is_jpeg, DriverStatus};
use crate::errors::{CaptureError, FailureReason};
use crate::types::Frame;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use std::thread::JoinHandle;
use std::time::Duration;

enum Command {
    Capture(Sender<Result<Vec<u8>, CaptureError>>),
    Release,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct StreamSettings {
    index: u32,
    width: u32,
    height: u32,
    quality: u8,
}

/// Native camera backend driven from a worker thread
pub struct NativeBackend {
    settings: StreamSettings,
    timeout: Duration,
    worker: Option<(Sender<Command>, JoinHandle<()>)>,
}

impl NativeBackend {
    pub fn new(index: u32) -> Self {
        Self {
            settings: StreamSettings {
                index,
                width: 1280,
                height: 720,
                quality: 85,
            },
            timeout: Duration::from_secs(5),
            worker: None,
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.settings.width = width;
        self.settings.height = height;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.settings.quality = quality;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn capture(&mut self) -> Result<Frame, CaptureError> {
        let commands = self.ensure_worker()?;
        let (reply_tx, reply_rx) = bounded(1);

        if commands.send(Command::Capture(reply_tx)).is_err() {
            self.worker = None;
            return Err(CaptureError::busy("Camera worker exited"));
        }

        match reply_rx.recv_timeout(self.timeout) {
            Ok(result) => result.map(Frame::new),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::busy(format!(
                "No frame from camera {} within {:?}",
                self.settings.index, self.timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                self.worker = None;
                Err(CaptureError::busy("Camera worker exited during capture"))
            }
        }
    }

    pub fn status(&self) -> DriverStatus {
        match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => {
                let present = cameras
                    .iter()
                    .any(|info| info.index().as_index().ok() == Some(self.settings.index));
                if present {
                    DriverStatus::available()
                } else {
                    DriverStatus::unavailable(format!(
                        "Camera {} not present ({} detected)",
                        self.settings.index,
                        cameras.len()
                    ))
                }
            }
            Err(e) => DriverStatus::unavailable(format!("Camera query failed: {}", e)),
        }
    }

    /// Close the stream; the worker stays alive and reopens on the next capture.
    pub fn release(&mut self) {
        if let Some((commands, _)) = &self.worker {
            if commands.send(Command::Release).is_err() {
                self.worker = None;
            }
        }
    }

    fn ensure_worker(&mut self) -> Result<Sender<Command>, CaptureError> {
        if let Some((commands, _)) = &self.worker {
            return Ok(commands.clone());
        }

        let (tx, rx) = unbounded();
        let settings = self.settings;
        let handle = std::thread::Builder::new()
            .name(format!("boothcam-native-{}", settings.index))
            .spawn(move || worker_loop(settings, rx))
            .map_err(|e| CaptureError::busy(format!("Failed to spawn camera worker: {}", e)))?;

        self.worker = Some((tx.clone(), handle));
        Ok(tx)
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        if let Some((commands, handle)) = self.worker.take() {
            let _ = commands.send(Command::Shutdown);
            let _ = handle.join();
        }
    }
}

fn worker_loop(settings: StreamSettings, commands: Receiver<Command>) {
    let mut camera: Option<Camera> = None;

    while let Ok(command) = commands.recv() {
        match command {
            Command::Capture(reply) => {
                let result = capture_one(&settings, &mut camera);
                if result.is_err() {
                    // Drop the handle so the next attempt reopens from scratch
                    close(&mut camera);
                }
                let _ = reply.send(result);
            }
            Command::Release => close(&mut camera),
            Command::Shutdown => break,
        }
    }

    close(&mut camera);
    log::debug!("Camera worker {} stopped", settings.index);
}

fn close(camera: &mut Option<Camera>) {
    if let Some(mut cam) = camera.take() {
        if let Err(e) = cam.stop_stream() {
            log::debug!("Failed to stop camera stream: {}", e);
        }
        log::info!("Released native camera");
    }
}

fn open(settings: &StreamSettings) -> Result<Camera, CaptureError> {
    let format = CameraFormat::new(
        Resolution::new(settings.width, settings.height),
        FrameFormat::MJPEG,
        30,
    );
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

    let mut camera = Camera::new(CameraIndex::Index(settings.index), requested).map_err(|e| {
        CaptureError::classify(
            format!("Failed to open camera {}: {}", settings.index, e),
            FailureReason::DeviceNotFound,
        )
    })?;

    camera.open_stream().map_err(|e| {
        CaptureError::classify(
            format!("Failed to start stream on camera {}: {}", settings.index, e),
            FailureReason::DeviceBusy,
        )
    })?;

    log::info!(
        "Opened native camera {} at {}",
        settings.index,
        camera.camera_format()
    );
    Ok(camera)
}

fn capture_one(
    settings: &StreamSettings,
    camera: &mut Option<Camera>,
) -> Result<Vec<u8>, CaptureError> {
    if camera.is_none() {
        *camera = Some(open(settings)?);
    }
    let Some(cam) = camera.as_mut() else {
        return Err(CaptureError::busy("Camera not open"));
    };

    let buffer = cam.frame().map_err(|e| {
        CaptureError::classify(
            format!("Failed to read frame: {}", e),
            FailureReason::DeviceBusy,
        )
    })?;

    // MJPEG sources already hand us a complete JPEG
    if buffer.source_frame_format() == FrameFormat::MJPEG && is_jpeg(buffer.buffer()) {
        return Ok(buffer.buffer().to_vec());
    }

    let decoded = buffer.decode_image::<RgbFormat>().map_err(|e| {
        CaptureError::busy(format!("Failed to decode frame: {}", e))
    })?;
    let (width, height) = (decoded.width(), decoded.height());
    encode_jpeg(width, height, decoded.into_raw(), settings.quality)
}
