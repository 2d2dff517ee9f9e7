//! Plan A media access
//!
//! The controller only sees the [`MediaDevices`] trait. [`LocalMediaDevices`]
//! opens cameras in-process through nokhwa; a track exists only after the
//! camera delivered its first frame, so an opened track is a working one.

use super::attempts::{CaptureConstraints, Facing};
use crate::driver::NativeBackend;
use crate::errors::{CaptureError, FailureReason};
use crate::types::{DeviceInfo, Frame};
use std::time::Duration;

/// A bound capture source
pub trait CaptureTrack {
    fn device(&self) -> &DeviceInfo;
}

/// Local capture device access
pub trait MediaDevices {
    type Track: CaptureTrack;

    /// Current device list; never cached across calls
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, CaptureError>;

    /// Bind a live track satisfying `constraints`
    fn open(&mut self, constraints: &CaptureConstraints) -> Result<Self::Track, CaptureError>;

    /// Still image from a live track
    fn grab_still(&mut self, track: &mut Self::Track) -> Result<Frame, CaptureError>;

    /// Stop a track and free its device
    fn stop(&mut self, track: Self::Track);
}

pub struct LocalTrack {
    device: DeviceInfo,
    backend: NativeBackend,
}

impl CaptureTrack for LocalTrack {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }
}

/// In-process cameras through the platform camera API
pub struct LocalMediaDevices {
    quality: u8,
    timeout: Duration,
}

impl LocalMediaDevices {
    pub fn new() -> Self {
        Self {
            quality: 85,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for LocalMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDevices for LocalMediaDevices {
    type Track = LocalTrack;

    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, CaptureError> {
        crate::platform::list_video_devices()
            .map_err(|e| CaptureError::classify(e.to_string(), FailureReason::DeviceNotFound))
    }

    fn open(&mut self, constraints: &CaptureConstraints) -> Result<LocalTrack, CaptureError> {
        let devices = self.enumerate()?;
        let device = select_device(&devices, constraints)?;
        let index: u32 = device.id.parse().map_err(|_| {
            CaptureError::not_found(format!("Device {} has no numeric index", device.id))
        })?;

        let (width, height) = constraints.resolution.unwrap_or((1280, 720));
        let mut backend = NativeBackend::new(index)
            .with_resolution(width, height)
            .with_quality(self.quality)
            .with_timeout(self.timeout);

        // The first frame proves the device is really ours
        backend.capture()?;
        log::info!("Direct capture bound to {} ({})", device.label, device.id);
        Ok(LocalTrack { device, backend })
    }

    fn grab_still(&mut self, track: &mut LocalTrack) -> Result<Frame, CaptureError> {
        track.backend.capture()
    }

    fn stop(&mut self, mut track: LocalTrack) {
        track.backend.release();
        log::info!("Direct capture on {} stopped", track.device.id);
    }
}

/// Pick the device that satisfies `constraints` from an enumeration
pub fn select_device(
    devices: &[DeviceInfo],
    constraints: &CaptureConstraints,
) -> Result<DeviceInfo, CaptureError> {
    if devices.is_empty() {
        return Err(CaptureError::not_found("No cameras available"));
    }

    if let Some(id) = &constraints.device_id {
        return devices
            .iter()
            .find(|d| &d.id == id)
            .cloned()
            .ok_or_else(|| CaptureError::not_found(format!("Selected camera {} not present", id)));
    }

    match constraints.facing {
        Some(facing) => devices
            .iter()
            .find(|d| guess_facing(d) == Some(facing))
            .cloned()
            .ok_or_else(|| {
                CaptureError::not_found(format!(
                    "No {} camera among {} device(s)",
                    match facing {
                        Facing::User => "user-facing",
                        Facing::Environment => "environment-facing",
                    },
                    devices.len()
                ))
            }),
        None => Ok(devices[0].clone()),
    }
}

/// Desktop APIs carry no facing metadata; infer it from the label
fn guess_facing(device: &DeviceInfo) -> Option<Facing> {
    let label = device.label.to_lowercase();
    if ["front", "facetime", "user", "integrated", "webcam"]
        .iter()
        .any(|k| label.contains(k))
    {
        Some(Facing::User)
    } else if ["back", "rear", "environment"].iter().any(|k| label.contains(k)) {
        Some(Facing::Environment)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<DeviceInfo> {
        vec![
            DeviceInfo::new("0", "Arducam Rear Module"),
            DeviceInfo::new("2", "Integrated Webcam"),
        ]
    }

    #[test]
    fn test_select_any() {
        let device = select_device(&devices(), &CaptureConstraints::any()).unwrap();
        assert_eq!(device.id, "0");
    }

    #[test]
    fn test_select_facing_user() {
        let constraints = CaptureConstraints {
            facing: Some(Facing::User),
            ..CaptureConstraints::default()
        };
        assert_eq!(select_device(&devices(), &constraints).unwrap().id, "2");
    }

    #[test]
    fn test_select_missing_device() {
        let constraints = CaptureConstraints {
            device_id: Some("7".to_string()),
            ..CaptureConstraints::default()
        };
        let err = select_device(&devices(), &constraints).unwrap_err();
        assert_eq!(err.reason, FailureReason::DeviceNotFound);
    }

    #[test]
    fn test_select_from_empty_list() {
        let err = select_device(&[], &CaptureConstraints::any()).unwrap_err();
        assert_eq!(err.reason, FailureReason::DeviceNotFound);
    }
}
