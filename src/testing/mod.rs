//! Test doubles for the acquisition controller
//!
//! Hardware-free stand-ins for direct capture and the daemon link. Both are
//! cheap to clone; clones share state, so a test keeps one handle to script
//! and inspect while the controller owns the other.

use crate::client::attempts::CaptureConstraints;
use crate::client::daemon_link::{DaemonHealth, DaemonLink};
use crate::client::media::{select_device, CaptureTrack, MediaDevices};
use crate::driver::encode_jpeg;
use crate::errors::CaptureError;
use crate::types::{DeviceInfo, Frame};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};

/// Small gradient JPEG for tests and demos
pub fn synthetic_jpeg(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            rgb.push(seed.wrapping_add((x % 256) as u8));
            rgb.push(seed.wrapping_add((y % 256) as u8));
            rgb.push(seed.wrapping_add(((x + y) % 256) as u8));
        }
    }
    // Dimensions and buffer always agree here
    encode_jpeg(width, height, rgb, 80).unwrap_or_default()
}

/// What a [`ScriptedMedia`] observed
#[derive(Debug, Clone, Default)]
pub struct MediaLog {
    pub opened: usize,
    pub stopped: usize,
    pub live: usize,
    pub max_live: usize,
    /// Constraints of every `open` call, in order
    pub requests: Vec<CaptureConstraints>,
}

#[derive(Debug)]
enum Policy {
    Succeed,
    FailAll(CaptureError),
    FailUnlessDevice(String, CaptureError),
}

#[derive(Debug)]
struct MediaInner {
    devices: Vec<DeviceInfo>,
    policy: Policy,
    log: MediaLog,
    next_track: u64,
    stills: u8,
}

#[derive(Debug)]
pub struct ScriptedTrack {
    pub id: u64,
    device: DeviceInfo,
}

impl CaptureTrack for ScriptedTrack {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }
}

/// Scriptable direct-capture backend that tracks live tracks
#[derive(Debug, Clone)]
pub struct ScriptedMedia {
    inner: Arc<Mutex<MediaInner>>,
}

impl ScriptedMedia {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MediaInner {
                devices,
                policy: Policy::Succeed,
                log: MediaLog::default(),
                next_track: 1,
                stills: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MediaInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every open fails with `error`
    pub fn fail_all(&self, error: CaptureError) {
        self.lock().policy = Policy::FailAll(error);
    }

    /// Opens fail unless they ask for `device` explicitly
    pub fn fail_unless_device(&self, device: &str, error: CaptureError) {
        self.lock().policy = Policy::FailUnlessDevice(device.to_string(), error);
    }

    pub fn succeed(&self) {
        self.lock().policy = Policy::Succeed;
    }

    pub fn set_devices(&self, devices: Vec<DeviceInfo>) {
        self.lock().devices = devices;
    }

    pub fn log(&self) -> MediaLog {
        self.lock().log.clone()
    }

    pub fn opened(&self) -> usize {
        self.lock().log.opened
    }

    pub fn stopped(&self) -> usize {
        self.lock().log.stopped
    }

    pub fn live(&self) -> usize {
        self.lock().log.live
    }

    pub fn max_live(&self) -> usize {
        self.lock().log.max_live
    }
}

impl MediaDevices for ScriptedMedia {
    type Track = ScriptedTrack;

    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, CaptureError> {
        Ok(self.lock().devices.clone())
    }

    fn open(&mut self, constraints: &CaptureConstraints) -> Result<ScriptedTrack, CaptureError> {
        let mut inner = self.lock();
        inner.log.requests.push(constraints.clone());

        match &inner.policy {
            Policy::Succeed => {}
            Policy::FailAll(error) => return Err(error.clone()),
            Policy::FailUnlessDevice(device, error) => {
                if constraints.device_id.as_deref() != Some(device.as_str()) {
                    return Err(error.clone());
                }
            }
        }

        // Facing is not modelled; any device satisfies it
        let relaxed = CaptureConstraints {
            facing: None,
            ..constraints.clone()
        };
        let device = select_device(&inner.devices, &relaxed)?;

        let id = inner.next_track;
        inner.next_track += 1;
        inner.log.opened += 1;
        inner.log.live += 1;
        inner.log.max_live = inner.log.max_live.max(inner.log.live);
        Ok(ScriptedTrack { id, device })
    }

    fn grab_still(&mut self, _track: &mut ScriptedTrack) -> Result<Frame, CaptureError> {
        let mut inner = self.lock();
        inner.stills = inner.stills.wrapping_add(1);
        Ok(Frame::new(synthetic_jpeg(16, 16, inner.stills)))
    }

    fn stop(&mut self, _track: ScriptedTrack) {
        let mut inner = self.lock();
        inner.log.stopped += 1;
        inner.log.live = inner.log.live.saturating_sub(1);
    }
}

#[derive(Debug)]
struct LinkInner {
    reachable: bool,
    healthy: bool,
    snapshot_error: Option<CaptureError>,
    snapshots: u64,
    health_calls: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

/// In-memory daemon link
#[derive(Debug, Clone)]
pub struct StubDaemonLink {
    stream_url: String,
    inner: Arc<Mutex<LinkInner>>,
}

impl StubDaemonLink {
    fn with(reachable: bool, healthy: bool) -> Self {
        Self {
            stream_url: "http://127.0.0.1:8080/stream".to_string(),
            inner: Arc::new(Mutex::new(LinkInner {
                reachable,
                healthy,
                snapshot_error: None,
                snapshots: 0,
                health_calls: 0,
                last_timestamp: None,
            })),
        }
    }

    pub fn healthy() -> Self {
        Self::with(true, true)
    }

    /// Reachable, but reporting `ok = false`
    pub fn degraded() -> Self {
        Self::with(true, false)
    }

    pub fn unreachable() -> Self {
        Self::with(false, false)
    }

    fn lock(&self) -> MutexGuard<'_, LinkInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    pub fn fail_snapshots(&self, error: Option<CaptureError>) {
        self.lock().snapshot_error = error;
    }

    pub fn snapshots(&self) -> u64 {
        self.lock().snapshots
    }

    pub fn health_calls(&self) -> u64 {
        self.lock().health_calls
    }
}

impl DaemonLink for StubDaemonLink {
    fn stream_url(&self) -> String {
        self.stream_url.clone()
    }

    fn health(&self) -> Result<DaemonHealth, CaptureError> {
        let mut inner = self.lock();
        inner.health_calls += 1;
        if !inner.reachable {
            return Err(CaptureError::unreachable("connection refused"));
        }
        Ok(DaemonHealth::from_json(json!({
            "ok": inner.healthy,
            "reason": if inner.healthy { None } else { Some("stale-frame") },
            "mechanism": "synthetic",
        })))
    }

    fn snapshot(&self) -> Result<Frame, CaptureError> {
        let mut inner = self.lock();
        if !inner.reachable {
            return Err(CaptureError::unreachable("connection refused"));
        }
        if let Some(error) = inner.snapshot_error.clone() {
            return Err(error);
        }

        inner.snapshots += 1;
        let mut now = Utc::now();
        if let Some(last) = inner.last_timestamp {
            if now <= last {
                now = last + ChronoDuration::microseconds(1);
            }
        }
        inner.last_timestamp = Some(now);

        Ok(Frame::new(synthetic_jpeg(16, 16, inner.snapshots as u8))
            .with_timestamp(now)
            .with_sequence(inner.snapshots))
    }
}
