//! Client Acquisition Controller
//!
//! Event-driven state machine deciding where the kiosk preview comes from.
//! Every transition runs to completion on `&mut self`. Plan A (direct
//! capture) is tried attempt by attempt; after the list is exhausted the
//! preview moves to the daemon stream (Plan B) and stays there until an
//! operator asks for a retry.

use super::attempts::{attempt_plan, CapabilityAttempt};
use super::daemon_link::{DaemonHealth, DaemonLink};
use super::media::{CaptureTrack, MediaDevices};
use crate::config::ClientConfig;
use crate::errors::{CaptureError, FailureReason};
use crate::invariant_ppt::{RELEASE_BEFORE_ATTEMPT, SINGLE_CAPTURE_SOURCE, SINGLE_PREVIEW_SOURCE};
use crate::types::{DeviceInfo, Frame};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerState {
    Idle,
    AttemptingDirect,
    DirectActive,
    PlanBActive,
    ErrorAllFailed,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::AttemptingDirect => "attempting-direct",
            ControllerState::DirectActive => "direct-active",
            ControllerState::PlanBActive => "plan-b-active",
            ControllerState::ErrorAllFailed => "error-all-failed",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete inputs to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Initialize,
    Retry,
    VisibilityChanged { visible: bool },
    DevicesChanged,
    DeviceSelected(Option<String>),
}

/// What the preview surface shows. Never blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PreviewSource {
    Placeholder { message: String },
    Direct { device: DeviceInfo, attempt: String },
    Daemon { stream_url: String },
}

impl PreviewSource {
    fn placeholder(message: impl Into<String>) -> Self {
        PreviewSource::Placeholder {
            message: message.into(),
        }
    }
}

/// Banner entry for one failed capability attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub attempt: String,
    pub reason: FailureReason,
    pub detail: String,
}

/// On-demand diagnostics: fresh enumeration plus daemon health, verbatim
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub state: ControllerState,
    pub checked_at: DateTime<Utc>,
    pub devices: Vec<DeviceInfo>,
    pub device_error: Option<String>,
    pub daemon_health: Option<serde_json::Value>,
    pub daemon_error: Option<String>,
}

/// Everything the kiosk page renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerView {
    pub state: ControllerState,
    pub preview: PreviewSource,
    pub banner: Vec<AttemptFailure>,
    pub plan_b_badge: bool,
    pub daemon_notice: Option<String>,
    pub selected_device: Option<String>,
    pub devices: Vec<DeviceInfo>,
}

pub struct AcquisitionController<M: MediaDevices, D: DaemonLink> {
    media: M,
    daemon: Option<D>,
    state: ControllerState,
    track: Option<M::Track>,
    preview: PreviewSource,
    banner: Vec<AttemptFailure>,
    daemon_error: Option<CaptureError>,
    devices: Vec<DeviceInfo>,
    selected_device: Option<String>,
    preferred_resolution: (u32, u32),
    hidden: bool,
    resume_on_visible: bool,
}

impl<M: MediaDevices, D: DaemonLink> AcquisitionController<M, D> {
    /// `daemon` is `None` when no daemon address is configured.
    pub fn new(media: M, daemon: Option<D>) -> Self {
        Self {
            media,
            daemon,
            state: ControllerState::Idle,
            track: None,
            preview: PreviewSource::placeholder("Starting camera"),
            banner: Vec::new(),
            daemon_error: None,
            devices: Vec::new(),
            selected_device: None,
            preferred_resolution: (1280, 720),
            hidden: false,
            resume_on_visible: false,
        }
    }

    pub fn from_config(media: M, daemon: Option<D>, config: &ClientConfig) -> Self {
        let [width, height] = config.preferred_resolution;
        let mut controller = Self::new(media, daemon);
        controller.preferred_resolution = (width, height);
        controller.selected_device = config.preferred_device.clone();
        controller
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn preview(&self) -> &PreviewSource {
        &self.preview
    }

    pub fn banner(&self) -> &[AttemptFailure] {
        &self.banner
    }

    /// Diagnostic for an unreachable daemon in Plan B
    pub fn daemon_error(&self) -> Option<&CaptureError> {
        self.daemon_error.as_ref()
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn handle(&mut self, event: ControllerEvent) {
        log::debug!("Controller event {:?} in state {}", event, self.state);

        match event {
            ControllerEvent::Initialize => {
                if self.state != ControllerState::Idle {
                    return;
                }
                if self.hidden {
                    self.resume_on_visible = true;
                } else {
                    self.attempt_direct();
                }
            }
            ControllerEvent::Retry => {
                if self.hidden {
                    log::info!("Retry deferred until the page is visible");
                    self.resume_on_visible = true;
                    return;
                }
                log::info!("Manual retry from state {}", self.state);
                self.resume_on_visible = false;
                self.attempt_direct();
            }
            ControllerEvent::VisibilityChanged { visible: false } => {
                self.hidden = true;
                if self.state == ControllerState::DirectActive {
                    self.release_track();
                    self.resume_on_visible = true;
                    self.state = ControllerState::Idle;
                    self.set_preview(PreviewSource::placeholder("Preview paused"));
                }
            }
            ControllerEvent::VisibilityChanged { visible: true } => {
                self.hidden = false;
                if self.resume_on_visible {
                    self.resume_on_visible = false;
                    self.attempt_direct();
                }
            }
            ControllerEvent::DevicesChanged => {
                self.refresh_devices();
                let lost_active = self
                    .track
                    .as_ref()
                    .is_some_and(|track| !self.devices.iter().any(|d| d.id == track.device().id));
                if self.state == ControllerState::DirectActive && lost_active {
                    log::warn!("Active camera disappeared; re-attempting direct capture");
                    self.attempt_direct();
                }
            }
            ControllerEvent::DeviceSelected(device) => {
                if device == self.selected_device {
                    return;
                }
                self.selected_device = device;
                if self.state == ControllerState::DirectActive {
                    self.attempt_direct();
                }
            }
        }
    }

    /// Still capture from whichever source is active
    pub fn snapshot(&mut self) -> Result<Frame, CaptureError> {
        match self.state {
            ControllerState::DirectActive => match self.track.as_mut() {
                Some(track) => self.media.grab_still(track),
                None => Err(CaptureError::not_found("Direct capture has no live track")),
            },
            ControllerState::PlanBActive => {
                let Some(daemon) = self.daemon.as_ref() else {
                    return Err(CaptureError::unreachable("No capture daemon configured"));
                };
                let result = daemon.snapshot();
                match &result {
                    Err(e) if e.reason == FailureReason::DaemonUnreachable => {
                        self.mark_daemon_unreachable(e.clone());
                    }
                    Ok(_) if self.daemon_error.is_some() => self.bind_daemon_stream(),
                    _ => {}
                }
                result
            }
            state => Err(CaptureError::not_found(format!(
                "No capture source while {}",
                state
            ))),
        }
    }

    /// Re-enumerate devices and query daemon health
    pub fn diagnostics(&mut self) -> Diagnostics {
        let device_error = self.refresh_devices();
        let health = self.daemon.as_ref().map(|daemon| daemon.health());

        let (daemon_health, daemon_error) = match health {
            Some(Ok(health)) => {
                if self.state == ControllerState::PlanBActive && self.daemon_error.is_some() {
                    self.bind_daemon_stream();
                }
                (Some(health.raw), None)
            }
            Some(Err(e)) => {
                if self.state == ControllerState::PlanBActive {
                    self.mark_daemon_unreachable(e.clone());
                }
                (None, Some(e.to_string()))
            }
            None => (None, Some("No capture daemon configured".to_string())),
        };

        Diagnostics {
            state: self.state,
            checked_at: Utc::now(),
            devices: self.devices.clone(),
            device_error,
            daemon_health,
            daemon_error,
        }
    }

    pub fn view(&self) -> ControllerView {
        ControllerView {
            state: self.state,
            preview: self.preview.clone(),
            banner: self.banner.clone(),
            plan_b_badge: self.state == ControllerState::PlanBActive,
            daemon_notice: self.daemon_error.as_ref().map(|e| e.to_string()),
            selected_device: self.selected_device.clone(),
            devices: self.devices.clone(),
        }
    }

    fn attempt_direct(&mut self) {
        self.release_track();
        self.daemon_error = None;
        self.state = ControllerState::AttemptingDirect;
        self.set_preview(PreviewSource::placeholder("Connecting to camera"));
        self.refresh_devices();

        let plan = attempt_plan(self.preferred_resolution, self.selected_device.as_deref());
        let total = plan.len();
        for attempt in plan {
            crate::assert_invariant!(
                self.track.is_none(),
                RELEASE_BEFORE_ATTEMPT,
                "client::controller"
            );
            match self.media.open(&attempt.constraints) {
                Ok(track) => {
                    self.bind_track(attempt, track);
                    return;
                }
                Err(e) => {
                    log::warn!("Capture attempt {} failed: {}", attempt.name, e);
                    self.banner.push(AttemptFailure {
                        attempt: attempt.name,
                        reason: e.reason,
                        detail: e.detail,
                    });
                }
            }
        }

        log::warn!("All {} direct capture attempts failed", total);
        self.enter_plan_b(total);
    }

    fn bind_track(&mut self, attempt: CapabilityAttempt, track: M::Track) {
        crate::assert_invariant!(
            self.track.is_none(),
            SINGLE_CAPTURE_SOURCE,
            "client::controller"
        );
        let device = track.device().clone();
        log::info!("Direct capture active via {} on {}", attempt.name, device.id);

        self.track = Some(track);
        self.banner.clear();
        self.state = ControllerState::DirectActive;
        self.set_preview(PreviewSource::Direct {
            device,
            attempt: attempt.name,
        });
    }

    fn enter_plan_b(&mut self, attempts: usize) {
        if self.daemon.is_none() {
            self.state = ControllerState::ErrorAllFailed;
            self.set_preview(PreviewSource::placeholder(format!(
                "Camera unavailable: {} direct capture attempt(s) failed and no capture daemon is configured",
                attempts
            )));
            return;
        }

        self.state = ControllerState::PlanBActive;
        let health = self.daemon.as_ref().map(|daemon| daemon.health());
        match health {
            Some(Ok(health)) => {
                log_plan_b_health(&health);
                self.bind_daemon_stream();
            }
            Some(Err(e)) => self.mark_daemon_unreachable(e),
            None => {}
        }
    }

    fn bind_daemon_stream(&mut self) {
        let Some(stream_url) = self.daemon.as_ref().map(|d| d.stream_url()) else {
            return;
        };
        self.daemon_error = None;
        self.set_preview(PreviewSource::Daemon { stream_url });
    }

    fn mark_daemon_unreachable(&mut self, error: CaptureError) {
        let error = if error.reason == FailureReason::DaemonUnreachable {
            error
        } else {
            CaptureError::unreachable(error.detail)
        };
        log::warn!("Capture daemon unreachable: {}", error.detail);
        self.set_preview(PreviewSource::placeholder(format!(
            "Camera unavailable: capture daemon unreachable ({})",
            error.detail
        )));
        self.daemon_error = Some(error);
    }

    fn release_track(&mut self) {
        if let Some(track) = self.track.take() {
            log::info!("Releasing direct capture on {}", track.device().id);
            self.media.stop(track);
        }
    }

    fn refresh_devices(&mut self) -> Option<String> {
        match self.media.enumerate() {
            Ok(devices) => {
                self.devices = devices;
                None
            }
            Err(e) => {
                log::warn!("Device enumeration failed: {}", e);
                self.devices.clear();
                Some(e.to_string())
            }
        }
    }

    fn set_preview(&mut self, preview: PreviewSource) {
        let consistent = match &preview {
            PreviewSource::Direct { .. } => self.track.is_some(),
            PreviewSource::Daemon { .. } | PreviewSource::Placeholder { .. } => {
                self.track.is_none()
            }
        };
        crate::assert_invariant!(consistent, SINGLE_PREVIEW_SOURCE, "client::controller");
        self.preview = preview;
    }
}

impl<M: MediaDevices, D: DaemonLink> Drop for AcquisitionController<M, D> {
    fn drop(&mut self) {
        self.release_track();
    }
}

fn log_plan_b_health(health: &DaemonHealth) {
    if health.ok {
        log::info!("Falling back to capture daemon stream");
    } else {
        log::warn!(
            "Falling back to capture daemon stream; daemon reports not ok: {}",
            health.raw
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedMedia, StubDaemonLink};

    fn camera() -> DeviceInfo {
        DeviceInfo::new("0", "USB Camera")
    }

    #[test]
    fn test_first_attempt_binds() {
        let media = ScriptedMedia::new(vec![camera()]);
        let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
        controller.handle(ControllerEvent::Initialize);

        assert_eq!(controller.state(), ControllerState::DirectActive);
        assert!(controller.banner().is_empty());
        assert!(matches!(
            controller.preview(),
            PreviewSource::Direct { attempt, .. } if attempt == "any-camera"
        ));
    }

    #[test]
    fn test_no_daemon_configured_ends_in_error() {
        let media = ScriptedMedia::new(Vec::new());
        let mut controller: AcquisitionController<_, StubDaemonLink> =
            AcquisitionController::new(media, None);
        controller.handle(ControllerEvent::Initialize);

        assert_eq!(controller.state(), ControllerState::ErrorAllFailed);
        assert_eq!(controller.banner().len(), 3);
        assert!(matches!(controller.preview(), PreviewSource::Placeholder { .. }));
    }

    #[test]
    fn test_initialize_twice_is_ignored() {
        let media = ScriptedMedia::new(vec![camera()]);
        let stats = media.clone();
        let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
        controller.handle(ControllerEvent::Initialize);
        controller.handle(ControllerEvent::Initialize);
        assert_eq!(stats.opened(), 1);
    }

    #[test]
    fn test_device_selection_rebinds() {
        let media = ScriptedMedia::new(vec![camera(), DeviceInfo::new("1", "Pi Camera")]);
        let stats = media.clone();
        let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
        controller.handle(ControllerEvent::Initialize);

        // Broad attempts fail from now on so only the chosen device binds
        stats.fail_unless_device("1", CaptureError::busy("claimed elsewhere"));
        controller.handle(ControllerEvent::DeviceSelected(Some("1".to_string())));

        assert_eq!(controller.state(), ControllerState::DirectActive);
        assert!(matches!(
            controller.preview(),
            PreviewSource::Direct { device, attempt } if device.id == "1" && attempt == "selected-device"
        ));
        assert_eq!(stats.stopped(), 1);
        assert_eq!(stats.max_live(), 1);
    }

    #[test]
    fn test_hotplug_removal_reattempts() {
        let media = ScriptedMedia::new(vec![camera()]);
        let stats = media.clone();
        let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
        controller.handle(ControllerEvent::Initialize);

        stats.set_devices(Vec::new());
        controller.handle(ControllerEvent::DevicesChanged);

        assert_eq!(controller.state(), ControllerState::PlanBActive);
        assert_eq!(stats.live(), 0);
        assert!(controller.view().plan_b_badge);
    }

    #[test]
    fn test_plan_b_snapshot_uses_daemon() {
        let media = ScriptedMedia::new(Vec::new());
        let daemon = StubDaemonLink::healthy();
        let link = daemon.clone();
        let mut controller = AcquisitionController::new(media, Some(daemon));
        controller.handle(ControllerEvent::Initialize);

        let first = controller.snapshot().unwrap();
        let second = controller.snapshot().unwrap();
        assert!(second.sequence > first.sequence);
        assert_eq!(link.snapshots(), 2);
    }

    #[test]
    fn test_daemon_recovery_via_diagnostics() {
        let media = ScriptedMedia::new(Vec::new());
        let daemon = StubDaemonLink::unreachable();
        let link = daemon.clone();
        let mut controller = AcquisitionController::new(media, Some(daemon));
        controller.handle(ControllerEvent::Initialize);
        assert!(controller.daemon_error().is_some());

        link.set_reachable(true);
        let report = controller.diagnostics();
        assert!(report.daemon_health.is_some());
        assert!(controller.daemon_error().is_none());
        assert_eq!(controller.state(), ControllerState::PlanBActive);
        assert!(matches!(controller.preview(), PreviewSource::Daemon { .. }));
    }

    #[test]
    fn test_snapshot_without_source() {
        let media = ScriptedMedia::new(vec![camera()]);
        let mut controller = AcquisitionController::new(media, Some(StubDaemonLink::healthy()));
        assert!(controller.snapshot().is_err());
    }
}
