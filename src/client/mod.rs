//! Client Acquisition Controller and its two capture paths

pub mod attempts;
pub mod controller;
pub mod daemon_link;
pub mod media;

pub use attempts::{attempt_plan, CapabilityAttempt, CaptureConstraints, Facing};
pub use controller::{
    AcquisitionController, AttemptFailure, ControllerEvent, ControllerState, ControllerView,
    Diagnostics, PreviewSource,
};
pub use daemon_link::{DaemonHealth, DaemonLink, HttpDaemonLink};
pub use media::{CaptureTrack, LocalMediaDevices, LocalTrack, MediaDevices};
