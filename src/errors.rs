use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Typed reason attached to every capture-path failure.
///
/// The first three come from the camera drivers, `DaemonUnreachable` from the
/// Plan B link and `StaleFrame` from the health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    DeviceNotFound,
    PermissionDenied,
    DeviceBusy,
    DaemonUnreachable,
    StaleFrame,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::DeviceNotFound => "device-not-found",
            FailureReason::PermissionDenied => "permission-denied",
            FailureReason::DeviceBusy => "device-busy",
            FailureReason::DaemonUnreachable => "daemon-unreachable",
            FailureReason::StaleFrame => "stale-frame",
        }
    }

    /// Parse the wire form produced by [`FailureReason::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "device-not-found" => Some(FailureReason::DeviceNotFound),
            "permission-denied" => Some(FailureReason::PermissionDenied),
            "device-busy" => Some(FailureReason::DeviceBusy),
            "daemon-unreachable" => Some(FailureReason::DaemonUnreachable),
            "stale-frame" => Some(FailureReason::StaleFrame),
            _ => None,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed capture, either from a local driver or from the daemon link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct CaptureError {
    pub reason: FailureReason,
    pub detail: String,
    /// The mechanism cannot work at all on this host (missing binary, unsupported
    /// platform). Streams close on permanent failures only.
    pub permanent: bool,
}

impl CaptureError {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
            permanent: false,
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(FailureReason::DeviceNotFound, detail)
    }

    pub fn permission_denied(detail: impl Into<String>) -> Self {
        Self::new(FailureReason::PermissionDenied, detail)
    }

    pub fn busy(detail: impl Into<String>) -> Self {
        Self::new(FailureReason::DeviceBusy, detail)
    }

    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self::new(FailureReason::DaemonUnreachable, detail)
    }

    /// Mechanism dependency is missing; reported as `device-not-found`.
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            permanent: true,
            ..Self::not_found(detail)
        }
    }

    /// Classify free-form tool or library output, falling back to `fallback`.
    pub fn classify(detail: impl Into<String>, fallback: FailureReason) -> Self {
        let detail = detail.into();
        let reason = classify_failure(&detail).unwrap_or(fallback);
        Self::new(reason, detail)
    }

    /// Map an OS error from opening or reading a device node.
    pub fn from_io(context: &str, err: &io::Error) -> Self {
        let detail = format!("{}: {}", context, err);
        match err.kind() {
            io::ErrorKind::NotFound => Self::not_found(detail),
            io::ErrorKind::PermissionDenied => Self::permission_denied(detail),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::busy(detail),
            _ => Self::classify(detail, FailureReason::DeviceBusy),
        }
    }
}

/// Guess the failure reason from error text emitted by camera tools and drivers.
pub fn classify_failure(detail: &str) -> Option<FailureReason> {
    let lower = detail.to_lowercase();
    if lower.contains("permission denied")
        || lower.contains("eacces")
        || lower.contains("not authorized")
        || lower.contains("operation not permitted")
    {
        Some(FailureReason::PermissionDenied)
    } else if lower.contains("busy")
        || lower.contains("ebusy")
        || lower.contains("in use")
        || lower.contains("already acquired")
    {
        Some(FailureReason::DeviceBusy)
    } else if lower.contains("no such file")
        || lower.contains("no such device")
        || lower.contains("not found")
        || lower.contains("no cameras available")
        || lower.contains("enoent")
        || lower.contains("enodev")
    {
        Some(FailureReason::DeviceNotFound)
    } else {
        None
    }
}

/// Crate-level error for startup, configuration and IO.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Camera initialization error: {0}")]
    InitializationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Capture error: {0}")]
    CaptureError(#[from] CaptureError),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}
