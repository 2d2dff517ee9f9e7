//! Camera access permission check
//!
//! Reported verbatim in the daemon health payload so an operator can tell a
//! missing group membership from a missing camera.

use serde::{Deserialize, Serialize};

/// Permission status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    /// Permission granted
    Granted,
    /// Permission denied
    Denied,
    /// Nothing to grant access to yet (no device, unsupported platform)
    NotDetermined,
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionStatus::Granted => write!(f, "granted"),
            PermissionStatus::Denied => write!(f, "denied"),
            PermissionStatus::NotDetermined => write!(f, "not_determined"),
        }
    }
}

/// Detailed permission information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInfo {
    pub status: PermissionStatus,
    pub message: String,
}

impl PermissionInfo {
    fn new(status: PermissionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Check camera permission status
pub fn check_permission() -> PermissionStatus {
    check_permission_detailed().status
}

/// Check camera permission status with detailed information
pub fn check_permission_detailed() -> PermissionInfo {
    #[cfg(target_os = "linux")]
    {
        check_permission_linux()
    }

    #[cfg(not(target_os = "linux"))]
    {
        check_permission_by_query()
    }
}

/// Platforms without device nodes: enumeration succeeding is the best signal
#[cfg(not(target_os = "linux"))]
fn check_permission_by_query() -> PermissionInfo {
    match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
        Ok(devices) if !devices.is_empty() => PermissionInfo::new(
            PermissionStatus::Granted,
            format!("Camera access granted ({} device(s))", devices.len()),
        ),
        Ok(_) => PermissionInfo::new(
            PermissionStatus::NotDetermined,
            "No cameras found - permission may not be granted",
        ),
        Err(e) => PermissionInfo::new(
            PermissionStatus::Denied,
            format!("Camera access denied: {}", e),
        ),
    }
}

#[cfg(target_os = "linux")]
fn check_permission_linux() -> PermissionInfo {
    let nodes = crate::platform::video_device_nodes();
    let Some(first_device) = nodes.first() else {
        return PermissionInfo::new(
            PermissionStatus::NotDetermined,
            "No video devices found at /dev/video*",
        );
    };

    if let Err(e) = std::fs::metadata(first_device) {
        return PermissionInfo::new(
            PermissionStatus::Denied,
            format!("Cannot access {}: {}", first_device, e),
        );
    }

    let groups = current_groups();
    if has_video_group(&groups) {
        PermissionInfo::new(
            PermissionStatus::Granted,
            format!(
                "Camera access granted (user in video group, {} found)",
                first_device
            ),
        )
    } else {
        PermissionInfo::new(
            PermissionStatus::Denied,
            format!(
                "Camera device {} exists but user not in video group - run: sudo usermod -a -G video $USER",
                first_device
            ),
        )
    }
}

#[cfg(target_os = "linux")]
fn current_groups() -> String {
    std::process::Command::new("id")
        .arg("-Gn")
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .unwrap_or_default()
}

/// True when the `id -Gn` listing contains a group that may open cameras
pub fn has_video_group(groups: &str) -> bool {
    groups
        .split_whitespace()
        .any(|group| matches!(group, "video" | "plugdev" | "root"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_matching_is_exact() {
        assert!(has_video_group("pi adm video plugdev"));
        assert!(has_video_group("root"));
        assert!(!has_video_group("videoeditors staff"));
        assert!(!has_video_group(""));
    }

    #[test]
    fn test_permission_serialization() {
        let info = PermissionInfo::new(PermissionStatus::NotDetermined, "none");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "not_determined");
        assert_eq!(PermissionStatus::Granted.to_string(), "granted");
    }

    #[test]
    fn test_check_permission_does_not_panic() {
        let info = check_permission_detailed();
        assert!(!info.message.is_empty());
        assert_eq!(check_permission(), info.status);
    }
}
