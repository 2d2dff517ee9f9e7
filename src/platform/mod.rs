//! Device enumeration and hot-plug monitoring

pub mod device_monitor;

pub use device_monitor::{DeviceEvent, DeviceMonitor, DeviceScanner};

use crate::errors::CameraError;
use crate::types::DeviceInfo;

/// Enumerate local video inputs through the platform camera API
pub fn list_video_devices() -> Result<Vec<DeviceInfo>, CameraError> {
    let cameras = nokhwa::query(nokhwa::utils::ApiBackend::Auto)
        .map_err(|e| CameraError::InitializationError(format!("Failed to query cameras: {}", e)))?;

    Ok(cameras
        .into_iter()
        .map(|info| {
            let id = match info.index().as_index() {
                Ok(index) => index.to_string(),
                Err(_) => info.index().to_string(),
            };
            DeviceInfo::new(id, info.human_name()).with_description(info.description())
        })
        .collect())
}

/// Video device names for diagnostics.
///
/// Device nodes on Linux; camera names from the platform API elsewhere.
pub fn video_device_nodes() -> Vec<String> {
    #[cfg(target_os = "linux")]
    {
        let Ok(entries) = std::fs::read_dir("/dev") else {
            return Vec::new();
        };
        let mut nodes: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.starts_with("video")
                    .then(|| entry.path().to_string_lossy().into_owned())
            })
            .collect();
        nodes.sort_by_key(|node| node_number(node));
        nodes
    }

    #[cfg(not(target_os = "linux"))]
    {
        list_video_devices()
            .map(|devices| devices.into_iter().map(|d| d.label).collect())
            .unwrap_or_default()
    }
}

#[cfg(target_os = "linux")]
fn node_number(node: &str) -> (u32, String) {
    let digits: String = node
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    (digits.parse().unwrap_or(u32::MAX), node.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_nodes_sort_numerically() {
        let mut nodes = vec![
            "/dev/video10".to_string(),
            "/dev/video2".to_string(),
            "/dev/video0".to_string(),
        ];
        nodes.sort_by_key(|node| node_number(node));
        assert_eq!(nodes, vec!["/dev/video0", "/dev/video2", "/dev/video10"]);
    }

    #[test]
    fn test_video_device_nodes_does_not_panic() {
        let _ = video_device_nodes();
    }
}
