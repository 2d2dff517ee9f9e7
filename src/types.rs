use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform the station runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Windows,
    MacOS,
    Linux,
    Unknown,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOS
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::MacOS => "macos",
            Platform::Linux => "linux",
            Platform::Unknown => "unknown",
        }
    }
}

/// An encoded still image and the moment it was captured.
///
/// Frames are never mutated; a newer capture supersedes the previous one.
/// Cloning shares the underlying buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    pub captured_at: DateTime<Utc>,
    /// Capture counter assigned by the daemon; 0 for frames that never went
    /// through one.
    pub sequence: u64,
}

impl Frame {
    pub const CONTENT_TYPE: &'static str = "image/jpeg";

    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            captured_at: Utc::now(),
            sequence: 0,
        }
    }

    pub fn with_timestamp(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Seconds elapsed between capture and `now`, clamped at zero.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        let age = now.signed_duration_since(self.captured_at);
        (age.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0).max(0.0)
    }
}

/// Entry of a device list as the acquisition controller sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub description: Option<String>,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_frame_age() {
        let captured = Utc::now();
        let frame = Frame::new(vec![0xFF, 0xD8]).with_timestamp(captured);
        let age = frame.age_seconds(captured + Duration::milliseconds(2500));
        assert!((age - 2.5).abs() < 1e-6);
        assert_eq!(frame.age_seconds(captured - Duration::seconds(1)), 0.0);
    }

    #[test]
    fn test_frame_clone_shares_buffer() {
        let frame = Frame::new(vec![1u8; 1024]).with_sequence(7);
        let copy = frame.clone();
        assert_eq!(copy.data.as_ptr(), frame.data.as_ptr());
        assert_eq!(copy.sequence, 7);
    }

    #[test]
    fn test_platform_detection() {
        assert!(!Platform::current().as_str().is_empty());
    }
}
