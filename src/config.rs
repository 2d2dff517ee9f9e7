//! Configuration management for boothcam
//!
//! The capture mechanism, frame pacing, health window, daemon address and
//! storage roots are all supplied here rather than hard-coded. Files are TOML;
//! every key can be overridden from the environment as
//! `BOOTHCAM_<SECTION>__<KEY>` (for example `BOOTHCAM_DAEMON__FRAME_INTERVAL_MS=200`).

use crate::driver::Mechanism;
use crate::errors::CameraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoothConfig {
    pub camera: CameraConfig,
    pub daemon: DaemonConfig,
    pub client: ClientConfig,
    pub storage: StorageConfig,
}

/// Which physical mechanism the daemon drives, and how
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture mechanism; the daemon refuses to start without one
    pub mechanism: Option<Mechanism>,
    /// Camera index for the native backend
    pub device_index: u32,
    /// Device node for the v4l2 backend
    pub device_path: PathBuf,
    /// Requested resolution [width, height]
    pub resolution: [u32; 2],
    /// JPEG quality (1-100) when a frame has to be re-encoded
    pub jpeg_quality: u8,
    /// Program and arguments for the process backend; must write MJPEG to stdout
    pub command: Vec<String>,
    /// Upper bound for a single capture call
    pub capture_timeout_ms: u64,
}

/// Capture daemon HTTP surface and pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind_address: String,
    /// Nominal interval between stream captures
    pub frame_interval_ms: u64,
    /// A cached frame older than this makes health report `ok = false`
    pub health_window_secs: u64,
    /// Stream consumers get the last good frame re-sent at this period
    pub stream_keepalive_ms: u64,
    /// Number of recent capture errors kept for the health report
    pub error_log_capacity: usize,
    /// Keep capturing with no stream consumer connected
    pub keep_warm: bool,
    /// CORS origin allowed to read the daemon; "*" allows any
    pub allowed_origin: String,
}

/// Acquisition controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the capture daemon; empty disables Plan B
    pub daemon_url: String,
    pub request_timeout_ms: u64,
    /// Device the operator picked; tried as the last capability attempt
    pub preferred_device: Option<String>,
    /// Resolution asked for by the `preferred-resolution` attempt
    pub preferred_resolution: [u32; 2],
    /// Poll period of the hot-plug monitor
    pub device_poll_ms: u64,
}

/// Removable storage discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Mount roots to search instead of the platform defaults
    pub mount_roots: Vec<PathBuf>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            mechanism: Some(Mechanism::Native),
            device_index: 0,
            device_path: PathBuf::from("/dev/video0"),
            resolution: [1280, 720],
            jpeg_quality: 85,
            command: [
                "rpicam-vid",
                "--codec",
                "mjpeg",
                "--width",
                "1280",
                "--height",
                "720",
                "--framerate",
                "15",
                "--timeout",
                "0",
                "--nopreview",
                "--flush",
                "--output",
                "-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            capture_timeout_ms: 5000,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            frame_interval_ms: 150,
            health_window_secs: 5,
            stream_keepalive_ms: 1000,
            error_log_capacity: 10,
            keep_warm: false,
            allowed_origin: "*".to_string(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            daemon_url: "http://127.0.0.1:8080".to_string(),
            request_timeout_ms: 5000,
            preferred_device: None,
            preferred_resolution: [1280, 720],
            device_poll_ms: 2000,
        }
    }
}

impl CameraConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

impl DaemonConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn health_window(&self) -> Duration {
        Duration::from_secs(self.health_window_secs)
    }

    pub fn stream_keepalive(&self) -> Duration {
        Duration::from_millis(self.stream_keepalive_ms)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, CameraError> {
        self.bind_address.parse().map_err(|e| {
            CameraError::ConfigError(format!(
                "Invalid bind address '{}': {}",
                self.bind_address, e
            ))
        })
    }
}

impl ClientConfig {
    /// Plan B is available only when a daemon URL is configured
    pub fn daemon_url(&self) -> Option<&str> {
        let url = self.daemon_url.trim();
        (!url.is_empty()).then_some(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl BoothConfig {
    /// Load configuration from a TOML file layered under environment overrides.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if path.exists() {
            log::info!("Loading configuration from {:?}", path);
        } else {
            log::info!("Config file not found at {:?}, using defaults", path);
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("BOOTHCAM")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("camera.command")
                    .with_list_parse_key("storage.mount_roots")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CameraError::ConfigError(format!("Failed to read config: {}", e)))?;

        let config: BoothConfig = settings
            .try_deserialize()
            .map_err(|e| CameraError::ConfigError(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CameraError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("boothcam.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), CameraError> {
        let invalid = |msg: &str| Err(CameraError::ConfigError(msg.to_string()));

        match self.camera.mechanism {
            None => return invalid("No capture mechanism configured (camera.mechanism)"),
            Some(Mechanism::Process) if self.camera.command.is_empty() => {
                return invalid("Process mechanism requires camera.command");
            }
            Some(_) => {}
        }
        if self.camera.resolution[0] == 0 || self.camera.resolution[1] == 0 {
            return invalid("Invalid camera resolution");
        }
        if self.camera.jpeg_quality == 0 || self.camera.jpeg_quality > 100 {
            return invalid("JPEG quality must be between 1 and 100");
        }
        if self.camera.capture_timeout_ms == 0 {
            return invalid("Capture timeout must be positive");
        }

        self.daemon.socket_addr()?;
        if self.daemon.frame_interval_ms == 0 {
            return invalid("Frame interval must be positive");
        }
        if self.daemon.health_window_secs == 0 {
            return invalid("Health window must be positive");
        }
        if self.daemon.stream_keepalive_ms == 0 {
            return invalid("Stream keepalive must be positive");
        }
        if self.daemon.error_log_capacity == 0 {
            return invalid("Error log capacity must be at least 1");
        }

        if self.client.request_timeout_ms == 0 {
            return invalid("Client request timeout must be positive");
        }
        if let Some(url) = self.client.daemon_url() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return invalid("Daemon URL must start with http:// or https://");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BoothConfig::default();
        assert_eq!(config.camera.mechanism, Some(Mechanism::Native));
        assert_eq!(config.daemon.frame_interval(), Duration::from_millis(150));
        assert_eq!(config.daemon.health_window(), Duration::from_secs(5));
        assert_eq!(config.client.daemon_url(), Some("http://127.0.0.1:8080"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut missing = BoothConfig::default();
        missing.camera.mechanism = None;
        assert!(missing.validate().is_err());

        let mut bad_quality = BoothConfig::default();
        bad_quality.camera.jpeg_quality = 0;
        assert!(bad_quality.validate().is_err());

        let mut bad_bind = BoothConfig::default();
        bad_bind.daemon.bind_address = "localhost".to_string();
        assert!(bad_bind.validate().is_err());

        let mut no_command = BoothConfig::default();
        no_command.camera.mechanism = Some(Mechanism::Process);
        no_command.camera.command.clear();
        assert!(no_command.validate().is_err());

        let mut zero_interval = BoothConfig::default();
        zero_interval.daemon.frame_interval_ms = 0;
        assert!(zero_interval.validate().is_err());
    }

    #[test]
    fn test_empty_daemon_url_disables_plan_b() {
        let mut config = BoothConfig::default();
        config.client.daemon_url = "  ".to_string();
        assert_eq!(config.client.daemon_url(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boothcam.toml");

        let mut config = BoothConfig::default();
        config.camera.mechanism = Some(Mechanism::V4l2);
        config.daemon.frame_interval_ms = 200;
        config.save_to_file(&path).unwrap();

        let loaded = BoothConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.camera.mechanism, Some(Mechanism::V4l2));
        assert_eq!(loaded.daemon.frame_interval_ms, 200);
        assert_eq!(loaded.camera.command, config.camera.command);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(&path, "[daemon]\nhealth_window_secs = 9\n").unwrap();

        let loaded = BoothConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.daemon.health_window_secs, 9);
        assert_eq!(loaded.daemon.frame_interval_ms, 150);
        assert_eq!(loaded.camera.resolution, [1280, 720]);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&BoothConfig::default()).unwrap();
        assert!(toml_string.contains("[camera]"));
        assert!(toml_string.contains("[daemon]"));
        assert!(toml_string.contains("[client]"));
        assert!(toml_string.contains("mechanism = \"native\""));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = BoothConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.daemon.error_log_capacity, 10);
    }
}
