//! boothcam: camera acquisition for a kiosk capture station
//!
//! A photo booth page needs a live preview and a single still. This crate
//! provides both halves of getting a frame there:
//!
//! - [`daemon`]: a long-running service that owns one camera through a
//!   [`driver`] and serves a multipart stream, a fresh snapshot and a health
//!   report over HTTP
//! - [`client`]: the acquisition controller that tries direct capture first
//!   and falls back to the daemon, keeping a banner of every failure
//!
//! plus [`storage`], which finds a writable removable volume.
//!
//! # Usage
//! ```rust,ignore
//! use boothcam::config::BoothConfig;
//! use boothcam::daemon::{router, CaptureDaemon};
//!
//! let config = BoothConfig::load_from_file(BoothConfig::default_path())?;
//! let daemon = CaptureDaemon::from_config(&config)?;
//! daemon.start();
//! let app = router(daemon);
//! ```

pub mod client;
pub mod config;
pub mod daemon;
pub mod driver;
pub mod errors;
pub mod invariant_ppt;
pub mod permissions;
pub mod platform;
pub mod storage;
pub mod types;

// Test doubles and synthetic frames for offline testing
pub mod testing;

// Re-exports for convenience
pub use client::{AcquisitionController, ControllerEvent, ControllerState, PreviewSource};
pub use config::BoothConfig;
pub use daemon::{CaptureDaemon, HealthReport};
pub use driver::{Driver, Mechanism};
pub use errors::{CameraError, CaptureError, FailureReason};
pub use storage::{LocateError, LocateFailure, StorageLocator};
pub use types::{DeviceInfo, Frame, Platform};

/// Initialize logging; `RUST_LOG` defaults to `boothcam=info`
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "boothcam=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        platform: Platform::current(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub platform: Platform,
}
