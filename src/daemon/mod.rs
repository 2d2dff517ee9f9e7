//! Capture Daemon
//!
//! Sole owner of the camera driver. One capture runs at a time: the driver
//! sits behind an async mutex and every capture runs on the blocking pool
//! while holding it. Daemon State is written only inside that critical
//! section; everyone else reads a copy.
//!
//! Frames reach stream consumers through a `watch` feed. A single producer
//! loop drives the camera while at least one consumer is subscribed (or
//! `keep_warm` is set) and releases the device when the last one leaves.
//! Snapshots take a fresh capture of their own and make the loop skip its
//! next tick.

pub mod http;
pub mod state;
pub mod stream;

pub use http::router;
pub use state::{DaemonState, ErrorEntry, ErrorLog, Freshness};

use crate::config::{BoothConfig, DaemonConfig};
use crate::driver::{Driver, DriverStatus, Mechanism};
use crate::errors::{CameraError, CaptureError};
use crate::invariant_ppt::SNAPSHOT_IS_FRESH;
use crate::permissions::PermissionInfo;
use crate::types::Frame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Pacing and retention knobs of a running daemon
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub frame_interval: Duration,
    pub health_window: Duration,
    pub keepalive: Duration,
    pub error_log_capacity: usize,
    pub keep_warm: bool,
    pub allowed_origin: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

impl From<&DaemonConfig> for DaemonSettings {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            health_window: config.health_window(),
            keepalive: config.stream_keepalive(),
            error_log_capacity: config.error_log_capacity,
            keep_warm: config.keep_warm,
            allowed_origin: config.allowed_origin.clone(),
        }
    }
}

/// What stream consumers observe
#[derive(Debug, Clone, Default)]
pub struct Feed {
    /// Newest good frame
    pub latest: Option<Frame>,
    /// Set by a permanent driver failure, cleared by the next good frame
    pub failure: Option<CaptureError>,
}

/// Health report served at `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub ok: bool,
    pub reason: Option<String>,
    pub mechanism: Mechanism,
    pub driver_status: DriverStatus,
    pub last_frame_age_seconds: Option<f64>,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorEntry>,
    pub recent_errors: Vec<ErrorEntry>,
    pub stream_consumers: usize,
    pub video_devices: Vec<String>,
    pub permission: PermissionInfo,
    pub uptime_seconds: f64,
}

struct Inner {
    driver: Arc<Mutex<Driver>>,
    mechanism: Mechanism,
    state: RwLock<DaemonState>,
    feed: watch::Sender<Feed>,
    snapshots_pending: AtomicUsize,
    sequence: AtomicU64,
    settings: DaemonSettings,
    started_at: Instant,
    wake: Notify,
}

/// Handle to the daemon; clones share the same camera and state
#[derive(Clone)]
pub struct CaptureDaemon {
    inner: Arc<Inner>,
}

impl CaptureDaemon {
    pub fn new(driver: Driver, settings: DaemonSettings) -> Self {
        let mechanism = driver.mechanism();
        let status = driver.status();
        if !status.available {
            log::warn!(
                "Capture mechanism {} not ready: {}",
                mechanism.as_str(),
                status.reason.as_deref().unwrap_or("unknown")
            );
        }

        let (feed, _) = watch::channel(Feed::default());
        Self {
            inner: Arc::new(Inner {
                driver: Arc::new(Mutex::new(driver)),
                mechanism,
                state: RwLock::new(DaemonState::new(status, settings.error_log_capacity)),
                feed,
                snapshots_pending: AtomicUsize::new(0),
                sequence: AtomicU64::new(0),
                settings,
                started_at: Instant::now(),
                wake: Notify::new(),
            }),
        }
    }

    /// Build the configured driver and daemon; fails only without a mechanism.
    pub fn from_config(config: &BoothConfig) -> Result<Self, CameraError> {
        let driver = Driver::from_config(&config.camera)?;
        Ok(Self::new(driver, DaemonSettings::from(&config.daemon)))
    }

    pub fn settings(&self) -> &DaemonSettings {
        &self.inner.settings
    }

    pub fn mechanism(&self) -> Mechanism {
        self.inner.mechanism
    }

    /// Spawn the stream producer loop
    pub fn start(&self) -> JoinHandle<()> {
        let daemon = self.clone();
        tokio::spawn(async move { daemon.run().await })
    }

    /// Take one fresh capture, never the cached frame.
    ///
    /// The frame is also published to stream consumers. Without consumers the
    /// device is released again afterwards.
    pub async fn snapshot(&self) -> Result<Frame, CaptureError> {
        let pending = PendingSnapshot::new(&self.inner.snapshots_pending);
        let issued_before = self.inner.sequence.load(Ordering::SeqCst);

        let result = self.capture_and_publish().await;
        // The last of several concurrent snapshots closes the device
        if !self.wanted() && self.inner.snapshots_pending.load(Ordering::SeqCst) == 1 {
            self.release_driver().await;
        }
        drop(pending);

        let frame = result?;
        crate::assert_invariant!(
            frame.sequence > issued_before,
            SNAPSHOT_IS_FRESH,
            "daemon::snapshot"
        );
        log::debug!("Snapshot frame #{} ({} bytes)", frame.sequence, frame.len());
        Ok(frame)
    }

    /// Copy of the current Daemon State
    pub fn state(&self) -> DaemonState {
        self.read_state().clone()
    }

    pub fn health(&self) -> HealthReport {
        self.health_at(Utc::now())
    }

    /// Health as of `now`
    pub fn health_at(&self, now: DateTime<Utc>) -> HealthReport {
        let state = self.state();
        let freshness = state.freshness(now, self.inner.settings.health_window);

        HealthReport {
            ok: freshness.ok,
            reason: freshness.reason.map(|r| r.as_str().to_string()),
            mechanism: self.inner.mechanism,
            driver_status: state.driver_status.clone(),
            last_frame_age_seconds: state.last_frame_age(now),
            last_frame_at: state.last_frame.as_ref().map(|f| f.captured_at),
            last_error: state.last_error.clone(),
            recent_errors: state.errors.entries(),
            stream_consumers: self.consumers(),
            video_devices: crate::platform::video_device_nodes(),
            permission: crate::permissions::check_permission_detailed(),
            uptime_seconds: self.inner.started_at.elapsed().as_secs_f64(),
        }
    }

    /// Connected stream consumers
    pub fn consumers(&self) -> usize {
        self.inner.feed.receiver_count()
    }

    /// Join the frame feed. Wakes the producer loop.
    pub fn subscribe(&self) -> watch::Receiver<Feed> {
        let rx = self.inner.feed.subscribe();
        self.inner.wake.notify_one();
        rx
    }

    /// End every open stream, e.g. before a graceful shutdown
    pub fn close_streams(&self) {
        let closing = CaptureError {
            permanent: true,
            ..CaptureError::busy("Capture daemon shutting down")
        };
        self.inner
            .feed
            .send_modify(|feed| feed.failure = Some(closing));
    }

    async fn run(&self) {
        let interval = self.inner.settings.frame_interval;
        log::info!(
            "Stream loop started ({} every {:?})",
            self.inner.mechanism.as_str(),
            interval
        );

        let mut warm = false;
        loop {
            if !self.wanted() {
                if warm {
                    self.release_driver().await;
                    warm = false;
                }
                self.inner.wake.notified().await;
                continue;
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            while self.wanted() {
                ticker.tick().await;
                if self.inner.snapshots_pending.load(Ordering::SeqCst) > 0 {
                    log::trace!("Stream tick yielded to snapshot");
                    continue;
                }
                warm = true;
                if let Err(e) = self.capture_and_publish().await {
                    log::trace!("Stream tick failed: {}", e);
                }
            }
        }
    }

    fn wanted(&self) -> bool {
        self.inner.settings.keep_warm || self.consumers() > 0
    }

    async fn capture_and_publish(&self) -> Result<Frame, CaptureError> {
        let result = self.capture().await;
        match &result {
            Ok(frame) => {
                let frame = frame.clone();
                self.inner.feed.send_modify(|feed| {
                    feed.latest = Some(frame);
                    feed.failure = None;
                });
            }
            Err(e) if e.permanent => {
                let failure = e.clone();
                self.inner.feed.send_modify(|feed| feed.failure = Some(failure));
            }
            Err(_) => {}
        }
        result
    }

    /// One serialized driver call; records the outcome in Daemon State.
    async fn capture(&self) -> Result<Frame, CaptureError> {
        let mut driver = Arc::clone(&self.inner.driver).lock_owned().await;
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || {
            let result = driver
                .capture()
                .map(|frame| frame.with_sequence(inner.sequence.fetch_add(1, Ordering::SeqCst) + 1));

            let mut state = inner.state.write().unwrap_or_else(|e| e.into_inner());
            match &result {
                Ok(frame) => {
                    log::trace!("Captured frame #{} ({} bytes)", frame.sequence, frame.len());
                    state.record_success(frame.clone());
                }
                Err(e) => {
                    log::warn!("Capture failed: {}", e);
                    state.record_failure(e, Utc::now());
                }
            }
            result
        })
        .await
        .unwrap_or_else(|e| Err(CaptureError::busy(format!("Capture task failed: {}", e))))
    }

    async fn release_driver(&self) {
        let mut driver = Arc::clone(&self.inner.driver).lock_owned().await;
        let released = tokio::task::spawn_blocking(move || driver.release()).await;
        if let Err(e) = released {
            log::warn!("Driver release task failed: {}", e);
        }
        log::info!("No stream consumers; camera released");
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, DaemonState> {
        self.inner.state.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Counts a snapshot as pending for as long as it is alive
struct PendingSnapshot<'a>(&'a AtomicUsize);

impl<'a> PendingSnapshot<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingSnapshot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
