//! Device monitoring and hot-plug detection
//!
//! Polls the device enumeration and turns differences between scans into
//! connect/disconnect events. The kiosk forwards them to the acquisition
//! controller as `DevicesChanged`.

use crate::errors::CameraError;
use crate::types::{DeviceInfo, Platform};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// Device event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(String),    // Device ID
    Disconnected(String), // Device ID
}

/// Produces the current device list; called from a blocking thread.
pub type DeviceScanner = Arc<dyn Fn() -> Result<Vec<DeviceInfo>, CameraError> + Send + Sync>;

/// Device monitor for detecting camera changes
pub struct DeviceMonitor {
    platform: Platform,
    interval: Duration,
    scanner: DeviceScanner,
    active_devices: Arc<RwLock<HashMap<String, DeviceInfo>>>,
    event_sender: mpsc::UnboundedSender<DeviceEvent>,
    event_receiver: Arc<RwLock<mpsc::UnboundedReceiver<DeviceEvent>>>,
    is_monitoring: Arc<RwLock<bool>>,
}

impl DeviceMonitor {
    /// Create a monitor that scans through the platform camera API
    pub fn new() -> Self {
        Self::with_scanner(Arc::new(super::list_video_devices))
    }

    pub fn with_scanner(scanner: DeviceScanner) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            platform: Platform::current(),
            interval: Duration::from_secs(2),
            scanner,
            active_devices: Arc::new(RwLock::new(HashMap::new())),
            event_sender: tx,
            event_receiver: Arc::new(RwLock::new(rx)),
            is_monitoring: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start monitoring for device changes
    pub async fn start_monitoring(&self) -> Result<(), CameraError> {
        let mut is_monitoring = self.is_monitoring.write().await;
        if *is_monitoring {
            return Ok(());
        }

        log::info!(
            "Starting device monitoring for platform {} every {:?}",
            self.platform.as_str(),
            self.interval
        );

        // Initial scan establishes the baseline without emitting events
        let initial = scan(self.scanner.clone()).await?;
        {
            let mut active = self.active_devices.write().await;
            active.clear();
            active.extend(initial.into_iter().map(|d| (d.id.clone(), d)));
        }

        let scanner = self.scanner.clone();
        let interval = self.interval;
        let active_devices = self.active_devices.clone();
        let event_sender = self.event_sender.clone();
        let flag = self.is_monitoring.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !*flag.read().await {
                    break;
                }

                match scan(scanner.clone()).await {
                    Ok(devices) => {
                        let mut active = active_devices.write().await;
                        for event in diff_devices(&mut active, devices) {
                            let _ = event_sender.send(event);
                        }
                    }
                    Err(e) => log::debug!("Device scan failed: {}", e),
                }
            }
            log::debug!("Device monitoring task exited");
        });

        *is_monitoring = true;
        Ok(())
    }

    /// Stop monitoring for device changes
    pub async fn stop_monitoring(&self) -> Result<(), CameraError> {
        let mut is_monitoring = self.is_monitoring.write().await;
        if !*is_monitoring {
            return Ok(());
        }

        log::info!("Stopping device monitoring");
        *is_monitoring = false;
        Ok(())
    }

    pub async fn is_monitoring(&self) -> bool {
        *self.is_monitoring.read().await
    }

    /// Get next device event (non-blocking)
    pub async fn poll_event(&self) -> Option<DeviceEvent> {
        let mut rx = self.event_receiver.write().await;
        rx.try_recv().ok()
    }

    /// Wait for next device event
    pub async fn wait_for_event(&self) -> Option<DeviceEvent> {
        let mut rx = self.event_receiver.write().await;
        rx.recv().await
    }

    /// Get list of currently active devices
    pub async fn get_active_devices(&self) -> Vec<DeviceInfo> {
        let devices = self.active_devices.read().await;
        let mut list: Vec<DeviceInfo> = devices.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }
}

impl Default for DeviceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

async fn scan(scanner: DeviceScanner) -> Result<Vec<DeviceInfo>, CameraError> {
    tokio::task::spawn_blocking(move || scanner())
        .await
        .map_err(|e| CameraError::InitializationError(format!("Device scan task failed: {}", e)))?
}

/// Replace `active` with `devices`, returning the changes in between
fn diff_devices(
    active: &mut HashMap<String, DeviceInfo>,
    devices: Vec<DeviceInfo>,
) -> Vec<DeviceEvent> {
    let mut events = Vec::new();

    let mut removed: Vec<String> = active
        .keys()
        .filter(|id| !devices.iter().any(|d| &d.id == *id))
        .cloned()
        .collect();
    removed.sort();
    for id in removed {
        log::info!("Device disconnected: {}", id);
        active.remove(&id);
        events.push(DeviceEvent::Disconnected(id));
    }

    for device in devices {
        if !active.contains_key(&device.id) {
            log::info!("Device connected: {}", device.id);
            events.push(DeviceEvent::Connected(device.id.clone()));
        }
        active.insert(device.id.clone(), device);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn scripted_scanner(scans: Vec<Vec<&str>>) -> DeviceScanner {
        let scans = Arc::new(Mutex::new(
            scans
                .into_iter()
                .map(|ids| {
                    ids.into_iter()
                        .map(|id| DeviceInfo::new(id, format!("Camera {}", id)))
                        .collect::<Vec<_>>()
                })
                .collect::<std::collections::VecDeque<_>>(),
        ));
        Arc::new(move || {
            let mut scans = scans.lock().unwrap();
            // The last scan repeats forever
            if scans.len() > 1 {
                Ok(scans.pop_front().unwrap())
            } else {
                Ok(scans.front().cloned().unwrap_or_default())
            }
        })
    }

    #[test]
    fn test_diff_devices() {
        let mut active = HashMap::new();
        active.insert("0".to_string(), DeviceInfo::new("0", "Built-in"));

        let events = diff_devices(
            &mut active,
            vec![DeviceInfo::new("1", "USB"), DeviceInfo::new("2", "Pi")],
        );
        assert_eq!(
            events,
            vec![
                DeviceEvent::Disconnected("0".to_string()),
                DeviceEvent::Connected("1".to_string()),
                DeviceEvent::Connected("2".to_string()),
            ]
        );
        assert_eq!(active.len(), 2);
    }

    #[tokio::test]
    async fn test_monitor_reports_hotplug() {
        let monitor = DeviceMonitor::with_scanner(scripted_scanner(vec![
            vec!["0"],
            vec!["0", "1"],
            vec!["1"],
        ]))
        .with_interval(Duration::from_millis(10));

        monitor.start_monitoring().await.unwrap();
        assert!(monitor.is_monitoring().await);

        let first = tokio::time::timeout(Duration::from_secs(2), monitor.wait_for_event())
            .await
            .unwrap();
        assert_eq!(first, Some(DeviceEvent::Connected("1".to_string())));
        let second = tokio::time::timeout(Duration::from_secs(2), monitor.wait_for_event())
            .await
            .unwrap();
        assert_eq!(second, Some(DeviceEvent::Disconnected("0".to_string())));

        monitor.stop_monitoring().await.unwrap();
        assert!(!monitor.is_monitoring().await);
        assert_eq!(monitor.get_active_devices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_failure_prevents_start() {
        let monitor = DeviceMonitor::with_scanner(Arc::new(|| {
            Err(CameraError::InitializationError("no backend".to_string()))
        }));
        assert!(monitor.start_monitoring().await.is_err());
        assert!(!monitor.is_monitoring().await);
    }
}
