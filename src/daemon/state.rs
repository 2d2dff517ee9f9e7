//! Daemon State and the health rule
//!
//! Written only from inside the serialized capture call; readers take a copy.

use crate::driver::DriverStatus;
use crate::errors::{CaptureError, FailureReason};
use crate::types::Frame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// One recorded capture failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub reason: FailureReason,
}

impl ErrorEntry {
    pub fn from_capture(error: &CaptureError, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            message: error.detail.clone(),
            reason: error.reason,
        }
    }
}

/// Bounded log of the most recent failures, oldest first
#[derive(Debug, Clone)]
pub struct ErrorLog {
    capacity: usize,
    entries: VecDeque<ErrorEntry>,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: ErrorEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<ErrorEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of applying the recency rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub ok: bool,
    pub reason: Option<FailureReason>,
}

#[derive(Debug, Clone)]
pub struct DaemonState {
    pub last_frame: Option<Frame>,
    pub last_error: Option<ErrorEntry>,
    pub driver_status: DriverStatus,
    pub errors: ErrorLog,
    pub captures: u64,
    pub failures: u64,
}

impl DaemonState {
    pub fn new(driver_status: DriverStatus, error_capacity: usize) -> Self {
        Self {
            last_frame: None,
            last_error: None,
            driver_status,
            errors: ErrorLog::new(error_capacity),
            captures: 0,
            failures: 0,
        }
    }

    /// A good frame supersedes the cached one and clears the error.
    pub fn record_success(&mut self, frame: Frame) {
        if self.last_error.is_some() || !self.driver_status.available {
            log::info!("Capture recovered after {} failure(s)", self.errors.len());
        }
        self.last_frame = Some(frame);
        self.last_error = None;
        self.driver_status = DriverStatus::available();
        self.captures += 1;
    }

    /// A failure keeps the last good frame.
    pub fn record_failure(&mut self, error: &CaptureError, at: DateTime<Utc>) {
        let entry = ErrorEntry::from_capture(error, at);
        self.errors.push(entry.clone());
        self.last_error = Some(entry);
        self.driver_status = DriverStatus::unavailable(error.reason.as_str());
        self.failures += 1;
    }

    pub fn last_frame_age(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_frame.as_ref().map(|frame| frame.age_seconds(now))
    }

    /// `ok` only when a frame was produced within `window` of `now` and no
    /// capture has failed since.
    pub fn freshness(&self, now: DateTime<Utc>, window: Duration) -> Freshness {
        if let Some(error) = &self.last_error {
            return Freshness {
                ok: false,
                reason: Some(error.reason),
            };
        }

        match self.last_frame_age(now) {
            Some(age) if age <= window.as_secs_f64() => Freshness {
                ok: true,
                reason: None,
            },
            Some(_) => Freshness {
                ok: false,
                reason: Some(FailureReason::StaleFrame),
            },
            None => Freshness {
                ok: false,
                reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_error_log_keeps_most_recent() {
        let mut log = ErrorLog::new(3);
        for i in 0..5 {
            log.push(ErrorEntry {
                timestamp: Utc::now(),
                message: format!("failure {}", i),
                reason: FailureReason::DeviceBusy,
            });
        }
        let messages: Vec<_> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["failure 2", "failure 3", "failure 4"]);
    }

    #[test]
    fn test_failure_keeps_last_frame() {
        let mut state = DaemonState::new(DriverStatus::unknown(), 10);
        let frame = Frame::new(vec![0xFF, 0xD8]).with_sequence(1);
        state.record_success(frame.clone());
        state.record_failure(&CaptureError::busy("in use"), Utc::now());

        assert_eq!(state.last_frame, Some(frame));
        assert_eq!(state.last_error.as_ref().unwrap().reason, FailureReason::DeviceBusy);
        assert!(!state.driver_status.available);
        assert_eq!(state.driver_status.reason.as_deref(), Some("device-busy"));
    }

    #[test]
    fn test_success_clears_error() {
        let mut state = DaemonState::new(DriverStatus::unknown(), 10);
        state.record_failure(&CaptureError::not_found("gone"), Utc::now());
        state.record_success(Frame::new(vec![1]));
        assert!(state.last_error.is_none());
        assert!(state.driver_status.available);
        assert_eq!(state.errors.len(), 1);
    }

    #[test]
    fn test_freshness_window() {
        let window = Duration::from_secs(5);
        let captured = Utc::now();
        let mut state = DaemonState::new(DriverStatus::unknown(), 10);

        let empty = state.freshness(captured, window);
        assert!(!empty.ok);
        assert_eq!(empty.reason, None);

        state.record_success(Frame::new(vec![1]).with_timestamp(captured));
        assert!(state.freshness(captured + ChronoDuration::seconds(5), window).ok);

        let stale = state.freshness(captured + ChronoDuration::milliseconds(5001), window);
        assert!(!stale.ok);
        assert_eq!(stale.reason, Some(FailureReason::StaleFrame));
    }

    #[test]
    fn test_failure_after_fresh_frame_is_not_ok() {
        let window = Duration::from_secs(5);
        let now = Utc::now();
        let mut state = DaemonState::new(DriverStatus::unknown(), 10);
        state.record_success(Frame::new(vec![1]).with_timestamp(now));
        state.record_failure(&CaptureError::busy("claimed"), now);

        let freshness = state.freshness(now, window);
        assert!(!freshness.ok);
        assert_eq!(freshness.reason, Some(FailureReason::DeviceBusy));
        assert!(state.last_frame.is_some());

        state.record_success(Frame::new(vec![2]).with_timestamp(now));
        assert!(state.freshness(now, window).ok);
    }

    #[test]
    fn test_no_frame_reports_last_error_reason() {
        let mut state = DaemonState::new(DriverStatus::unknown(), 10);
        state.record_failure(&CaptureError::permission_denied("EACCES"), Utc::now());
        let freshness = state.freshness(Utc::now(), Duration::from_secs(5));
        assert!(!freshness.ok);
        assert_eq!(freshness.reason, Some(FailureReason::PermissionDenied));
    }
}
