//! Generated test-pattern backend
//!
//! Produces a moving gradient so a station can be exercised without a camera.
//! Failures can be queued through a [`SyntheticScript`] handle that stays with
//! the caller after the backend moves into the daemon.

use super::encode_jpeg;
use crate::errors::CaptureError;
use crate::types::Frame;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared failure queue for a synthetic backend
#[derive(Debug, Clone, Default)]
pub struct SyntheticScript {
    failures: Arc<Mutex<VecDeque<CaptureError>>>,
    captures: Arc<AtomicU64>,
}

impl SyntheticScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next capture with `error`
    pub fn fail_next(&self, error: CaptureError) {
        if let Ok(mut queue) = self.failures.lock() {
            queue.push_back(error);
        }
    }

    /// Fail the next `times` captures with `error`
    pub fn fail_times(&self, times: usize, error: CaptureError) {
        if let Ok(mut queue) = self.failures.lock() {
            queue.extend(std::iter::repeat(error).take(times));
        }
    }

    pub fn pending_failures(&self) -> usize {
        self.failures.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Successful and failed capture calls so far
    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        self.failures.lock().ok()?.pop_front()
    }
}

/// Test-pattern backend
pub struct SyntheticBackend {
    width: u32,
    height: u32,
    quality: u8,
    delay: Duration,
    tick: u32,
    last_timestamp: Option<DateTime<Utc>>,
    script: SyntheticScript,
}

impl SyntheticBackend {
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            quality,
            delay: Duration::ZERO,
            tick: 0,
            last_timestamp: None,
            script: SyntheticScript::new(),
        }
    }

    /// Simulate sensor latency on every capture
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_script(mut self, script: SyntheticScript) -> Self {
        self.script = script;
        self
    }

    pub fn script(&self) -> SyntheticScript {
        self.script.clone()
    }

    pub fn capture(&mut self) -> Result<Frame, CaptureError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(error) = self.script.next_failure() {
            return Err(error);
        }

        self.tick = self.tick.wrapping_add(1);
        let data = encode_jpeg(self.width, self.height, self.pattern(), self.quality)?;

        // Successive frames must be strictly ordered even within one clock tick
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + ChronoDuration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);

        Ok(Frame::new(data).with_timestamp(now))
    }

    fn pattern(&self) -> Vec<u8> {
        let (w, h) = (self.width, self.height);
        let shift = self.tick.wrapping_mul(8);
        let mut rgb = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                rgb.push(((x * 255 / w).wrapping_add(shift) & 0xFF) as u8);
                rgb.push((y * 255 / h) as u8);
                rgb.push((shift & 0xFF) as u8);
            }
        }
        rgb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::is_jpeg;
    use crate::errors::FailureReason;

    #[test]
    fn test_frames_are_jpeg_and_ordered() {
        let mut backend = SyntheticBackend::new(32, 24, 75);
        let first = backend.capture().unwrap();
        let second = backend.capture().unwrap();
        assert!(is_jpeg(&first.data));
        assert!(second.captured_at > first.captured_at);
        assert_ne!(first.data, second.data);
    }

    #[test]
    fn test_scripted_failures() {
        let script = SyntheticScript::new();
        let mut backend = SyntheticBackend::new(16, 16, 75).with_script(script.clone());

        script.fail_times(2, CaptureError::busy("scripted"));
        assert_eq!(
            backend.capture().unwrap_err().reason,
            FailureReason::DeviceBusy
        );
        assert!(backend.capture().is_err());
        assert!(backend.capture().is_ok());
        assert_eq!(script.pending_failures(), 0);
        assert_eq!(script.captures(), 3);
    }
}
