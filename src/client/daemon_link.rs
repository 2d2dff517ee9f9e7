//! Plan B link to the capture daemon
//!
//! Blocking HTTP; the controller runs on its own thread. Any transport
//! failure maps to `daemon-unreachable`; capture failures reported by the
//! daemon keep their own reason.

use crate::errors::{CaptureError, FailureReason};
use crate::types::Frame;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health as the client sees it; `raw` is the daemon's JSON, verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonHealth {
    pub ok: bool,
    pub raw: serde_json::Value,
}

impl DaemonHealth {
    pub fn from_json(raw: serde_json::Value) -> Self {
        let ok = raw.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
        Self { ok, raw }
    }
}

pub trait DaemonLink {
    /// URL the preview binds to in Plan B
    fn stream_url(&self) -> String;

    fn health(&self) -> Result<DaemonHealth, CaptureError>;

    /// Fresh still from the daemon
    fn snapshot(&self) -> Result<Frame, CaptureError>;
}

/// HTTP link built on reqwest's blocking client
pub struct HttpDaemonLink {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpDaemonLink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CaptureError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CaptureError::unreachable(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl DaemonLink for HttpDaemonLink {
    fn stream_url(&self) -> String {
        self.url("/stream")
    }

    fn health(&self) -> Result<DaemonHealth, CaptureError> {
        let url = self.url("/health");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| CaptureError::unreachable(format!("{}: {}", url, e)))?;

        // 503 still carries the report
        let status = response.status();
        let raw: serde_json::Value = response.json().map_err(|e| {
            CaptureError::unreachable(format!("{} returned {} without a health report: {}", url, status, e))
        })?;
        Ok(DaemonHealth::from_json(raw))
    }

    fn snapshot(&self) -> Result<Frame, CaptureError> {
        let url = self.url("/snapshot");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| CaptureError::unreachable(format!("{}: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            let sequence = response
                .headers()
                .get("x-frame-sequence")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let data = response
                .bytes()
                .map_err(|e| CaptureError::unreachable(format!("{}: {}", url, e)))?;
            return Ok(Frame::new(data)
                .with_timestamp(Utc::now())
                .with_sequence(sequence));
        }

        let body: serde_json::Value = response.json().unwrap_or_default();
        Err(snapshot_error(status.as_u16(), &body))
    }
}

/// Rebuild the daemon's structured snapshot failure
fn snapshot_error(status: u16, body: &serde_json::Value) -> CaptureError {
    let reason = body
        .get("reason")
        .and_then(|v| v.as_str())
        .and_then(FailureReason::parse);
    let detail = body
        .get("error")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Snapshot failed with HTTP {}", status));

    match reason {
        Some(reason) => CaptureError::new(reason, detail),
        None => CaptureError::unreachable(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_health_ok_flag() {
        assert!(DaemonHealth::from_json(json!({"ok": true})).ok);
        assert!(!DaemonHealth::from_json(json!({"ok": false, "reason": "stale-frame"})).ok);
        assert!(!DaemonHealth::from_json(json!("garbage")).ok);
    }

    #[test]
    fn test_snapshot_error_keeps_reason() {
        let err = snapshot_error(
            503,
            &json!({"ok": false, "reason": "device-busy", "error": "in use"}),
        );
        assert_eq!(err.reason, FailureReason::DeviceBusy);
        assert_eq!(err.detail, "in use");

        let err = snapshot_error(502, &serde_json::Value::Null);
        assert_eq!(err.reason, FailureReason::DaemonUnreachable);
    }

    #[test]
    fn test_unreachable_daemon() {
        // Port 9 (discard) is closed on test hosts
        let link = HttpDaemonLink::new("http://127.0.0.1:9/", Duration::from_millis(500)).unwrap();
        assert_eq!(link.stream_url(), "http://127.0.0.1:9/stream");
        let err = link.health().unwrap_err();
        assert_eq!(err.reason, FailureReason::DaemonUnreachable);
    }
}
