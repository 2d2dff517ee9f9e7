//! External capture program backend
//!
//! Runs a long-lived helper (by default `rpicam-vid --codec mjpeg --output -`)
//! and cuts its stdout into JPEG stills on SOI/EOI markers. A reader thread
//! keeps only the newest couple of frames; a capture takes the newest one or
//! waits for the next. When the helper exits, its stderr is classified into a
//! failure reason.

use super::DriverStatus;
use crate::errors::{CameraError, CaptureError, FailureReason};
use crate::types::Frame;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const READ_CHUNK: usize = 16 * 1024;
const QUEUE_DEPTH: usize = 2;
const STDERR_TAIL: usize = 4096;

/// Splits a byte stream into complete JPEG images.
#[derive(Debug, Default)]
pub struct JpegSplitter {
    buffer: Vec<u8>,
    max_frame: usize,
}

impl JpegSplitter {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame,
        }
    }

    /// Feed bytes, returning every image completed by them in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buffer, 0xD8, 0) else {
                // Keep a trailing 0xFF; it may start the next SOI
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                let drain = self.buffer.len() - keep;
                self.buffer.drain(..drain);
                break;
            };
            if start > 0 {
                self.buffer.drain(..start);
            }

            match find_image_end(&self.buffer) {
                Some(end) => {
                    let rest = self.buffer.split_off(end + 2);
                    frames.push(std::mem::replace(&mut self.buffer, rest));
                }
                None => {
                    if self.max_frame > 0 && self.buffer.len() > self.max_frame {
                        log::warn!(
                            "Dropping {} bytes without end-of-image marker",
                            self.buffer.len()
                        );
                        self.buffer.clear();
                    }
                    break;
                }
            }
        }

        frames
    }

    /// Bytes held while waiting for the rest of an image
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find_marker(data: &[u8], marker: u8, from: usize) -> Option<usize> {
    if data.len() < 2 || from >= data.len() - 1 {
        return None;
    }
    data[from..]
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] == marker)
        .map(|pos| pos + from)
}

/// Offset of the EOI closing the image that starts at 0.
///
/// SOI/EOI pairs nested inside it (EXIF thumbnails) are skipped. Entropy-coded
/// data stuffs every 0xFF, so only real markers match.
fn find_image_end(data: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] == 0xFF {
            match data[pos + 1] {
                0xD8 => depth += 1,
                0xD9 if depth == 0 => return Some(pos),
                0xD9 => depth -= 1,
                _ => {}
            }
        }
        pos += 1;
    }
    None
}

struct Helper {
    child: Child,
    frames: Receiver<Frame>,
    stderr: Arc<Mutex<String>>,
    reader: Option<JoinHandle<()>>,
    collector: Option<JoinHandle<()>>,
}

impl Helper {
    fn stderr_tail(&self) -> String {
        self.stderr
            .lock()
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    fn stop(mut self) {
        if let Err(e) = self.child.kill() {
            if e.kind() != ErrorKind::InvalidInput {
                log::debug!("Failed to kill capture helper: {}", e);
            }
        }
        let _ = self.child.wait();
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.collector.take() {
            let _ = handle.join();
        }
    }
}

/// Capture backend fed by an external MJPEG-producing program
pub struct ProcessBackend {
    command: Vec<String>,
    timeout: Duration,
    helper: Option<Helper>,
}

impl ProcessBackend {
    pub fn new(command: Vec<String>, timeout: Duration) -> Result<Self, CameraError> {
        if command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(CameraError::ConfigError(
                "Process mechanism requires a command".to_string(),
            ));
        }
        Ok(Self {
            command,
            timeout,
            helper: None,
        })
    }

    pub fn program(&self) -> &str {
        &self.command[0]
    }

    pub fn capture(&mut self) -> Result<Frame, CaptureError> {
        if self.helper.is_none() {
            self.helper = Some(self.spawn()?);
        }
        let Some(helper) = self.helper.as_ref() else {
            return Err(CaptureError::busy("Capture helper not running"));
        };

        let received = match helper.frames.try_iter().last() {
            Some(frame) => Ok(frame),
            None => helper.frames.recv_timeout(self.timeout),
        };

        match received {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::busy(format!(
                "{} produced no frame within {:?}",
                self.program(),
                self.timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(self.helper_exited()),
        }
    }

    pub fn status(&self) -> DriverStatus {
        match locate_program(self.program()) {
            Some(_) => DriverStatus::available(),
            None => DriverStatus::unavailable(format!("{} not installed", self.program())),
        }
    }

    pub fn release(&mut self) {
        if let Some(helper) = self.helper.take() {
            helper.stop();
            log::info!("Stopped {}", self.program());
        }
    }

    fn helper_exited(&mut self) -> CaptureError {
        let Some(mut helper) = self.helper.take() else {
            return CaptureError::busy("Capture helper not running");
        };

        let status = helper.child.wait();
        // The collector finishes once the pipe closes
        if let Some(handle) = helper.collector.take() {
            let _ = handle.join();
        }
        let stderr = helper.stderr_tail();
        helper.stop();

        let status = match status {
            Ok(status) => status.to_string(),
            Err(e) => format!("unknown status ({})", e),
        };
        let detail = if stderr.is_empty() {
            format!("{} exited: {}", self.program(), status)
        } else {
            format!("{} exited: {}: {}", self.program(), status, stderr)
        };
        log::warn!("{}", detail);
        CaptureError::classify(detail, FailureReason::DeviceBusy)
    }

    fn spawn(&self) -> Result<Helper, CaptureError> {
        let program = self.program();
        let mut child = Command::new(program)
            .args(&self.command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    CaptureError::unavailable(format!("{} not installed", program))
                }
                _ => CaptureError::from_io(program, &e),
            })?;

        let (stdout, stderr_pipe) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::busy(format!("{} has no output pipe", program)));
            }
        };

        let (tx, rx) = bounded(QUEUE_DEPTH);
        let drain = rx.clone();
        let reader = std::thread::Builder::new()
            .name("boothcam-helper-stdout".to_string())
            .spawn(move || read_frames(stdout, tx, drain))
            .map_err(|e| CaptureError::busy(format!("Failed to spawn reader: {}", e)))?;

        let stderr = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&stderr);
        let collector = std::thread::Builder::new()
            .name("boothcam-helper-stderr".to_string())
            .spawn(move || collect_stderr(stderr_pipe, sink))
            .map_err(|e| CaptureError::busy(format!("Failed to spawn collector: {}", e)))?;

        log::info!("Started capture helper: {}", self.command.join(" "));
        Ok(Helper {
            child,
            frames: rx,
            stderr,
            reader: Some(reader),
            collector: Some(collector),
        })
    }
}

impl Drop for ProcessBackend {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_frames(mut stdout: impl Read, tx: Sender<Frame>, drain: Receiver<Frame>) {
    let mut splitter = JpegSplitter::new(16 * 1024 * 1024);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("Capture helper read failed: {}", e);
                break;
            }
        };

        for data in splitter.push(&chunk[..n]) {
            let mut frame = Frame::new(data);
            loop {
                match tx.try_send(frame) {
                    Ok(()) => break,
                    Err(TrySendError::Full(rejected)) => {
                        // Drop oldest
                        let _ = drain.try_recv();
                        frame = rejected;
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
        }
    }
}

fn collect_stderr(mut pipe: impl Read, sink: Arc<Mutex<String>>) {
    let mut chunk = [0u8; 1024];
    while let Ok(n) = pipe.read(&mut chunk) {
        if n == 0 {
            break;
        }
        if let Ok(mut text) = sink.lock() {
            text.push_str(&String::from_utf8_lossy(&chunk[..n]));
            if text.len() > STDERR_TAIL {
                let mut cut = text.len() - STDERR_TAIL;
                while !text.is_char_boundary(cut) {
                    cut += 1;
                }
                text.drain(..cut);
            }
        }
    }
}

/// Resolve a program name the way the shell would
fn locate_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
