//! Per-consumer multipart stream
//!
//! Each consumer owns a feed receiver. New frames are forwarded as they are
//! published; when nothing new arrives within the keepalive period the last
//! good frame is sent again so a stalled camera never looks like a dead
//! connection and a gone client is noticed at the next write.

use super::{CaptureDaemon, Feed};
use crate::types::Frame;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::watch;

/// Multipart boundary used by the stream endpoint
pub const BOUNDARY: &str = "frame";

/// Encode one multipart part carrying `frame`
pub fn multipart_part(frame: &Frame) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        Frame::CONTENT_TYPE,
        frame.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(&frame.data);
    part.put_slice(b"\r\n");
    part.freeze()
}

struct Consumer {
    rx: watch::Receiver<Feed>,
    keepalive: Duration,
    last: Option<Frame>,
    primed: bool,
    // Declared after `rx` so the receiver is gone when the guard logs
    _guard: ConsumerGuard,
}

struct ConsumerGuard {
    daemon: CaptureDaemon,
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        log::info!(
            "Stream consumer disconnected ({} remaining)",
            self.daemon.consumers()
        );
    }
}

/// Frames for one consumer, encoded as multipart parts.
///
/// Ends when the daemon reports a permanent driver failure.
pub fn frame_stream(daemon: CaptureDaemon) -> impl Stream<Item = Result<Bytes, Infallible>> {
    let rx = daemon.subscribe();
    log::info!("Stream consumer connected ({} total)", daemon.consumers());

    let consumer = Consumer {
        rx,
        keepalive: daemon.settings().keepalive,
        last: None,
        primed: false,
        _guard: ConsumerGuard { daemon },
    };

    stream::unfold(consumer, |mut consumer| async move {
        let frame = next_frame(&mut consumer).await?;
        consumer.last = Some(frame.clone());
        Some((Ok(multipart_part(&frame)), consumer))
    })
}

async fn next_frame(consumer: &mut Consumer) -> Option<Frame> {
    if !consumer.primed {
        consumer.primed = true;
        // A cached frame gives the consumer a picture before the next tick
        let cached = consumer.rx.borrow_and_update().latest.clone();
        if cached.is_some() {
            return cached;
        }
    }

    loop {
        match tokio::time::timeout(consumer.keepalive, consumer.rx.changed()).await {
            Ok(Ok(())) => {
                let feed = consumer.rx.borrow_and_update().clone();
                if let Some(failure) = feed.failure.filter(|f| f.permanent) {
                    log::warn!("Closing stream: {}", failure);
                    return None;
                }
                let Some(frame) = feed.latest else {
                    continue;
                };
                let already_sent = consumer
                    .last
                    .as_ref()
                    .is_some_and(|last| last.sequence == frame.sequence);
                if !already_sent {
                    return Some(frame);
                }
            }
            // Daemon gone
            Ok(Err(_)) => return None,
            Err(_) => {
                if let Some(last) = consumer.last.clone() {
                    log::trace!("Keepalive resend of frame #{}", last.sequence);
                    return Some(last);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::DaemonSettings;
    use crate::driver::{Driver, SyntheticBackend, SyntheticScript};
    use futures::StreamExt;

    fn daemon_with(
        backend: SyntheticBackend,
        settings: DaemonSettings,
    ) -> (CaptureDaemon, SyntheticScript) {
        let script = backend.script();
        (CaptureDaemon::new(Driver::Synthetic(backend), settings), script)
    }

    async fn next_part<S>(stream: &mut S) -> Bytes
    where
        S: Stream<Item = Result<Bytes, Infallible>> + Unpin,
    {
        tokio::time::timeout(Duration::from_secs(3), stream.next())
            .await
            .expect("no part in time")
            .expect("stream ended")
            .unwrap_or_else(|never| match never {})
    }

    #[tokio::test]
    async fn test_stalled_driver_gets_keepalive_resend() {
        let backend = SyntheticBackend::new(16, 16, 70).with_delay(Duration::from_millis(400));
        let settings = DaemonSettings {
            frame_interval: Duration::from_millis(10),
            keepalive: Duration::from_millis(40),
            ..DaemonSettings::default()
        };
        let (daemon, script) = daemon_with(backend, settings);
        let handle = daemon.start();

        let mut stream = Box::pin(frame_stream(daemon.clone()));
        let first = next_part(&mut stream).await;

        // The next capture is still sleeping in the driver
        let resent = tokio::time::timeout(Duration::from_millis(200), stream.next())
            .await
            .expect("no keepalive resend")
            .expect("stream ended")
            .unwrap_or_else(|never| match never {});
        assert_eq!(resent, first);
        assert_eq!(script.captures(), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_consumers_share_one_capture_per_tick() {
        let settings = DaemonSettings {
            frame_interval: Duration::from_millis(50),
            ..DaemonSettings::default()
        };
        let (daemon, script) = daemon_with(SyntheticBackend::new(16, 16, 70), settings);
        let handle = daemon.start();

        let mut first = Box::pin(frame_stream(daemon.clone()));
        let mut second = Box::pin(frame_stream(daemon.clone()));
        assert_eq!(daemon.consumers(), 2);

        let a = next_part(&mut first).await;
        let b = next_part(&mut second).await;
        assert_eq!(a, b);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let captures = script.captures();
        // Roughly ten ticks; per-consumer capture would double it
        assert!(captures >= 2, "only {} captures", captures);
        assert!(captures <= 13, "{} captures for two consumers", captures);

        drop(first);
        drop(second);
        handle.abort();
    }

    #[test]
    fn test_multipart_part_layout() {
        let frame = Frame::new(vec![0xFF, 0xD8, 0xFF, 0xD9]);
        let part = multipart_part(&frame);
        let expected = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n\xFF\xD8\xFF\xD9\r\n";
        assert_eq!(&part[..], &expected[..]);
    }
}
