use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metrics;

pub mod command;

const STDERR_TAIL: usize = 8;
const STOP_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    ConnectionRefused,
    ConnectionTimeout,
    NoVideo,
    CodecNegotiation,
    Other,
}

#[derive(Debug)]
pub enum TranscoderEvent {
    /// RTSP handshake completed; input stream is open.
    Connected,
    Fatal { kind: FatalKind, line: String },
    Exited {
        code: Option<i32>,
        last_stderr: Vec<String>,
    },
}

/// Line-oriented stderr grammar. One marker confirms the handshake; a small
/// set of prefixes classifies fatal failures.
pub fn is_connected_marker(line: &str) -> bool {
    line.starts_with("Input #") && line.contains("rtsp")
}

pub fn classify_fatal(line: &str) -> Option<FatalKind> {
    let lower = line.to_ascii_lowercase();
    if lower.contains("connection refused") {
        Some(FatalKind::ConnectionRefused)
    } else if lower.contains("connection timed out") || lower.contains("operation timed out") {
        Some(FatalKind::ConnectionTimeout)
    } else if lower.contains("no video") || lower.contains("does not contain any stream") {
        Some(FatalKind::NoVideo)
    } else if lower.contains("unsupported codec") || lower.contains("could not find codec") {
        Some(FatalKind::CodecNegotiation)
    } else if lower.contains("error opening input") {
        Some(FatalKind::Other)
    } else {
        None
    }
}

pub struct TranscoderHandle {
    stop_tx: mpsc::Sender<()>,
    running: Arc<AtomicBool>,
}

impl TranscoderHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Graceful stop: 'q' on stdin, SIGKILL after the grace window.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(()).await;
        // Wait for the monitor to finish the shutdown sequence.
        let deadline = tokio::time::Instant::now() + STOP_GRACE + Duration::from_secs(1);
        while self.is_running() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Spawn one ffmpeg child and watch it until it exits or is stopped.
///
/// Events flow into `events` in arrival order. A deliberate stop emits no
/// Exited event; an unexpected death does.
pub fn spawn(
    label: String,
    args: Vec<String>,
    events: mpsc::Sender<TranscoderEvent>,
) -> anyhow::Result<TranscoderHandle> {
    let mut child = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("transcoder stderr not captured"))?;
    let mut stdin = child.stdin.take();

    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
    let running = Arc::new(AtomicBool::new(true));
    let running_flag = running.clone();
    metrics::TRANSCODER.inc();

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);
        let mut connected_sent = false;

        loop {
            tokio::select! {
                stop = stop_rx.recv() => {
                    // None means the handle was dropped; the child must not outlive it.
                    let _ = stop;
                    if let Some(mut si) = stdin.take() {
                        let _ = si.write_all(b"q\n").await;
                    }
                    if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_err() {
                        warn!("transcoder[{}] ignored quit, killing", label);
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                    break;
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            debug!("transcoder[{}]: {}", label, line);
                            if tail.len() == STDERR_TAIL {
                                tail.pop_front();
                            }
                            tail.push_back(line.clone());

                            if !connected_sent && is_connected_marker(&line) {
                                connected_sent = true;
                                let _ = events.send(TranscoderEvent::Connected).await;
                            }
                            if let Some(kind) = classify_fatal(&line) {
                                let _ = events
                                    .send(TranscoderEvent::Fatal { kind, line })
                                    .await;
                            }
                        }
                        Ok(None) | Err(_) => {
                            let status = child.wait().await;
                            let code = status.ok().and_then(|s| s.code());
                            warn!("transcoder[{}] exited with code {:?}", label, code);
                            let _ = events
                                .send(TranscoderEvent::Exited {
                                    code,
                                    last_stderr: tail.iter().cloned().collect(),
                                })
                                .await;
                            break;
                        }
                    }
                }
            }
        }
        running_flag.store(false, Ordering::Relaxed);
        metrics::TRANSCODER.dec();
    });

    Ok(TranscoderHandle { stop_tx, running })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_marker_matches_rtsp_input() {
        assert!(is_connected_marker(
            "Input #0, rtsp, from 'rtsp://cam.local/stream1':"
        ));
        assert!(!is_connected_marker("Output #0, rtp, to 'rtp://...'"));
        assert!(!is_connected_marker("Input #0, mpegts, from 'x.ts':"));
    }

    #[test]
    fn fatal_classification() {
        assert_eq!(
            classify_fatal("rtsp://cam/stream1: Connection refused"),
            Some(FatalKind::ConnectionRefused)
        );
        assert_eq!(
            classify_fatal("rtsp://cam/stream1: Connection timed out"),
            Some(FatalKind::ConnectionTimeout)
        );
        assert_eq!(
            classify_fatal("Stream map '0:v:0' matches no streams. No video."),
            Some(FatalKind::NoVideo)
        );
        assert_eq!(
            classify_fatal("Unsupported codec with id 27"),
            Some(FatalKind::CodecNegotiation)
        );
        assert_eq!(classify_fatal("frame=  120 fps= 30"), None);
    }

    #[tokio::test]
    async fn exited_event_for_bogus_input() {
        // ffmpeg may be absent on the test host; spawn failure is acceptable,
        // but when it runs the watcher must report the non-zero exit.
        let (tx, mut rx) = mpsc::channel(8);
        let args: Vec<String> = ["-loglevel", "error", "-i", "/nonexistent.sdp", "-f", "null", "-"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let Ok(handle) = spawn("test".into(), args, tx) else {
            return;
        };
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("watcher must emit before timeout");
        match event {
            Some(TranscoderEvent::Exited { code, .. }) => assert_ne!(code, Some(0)),
            Some(TranscoderEvent::Fatal { .. }) => {}
            other => panic!("unexpected event: {:?}", other),
        }
        if handle.is_running() {
            handle.stop().await;
        }
    }
}
