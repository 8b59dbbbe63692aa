// ffmpeg.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! ffmpeg adapter.
//!
//! Reads the client's container stream on stdin and re-encodes it to the
//! configured destination. Readiness is the version banner on stderr;
//! progress lines are parsed into stats records on every occurrence.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::{DestinationKind, StreamConfig};
use crate::error::{RecastError, Result};

use super::{
    is_error_line, EncoderErrorKind, EncoderEvent, EncoderEventSender, EncoderProcess,
    EncoderStats, FfmpegProgress, LineBuffer, READY_TIMEOUT_SECS, STOP_GRACE_TIMEOUT_SECS,
};

pub const FFMPEG_BIN: &str = "ffmpeg";

/// First stderr line of every ffmpeg run; once seen, the tool is parsing
/// input and accepting real data.
const READY_MARKER: &str = "ffmpeg version";

const DEFAULT_VIDEO_CODEC: &str = "libx264";
const DEFAULT_AUDIO_CODEC: &str = "aac";

struct Inner {
    events: EncoderEventSender,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    running: AtomicBool,
    ready: AtomicBool,
    stopping: AtomicBool,
    pid: AtomicU32,
    exited: Notify,
}

pub struct FfmpegProcess {
    args: Vec<String>,
    inherit_stdout: bool,
    inner: Arc<Inner>,
}

impl FfmpegProcess {
    pub fn new(cfg: &StreamConfig, events: EncoderEventSender) -> Self {
        Self {
            args: build_args(cfg),
            inherit_stdout: cfg.destination.kind.is_none(),
            inner: Arc::new(Inner {
                events,
                child: Mutex::new(None),
                stdin: Mutex::new(None),
                running: AtomicBool::new(false),
                ready: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                pid: AtomicU32::new(0),
                exited: Notify::new(),
            }),
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    async fn interrupt(&self) {
        #[cfg(unix)]
        {
            let pid = self.inner.pid.load(Ordering::Relaxed);
            if pid != 0 {
                debug!("Sending SIGINT to ffmpeg (pid {})", pid);
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGINT);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let mut guard = self.inner.child.lock().await;
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
            }
        }
    }
}

#[async_trait]
impl EncoderProcess for FfmpegProcess {
    async fn start(&self) -> Result<()> {
        if self.inner.running.load(Ordering::Acquire) {
            return Err(RecastError::EncoderAlreadyRunning);
        }

        let mut cmd = Command::new(FFMPEG_BIN);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stderr(Stdio::piped())
            .stdout(if self.inherit_stdout {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RecastError::EncoderBinaryMissing(FFMPEG_BIN.to_string())
            } else {
                RecastError::EncoderSpawnFailed(e.to_string())
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecastError::EncoderSpawnFailed("no stdin handle".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RecastError::EncoderSpawnFailed("no stderr handle".to_string()))?;

        self.inner.pid.store(child.id().unwrap_or(0), Ordering::Relaxed);
        self.inner.ready.store(false, Ordering::Release);
        self.inner.stopping.store(false, Ordering::Release);
        self.inner.running.store(true, Ordering::Release);

        *self.inner.child.lock().await = Some(child);
        *self.inner.stdin.lock().await = Some(stdin);

        debug!("Spawned ffmpeg: {}", self.args.join(" "));

        tokio::spawn(run_stderr_reader(Arc::clone(&self.inner), stderr));

        // Readiness watchdog: the marker must appear before the deadline.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            sleep(Duration::from_secs(READY_TIMEOUT_SECS)).await;
            if inner.running.load(Ordering::Acquire)
                && !inner.ready.load(Ordering::Acquire)
                && !inner.stopping.load(Ordering::Acquire)
            {
                let _ = inner.events.send(EncoderEvent::Error {
                    kind: EncoderErrorKind::ReadyTimeout,
                    detail: format!("no readiness marker within {}s", READY_TIMEOUT_SECS),
                });
            }
        });

        Ok(())
    }

    async fn write(&self, chunk: &[u8]) -> Result<()> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(RecastError::EncoderNotRunning);
        }
        let mut guard = self.inner.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(RecastError::EncoderNotRunning)?;
        stdin.write_all(chunk).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                RecastError::EncoderNotRunning
            } else {
                RecastError::Io(e)
            }
        })
    }

    async fn stop(&self) -> Result<()> {
        let notified = self.inner.exited.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.inner.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.inner.stopping.store(true, Ordering::Release);

        // End-of-input: ffmpeg finishes the output container and exits.
        {
            let mut guard = self.inner.stdin.lock().await;
            if let Some(mut stdin) = guard.take() {
                let _ = stdin.shutdown().await;
            }
        }

        let grace = Duration::from_secs(STOP_GRACE_TIMEOUT_SECS);
        if timeout(grace, notified.as_mut()).await.is_err() {
            warn!("ffmpeg did not exit within {}s, interrupting", STOP_GRACE_TIMEOUT_SECS);
            self.interrupt().await;
            if timeout(grace, notified.as_mut()).await.is_err() {
                warn!("ffmpeg ignored interrupt, killing");
                let mut guard = self.inner.child.lock().await;
                if let Some(child) = guard.as_mut() {
                    let _ = child.start_kill();
                }
                drop(guard);
                notified.await;
            }
        }

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

/// Drain stderr, parse it, and reap the child when the stream ends.
async fn run_stderr_reader(inner: Arc<Inner>, mut stderr: ChildStderr) {
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 4096];

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    handle_line(&inner, &line);
                }
            }
        }
    }
    if let Some(line) = lines.flush() {
        handle_line(&inner, &line);
    }

    // stderr closed: the child is done, observe its exit.
    let status = {
        let mut guard = inner.child.lock().await;
        match guard.take() {
            Some(mut child) => child.wait().await.ok(),
            None => None,
        }
    };
    inner.running.store(false, Ordering::Release);
    inner.exited.notify_waiters();

    if !inner.stopping.load(Ordering::Acquire) {
        let detail = match status {
            Some(s) => format!("ffmpeg exited unexpectedly ({})", s),
            None => "ffmpeg exited unexpectedly".to_string(),
        };
        let _ = inner.events.send(EncoderEvent::Error {
            kind: EncoderErrorKind::Exited,
            detail,
        });
    } else {
        debug!("ffmpeg exited ({:?})", status);
    }
}

fn handle_line(inner: &Inner, line: &str) {
    if !inner.ready.load(Ordering::Acquire) && line.contains(READY_MARKER) {
        inner.ready.store(true, Ordering::Release);
        let _ = inner.events.send(EncoderEvent::Ready);
        return;
    }
    if let Some(progress) = parse_progress_line(line) {
        let _ = inner
            .events
            .send(EncoderEvent::Stats(EncoderStats::Ffmpeg(progress)));
        return;
    }
    if is_error_line(line) {
        warn!("ffmpeg: {}", line);
        let _ = inner.events.send(EncoderEvent::Error {
            kind: EncoderErrorKind::Runtime,
            detail: line.to_string(),
        });
    }
}

/// Synthesize the ffmpeg argument list for a stream configuration.
///
/// Contracts kept here: the codec choice selects one of three canonical
/// flag blocks (anything else passes through verbatim), GOP is two seconds
/// of frames, max-rate equals the nominal bitrate, buffer size is twice
/// the bitrate, and a missing destination ends the command with the stdout
/// sentinel.
pub(crate) fn build_args(cfg: &StreamConfig) -> Vec<String> {
    let video = &cfg.encoder.video;
    let audio = &cfg.encoder.audio;

    let mut args: Vec<String> = vec!["-i".into(), "pipe:0".into()];

    let codec = video.codec.as_deref().unwrap_or(DEFAULT_VIDEO_CODEC);
    args.extend(video_codec_args(codec));
    args.extend([
        "-b:v".into(),
        format!("{}k", video.bitrate),
        "-maxrate".into(),
        format!("{}k", video.bitrate),
        "-bufsize".into(),
        format!("{}k", video.bitrate * 2),
        "-g".into(),
        cfg.gop_size().to_string(),
        "-r".into(),
        video.fps.to_string(),
    ]);

    let audio_codec = match audio.codec.as_deref().unwrap_or(DEFAULT_AUDIO_CODEC) {
        "opus" => "libopus",
        other => other,
    };
    args.extend([
        "-c:a".into(),
        audio_codec.to_string(),
        "-b:a".into(),
        audio.bitrate.to_string(),
        "-ar".into(),
        audio.sample_rate.to_string(),
    ]);

    let path = cfg.destination.path.as_deref().unwrap_or_default();
    match cfg.destination.kind {
        Some(DestinationKind::File) => {
            args.extend(["-n".into(), path.to_string()]);
        }
        Some(DestinationKind::Rtmp) => {
            args.extend(["-f".into(), "flv".into(), path.to_string()]);
        }
        None => {
            args.extend(["-f".into(), "matroska".into(), "pipe:1".into()]);
        }
    }

    args
}

fn video_codec_args(codec: &str) -> Vec<String> {
    let flags: &[&str] = match codec {
        "libx264" => &["-c:v", "libx264", "-preset", "veryfast", "-tune", "zerolatency"],
        "h264_nvenc" => &["-c:v", "h264_nvenc", "-preset", "p4", "-tune", "ll"],
        "hevc_nvenc" => &["-c:v", "hevc_nvenc", "-preset", "p4", "-tune", "ll"],
        // Unknown names go through verbatim so the tool itself reports
        // "Unknown encoder" on stderr.
        other => return vec!["-c:v".into(), other.into()],
    };
    flags.iter().map(|s| s.to_string()).collect()
}

/// Parse one ffmpeg progress line, e.g.
/// `frame=  120 fps= 30 q=28.0 size=     512KiB time=00:00:04.00 bitrate=1048.6kbits/s speed=1.01x`
pub(crate) fn parse_progress_line(line: &str) -> Option<FfmpegProgress> {
    if !line.contains("frame=") || !line.contains("time=") {
        return None;
    }

    // ffmpeg pads values with spaces after '='; collapse before tokenizing.
    let mut normalized = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        normalized.push(c);
        if c == '=' {
            while matches!(chars.peek(), Some(' ')) {
                chars.next();
            }
        }
    }

    let mut progress = FfmpegProgress {
        frame: 0,
        fps: 0.0,
        size_kb: 0,
        time_ms: 0,
        bitrate_kbps: 0.0,
        speed: 0.0,
    };

    for token in normalized.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match key {
            "frame" => progress.frame = value.parse().unwrap_or(0),
            "fps" => progress.fps = leading_f64(value),
            "size" | "Lsize" => progress.size_kb = leading_f64(value) as u64,
            "time" => progress.time_ms = parse_time_ms(value),
            "bitrate" => progress.bitrate_kbps = leading_f64(value),
            "speed" => progress.speed = leading_f64(value),
            _ => {}
        }
    }

    Some(progress)
}

/// `HH:MM:SS.cc` to milliseconds; unparseable values (ffmpeg prints `N/A`
/// before the first timestamp) collapse to zero.
fn parse_time_ms(value: &str) -> u64 {
    let mut parts = value.split(':');
    let (Some(h), Some(m), Some(s)) = (parts.next(), parts.next(), parts.next()) else {
        return 0;
    };
    let hours: u64 = h.parse().unwrap_or(0);
    let minutes: u64 = m.parse().unwrap_or(0);
    let seconds = leading_f64(s);
    hours * 3_600_000 + minutes * 60_000 + (seconds * 1000.0) as u64
}

/// Parse the numeric prefix of a value like `1048.6kbits/s` or `1.01x`.
fn leading_f64(value: &str) -> f64 {
    let end = value
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    value[..end].parse().unwrap_or(0.0)
}
