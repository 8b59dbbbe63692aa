// gstreamer.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! gst-launch adapter.
//!
//! Builds a decode/re-encode pipeline description fed through `fdsrc fd=0`,
//! so the client's container stream is written straight to the child stdin
//! without any named-pipe bridge. Readiness is the line reporting the
//! pipeline was set to PLAYING; frame counters come from a verbose
//! fpsdisplaysink branch and are rate-limited to one record per second.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

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
    EncoderStats, GstStats, LineBuffer, READY_TIMEOUT_SECS, STOP_GRACE_TIMEOUT_SECS,
};

pub const GST_LAUNCH_BIN: &str = "gst-launch-1.0";

/// gst-launch reports this once the pipeline reached the PLAYING state.
const READY_MARKER: &str = "Setting pipeline to PLAYING";

const DEFAULT_VIDEO_CODEC: &str = "x264";
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

pub struct GstProcess {
    args: Vec<String>,
    inherit_stdout: bool,
    inner: Arc<Inner>,
}

impl GstProcess {
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
                debug!("Sending SIGINT to gst-launch (pid {})", pid);
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
impl EncoderProcess for GstProcess {
    async fn start(&self) -> Result<()> {
        if self.inner.running.load(Ordering::Acquire) {
            return Err(RecastError::EncoderAlreadyRunning);
        }

        let mut cmd = Command::new(GST_LAUNCH_BIN);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stderr(Stdio::piped())
            .stdout(if self.inherit_stdout {
                Stdio::inherit()
            } else {
                // gst-launch chatters on stdout; the stats branch goes to
                // stderr with -v, so stdout can be dropped.
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RecastError::EncoderBinaryMissing(GST_LAUNCH_BIN.to_string())
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

        debug!("Spawned gst-launch: {}", self.args.join(" "));

        tokio::spawn(run_stderr_reader(Arc::clone(&self.inner), stderr));

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            sleep(Duration::from_secs(READY_TIMEOUT_SECS)).await;
            if inner.running.load(Ordering::Acquire)
                && !inner.ready.load(Ordering::Acquire)
                && !inner.stopping.load(Ordering::Acquire)
            {
                let _ = inner.events.send(EncoderEvent::Error {
                    kind: EncoderErrorKind::ReadyTimeout,
                    detail: format!("pipeline not PLAYING within {}s", READY_TIMEOUT_SECS),
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

        // Ask for a graceful EOS, then close the fd so fdsrc sees EOF.
        {
            let mut guard = self.inner.stdin.lock().await;
            if let Some(stdin) = guard.as_mut() {
                let _ = stdin.write_all(b"q").await;
                let _ = stdin.flush().await;
            }
            if let Some(mut stdin) = guard.take() {
                let _ = stdin.shutdown().await;
            }
        }

        let grace = Duration::from_secs(STOP_GRACE_TIMEOUT_SECS);
        if timeout(grace, notified.as_mut()).await.is_err() {
            warn!(
                "gst-launch did not exit within {}s, interrupting",
                STOP_GRACE_TIMEOUT_SECS
            );
            self.interrupt().await;
            if timeout(grace, notified.as_mut()).await.is_err() {
                warn!("gst-launch ignored interrupt, killing");
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

async fn run_stderr_reader(inner: Arc<Inner>, mut stderr: ChildStderr) {
    let started = Instant::now();
    let mut last_stats_sec: Option<u64> = None;
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 4096];

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    handle_line(&inner, &line, started, &mut last_stats_sec);
                }
            }
        }
    }
    if let Some(line) = lines.flush() {
        handle_line(&inner, &line, started, &mut last_stats_sec);
    }

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
            Some(s) => format!("gst-launch exited unexpectedly ({})", s),
            None => "gst-launch exited unexpectedly".to_string(),
        };
        let _ = inner.events.send(EncoderEvent::Error {
            kind: EncoderErrorKind::Exited,
            detail,
        });
    } else {
        debug!("gst-launch exited ({:?})", status);
    }
}

fn handle_line(inner: &Inner, line: &str, started: Instant, last_stats_sec: &mut Option<u64>) {
    if !inner.ready.load(Ordering::Acquire) && line.contains(READY_MARKER) {
        inner.ready.store(true, Ordering::Release);
        let _ = inner.events.send(EncoderEvent::Ready);
        return;
    }
    if let Some((rendered, dropped, fps)) = parse_fps_message(line) {
        // One record per truncated second at most; fpsdisplaysink fires
        // more often than that.
        let ts = started.elapsed().as_secs();
        if *last_stats_sec == Some(ts) {
            return;
        }
        *last_stats_sec = Some(ts);
        let _ = inner.events.send(EncoderEvent::Stats(EncoderStats::Gstreamer(GstStats {
            fps,
            in_frames: rendered + dropped,
            out_frames: rendered,
            dropped_frames: dropped,
            duplicated_frames: 0,
            timestamp: ts,
        })));
        return;
    }
    if is_error_line(line) {
        warn!("gst-launch: {}", line);
        let _ = inner.events.send(EncoderEvent::Error {
            kind: EncoderErrorKind::Runtime,
            detail: line.to_string(),
        });
    }
}

/// Synthesize the gst-launch pipeline tokens for a stream configuration.
///
/// One token per argv element; gst-launch re-joins them itself, which keeps
/// paths with spaces intact.
pub(crate) fn build_args(cfg: &StreamConfig) -> Vec<String> {
    let video = &cfg.encoder.video;
    let audio = &cfg.encoder.audio;

    let mut args: Vec<String> = Vec::new();

    push(&mut args, &["-v", "-e", "fdsrc", "fd=0", "!", "queue", "!", "decodebin", "name=dec"]);

    // Video branch: decode, normalize the frame rate, split into the
    // encoder and the stats sink.
    push(&mut args, &["dec.", "!", "queue", "!", "videoconvert", "!", "videorate", "!"]);
    args.push(format!("video/x-raw,framerate={}/1", video.fps.max(1)));
    push(&mut args, &["!", "tee", "name=vtee"]);

    push(&mut args, &["vtee.", "!", "queue", "!"]);
    let codec = video.codec.as_deref().unwrap_or(DEFAULT_VIDEO_CODEC);
    let parsed = append_video_encoder(&mut args, codec, video.bitrate, cfg.gop_size());
    if parsed {
        push(&mut args, &["!", "h264parse"]);
    }
    push(&mut args, &["!", "queue", "!", "mux."]);

    push(
        &mut args,
        &[
            "vtee.",
            "!",
            "queue",
            "!",
            "fpsdisplaysink",
            "fps-update-interval=1000",
            "text-overlay=false",
            "video-sink=fakesink",
            "sync=false",
        ],
    );

    // Audio branch
    push(
        &mut args,
        &["dec.", "!", "queue", "!", "audioconvert", "!", "audioresample", "!"],
    );
    args.push(format!("audio/x-raw,rate={}", audio.sample_rate));
    push(&mut args, &["!"]);
    let audio_codec = audio.codec.as_deref().unwrap_or(DEFAULT_AUDIO_CODEC);
    append_audio_encoder(&mut args, audio_codec, audio.bitrate);
    push(&mut args, &["!", "queue", "!", "mux."]);

    // Muxer and destination
    let path = cfg.destination.path.clone().unwrap_or_default();
    match cfg.destination.kind {
        Some(DestinationKind::File) => {
            push(&mut args, &["mp4mux", "name=mux", "!", "filesink"]);
            args.push(format!("location={}", path));
        }
        Some(DestinationKind::Rtmp) => {
            push(&mut args, &["flvmux", "name=mux", "streamable=true", "!", "rtmpsink"]);
            args.push(format!("location={}", path));
        }
        None => {
            push(&mut args, &["matroskamux", "name=mux", "!", "fdsink", "fd=1"]);
        }
    }

    args
}

fn push(args: &mut Vec<String>, tokens: &[&str]) {
    args.extend(tokens.iter().map(|t| t.to_string()));
}

/// Returns true when the produced stream is H.264 and wants an h264parse.
fn append_video_encoder(args: &mut Vec<String>, codec: &str, bitrate: u32, gop: u32) -> bool {
    match codec {
        "x264" => {
            args.push("x264enc".into());
            args.push("tune=zerolatency".into());
            args.push("speed-preset=veryfast".into());
            args.push(format!("bitrate={}", bitrate));
            args.push(format!("key-int-max={}", gop));
            true
        }
        "h264_nvenc" => {
            args.push("nvh264enc".into());
            args.push(format!("bitrate={}", bitrate));
            args.push(format!("gop-size={}", gop));
            true
        }
        // Unknown names become the element verbatim; gst-launch reports
        // the missing element on stderr.
        other => {
            args.push(other.to_string());
            args.push(format!("bitrate={}", bitrate));
            false
        }
    }
}

fn append_audio_encoder(args: &mut Vec<String>, codec: &str, bitrate: u32) {
    match codec {
        "aac" => {
            args.push("voaacenc".into());
            args.push(format!("bitrate={}", bitrate));
        }
        "opus" => {
            args.push("opusenc".into());
            args.push(format!("bitrate={}", bitrate));
        }
        other => {
            args.push(other.to_string());
            args.push(format!("bitrate={}", bitrate));
        }
    }
}

/// Parse a verbose fpsdisplaysink measurement, e.g.
/// `/GstPipeline:pipeline0/GstFpsDisplaySink:fpsdisplaysink0: last-message = rendered: 90, dropped: 2, current: 29.97, average: 30.01`
pub(crate) fn parse_fps_message(line: &str) -> Option<(u64, u64, f64)> {
    if !line.contains("last-message") || !line.contains("rendered:") {
        return None;
    }
    let rendered = field_value(line, "rendered:")?.parse().ok()?;
    let dropped = field_value(line, "dropped:")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let fps = field_value(line, "current:")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    Some((rendered, dropped, fps))
}

fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let rest = line[start..].trim_start();
    let end = rest.find(',').unwrap_or(rest.len());
    Some(rest[..end].trim())
}
