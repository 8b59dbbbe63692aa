// mod.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! Encoder subprocess adapters.
//!
//! An [`EncoderProcess`] wraps an external re-encoding tool: media container
//! bytes go in on stdin, encoded output goes to the configured destination,
//! and stderr is parsed for readiness, statistics and error markers. Two
//! adapters exist, one per supported tool family; they share no base type
//! and synthesize their argument lists as pure functions.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::{Processor, StreamConfig};
use crate::error::Result;

pub mod ffmpeg;
pub mod gstreamer;

pub use ffmpeg::FfmpegProcess;
pub use gstreamer::GstProcess;

/// Seconds an adapter waits for its readiness marker before failing start
pub const READY_TIMEOUT_SECS: u64 = 10;

/// Seconds granted for a cooperative stop before escalating to an interrupt
pub const STOP_GRACE_TIMEOUT_SECS: u64 = 10;

/// Scoped lifecycle over an external encoder child process.
#[async_trait]
pub trait EncoderProcess: Send + Sync {
    /// Spawn the child. After success the process is live but not
    /// necessarily ready; readiness is reported through the event channel.
    async fn start(&self) -> Result<()>;

    /// Feed one chunk to the child stdin. Suspends while the pipe is under
    /// backpressure and fails with `EncoderNotRunning` once the child has
    /// exited.
    async fn write(&self, chunk: &[u8]) -> Result<()>;

    /// Cooperative shutdown: end-of-input, a grace period, then an
    /// interrupt. Resolves only once the child exit has been observed.
    async fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderErrorKind {
    /// No readiness marker appeared within [`READY_TIMEOUT_SECS`].
    ReadyTimeout,
    /// The child wrote an error marker to stderr.
    Runtime,
    /// The child exited without being asked to stop.
    Exited,
}

/// Events an adapter reports to its owning AV session.
#[derive(Debug, Clone)]
pub enum EncoderEvent {
    Ready,
    Stats(EncoderStats),
    Error { kind: EncoderErrorKind, detail: String },
}

pub type EncoderEventSender = mpsc::UnboundedSender<EncoderEvent>;
pub type EncoderEventReceiver = mpsc::UnboundedReceiver<EncoderEvent>;

pub fn create_event_channel() -> (EncoderEventSender, EncoderEventReceiver) {
    mpsc::unbounded_channel()
}

/// Progress record extracted from an ffmpeg stderr progress line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FfmpegProgress {
    pub frame: u64,
    pub fps: f64,
    #[serde(rename = "sizeKB")]
    pub size_kb: u64,
    #[serde(rename = "timeMs")]
    pub time_ms: u64,
    #[serde(rename = "bitrateKbps")]
    pub bitrate_kbps: f64,
    pub speed: f64,
}

/// Frame counters extracted from the gst-launch pipeline, emitted at most
/// once per truncated second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GstStats {
    pub fps: f64,
    #[serde(rename = "inFrames")]
    pub in_frames: u64,
    #[serde(rename = "outFrames")]
    pub out_frames: u64,
    #[serde(rename = "droppedFrames")]
    pub dropped_frames: u64,
    #[serde(rename = "duplicatedFrames")]
    pub duplicated_frames: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EncoderStats {
    Ffmpeg(FfmpegProgress),
    Gstreamer(GstStats),
}

/// Build the adapter selected by `cfg.processor`.
pub fn create(cfg: &StreamConfig, events: EncoderEventSender) -> Box<dyn EncoderProcess> {
    match cfg.processor {
        Processor::Ffmpeg => Box::new(FfmpegProcess::new(cfg, events)),
        Processor::Gstreamer => Box::new(GstProcess::new(cfg, events)),
    }
}

/// Keywords that mark a stderr line as a fatal encoder error. The bare
/// `error` keyword is matched case-insensitively, the tool-specific phrases
/// verbatim.
const ERROR_KEYWORDS: [&str; 4] = [
    "already exists",
    "Unknown encoder",
    "Unrecognized option",
    "Invalid argument",
];

pub(crate) fn is_error_line(line: &str) -> bool {
    line.to_ascii_lowercase().contains("error") || ERROR_KEYWORDS.iter().any(|k| line.contains(k))
}

/// Splits a raw stderr byte stream into lines on both `\n` and `\r`.
/// ffmpeg terminates progress lines with a bare carriage return, so a
/// newline-only reader would sit on them until the process exits.
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n' || b == b'\r') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Drain whatever is left after the stream ended.
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

#[cfg(test)]
mod ffmpeg_tests;
