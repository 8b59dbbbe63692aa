// config.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! Daemon configuration and the per-session stream configuration carried
//! in the payload of a `SessionStart` packet.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::framing::DEFAULT_MAX_PACKET_SIZE;

/// Default signaling port
pub const DEFAULT_PORT: u16 = 8080;

/// Default bind address for the signaling server
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Default STUN server handed to peer connections
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Seconds without an AV chunk before a session is considered dead
pub const DEFAULT_CHUNK_WAIT_TIMEOUT_SECS: u64 = 10;

/// Interval between chunk-arrival watchdog checks
pub const DEFAULT_CHUNK_WAIT_CHECK_INTERVAL_SECS: u64 = 1;

/// Process-wide daemon settings, resolved from CLI flags and environment
/// variables in `main`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Signaling auth key. An empty key accepts every connection.
    pub auth_key: String,
    pub max_packet_size: usize,
    pub chunk_wait_timeout: Duration,
    pub chunk_wait_check_interval: Duration,
    pub ice_servers: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            auth_key: String::new(),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            chunk_wait_timeout: Duration::from_secs(DEFAULT_CHUNK_WAIT_TIMEOUT_SECS),
            chunk_wait_check_interval: Duration::from_secs(DEFAULT_CHUNK_WAIT_CHECK_INTERVAL_SECS),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
        }
    }
}

/// Which encoder adapter drives the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Processor {
    #[default]
    Ffmpeg,
    Gstreamer,
}

impl std::fmt::Display for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Processor::Ffmpeg => write!(f, "ffmpeg"),
            Processor::Gstreamer => write!(f, "gstreamer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    File,
    Rtmp,
}

/// Where the encoded stream goes. A destination without a kind means the
/// encoder writes to its own stdout (raw pipe).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Destination {
    #[serde(rename = "type", default)]
    pub kind: Option<DestinationKind>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Encoder name; resolved to a per-adapter default when absent and
    /// passed through verbatim when not one of the canonical codecs.
    pub codec: Option<String>,
    /// kbit/s
    pub bitrate: u32,
    pub fps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: None,
            bitrate: 3000,
            fps: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub codec: Option<String>,
    /// bits/s
    pub bitrate: u32,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: None,
            bitrate: 128_000,
            sample_rate: 44_100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub video: VideoConfig,
    pub audio: AudioConfig,
}

/// Operator-supplied session configuration, delivered as UTF-8 JSON in the
/// `SessionStart` payload. Unknown fields are ignored; missing fields draw
/// from defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub processor: Processor,
    pub destination: Destination,
    pub encoder: EncoderConfig,
}

impl StreamConfig {
    pub fn parse(payload: &[u8]) -> crate::error::Result<Self> {
        let cfg: StreamConfig = serde_json::from_slice(payload)?;
        Ok(cfg)
    }

    /// Interval the frame queue worker keeps between two encoder writes.
    pub fn frame_interval(&self) -> Duration {
        let fps = self.encoder.video.fps.max(1);
        Duration::from_millis(1000 / fps as u64)
    }

    /// Keyframe interval in frames: two seconds worth of video.
    pub fn gop_size(&self) -> u32 {
        self.encoder.video.fps * 2
    }
}
