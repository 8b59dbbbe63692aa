// error.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecastError {
    #[error("encoder already running")]
    EncoderAlreadyRunning,

    #[error("encoder binary not found: {0}")]
    EncoderBinaryMissing(String),

    #[error("failed to spawn encoder: {0}")]
    EncoderSpawnFailed(String),

    #[error("encoder is not running")]
    EncoderNotRunning,

    #[error("AV session already running")]
    SessionAlreadyRunning,

    #[error("AV session is not running")]
    SessionNotRunning,

    #[error("invalid stream config: {0}")]
    InvalidConfig(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RecastError>;
