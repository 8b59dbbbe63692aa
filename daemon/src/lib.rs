// lib.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

pub mod av;
pub mod config;
pub mod encoder;
pub mod error;
pub mod framing;
pub mod session;
pub mod signaling;
pub mod transport;

pub use config::{ServerConfig, StreamConfig};
pub use error::{RecastError, Result};
pub use session::{create_event_channel, ClientSession, RegistryEvent, SessionRegistry};
pub use signaling::SignalingServer;
