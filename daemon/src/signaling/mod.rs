// mod.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod server;

pub use protocol::SignalMessage;
pub use server::SignalingServer;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{RecastError, Result};

/// Maximum number of concurrent signaling clients
pub const MAX_CONCURRENT_CLIENTS: usize = 1000;

/// Buffer size for per-client outbound message channels
pub const CLIENT_MESSAGE_BUFFER: usize = 256;

/// Reliable text channel back to one peer, used during setup and for
/// stats. Abstract so session tests can capture what would be sent.
pub trait SignalingTransport: Send + Sync {
    fn send(&self, msg: &SignalMessage) -> Result<()>;
}

/// WebSocket-backed signaling sender: serializes into the per-client
/// outbound channel without blocking the session task.
pub struct WsSignaling {
    tx: mpsc::Sender<Message>,
}

impl WsSignaling {
    pub fn new(tx: mpsc::Sender<Message>) -> Arc<Self> {
        Arc::new(Self { tx })
    }
}

impl SignalingTransport for WsSignaling {
    fn send(&self, msg: &SignalMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.tx
            .try_send(Message::Text(json.into()))
            .map_err(|_| RecastError::WebSocket("client send buffer full or closed".to_string()))
    }
}

#[cfg(test)]
mod protocol_tests;
