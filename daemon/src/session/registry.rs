// registry.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide map from peer identity to its live client session.
//!
//! The registry holds the only strong ownership of sessions; teardown is
//! initiated here so every exit path stops the AV pipeline and closes the
//! peer transport exactly once.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use super::client::ClientSession;

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Connected { addr: SocketAddr },
    Disconnected { addr: SocketAddr },
}

pub type RegistryEventSender = broadcast::Sender<RegistryEvent>;
pub type RegistryEventReceiver = broadcast::Receiver<RegistryEvent>;

pub fn create_event_channel() -> (RegistryEventSender, RegistryEventReceiver) {
    broadcast::channel(64)
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SocketAddr, Arc<ClientSession>>>,
    event_tx: RegistryEventSender,
}

impl SessionRegistry {
    pub fn new(event_tx: RegistryEventSender) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            event_tx,
        }
    }

    /// Register a session under its peer identity. A leftover session for
    /// the same identity is closed first; one session per peer.
    pub async fn insert(&self, session: Arc<ClientSession>) {
        let addr = session.addr();
        let previous = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(addr, session)
        };
        if let Some(previous) = previous {
            warn!("Replacing live session for {}", addr);
            previous.close().await;
        }

        info!("Registered session for {}", addr);
        if self.event_tx.send(RegistryEvent::Connected { addr }).is_err() {
            warn!("Failed to send Connected event: no receivers");
        }
    }

    /// Tear down and forget the session for a peer. Idempotent.
    pub async fn remove(&self, addr: SocketAddr) {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&addr)
        };

        if let Some(session) = session {
            if self
                .event_tx
                .send(RegistryEvent::Disconnected { addr })
                .is_err()
            {
                warn!("Failed to send Disconnected event: no receivers");
            }
            session.close().await;
            info!("Removed session for {}", addr);
        }
    }

    pub async fn get(&self, addr: SocketAddr) -> Option<Arc<ClientSession>> {
        self.sessions.read().await.get(&addr).cloned()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close every session; used on daemon shutdown.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = {
            let mut map = self.sessions.write().await;
            map.drain().collect()
        };

        for (addr, session) in sessions {
            session.close().await;
            info!("Closed session for {} during shutdown", addr);
        }
    }
}
