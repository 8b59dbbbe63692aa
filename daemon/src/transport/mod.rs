// mod.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! Abstract peer transport.
//!
//! The session layer talks to the remote browser through these traits; the
//! concrete implementation negotiates a WebRTC peer connection and carries
//! framed packets over its data channel.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

pub mod webrtc;

pub use webrtc::{WebRtcConnector, WebRtcTransport};

/// Buffer size for per-peer transport event channels
pub const TRANSPORT_EVENT_BUFFER: usize = 256;

/// An SDP description as it appears on the signaling channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A trickled ICE candidate. Browsers send `sdpMid`; we answer with `mid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "mid", alias = "sdpMid", default)]
    pub mid: Option<String>,
}

/// Events a peer transport delivers to its owning client session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The data channel is open; framed packets may flow.
    Open,
    /// One framed binary message arrived on the data channel.
    Packet(Bytes),
    /// A local ICE candidate to trickle back through signaling.
    Candidate(IceCandidate),
    /// The peer connection or data channel is gone.
    Closed,
}

pub type TransportEventSender = mpsc::Sender<TransportEvent>;
pub type TransportEventReceiver = mpsc::Receiver<TransportEvent>;

pub fn create_event_channel() -> (TransportEventSender, TransportEventReceiver) {
    mpsc::channel(TRANSPORT_EVENT_BUFFER)
}

/// Established peer connection carrying framed packets.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send one framed packet over the data channel.
    async fn send(&self, packet: Bytes) -> Result<()>;

    /// Hand a remote ICE candidate to the connection.
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self);
}

/// Builds a [`PeerTransport`] from a remote offer, producing the local
/// answer. One connector is shared by all client sessions.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        offer: SessionDescription,
        events: TransportEventSender,
    ) -> Result<(std::sync::Arc<dyn PeerTransport>, SessionDescription)>;
}
