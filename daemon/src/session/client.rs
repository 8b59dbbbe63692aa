// client.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! Per-client session aggregate.
//!
//! One task per peer consumes signaling input, peer-transport events and
//! AV-session events through a single select loop, so all per-peer work is
//! serialized: a chunk arriving right after a session start is never
//! handled before the start itself.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::av::{self, AvEvent, AvEventReceiver, AvSession, AvTimeouts, EncoderFactory, SessionState};
use crate::config::{ServerConfig, StreamConfig};
use crate::encoder;
use crate::framing::{self, Header};
use crate::signaling::{SignalMessage, SignalingTransport};
use crate::transport::{
    self, PeerConnector, PeerTransport, TransportEvent, TransportEventReceiver,
};

/// Handle to a per-client session task.
pub struct ClientSession {
    addr: SocketAddr,
    signal_tx: mpsc::UnboundedSender<SignalMessage>,
    cancel: CancellationToken,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl ClientSession {
    pub fn spawn(
        addr: SocketAddr,
        config: ServerConfig,
        signaling: Arc<dyn SignalingTransport>,
        connector: Arc<dyn PeerConnector>,
    ) -> Arc<Self> {
        Self::spawn_with_factory(
            addr,
            config,
            signaling,
            connector,
            Arc::new(|cfg, events| encoder::create(cfg, events)),
        )
    }

    pub fn spawn_with_factory(
        addr: SocketAddr,
        config: ServerConfig,
        signaling: Arc<dyn SignalingTransport>,
        connector: Arc<dyn PeerConnector>,
        factory: EncoderFactory,
    ) -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let actor = SessionActor {
            addr,
            config,
            signaling,
            connector,
            factory,
            cancel: cancel.clone(),
            peer: None,
            peer_events: None,
            av: None,
            av_events: None,
        };
        let task = tokio::spawn(actor.run(signal_rx));

        Arc::new(Self {
            addr,
            signal_tx,
            cancel,
            task: StdMutex::new(Some(task)),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Enqueue one inbound signaling message for the session task.
    pub fn handle_signal(&self, msg: SignalMessage) {
        if self.signal_tx.send(msg).is_err() {
            debug!("Session task for {} is gone, dropping signal", self.addr);
        }
    }

    /// Cancelled when the session tears itself down (e.g. the peer
    /// transport died); the signaling loop watches this to unwind.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop all session-owned work and wait for the task to finish.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

struct SessionActor {
    addr: SocketAddr,
    config: ServerConfig,
    signaling: Arc<dyn SignalingTransport>,
    connector: Arc<dyn PeerConnector>,
    factory: EncoderFactory,
    cancel: CancellationToken,
    peer: Option<Arc<dyn PeerTransport>>,
    peer_events: Option<TransportEventReceiver>,
    av: Option<Arc<AvSession>>,
    av_events: Option<AvEventReceiver>,
}

impl SessionActor {
    async fn run(mut self, mut signal_rx: mpsc::UnboundedReceiver<SignalMessage>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                msg = signal_rx.recv() => match msg {
                    Some(msg) => self.handle_signal(msg).await,
                    None => break,
                },

                event = recv_transport(&mut self.peer_events) => match event {
                    Some(TransportEvent::Packet(data)) => self.route_packet(data).await,
                    Some(TransportEvent::Candidate(candidate)) => {
                        if let Err(e) = self.signaling.send(&SignalMessage::ice(candidate)) {
                            warn!("Failed to trickle ICE to {}: {}", self.addr, e);
                        }
                    }
                    Some(TransportEvent::Open) => {
                        debug!("Data channel open for {}", self.addr);
                    }
                    Some(TransportEvent::Closed) | None => {
                        info!("Peer transport closed for {}", self.addr);
                        break;
                    }
                },

                event = recv_av(&mut self.av_events) => match event {
                    Some(event) => self.handle_av_event(event).await,
                    None => self.av_events = None,
                },
            }
        }

        self.teardown().await;
        self.cancel.cancel();
    }

    async fn handle_signal(&mut self, msg: SignalMessage) {
        match msg {
            SignalMessage::Offer { offer } => {
                if self.peer.is_some() {
                    warn!("Duplicate offer from {}, ignoring", self.addr);
                    return;
                }
                let (events_tx, events_rx) = transport::create_event_channel();
                match self.connector.connect(offer, events_tx).await {
                    Ok((peer, answer)) => {
                        self.peer = Some(peer);
                        self.peer_events = Some(events_rx);
                        if let Err(e) = self.signaling.send(&SignalMessage::answer(answer)) {
                            warn!("Failed to send answer to {}: {}", self.addr, e);
                        }
                    }
                    Err(e) => {
                        warn!("Failed to establish peer transport for {}: {}", self.addr, e);
                    }
                }
            }
            SignalMessage::Ice { candidate } => match &self.peer {
                Some(peer) => {
                    if let Err(e) = peer.add_remote_candidate(candidate).await {
                        warn!("Rejected ICE candidate from {}: {}", self.addr, e);
                    }
                }
                None => warn!("ICE candidate before offer from {}", self.addr),
            },
            _ => debug!("Ignoring unexpected signaling message from {}", self.addr),
        }
    }

    async fn route_packet(&mut self, data: Bytes) {
        let packet = match framing::decode(data, self.config.max_packet_size) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping packet from {}: {}", self.addr, e);
                return;
            }
        };

        match Header::from_byte(packet.header) {
            Some(Header::SessionStart) => self.handle_session_start(packet.payload).await,
            Some(Header::AvChunk) => self.handle_chunk(packet.payload).await,
            Some(Header::SessionEnd) => self.handle_session_end().await,
            Some(header) => {
                warn!("Unexpected header {:?} from {}", header, self.addr);
            }
            None => {
                warn!(
                    "Unknown packet header 0x{:02x} from {}",
                    packet.header, self.addr
                );
            }
        }
    }

    async fn handle_session_start(&mut self, payload: Bytes) {
        let cfg = match StreamConfig::parse(&payload) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("Invalid stream config from {}: {}", self.addr, e);
                self.send_packet(Header::SessionStartError).await;
                return;
            }
        };

        // One live AV session per client; a closed one may be replaced.
        if let Some(av) = &self.av {
            if av.state() != SessionState::Closed {
                warn!("AV session already active for {}", self.addr);
                self.send_packet(Header::SessionStartError).await;
                return;
            }
        }

        let (av_tx, av_rx) = av::create_event_channel();
        let timeouts = AvTimeouts {
            chunk_wait_timeout: self.config.chunk_wait_timeout,
            chunk_wait_check_interval: self.config.chunk_wait_check_interval,
        };
        let session = Arc::new(AvSession::with_factory(
            av_tx,
            timeouts,
            Arc::clone(&self.factory),
        ));
        self.av_events = Some(av_rx);
        self.av = Some(Arc::clone(&session));

        // Failures surface through the event channel as StartError
        let _ = session.start(&cfg).await;
    }

    async fn handle_chunk(&mut self, payload: Bytes) {
        let accepted = match &self.av {
            Some(av) => av.put(payload).is_ok(),
            None => false,
        };
        if !accepted {
            debug!("Chunk for inactive AV session from {}", self.addr);
            self.send_packet(Header::SessionStartError).await;
        }
    }

    async fn handle_session_end(&mut self) {
        info!("Session end from {}", self.addr);
        if let Some(av) = self.av.take() {
            av.stop().await;
        }
    }

    async fn handle_av_event(&mut self, event: AvEvent) {
        match event {
            AvEvent::Ready => {
                info!("AV session ready for {}", self.addr);
                self.send_packet(Header::AvReady).await;
            }
            AvEvent::Stats(stats) => match SignalMessage::stats(&stats) {
                Ok(msg) => {
                    if let Err(e) = self.signaling.send(&msg) {
                        debug!("Failed to send stats to {}: {}", self.addr, e);
                    }
                }
                Err(e) => warn!("Failed to serialize stats: {}", e),
            },
            AvEvent::Timeout => {
                warn!("Chunk wait timeout for {}", self.addr);
                self.send_packet(Header::ChunkWaitTimeout).await;
                self.stop_av().await;
            }
            AvEvent::StartError(detail) => {
                warn!("AV session start error for {}: {}", self.addr, detail);
                self.send_packet(Header::SessionStartError).await;
                self.stop_av().await;
            }
            AvEvent::RuntimeError(detail) => {
                warn!("Encoder error for {}: {}", self.addr, detail);
                self.send_packet(Header::SessionStartError).await;
                self.stop_av().await;
            }
            AvEvent::Closed => {
                self.av = None;
            }
        }
    }

    async fn stop_av(&mut self) {
        if let Some(av) = &self.av {
            av.stop().await;
        }
    }

    async fn send_packet(&self, header: Header) {
        let Some(peer) = &self.peer else {
            debug!("No peer transport for {}, dropping outbound packet", self.addr);
            return;
        };
        for packet in framing::encode(header, &[], self.config.max_packet_size) {
            if let Err(e) = peer.send(packet).await {
                warn!(
                    "Failed to send 0x{:02x} to {}: {}",
                    header.byte(),
                    self.addr,
                    e
                );
                break;
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(av) = self.av.take() {
            av.stop().await;
        }
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }
    }
}

async fn recv_transport(rx: &mut Option<TransportEventReceiver>) -> Option<TransportEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_av(rx: &mut Option<AvEventReceiver>) -> Option<AvEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
