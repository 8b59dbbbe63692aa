// webrtc.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! WebRTC peer transport.
//!
//! The browser is the offerer and opens the data channel; this side
//! answers, trickles its ICE candidates through the event channel and
//! forwards every binary data-channel message as a packet event.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::{RecastError, Result};

use super::{
    IceCandidate, PeerConnector, PeerTransport, SessionDescription, TransportEvent,
    TransportEventSender,
};

pub struct WebRtcConnector {
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        offer: SessionDescription,
        events: TransportEventSender,
    ) -> Result<(Arc<dyn PeerTransport>, SessionDescription)> {
        let api = APIBuilder::new().build();
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await?);
        let transport = Arc::new(WebRtcTransport {
            pc: Arc::clone(&pc),
            channel: Arc::new(StdMutex::new(None)),
        });

        let ice_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = ice_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events
                            .send(TransportEvent::Candidate(IceCandidate {
                                candidate: init.candidate,
                                mid: init.sdp_mid,
                            }))
                            .await;
                    }
                    Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = state_events.clone();
            Box::pin(async move {
                debug!("Peer connection state: {}", state);
                if matches!(
                    state,
                    RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed
                ) {
                    let _ = events.send(TransportEvent::Closed).await;
                }
            })
        }));

        let channel_slot = Arc::clone(&transport.channel);
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = events.clone();
            let slot = Arc::clone(&channel_slot);
            Box::pin(async move {
                debug!("Data channel '{}' announced by peer", dc.label());
                *slot.lock().unwrap() = Some(Arc::clone(&dc));

                let open_events = events.clone();
                dc.on_open(Box::new(move || {
                    let events = open_events.clone();
                    Box::pin(async move {
                        let _ = events.send(TransportEvent::Open).await;
                    })
                }));

                let close_events = events.clone();
                dc.on_close(Box::new(move || {
                    let events = close_events.clone();
                    Box::pin(async move {
                        let _ = events.send(TransportEvent::Closed).await;
                    })
                }));

                dc.on_message(Box::new(move |msg: DataChannelMessage| {
                    let events = events.clone();
                    Box::pin(async move {
                        let _ = events.send(TransportEvent::Packet(msg.data)).await;
                    })
                }));
            })
        }));

        let remote = RTCSessionDescription::offer(offer.sdp)?;
        pc.set_remote_description(remote).await?;

        let answer = pc.create_answer(None).await?;
        pc.set_local_description(answer).await?;
        let local = pc
            .local_description()
            .await
            .ok_or_else(|| RecastError::Transport("no local description".to_string()))?;

        Ok((
            transport as Arc<dyn PeerTransport>,
            SessionDescription {
                sdp: local.sdp,
                kind: "answer".to_string(),
            },
        ))
    }
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    /// Set once the peer announces its data channel.
    channel: Arc<StdMutex<Option<Arc<RTCDataChannel>>>>,
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn send(&self, packet: Bytes) -> Result<()> {
        let channel = self
            .channel
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RecastError::Transport("data channel not established".to_string()))?;

        if channel.ready_state() != RTCDataChannelState::Open {
            return Err(RecastError::Transport("data channel not open".to_string()));
        }

        channel.send(&packet).await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.mid,
                sdp_mline_index: None,
                username_fragment: None,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }
}
