// client_tests.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::av::EncoderFactory;
use crate::config::ServerConfig;
use crate::encoder::{EncoderEvent, EncoderEventSender, EncoderProcess};
use crate::error::{RecastError, Result};
use crate::framing::{self, Header, DEFAULT_MAX_PACKET_SIZE};
use crate::signaling::{SignalMessage, SignalingTransport};
use crate::transport::{
    IceCandidate, PeerConnector, PeerTransport, SessionDescription, TransportEvent,
    TransportEventSender,
};

use super::client::ClientSession;

struct MockSignaling {
    sent: StdMutex<Vec<SignalMessage>>,
}

impl SignalingTransport for MockSignaling {
    fn send(&self, msg: &SignalMessage) -> Result<()> {
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

struct MockPeer {
    sent: StdMutex<Vec<Bytes>>,
    candidates: StdMutex<Vec<IceCandidate>>,
    closed: AtomicBool,
}

#[async_trait]
impl PeerTransport for MockPeer {
    async fn send(&self, packet: Bytes) -> Result<()> {
        self.sent.lock().unwrap().push(packet);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MockConnector {
    peer: Arc<MockPeer>,
    events_slot: Arc<StdMutex<Option<TransportEventSender>>>,
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(
        &self,
        _offer: SessionDescription,
        events: TransportEventSender,
    ) -> Result<(Arc<dyn PeerTransport>, SessionDescription)> {
        *self.events_slot.lock().unwrap() = Some(events);
        Ok((
            Arc::clone(&self.peer) as Arc<dyn PeerTransport>,
            SessionDescription {
                sdp: "v=0\r\n".to_string(),
                kind: "answer".to_string(),
            },
        ))
    }
}

struct MockEncoder {
    events: EncoderEventSender,
    running: Arc<AtomicBool>,
    written: Arc<StdMutex<Vec<Bytes>>>,
}

#[async_trait]
impl EncoderProcess for MockEncoder {
    async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let _ = self.events.send(EncoderEvent::Ready);
        Ok(())
    }

    async fn write(&self, chunk: &[u8]) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RecastError::EncoderNotRunning);
        }
        self.written
            .lock()
            .unwrap()
            .push(Bytes::copy_from_slice(chunk));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

struct Fixture {
    session: Arc<ClientSession>,
    signaling: Arc<MockSignaling>,
    peer: Arc<MockPeer>,
    events_slot: Arc<StdMutex<Option<TransportEventSender>>>,
    written: Arc<StdMutex<Vec<Bytes>>>,
    enc_running: Arc<AtomicBool>,
}

fn fixture() -> Fixture {
    let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
    let signaling = Arc::new(MockSignaling {
        sent: StdMutex::new(Vec::new()),
    });
    let peer = Arc::new(MockPeer {
        sent: StdMutex::new(Vec::new()),
        candidates: StdMutex::new(Vec::new()),
        closed: AtomicBool::new(false),
    });
    let events_slot = Arc::new(StdMutex::new(None));
    let connector = Arc::new(MockConnector {
        peer: Arc::clone(&peer),
        events_slot: Arc::clone(&events_slot),
    });

    let written = Arc::new(StdMutex::new(Vec::new()));
    let enc_running = Arc::new(AtomicBool::new(false));
    let factory: EncoderFactory = {
        let written = Arc::clone(&written);
        let running = Arc::clone(&enc_running);
        Arc::new(move |_cfg, events| {
            Box::new(MockEncoder {
                events,
                running: Arc::clone(&running),
                written: Arc::clone(&written),
            })
        })
    };

    let session = ClientSession::spawn_with_factory(
        addr,
        ServerConfig::default(),
        Arc::clone(&signaling) as Arc<dyn SignalingTransport>,
        connector,
        factory,
    );

    Fixture {
        session,
        signaling,
        peer,
        events_slot,
        written,
        enc_running,
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

/// Complete the offer/answer exchange and return the transport event
/// sender the connector handed out.
async fn establish(fix: &Fixture) -> TransportEventSender {
    fix.session.handle_signal(SignalMessage::Offer {
        offer: SessionDescription {
            sdp: "v=0\r\n".to_string(),
            kind: "offer".to_string(),
        },
    });
    let signaling = Arc::clone(&fix.signaling);
    wait_until(move || {
        signaling
            .sent
            .lock()
            .unwrap()
            .iter()
            .any(|m| matches!(m, SignalMessage::Answer { .. }))
    })
    .await;
    fix.events_slot.lock().unwrap().clone().unwrap()
}

fn start_packet() -> Bytes {
    let config = br#"{
        "processor": "ffmpeg",
        "destination": {"type": "file", "path": "out.mp4"},
        "encoder": {
            "video": {"codec": "libx264", "bitrate": 3000, "fps": 30},
            "audio": {"codec": "aac", "bitrate": 128000, "sampleRate": 44100}
        }
    }"#;
    framing::encode(Header::SessionStart, config, DEFAULT_MAX_PACKET_SIZE)
        .remove(0)
}

fn sent_headers(peer: &MockPeer) -> Vec<u8> {
    peer.sent.lock().unwrap().iter().map(|p| p[0]).collect()
}

#[tokio::test]
async fn test_offer_yields_answer() {
    let fix = fixture();
    let _events = establish(&fix).await;

    let sent = fix.signaling.sent.lock().unwrap();
    assert!(matches!(sent[0], SignalMessage::Answer { .. }));
}

#[tokio::test]
async fn test_local_candidates_are_trickled() {
    let fix = fixture();
    let events = establish(&fix).await;

    events
        .send(TransportEvent::Candidate(IceCandidate {
            candidate: "candidate:1 1 UDP 1 10.0.0.1 5000 typ host".to_string(),
            mid: Some("0".to_string()),
        }))
        .await
        .unwrap();

    let signaling = Arc::clone(&fix.signaling);
    wait_until(move || {
        signaling
            .sent
            .lock()
            .unwrap()
            .iter()
            .any(|m| matches!(m, SignalMessage::Ice { .. }))
    })
    .await;
}

#[tokio::test]
async fn test_remote_candidates_reach_transport() {
    let fix = fixture();
    let _events = establish(&fix).await;

    fix.session.handle_signal(SignalMessage::Ice {
        candidate: IceCandidate {
            candidate: "candidate:2 1 UDP 1 10.0.0.2 5001 typ host".to_string(),
            mid: Some("0".to_string()),
        },
    });

    let peer = Arc::clone(&fix.peer);
    wait_until(move || !peer.candidates.lock().unwrap().is_empty()).await;
}

#[tokio::test]
async fn test_session_start_sends_av_ready() {
    let fix = fixture();
    let events = establish(&fix).await;

    events
        .send(TransportEvent::Packet(start_packet()))
        .await
        .unwrap();

    let peer = Arc::clone(&fix.peer);
    wait_until(move || sent_headers(&peer).contains(&Header::AvReady.byte())).await;
    assert!(fix.enc_running.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_chunks_reach_encoder_in_order() {
    let fix = fixture();
    let events = establish(&fix).await;

    events
        .send(TransportEvent::Packet(start_packet()))
        .await
        .unwrap();
    let peer = Arc::clone(&fix.peer);
    wait_until(move || sent_headers(&peer).contains(&Header::AvReady.byte())).await;

    for chunk in [&b"one"[..], &b"two"[..], &b"three"[..]] {
        let packet = framing::encode(Header::AvChunk, chunk, DEFAULT_MAX_PACKET_SIZE).remove(0);
        events.send(TransportEvent::Packet(packet)).await.unwrap();
    }

    let written = Arc::clone(&fix.written);
    wait_until(move || written.lock().unwrap().len() == 3).await;
    let written = fix.written.lock().unwrap();
    assert_eq!(written[0].as_ref(), b"one");
    assert_eq!(written[1].as_ref(), b"two");
    assert_eq!(written[2].as_ref(), b"three");
}

#[tokio::test]
async fn test_oversize_packet_dropped_without_teardown() {
    let fix = fixture();
    let events = establish(&fix).await;

    let oversize = Bytes::from(vec![Header::AvChunk.byte(); DEFAULT_MAX_PACKET_SIZE + 1]);
    events.send(TransportEvent::Packet(oversize)).await.unwrap();

    // No reply is sent for a dropped packet and the session keeps working:
    // a normal session start right after must still be honored.
    events
        .send(TransportEvent::Packet(start_packet()))
        .await
        .unwrap();

    let peer = Arc::clone(&fix.peer);
    wait_until(move || sent_headers(&peer).contains(&Header::AvReady.byte())).await;
    let headers = sent_headers(&fix.peer);
    assert_eq!(headers, vec![Header::AvReady.byte()]);
}

#[tokio::test]
async fn test_unknown_header_is_ignored() {
    let fix = fixture();
    let events = establish(&fix).await;

    events
        .send(TransportEvent::Packet(Bytes::from_static(&[0x99, 1, 2])))
        .await
        .unwrap();
    tokio::task::yield_now().await;

    assert!(fix.peer.sent.lock().unwrap().is_empty());
    assert!(!fix.session.cancel_token().is_cancelled());
}

#[tokio::test]
async fn test_chunk_without_session_reports_start_error() {
    let fix = fixture();
    let events = establish(&fix).await;

    let packet = framing::encode(Header::AvChunk, b"chunk", DEFAULT_MAX_PACKET_SIZE).remove(0);
    events.send(TransportEvent::Packet(packet)).await.unwrap();

    let peer = Arc::clone(&fix.peer);
    wait_until(move || sent_headers(&peer).contains(&Header::SessionStartError.byte())).await;
}

#[tokio::test]
async fn test_session_end_stops_encoder_and_allows_restart() {
    let fix = fixture();
    let events = establish(&fix).await;

    events
        .send(TransportEvent::Packet(start_packet()))
        .await
        .unwrap();
    let peer = Arc::clone(&fix.peer);
    wait_until(move || sent_headers(&peer).contains(&Header::AvReady.byte())).await;

    let end = framing::encode(Header::SessionEnd, b"", DEFAULT_MAX_PACKET_SIZE).remove(0);
    events.send(TransportEvent::Packet(end)).await.unwrap();

    let running = Arc::clone(&fix.enc_running);
    wait_until(move || !running.load(Ordering::SeqCst)).await;

    // A fresh session start after teardown spins up a new encoder
    events
        .send(TransportEvent::Packet(start_packet()))
        .await
        .unwrap();
    let peer = Arc::clone(&fix.peer);
    wait_until(move || {
        sent_headers(&peer)
            .iter()
            .filter(|h| **h == Header::AvReady.byte())
            .count()
            == 2
    })
    .await;
}

#[tokio::test]
async fn test_transport_close_tears_session_down() {
    let fix = fixture();
    let events = establish(&fix).await;

    events
        .send(TransportEvent::Packet(start_packet()))
        .await
        .unwrap();
    let peer = Arc::clone(&fix.peer);
    wait_until(move || sent_headers(&peer).contains(&Header::AvReady.byte())).await;

    events.send(TransportEvent::Closed).await.unwrap();

    let token = fix.session.cancel_token();
    wait_until(move || token.is_cancelled()).await;

    let running = Arc::clone(&fix.enc_running);
    wait_until(move || !running.load(Ordering::SeqCst)).await;
    assert!(fix.peer.closed.load(Ordering::SeqCst));
}
