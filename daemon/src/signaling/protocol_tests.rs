// protocol_tests.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

use super::protocol::SignalMessage;
use crate::encoder::{EncoderStats, FfmpegProgress};
use crate::transport::{IceCandidate, SessionDescription};

#[test]
fn test_offer_deserialize() {
    let json = r#"{"type":"wrtc:offer","offer":{"sdp":"v=0\r\n","type":"offer"}}"#;
    let msg: SignalMessage = serde_json::from_str(json).unwrap();

    match msg {
        SignalMessage::Offer { offer } => {
            assert_eq!(offer.sdp, "v=0\r\n");
            assert_eq!(offer.kind, "offer");
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_answer_serialize() {
    let msg = SignalMessage::answer(SessionDescription {
        sdp: "v=0\r\n".to_string(),
        kind: "answer".to_string(),
    });
    let json = serde_json::to_string(&msg).unwrap();

    assert!(json.contains("\"type\":\"wrtc:answer\""));
    assert!(json.contains("\"answer\""));
    assert!(json.contains("\"type\":\"answer\""));
}

#[test]
fn test_ice_deserialize_browser_form() {
    // Browsers send the candidate mid as sdpMid
    let json =
        r#"{"type":"wrtc:ice","candidate":{"candidate":"candidate:1 1 UDP 1 10.0.0.1 5000 typ host","sdpMid":"0"}}"#;
    let msg: SignalMessage = serde_json::from_str(json).unwrap();

    match msg {
        SignalMessage::Ice { candidate } => {
            assert!(candidate.candidate.starts_with("candidate:1"));
            assert_eq!(candidate.mid.as_deref(), Some("0"));
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_ice_serialize_uses_mid() {
    let msg = SignalMessage::ice(IceCandidate {
        candidate: "candidate:1 1 UDP 1 10.0.0.1 5000 typ host".to_string(),
        mid: Some("0".to_string()),
    });
    let json = serde_json::to_string(&msg).unwrap();

    assert!(json.contains("\"type\":\"wrtc:ice\""));
    assert!(json.contains("\"mid\":\"0\""));
    assert!(!json.contains("sdpMid"));
}

#[test]
fn test_ice_missing_mid_accepted() {
    let json = r#"{"type":"wrtc:ice","candidate":{"candidate":"candidate:1"}}"#;
    let msg: SignalMessage = serde_json::from_str(json).unwrap();
    match msg {
        SignalMessage::Ice { candidate } => assert!(candidate.mid.is_none()),
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_stats_serialize() {
    let stats = EncoderStats::Ffmpeg(FfmpegProgress {
        frame: 120,
        fps: 30.0,
        size_kb: 512,
        time_ms: 4000,
        bitrate_kbps: 1048.6,
        speed: 1.01,
    });
    let msg = SignalMessage::stats(&stats).unwrap();
    let json = serde_json::to_string(&msg).unwrap();

    assert!(json.contains("\"type\":\"av:stats\""));
    assert!(json.contains("\"frame\":120"));
    assert!(json.contains("\"sizeKB\":512"));
    assert!(json.contains("\"timeMs\":4000"));
    assert!(json.contains("\"bitrateKbps\":1048.6"));
}

#[test]
fn test_unknown_message_type_rejected() {
    let json = r#"{"type":"wrtc:renegotiate","data":{}}"#;
    assert!(serde_json::from_str::<SignalMessage>(json).is_err());
}

#[test]
fn test_malformed_json_rejected() {
    assert!(serde_json::from_str::<SignalMessage>("{not json").is_err());
}
