// stream_file.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! Demo peer: negotiates a data channel with a running recast-rs daemon
//! and streams a media file to it as AV chunks.
//!
//! Usage: stream_file <file.webm> [ws://127.0.0.1:8080?authKey=...]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

const SESSION_START: u8 = 0x10;
const AV_READY: u8 = 0x34;
const SESSION_START_ERROR: u8 = 0x35;
const CHUNK_WAIT_TIMEOUT: u8 = 0x36;
const AV_CHUNK: u8 = 0x41;
const SESSION_END: u8 = 0x84;

const CHUNK_SIZE: usize = 64 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let file = args.next().unwrap_or_else(|| {
        eprintln!("usage: stream_file <file.webm> [ws-url]");
        std::process::exit(1);
    });
    let url = args
        .next()
        .unwrap_or_else(|| "ws://127.0.0.1:8080".to_string());

    println!("Connecting to {}...", url);
    let (ws_stream, _) = connect_async(&url).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    println!("Connected!");

    // All outbound signaling goes through one channel
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let sender_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let api = APIBuilder::new().build();
    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            ..Default::default()
        }],
        ..Default::default()
    };
    let pc = Arc::new(api.new_peer_connection(config).await?);

    let dc = pc
        .create_data_channel(
            "av",
            Some(RTCDataChannelInit {
                ordered: Some(true),
                ..Default::default()
            }),
        )
        .await?;

    // Server responses arrive as single header bytes
    let (header_tx, mut header_rx) = mpsc::unbounded_channel::<u8>();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let header_tx = header_tx.clone();
        Box::pin(async move {
            if let Some(header) = msg.data.first() {
                let _ = header_tx.send(*header);
            }
        })
    }));

    let (open_tx, mut open_rx) = mpsc::unbounded_channel::<()>();
    dc.on_open(Box::new(move || {
        let open_tx = open_tx.clone();
        Box::pin(async move {
            let _ = open_tx.send(());
        })
    }));

    // Trickle our candidates to the server
    let ice_out = out_tx.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let ice_out = ice_out.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else { return };
            if let Ok(init) = candidate.to_json() {
                let msg = json!({
                    "type": "wrtc:ice",
                    "candidate": {"candidate": init.candidate, "mid": init.sdp_mid},
                });
                let _ = ice_out.send(msg.to_string());
            }
        })
    }));

    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer.clone()).await?;
    out_tx.send(
        json!({
            "type": "wrtc:offer",
            "offer": {"sdp": offer.sdp, "type": "offer"},
        })
        .to_string(),
    )?;

    // Answer, remote candidates and stats arrive over signaling
    let pc_signal = Arc::clone(&pc);
    let signal_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                continue;
            };
            match value.get("type").and_then(Value::as_str) {
                Some("wrtc:answer") => {
                    let sdp = value["answer"]["sdp"].as_str().unwrap_or_default();
                    match RTCSessionDescription::answer(sdp.to_string()) {
                        Ok(answer) => {
                            if let Err(e) = pc_signal.set_remote_description(answer).await {
                                eprintln!("Failed to set answer: {}", e);
                            }
                        }
                        Err(e) => eprintln!("Invalid answer SDP: {}", e),
                    }
                }
                Some("wrtc:ice") => {
                    let candidate = value["candidate"]["candidate"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    let mid = value["candidate"]["mid"].as_str().map(String::from);
                    let _ = pc_signal
                        .add_ice_candidate(RTCIceCandidateInit {
                            candidate,
                            sdp_mid: mid,
                            sdp_mline_index: None,
                            username_fragment: None,
                        })
                        .await;
                }
                Some("av:stats") => {
                    println!("[STATS] {}", value["data"]);
                }
                _ => {}
            }
        }
    });

    println!("Waiting for data channel...");
    open_rx.recv().await.ok_or("data channel never opened")?;
    println!("Data channel open, starting session");

    let session_config = json!({
        "processor": "ffmpeg",
        "destination": {"type": "file", "path": "out.mp4"},
        "encoder": {
            "video": {"codec": "libx264", "bitrate": 3000, "fps": 30},
            "audio": {"codec": "aac", "bitrate": 128000, "sampleRate": 44100}
        }
    });
    dc.send(&packet(SESSION_START, session_config.to_string().as_bytes()))
        .await?;

    match header_rx.recv().await {
        Some(AV_READY) => println!("Encoder ready, streaming {}", file),
        Some(SESSION_START_ERROR) => return Err("server reported a session start error".into()),
        other => return Err(format!("unexpected server response: {:?}", other).into()),
    }

    let data = tokio::fs::read(&file).await?;
    let mut sent = 0usize;
    for chunk in data.chunks(CHUNK_SIZE) {
        dc.send(&packet(AV_CHUNK, chunk)).await?;
        sent += 1;

        // Keep roughly real-time pacing and drain server notices
        if let Ok(header) = header_rx.try_recv() {
            if header == CHUNK_WAIT_TIMEOUT {
                return Err("server timed the session out".into());
            }
        }
        tokio::time::sleep(Duration::from_millis(33)).await;
    }
    println!("Sent {} chunks, ending session", sent);

    dc.send(&packet(SESSION_END, &[])).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    pc.close().await?;
    signal_task.abort();
    sender_task.abort();
    Ok(())
}

fn packet(header: u8, payload: &[u8]) -> Bytes {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(header);
    buf.extend_from_slice(payload);
    Bytes::from(buf)
}
