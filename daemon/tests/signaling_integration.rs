// signaling_integration.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the public wire contract: packet ceiling,
//! signaling buffer bounds and daemon defaults.

use std::time::Duration;

use bytes::Bytes;

use recast::config::ServerConfig;
use recast::framing::{self, Header, DEFAULT_MAX_PACKET_SIZE};
use recast::signaling::{CLIENT_MESSAGE_BUFFER, MAX_CONCURRENT_CLIENTS};

#[test]
fn test_default_packet_ceiling_is_300_kib() {
    assert_eq!(DEFAULT_MAX_PACKET_SIZE, 300 * 1024);
}

#[test]
fn test_client_message_buffer_is_bounded() {
    assert_eq!(
        CLIENT_MESSAGE_BUFFER, 256,
        "CLIENT_MESSAGE_BUFFER should be 256 to match the event channel buffer size"
    );
}

#[test]
fn test_max_concurrent_clients_is_reasonable() {
    assert_eq!(
        MAX_CONCURRENT_CLIENTS, 1000,
        "MAX_CONCURRENT_CLIENTS should be 1000"
    );
}

#[test]
fn test_server_defaults_match_wire_contract() {
    let config = ServerConfig::default();
    assert_eq!(config.port, 8080);
    assert_eq!(config.max_packet_size, 300 * 1024);
    assert_eq!(config.chunk_wait_timeout, Duration::from_secs(10));
    assert_eq!(config.chunk_wait_check_interval, Duration::from_secs(1));
    assert!(config.auth_key.is_empty());
    assert_eq!(config.ice_servers, vec!["stun:stun.l.google.com:19302"]);
}

#[test]
fn test_packet_roundtrip_at_ceiling() {
    // A packet of exactly the ceiling is accepted
    let payload = vec![0xAB; DEFAULT_MAX_PACKET_SIZE - 1];
    let packets = framing::encode(Header::AvChunk, &payload, DEFAULT_MAX_PACKET_SIZE);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].len(), DEFAULT_MAX_PACKET_SIZE);

    let decoded = framing::decode(packets[0].clone(), DEFAULT_MAX_PACKET_SIZE).unwrap();
    assert_eq!(decoded.header, Header::AvChunk.byte());
    assert_eq!(decoded.payload.len(), DEFAULT_MAX_PACKET_SIZE - 1);

    // One byte more is rejected
    let oversize = Bytes::from(vec![0xAB; DEFAULT_MAX_PACKET_SIZE + 1]);
    assert!(framing::decode(oversize, DEFAULT_MAX_PACKET_SIZE).is_err());
}

#[test]
fn test_large_payload_splits_into_chunk_sequence() {
    let payload = vec![0x01; DEFAULT_MAX_PACKET_SIZE * 2];
    let packets = framing::encode(Header::AvChunk, &payload, DEFAULT_MAX_PACKET_SIZE);

    assert!(packets.len() >= 3);
    let mut total = 0;
    for packet in &packets {
        assert!(packet.len() <= DEFAULT_MAX_PACKET_SIZE);
        assert_eq!(packet[0], Header::AvChunk.byte());
        total += packet.len() - 1;
    }
    assert_eq!(total, payload.len());
}
