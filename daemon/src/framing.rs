// framing.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! Wire packet codec for the data channel.
//!
//! Every message is one unsigned header byte followed by an opaque payload.
//! There are no checksums and no sequence numbers; integrity and ordering
//! are delegated to the transport. Payloads larger than the packet ceiling
//! are split into multiple packets sharing the same header, and each
//! arrival is treated as an independent chunk by the receiver.

use bytes::{BufMut, Bytes, BytesMut};

/// Default maximum size of a framed packet, header byte included.
/// The underlying datagram transport cannot fragment larger messages.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 300 * 1024;

/// Closed set of packet headers understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// Client requests a new AV session; payload is a JSON `StreamConfig`.
    SessionStart = 0x10,
    /// Server signals the encoder accepts data; empty payload.
    AvReady = 0x34,
    /// Server signals the session could not start or died; empty payload.
    SessionStartError = 0x35,
    /// Server signals the chunk-arrival watchdog expired; empty payload.
    ChunkWaitTimeout = 0x36,
    /// Opaque slice of the client's media container stream.
    AvChunk = 0x41,
    /// Client ends the AV session; empty payload.
    SessionEnd = 0x84,
}

impl Header {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x10 => Some(Header::SessionStart),
            0x34 => Some(Header::AvReady),
            0x35 => Some(Header::SessionStartError),
            0x36 => Some(Header::ChunkWaitTimeout),
            0x41 => Some(Header::AvChunk),
            0x84 => Some(Header::SessionEnd),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// A decoded wire packet. The header byte is kept raw so that routing can
/// log and drop unknown values without the codec rejecting them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: u8,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// Received datagram carried no header byte.
    Empty,
    /// Received or produced datagram would exceed the packet ceiling.
    Oversize(usize),
}

impl std::fmt::Display for FramingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingError::Empty => write!(f, "empty packet"),
            FramingError::Oversize(len) => write!(f, "oversize packet: {} bytes", len),
        }
    }
}

impl std::error::Error for FramingError {}

/// Frame a payload under one header, splitting into multiple packets of at
/// most `max_packet_size` bytes each when the payload does not fit. Order
/// is preserved; every produced packet carries the same header byte.
pub fn encode(header: Header, payload: &[u8], max_packet_size: usize) -> Vec<Bytes> {
    let chunk_size = max_packet_size.saturating_sub(1).max(1);

    if payload.is_empty() {
        let mut buf = BytesMut::with_capacity(1);
        buf.put_u8(header.byte());
        return vec![buf.freeze()];
    }

    payload
        .chunks(chunk_size)
        .map(|slice| {
            let mut buf = BytesMut::with_capacity(1 + slice.len());
            buf.put_u8(header.byte());
            buf.put_slice(slice);
            buf.freeze()
        })
        .collect()
}

/// Parse one received datagram. Rejects empty and oversize datagrams; the
/// caller logs and drops those without tearing the session down.
pub fn decode(data: Bytes, max_packet_size: usize) -> Result<Packet, FramingError> {
    if data.is_empty() {
        return Err(FramingError::Empty);
    }
    if data.len() > max_packet_size {
        return Err(FramingError::Oversize(data.len()));
    }

    let header = data[0];
    Ok(Packet {
        header,
        payload: data.slice(1..),
    })
}
