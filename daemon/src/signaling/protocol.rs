// protocol.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! JSON message types carried over the signaling channel.
//!
//! Setup messages negotiate the peer connection (`wrtc:*`); once an AV
//! session runs, encoder stats flow back as `av:stats`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::encoder::EncoderStats;
use crate::error::Result;
use crate::transport::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalMessage {
    #[serde(rename = "wrtc:offer")]
    Offer { offer: SessionDescription },

    #[serde(rename = "wrtc:answer")]
    Answer { answer: SessionDescription },

    #[serde(rename = "wrtc:ice")]
    Ice { candidate: IceCandidate },

    /// Server to client only
    #[serde(rename = "av:stats")]
    Stats { data: Value },
}

impl SignalMessage {
    pub fn answer(answer: SessionDescription) -> Self {
        SignalMessage::Answer { answer }
    }

    pub fn ice(candidate: IceCandidate) -> Self {
        SignalMessage::Ice { candidate }
    }

    pub fn stats(stats: &EncoderStats) -> Result<Self> {
        Ok(SignalMessage::Stats {
            data: serde_json::to_value(stats)?,
        })
    }
}
