// mod.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

pub mod client;
pub mod registry;

pub use client::ClientSession;
pub use registry::{
    create_event_channel, RegistryEvent, RegistryEventReceiver, RegistryEventSender,
    SessionRegistry,
};

#[cfg(test)]
mod client_tests;
