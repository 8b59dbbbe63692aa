// main.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use recast::config::{
    ServerConfig, DEFAULT_BIND_ADDRESS, DEFAULT_CHUNK_WAIT_CHECK_INTERVAL_SECS,
    DEFAULT_CHUNK_WAIT_TIMEOUT_SECS, DEFAULT_ICE_SERVER, DEFAULT_PORT,
};
use recast::framing::DEFAULT_MAX_PACKET_SIZE;
use recast::session::{create_event_channel, RegistryEvent, SessionRegistry};
use recast::signaling::SignalingServer;
use recast::transport::WebRtcConnector;

#[derive(Parser, Debug)]
#[command(name = "recast-rs")]
#[command(author = "Stéphane Cerveau")]
#[command(version)]
#[command(about = "Recast - WebRTC AV ingest and re-encoding daemon")]
struct Args {
    /// Signaling port
    #[arg(short = 'P', long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Bind address for the signaling server
    #[arg(short, long, default_value = DEFAULT_BIND_ADDRESS)]
    bind: String,

    /// Auth key clients must present as ?authKey=...; empty accepts all
    #[arg(long, env = "AUTH_KEY", default_value = "")]
    auth_key: String,

    /// Maximum framed packet size in bytes
    #[arg(long, env = "MAX_PACKET_SIZE", default_value_t = DEFAULT_MAX_PACKET_SIZE)]
    max_packet_size: usize,

    /// Seconds without an AV chunk before a session is timed out
    #[arg(long, env = "CHUNK_WAIT_TIMEOUT", default_value_t = DEFAULT_CHUNK_WAIT_TIMEOUT_SECS)]
    chunk_wait_timeout: u64,

    /// Seconds between chunk-arrival watchdog checks
    #[arg(
        long,
        env = "CHUNK_WAIT_CHECK_INTERVAL",
        default_value_t = DEFAULT_CHUNK_WAIT_CHECK_INTERVAL_SECS
    )]
    chunk_wait_check_interval: u64,

    /// ICE server URL(s) handed to peer connections
    #[arg(long = "ice-server", env = "ICE_SERVERS", value_delimiter = ',')]
    ice_servers: Vec<String>,

    /// Verbose logging (any truthy value)
    #[arg(
        long,
        env = "DEBUG",
        value_parser = parse_truthy,
        default_value = "",
        default_missing_value = "1",
        num_args = 0..=1
    )]
    debug: bool,
}

fn parse_truthy(value: &str) -> Result<bool, String> {
    Ok(!value.is_empty()
        && !matches!(
            value.to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("recast={}", default_level).parse().unwrap())
                .add_directive(format!("recast_rs={}", default_level).parse().unwrap()),
        )
        .init();

    let ice_servers = if args.ice_servers.is_empty() {
        vec![DEFAULT_ICE_SERVER.to_string()]
    } else {
        args.ice_servers.clone()
    };

    let config = ServerConfig {
        bind: args.bind.clone(),
        port: args.port,
        auth_key: args.auth_key.clone(),
        max_packet_size: args.max_packet_size,
        chunk_wait_timeout: Duration::from_secs(args.chunk_wait_timeout),
        chunk_wait_check_interval: Duration::from_secs(args.chunk_wait_check_interval),
        ice_servers,
    };

    if !config.auth_key.is_empty() {
        info!("Signaling authentication enabled");
    }

    // Create event channel (receivers are created via event_tx.subscribe())
    let (event_tx, mut event_rx) = create_event_channel();

    let registry = Arc::new(SessionRegistry::new(event_tx));
    let connector = Arc::new(WebRtcConnector::new(config.ice_servers.clone()));

    // Log session lifecycle events
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(RegistryEvent::Connected { addr }) => {
                    info!("Client connected: {}", addr);
                }
                Ok(RegistryEvent::Disconnected { addr }) => {
                    info!("Client disconnected: {}", addr);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Registry event logger lagged by {} messages", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let server = SignalingServer::new(config, Arc::clone(&registry), connector);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Signaling server error: {}", e);
        }
    });

    info!("recast-rs started. Press Ctrl+C to stop.");

    // Register signal handlers before entering select! (registration is synchronous and fallible)
    #[cfg(unix)]
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C");
    }

    // Graceful shutdown
    info!("Shutting down...");

    registry.shutdown().await;
    server_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
