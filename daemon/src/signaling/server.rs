// server.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! WebSocket signaling server.
//!
//! Each accepted connection is authenticated against the configured key,
//! wrapped in a [`ClientSession`] and registered; inbound text frames are
//! parsed and handed to the session, which serializes all per-peer work.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::session::{ClientSession, SessionRegistry};
use crate::transport::PeerConnector;

use super::protocol::SignalMessage;
use super::{WsSignaling, CLIENT_MESSAGE_BUFFER, MAX_CONCURRENT_CLIENTS};

pub struct SignalingServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn PeerConnector>,
}

impl SignalingServer {
    pub fn new(
        config: ServerConfig,
        registry: Arc<SessionRegistry>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        Self {
            config,
            registry,
            connector,
        }
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Signaling server listening on ws://{}", addr);

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    if self.registry.count().await >= MAX_CONCURRENT_CLIENTS {
                        warn!(
                            "Max clients ({}) reached, rejecting connection from {}",
                            MAX_CONCURRENT_CLIENTS, peer_addr
                        );
                        continue;
                    }
                    let config = self.config.clone();
                    let registry = Arc::clone(&self.registry);
                    let connector = Arc::clone(&self.connector);
                    tokio::spawn(handle_connection(
                        stream, peer_addr, config, registry, connector,
                    ));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn PeerConnector>,
) {
    info!("New signaling connection from {}", addr);

    // The auth key travels as a query parameter on the upgrade request.
    let mut client_key: Option<String> = None;
    let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        client_key = query_param(req.uri().query(), "authKey");
        Ok(resp)
    };

    let mut ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    if !auth_ok(&config.auth_key, client_key.as_deref()) {
        warn!("Authentication failed for {}, closing (1002)", addr);
        let _ = ws_stream
            .close(Some(CloseFrame {
                code: CloseCode::Protocol,
                reason: "authentication failed".into(),
            }))
            .await;
        return;
    }

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(CLIENT_MESSAGE_BUFFER);

    // Forward queued outbound messages to the socket
    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let signaling = WsSignaling::new(tx.clone());
    let session = ClientSession::spawn(addr, config, signaling, connector);
    registry.insert(Arc::clone(&session)).await;

    let closed = session.cancel_token();

    loop {
        tokio::select! {
            // The session tears itself down when the peer transport dies
            _ = closed.cancelled() => break,
            msg = ws_receiver.next() => match msg {
                None => break,
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<SignalMessage>(text.as_str()) {
                        Ok(msg) => session.handle_signal(msg),
                        Err(e) => warn!("Malformed signaling message from {}: {}", addr, e),
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Client {} disconnected", addr);
                    break;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = tx.try_send(Message::Pong(data));
                }
                Some(Ok(_)) => {
                    debug!("Ignoring non-text message from {}", addr);
                }
                Some(Err(e)) => {
                    error!("Error receiving message from {}: {}", addr, e);
                    break;
                }
            }
        }
    }

    registry.remove(addr).await;
    sender_task.abort();
    info!("Connection closed for {}", addr);
}

fn auth_ok(server_key: &str, client_key: Option<&str>) -> bool {
    server_key.is_empty() || client_key == Some(server_key)
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
