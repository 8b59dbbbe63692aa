// session.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! Per-client AV session: one encoder child, one paced frame queue, and
//! the watchdogs that tie their lifetimes together.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{
    StreamConfig, DEFAULT_CHUNK_WAIT_CHECK_INTERVAL_SECS, DEFAULT_CHUNK_WAIT_TIMEOUT_SECS,
};
use crate::encoder::{
    self, EncoderEvent, EncoderEventReceiver, EncoderEventSender, EncoderProcess, EncoderStats,
};
use crate::error::{RecastError, Result};

use super::{FrameQueue, FRAME_QUEUE_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Starting,
    Running,
    Stopping,
    Failed,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Init => write!(f, "init"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopping => write!(f, "stopping"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Events an AV session reports to its owning client session.
#[derive(Debug, Clone)]
pub enum AvEvent {
    Ready,
    Stats(EncoderStats),
    Timeout,
    StartError(String),
    RuntimeError(String),
    Closed,
}

pub type AvEventSender = mpsc::UnboundedSender<AvEvent>;
pub type AvEventReceiver = mpsc::UnboundedReceiver<AvEvent>;

pub fn create_event_channel() -> (AvEventSender, AvEventReceiver) {
    mpsc::unbounded_channel()
}

/// Builds the encoder adapter for a session; swapped out in tests.
pub type EncoderFactory =
    Arc<dyn Fn(&StreamConfig, EncoderEventSender) -> Box<dyn EncoderProcess> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct AvTimeouts {
    pub chunk_wait_timeout: Duration,
    pub chunk_wait_check_interval: Duration,
}

impl Default for AvTimeouts {
    fn default() -> Self {
        Self {
            chunk_wait_timeout: Duration::from_secs(DEFAULT_CHUNK_WAIT_TIMEOUT_SECS),
            chunk_wait_check_interval: Duration::from_secs(DEFAULT_CHUNK_WAIT_CHECK_INTERVAL_SECS),
        }
    }
}

pub struct AvSession {
    state_tx: watch::Sender<SessionState>,
    events: AvEventSender,
    timeouts: AvTimeouts,
    factory: EncoderFactory,
    queue: Arc<FrameQueue>,
    encoder: StdMutex<Option<Arc<dyn EncoderProcess>>>,
    last_chunk: Arc<StdMutex<Instant>>,
    cancel: CancellationToken,
    stop_lock: Mutex<()>,
}

impl AvSession {
    pub fn new(events: AvEventSender, timeouts: AvTimeouts) -> Self {
        Self::with_factory(
            events,
            timeouts,
            Arc::new(|cfg, enc_events| encoder::create(cfg, enc_events)),
        )
    }

    pub fn with_factory(
        events: AvEventSender,
        timeouts: AvTimeouts,
        factory: EncoderFactory,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Init);
        Self {
            state_tx,
            events,
            timeouts,
            factory,
            queue: Arc::new(FrameQueue::new(FRAME_QUEUE_CAPACITY)),
            encoder: StdMutex::new(None),
            last_chunk: Arc::new(StdMutex::new(Instant::now())),
            cancel: CancellationToken::new(),
            stop_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions; used by the owning session and tests.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Spawn the encoder and the session workers. Rejected when the
    /// session has already been started.
    pub async fn start(&self, cfg: &StreamConfig) -> Result<()> {
        if self.state() != SessionState::Init {
            return Err(RecastError::SessionAlreadyRunning);
        }
        self.state_tx.send_replace(SessionState::Starting);
        info!("Starting AV session ({} -> {:?})", cfg.processor, cfg.destination.kind);

        let (enc_tx, enc_rx) = encoder::create_event_channel();
        let enc: Arc<dyn EncoderProcess> = Arc::from((self.factory)(cfg, enc_tx));

        if let Err(e) = enc.start().await {
            warn!("Encoder start failed: {}", e);
            self.state_tx.send_replace(SessionState::Failed);
            let _ = self.events.send(AvEvent::StartError(e.to_string()));
            self.state_tx.send_replace(SessionState::Closed);
            let _ = self.events.send(AvEvent::Closed);
            return Err(e);
        }

        *self.encoder.lock().unwrap() = Some(Arc::clone(&enc));
        *self.last_chunk.lock().unwrap() = Instant::now();

        tokio::spawn(run_pacing_worker(
            Arc::clone(&self.queue),
            Arc::clone(&enc),
            cfg.frame_interval(),
            self.cancel.clone(),
        ));
        tokio::spawn(run_chunk_watchdog(
            self.state_tx.clone(),
            self.events.clone(),
            Arc::clone(&self.last_chunk),
            self.timeouts,
            self.cancel.clone(),
        ));
        tokio::spawn(run_event_pump(
            self.state_tx.clone(),
            self.events.clone(),
            enc_rx,
            self.cancel.clone(),
        ));

        Ok(())
    }

    /// Enqueue one media chunk. Fails when the session is not accepting
    /// data so the owner can report a start error to the peer.
    pub fn put(&self, chunk: Bytes) -> Result<()> {
        if !matches!(self.state(), SessionState::Starting | SessionState::Running) {
            return Err(RecastError::SessionNotRunning);
        }
        *self.last_chunk.lock().unwrap() = Instant::now();
        if self.queue.push(chunk) {
            warn!("Frame queue full, dropped oldest chunk (encoder backpressure)");
        }
        Ok(())
    }

    /// Cancel the workers, drop pending chunks and stop the encoder.
    /// Resolves once the child exit has been observed.
    pub async fn stop(&self) {
        let _guard = self.stop_lock.lock().await;

        let state = self.state();
        if state == SessionState::Closed {
            return;
        }
        if !matches!(state, SessionState::Init | SessionState::Failed) {
            self.state_tx.send_replace(SessionState::Stopping);
        }

        self.cancel.cancel();
        self.queue.clear();

        let enc = self.encoder.lock().unwrap().take();
        if let Some(enc) = enc {
            if let Err(e) = enc.stop().await {
                warn!("Encoder stop failed: {}", e);
            }
        }

        self.state_tx.send_replace(SessionState::Closed);
        let _ = self.events.send(AvEvent::Closed);
        debug!("AV session closed");
    }
}

impl Drop for AvSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Feed queued chunks to the encoder, keeping at least the frame interval
/// between consecutive writes. A late chunk is dispatched immediately.
async fn run_pacing_worker(
    queue: Arc<FrameQueue>,
    encoder: Arc<dyn EncoderProcess>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut last_write: Option<Instant> = None;
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = queue.pop() => chunk,
        };

        if let Some(prev) = last_write {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval - elapsed) => {}
                }
            }
        }

        if let Err(e) = encoder.write(&chunk).await {
            debug!("Pacing worker stopping: {}", e);
            break;
        }
        last_write = Some(Instant::now());
    }
}

/// Liveness check on chunk arrival. On expiry the session moves to
/// Stopping and the owner is told to notify the peer and tear down.
async fn run_chunk_watchdog(
    state_tx: watch::Sender<SessionState>,
    events: AvEventSender,
    last_chunk: Arc<StdMutex<Instant>>,
    timeouts: AvTimeouts,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(timeouts.chunk_wait_check_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !matches!(
            *state_tx.borrow(),
            SessionState::Starting | SessionState::Running
        ) {
            continue;
        }

        let idle = last_chunk.lock().unwrap().elapsed();
        if idle >= timeouts.chunk_wait_timeout {
            warn!("No chunk received for {:?}, timing out AV session", idle);
            state_tx.send_replace(SessionState::Stopping);
            let _ = events.send(AvEvent::Timeout);
            break;
        }
    }
}

/// Translate encoder events into session transitions.
async fn run_event_pump(
    state_tx: watch::Sender<SessionState>,
    events: AvEventSender,
    mut enc_rx: EncoderEventReceiver,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = enc_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            EncoderEvent::Ready => {
                if *state_tx.borrow() == SessionState::Starting {
                    state_tx.send_replace(SessionState::Running);
                    let _ = events.send(AvEvent::Ready);
                }
            }
            EncoderEvent::Stats(stats) => {
                let _ = events.send(AvEvent::Stats(stats));
            }
            EncoderEvent::Error { kind, detail } => {
                debug!("Encoder error ({:?}): {}", kind, detail);
                let state = *state_tx.borrow();
                match state {
                    SessionState::Starting => {
                        state_tx.send_replace(SessionState::Failed);
                        let _ = events.send(AvEvent::StartError(detail));
                    }
                    SessionState::Running => {
                        state_tx.send_replace(SessionState::Stopping);
                        let _ = events.send(AvEvent::RuntimeError(detail));
                    }
                    _ => {}
                }
            }
        }
    }
}
