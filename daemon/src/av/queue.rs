// queue.rs
//
// Copyright 2026 Stéphane Cerveau <scerveau@igalia.com>
//
// This file is part of Recast
//
// SPDX-License-Identifier: GPL-3.0-only

//! Bounded chunk queue between the packet-routing path and the pacing
//! worker that feeds the encoder stdin.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;

pub struct FrameQueue {
    inner: Mutex<VecDeque<Bytes>>,
    notify: Notify,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Append one chunk. At capacity the oldest chunk is evicted first;
    /// returns true when that happened so the caller can log it.
    pub fn push(&self, chunk: Bytes) -> bool {
        let dropped = {
            let mut queue = self.inner.lock().unwrap();
            let dropped = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(chunk);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Wait for and remove the oldest chunk.
    pub async fn pop(&self) -> Bytes {
        loop {
            let notified = self.notify.notified();
            if let Some(chunk) = self.try_pop() {
                return chunk;
            }
            notified.await;
        }
    }

    fn try_pop(&self) -> Option<Bytes> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}
