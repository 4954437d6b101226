//! Per repository+branch ordering of publish pointer updates.
//!
//! Every accepted notification draws a ticket for its publish key. Builds for
//! the same key run one at a time, and a build whose ticket is older than the
//! last one that published is skipped instead of rolling the pointer back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

#[derive(Debug, Default)]
struct KeyState {
    accepted: AtomicU64,
    /// Sequence of the last ticket that published.
    published: AsyncMutex<u64>,
}

#[derive(Debug, Default)]
pub struct PublishGate {
    keys: Mutex<HashMap<String, Arc<KeyState>>>,
}

impl PublishGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the next ticket for `key`, in acceptance order.
    ///
    /// Keys with no outstanding ticket are dropped first. Such a key has
    /// nothing left to supersede, so its history can start over.
    pub fn ticket(&self, key: &str) -> PublishTicket {
        let state = {
            let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
            // tickets are only minted under this lock
            keys.retain(|_, state| Arc::strong_count(state) > 1);
            Arc::clone(keys.entry(key.to_string()).or_default())
        };
        let sequence = state.accepted.fetch_add(1, Ordering::SeqCst) + 1;
        PublishTicket {
            key: key.to_string(),
            sequence,
            state,
        }
    }
}

#[derive(Debug)]
pub struct PublishTicket {
    key: String,
    sequence: u64,
    state: Arc<KeyState>,
}

impl PublishTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits until no other build for the same key holds the pointer.
    pub async fn acquire(&self) -> PublishPermit<'_> {
        PublishPermit {
            published: self.state.published.lock().await,
            sequence: self.sequence,
        }
    }
}

pub struct PublishPermit<'a> {
    published: MutexGuard<'a, u64>,
    sequence: u64,
}

impl PublishPermit<'_> {
    /// True when a later notification for this key has already published.
    pub fn is_superseded(&self) -> bool {
        *self.published > self.sequence
    }

    /// Records this ticket as the latest publish and releases the key.
    pub fn commit(mut self) {
        *self.published = self.sequence;
    }
}
