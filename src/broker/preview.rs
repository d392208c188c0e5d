//! Autocomplete preview requests waiting for a script's SET_PREVIEW.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

struct Waiter {
    key: String,
    tx: mpsc::Sender<Option<String>>,
}

pub struct PreviewRequest {
    id: u64,
    key: String,
    rx: mpsc::Receiver<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewOutcome {
    pub key: String,
    pub data: Option<String>,
    pub timed_out: bool,
}

#[derive(Default)]
pub struct PreviewBroker {
    waiters: Mutex<HashMap<u64, Waiter>>,
    next_id: AtomicU64,
}

impl PreviewBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next preview for `key`
    pub fn request(&self, key: &str) -> PreviewRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.waiters.lock().insert(
            id,
            Waiter {
                key: key.to_string(),
                tx,
            },
        );
        PreviewRequest {
            id,
            key: key.to_string(),
            rx,
        }
    }

    /// Resolve every waiter for `key`; returns how many were waiting.
    pub fn fulfill(&self, key: &str, data: Option<String>) -> usize {
        let mut waiters = self.waiters.lock();
        let ids: Vec<u64> = waiters
            .iter()
            .filter(|(_, w)| w.key == key)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(waiter) = waiters.remove(id) {
                let _ = waiter.tx.send(data.clone());
            }
        }
        ids.len()
    }

    /// Block until fulfilled or `timeout`; a timed-out waiter is detached so a
    /// late reply no longer reaches it.
    pub fn wait(&self, request: PreviewRequest, timeout: Duration) -> PreviewOutcome {
        match request.rx.recv_timeout(timeout) {
            Ok(data) => PreviewOutcome {
                key: request.key,
                data,
                timed_out: false,
            },
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                let detached = self.waiters.lock().remove(&request.id).is_some();
                if !detached {
                    // fulfilled between the timeout and the removal
                    if let Ok(data) = request.rx.try_recv() {
                        return PreviewOutcome {
                            key: request.key,
                            data,
                            timed_out: false,
                        };
                    }
                }
                debug!(key = %request.key, "Preview request timed out");
                PreviewOutcome {
                    key: request.key,
                    data: None,
                    timed_out: true,
                }
            }
        }
    }

    pub fn waiting(&self) -> usize {
        self.waiters.lock().len()
    }
}
