//! The host's single pending prompt.
//!
//! At most one prompt waits for the presentation layer at a time. Asking a
//! new one, or replacing the UI, cancels the waiting one with
//! [`PromptError::UiChanged`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::error::PromptError;
use crate::protocol::option_matches;
use crate::ui::{HostEvent, UiSink};

pub type PromptResult = Result<String, PromptError>;

struct Pending {
    id: u64,
    /// Script pid the prompt was asked for; `None` for host prompts
    owner: Option<u32>,
    options: Vec<Value>,
    tx: mpsc::Sender<PromptResult>,
}

/// Receiving end handed to whoever asked
pub struct PromptTicket {
    id: u64,
    rx: mpsc::Receiver<PromptResult>,
}

impl PromptTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until answered or cancelled
    pub fn wait(self) -> PromptResult {
        // sender dropped without an answer: the coordinator went away
        self.rx.recv().unwrap_or(Err(PromptError::UiChanged))
    }
}

pub struct PromptCoordinator {
    ui: Arc<dyn UiSink>,
    pending: Mutex<Option<Pending>>,
    next_id: AtomicU64,
}

impl PromptCoordinator {
    pub fn new(ui: Arc<dyn UiSink>) -> Self {
        Self {
            ui,
            pending: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Show the host, cancel any waiting prompt and open a new one.
    pub fn ask(&self, name: &str, options: Vec<Value>, hint: Option<String>) -> PromptTicket {
        self.open(None, name, options, hint)
    }

    /// `ask` on behalf of the script `pid`
    pub fn ask_for(
        &self,
        pid: u32,
        name: &str,
        options: Vec<Value>,
        hint: Option<String>,
    ) -> PromptTicket {
        self.open(Some(pid), name, options, hint)
    }

    fn open(
        &self,
        owner: Option<u32>,
        name: &str,
        options: Vec<Value>,
        hint: Option<String>,
    ) -> PromptTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();

        self.ui.emit(HostEvent::Show);
        {
            let mut pending = self.pending.lock();
            if let Some(previous) = pending.take() {
                debug!(prompt_id = previous.id, "Prompt replaced by a new prompt");
                let _ = previous.tx.send(Err(PromptError::UiChanged));
            }
            *pending = Some(Pending {
                id,
                owner,
                options: options.clone(),
                tx,
            });
        }
        self.ui.emit(HostEvent::ArgOpen {
            name: name.to_string(),
            options,
            hint,
        });

        PromptTicket { id, rx }
    }

    /// Cancel the waiting prompt, if any. Fires at most once per prompt.
    pub fn invalidate(&self) -> bool {
        match self.pending.lock().take() {
            Some(previous) => {
                debug!(prompt_id = previous.id, "Prompt invalidated by UI change");
                let _ = previous.tx.send(Err(PromptError::UiChanged));
                true
            }
            None => false,
        }
    }

    /// Cancel the waiting prompt only if `pid` asked it (the script exited).
    pub fn invalidate_owned_by(&self, pid: u32) -> bool {
        let mut pending = self.pending.lock();
        if pending.as_ref().and_then(|p| p.owner) != Some(pid) {
            return false;
        }
        match pending.take() {
            Some(previous) => {
                debug!(prompt_id = previous.id, pid, "Prompt dropped with its script");
                let _ = previous.tx.send(Err(PromptError::UiChanged));
                true
            }
            None => false,
        }
    }

    /// Answer the waiting prompt. `None`, an empty string, or a value that
    /// isn't one of the prompt's options count as the user exiting.
    ///
    /// Returns false when nothing was waiting.
    pub fn respond(&self, value: Option<String>) -> bool {
        let Some(pending) = self.pending.lock().take() else {
            debug!("Prompt response with no prompt waiting");
            return false;
        };

        let result = match value {
            None => Err(PromptError::UserExited),
            Some(v) if v.is_empty() => Err(PromptError::UserExited),
            Some(v)
                if !pending.options.is_empty()
                    && !pending.options.iter().any(|o| option_matches(o, &v)) =>
            {
                debug!(prompt_id = pending.id, value = %v, "Response not among prompt options");
                Err(PromptError::UserExited)
            }
            Some(v) => Ok(v),
        };
        let _ = pending.tx.send(result);
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}
