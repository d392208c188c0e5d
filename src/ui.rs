//! Host → presentation-layer events.
//!
//! The presentation layer is an external collaborator; it only sees
//! `HostEvent`s through a `UiSink`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::scripts::ScriptInfo;

/// Serialized as `{"event": "<kebab-name>", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HostEvent {
    ProcExit {
        pid: u32,
    },
    UserTabsSet {
        tabs: Vec<Value>,
    },
    LoaderUpdate {
        patch: Map<String, Value>,
    },
    ArgEnd,
    ArgOpen {
        name: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        options: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    DisplayError {
        name: String,
        error: String,
    },
    SetUserWindowCode {
        html: String,
    },
    SwitchTab {
        name: String,
    },
    Drop,
    DropEnd,
    ScriptChange {
        scripts: Vec<ScriptInfo>,
    },
    ColorChange {
        scheme: Value,
    },
    FontChange {
        font: String,
    },
    ShortcutChange {
        shortcut: String,
    },
    SetPreview {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        key: String,
    },
    Show,
    Hide,
    Textarea {
        name: String,
    },
    Devtools {
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    WidgetOpen {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        html: String,
    },
    WidgetUpdate {
        id: String,
        html: String,
    },
    WidgetClose {
        id: String,
    },
    StartDrag {
        file: PathBuf,
    },
    Procs {
        procs: BTreeMap<u32, String>,
    },
    ScriptSource {
        file: String,
        source: String,
    },
    Logs {
        lines: Vec<String>,
    },
}

impl HostEvent {
    /// The four events every terminated process produces
    pub fn reset_after_exit(pid: u32) -> [HostEvent; 4] {
        let mut loader = Map::new();
        loader.insert("open".to_string(), Value::Bool(false));
        [
            HostEvent::ProcExit { pid },
            HostEvent::UserTabsSet { tabs: Vec::new() },
            HostEvent::LoaderUpdate { patch: loader },
            HostEvent::ArgEnd,
        ]
    }
}

pub trait UiSink: Send + Sync {
    fn emit(&self, event: HostEvent);
}

/// Forwards events into a channel, e.g. for the stdout writer thread.
pub struct ChannelSink {
    tx: async_channel::Sender<HostEvent>,
}

impl ChannelSink {
    pub fn new(tx: async_channel::Sender<HostEvent>) -> Self {
        Self { tx }
    }
}

impl UiSink for ChannelSink {
    fn emit(&self, event: HostEvent) {
        if self.tx.send_blocking(event).is_err() {
            tracing::warn!("UI event channel closed, dropping event");
        }
    }
}
