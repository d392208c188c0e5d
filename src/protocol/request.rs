//! Typed requests, one variant per script → host channel.
//!
//! `decode` is the only place payload fields are inspected. Anything it
//! rejects is dropped by the caller without a response.

use std::path::PathBuf;

use serde_json::{Map, Value};
use thiserror::Error;

use super::channel::Channel;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Open { path: String },
    Copy { text: String },
    Paste,
    GetEnv { name: String },
    Write { text: String },
    Arg {
        name: String,
        /// Strings or objects with a `key`; forwarded to the UI untouched
        options: Vec<Value>,
        hint: Option<String>,
    },
    Hide,
    Show,
    Error { error: String },
    ShowWidget { code: Option<String>, title: Option<String> },
    ShowDevtools { value: Option<Value> },
    UpdateWidget { id: String, content: String },
    UpdateErrorLoader { patch: Map<String, Value> },
    SetTabData { tabs: Vec<Value> },
    SetDivData { html: String },
    SwitchTab { tab: String },
    SetPreview { data: Option<String>, key: String },
    Drop,
    CloseWidget { widget_id: String },
    StartDrag { file: PathBuf },
    RunInEditor { file: String },
    Textarea { name: String },
    SendNotification { title: String, description: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Malformed {
    #[error("missing field '{0}'")]
    Missing(&'static str),
    #[error("field '{0}' has the wrong type")]
    WrongType(&'static str),
    #[error("{0} is only sent by the host")]
    HostOnly(Channel),
}

impl Request {
    pub fn channel(&self) -> Channel {
        match self {
            Request::Open { .. } => Channel::Open,
            Request::Copy { .. } => Channel::Copy,
            Request::Paste => Channel::Paste,
            Request::GetEnv { .. } => Channel::GetEnv,
            Request::Write { .. } => Channel::Write,
            Request::Arg { .. } => Channel::Arg,
            Request::Hide => Channel::Hide,
            Request::Show => Channel::Show,
            Request::Error { .. } => Channel::Error,
            Request::ShowWidget { .. } => Channel::ShowWidget,
            Request::ShowDevtools { .. } => Channel::ShowDevtools,
            Request::UpdateWidget { .. } => Channel::UpdateWidget,
            Request::UpdateErrorLoader { .. } => Channel::UpdateErrorLoader,
            Request::SetTabData { .. } => Channel::SetTabData,
            Request::SetDivData { .. } => Channel::SetDivData,
            Request::SwitchTab { .. } => Channel::SwitchTab,
            Request::SetPreview { .. } => Channel::SetPreview,
            Request::Drop => Channel::Drop,
            Request::CloseWidget { .. } => Channel::CloseWidget,
            Request::StartDrag { .. } => Channel::StartDrag,
            Request::RunInEditor { .. } => Channel::RunInEditor,
            Request::Textarea { .. } => Channel::Textarea,
            Request::SendNotification { .. } => Channel::SendNotification,
        }
    }
}

/// Turn a channel + payload into a `Request`.
pub fn decode(channel: Channel, p: &Map<String, Value>) -> Result<Request, Malformed> {
    let request = match channel {
        Channel::Open => Request::Open {
            path: string(p, "path")?,
        },
        Channel::Copy => Request::Copy {
            text: string(p, "string")?,
        },
        Channel::Paste => Request::Paste,
        Channel::GetEnv => {
            // older runtimes send `key`
            let name = match opt_string(p, "name")? {
                Some(name) => name,
                None => string(p, "key").map_err(|_| Malformed::Missing("name"))?,
            };
            Request::GetEnv { name }
        }
        Channel::Write => Request::Write {
            text: string(p, "string")?,
        },
        Channel::Arg => Request::Arg {
            name: string(p, "name")?,
            options: match p.get("options") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(options)) => options.clone(),
                Some(_) => return Err(Malformed::WrongType("options")),
            },
            hint: opt_string(p, "hint")?,
        },
        Channel::Hide => Request::Hide,
        Channel::Show => Request::Show,
        Channel::Error => Request::Error {
            error: string(p, "error")?,
        },
        Channel::ShowWidget => Request::ShowWidget {
            code: opt_string(p, "code")?,
            title: opt_string(p, "title")?,
        },
        Channel::ShowDevtools => Request::ShowDevtools {
            value: p.get("value").filter(|v| !v.is_null()).cloned(),
        },
        Channel::UpdateWidget => Request::UpdateWidget {
            id: string(p, "id")?,
            content: string(p, "content")?,
        },
        Channel::UpdateErrorLoader => match p.get("data") {
            Some(Value::Object(patch)) => Request::UpdateErrorLoader {
                patch: patch.clone(),
            },
            Some(_) => return Err(Malformed::WrongType("data")),
            None => return Err(Malformed::Missing("data")),
        },
        Channel::SetTabData => match p.get("tabs") {
            Some(Value::Array(tabs)) => Request::SetTabData { tabs: tabs.clone() },
            Some(_) => return Err(Malformed::WrongType("tabs")),
            None => return Err(Malformed::Missing("tabs")),
        },
        Channel::SetDivData => Request::SetDivData {
            html: string(p, "data")?,
        },
        Channel::SwitchTab => Request::SwitchTab {
            tab: string(p, "tab")?,
        },
        Channel::SetPreview => Request::SetPreview {
            data: opt_string(p, "data")?,
            key: string(p, "key")?,
        },
        Channel::Drop => Request::Drop,
        Channel::CloseWidget => Request::CloseWidget {
            widget_id: string(p, "widgetId")?,
        },
        Channel::StartDrag => {
            let file = string(p, "file")?;
            Request::StartDrag {
                file: PathBuf::from(shellexpand::tilde(&file).as_ref()),
            }
        }
        Channel::RunInEditor => Request::RunInEditor {
            file: string(p, "file")?,
        },
        Channel::Textarea => Request::Textarea {
            name: string(p, "name")?,
        },
        Channel::SendNotification => Request::SendNotification {
            title: string(p, "title")?,
            description: opt_string(p, "description")?,
        },
        Channel::OnTab | Channel::GetPreview | Channel::OnEvent => {
            return Err(Malformed::HostOnly(channel))
        }
    };
    Ok(request)
}

/// True if `value` selects `option`: equal to a plain option, or equal to
/// an object option's `key`.
pub fn option_matches(option: &Value, value: &str) -> bool {
    match option {
        Value::String(s) => s == value,
        Value::Object(o) => o.get("key").and_then(Value::as_str) == Some(value),
        Value::Number(n) => n.to_string() == value,
        _ => false,
    }
}

fn string(p: &Map<String, Value>, field: &'static str) -> Result<String, Malformed> {
    match p.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(Malformed::Missing(field)),
        Some(_) => Err(Malformed::WrongType(field)),
    }
}

/// Absent and `null` both read as `None`; JSON has no `undefined`.
fn opt_string(p: &Map<String, Value>, field: &'static str) -> Result<Option<String>, Malformed> {
    match p.get(field) {
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(Malformed::WrongType(field)),
    }
}
