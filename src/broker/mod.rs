//! Capability Broker
//!
//! A dispatch table keyed by channel. Each decoded [`Request`] is validated
//! by `protocol::decode`, then either performed host-side (clipboard,
//! opener, notifications, env store) or forwarded to the presentation
//! layer as a [`HostEvent`]. Requests that expect an answer get a
//! [`Responder`] that echoes the originating pid and channel.
//!
//! Prompt-taking requests (ARG, GET_ENV without a stored value) wait on
//! their own thread so the process's message loop keeps draining.

mod effects;
mod preview;
mod prompt;
mod widgets;

use std::fs;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::Duration;

use base64::Engine;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::AppConfigStore;
use crate::env_store::EnvStore;
use crate::error::{is_user_exit, HostError, PromptError, Result, ResultExt};
use crate::executor::MessagePort;
use crate::logging;
use crate::process_manager::ProcessRegistry;
use crate::protocol::{decode, outbound, Channel, Envelope, Request};
use crate::ui::{HostEvent, UiSink};

pub use effects::{Desktop, SystemDesktop};
pub use preview::{PreviewBroker, PreviewOutcome, PreviewRequest};
pub use prompt::{PromptCoordinator, PromptResult, PromptTicket};
pub use widgets::{Widget, WidgetRegistry};

#[cfg(test)]
pub use effects::fake;

/// `scheme:` prefix means OPEN treats the target as a URL
static URL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]+:").expect("Invalid regex"));

pub fn is_url(target: &str) -> bool {
    URL_SCHEME.is_match(target)
}

/// Sends exactly one response back on the requesting process's channel.
pub struct Responder {
    pid: u32,
    channel: Channel,
    port: Arc<dyn MessagePort>,
}

impl Responder {
    pub fn new(pid: u32, channel: Channel, port: Arc<dyn MessagePort>) -> Self {
        Self { pid, channel, port }
    }

    pub fn respond(self, data: Map<String, Value>) {
        if let Err(e) = self.port.send(&outbound(self.pid, self.channel, data)) {
            warn!(pid = self.pid, channel = %self.channel, error = %e, "Failed to send response");
        }
    }

    /// `{value}`; `None` leaves `value` out (undefined on the script side)
    pub fn respond_value(self, value: Option<Value>) {
        let mut data = Map::new();
        if let Some(value) = value {
            data.insert("value".to_string(), value);
        }
        self.respond(data)
    }

    pub fn respond_error(self, error: PromptError) {
        let mut data = Map::new();
        data.insert("error".to_string(), Value::String(error.to_string()));
        self.respond(data)
    }
}

/// Everything the broker needs from the rest of the host
pub struct BrokerDeps {
    pub ui: Arc<dyn UiSink>,
    pub desktop: Arc<dyn Desktop>,
    pub env: Arc<EnvStore>,
    pub app_config: Arc<AppConfigStore>,
    pub registry: Arc<ProcessRegistry>,
    pub default_editor: String,
    pub preview_timeout: Duration,
}

pub struct Broker {
    ui: Arc<dyn UiSink>,
    desktop: Arc<dyn Desktop>,
    env: Arc<EnvStore>,
    app_config: Arc<AppConfigStore>,
    registry: Arc<ProcessRegistry>,
    prompts: Arc<PromptCoordinator>,
    widgets: WidgetRegistry,
    previews: PreviewBroker,
    default_editor: String,
    preview_timeout: Duration,
}

impl Broker {
    pub fn new(deps: BrokerDeps) -> Self {
        Self {
            prompts: Arc::new(PromptCoordinator::new(Arc::clone(&deps.ui))),
            ui: deps.ui,
            desktop: deps.desktop,
            env: deps.env,
            app_config: deps.app_config,
            registry: deps.registry,
            widgets: WidgetRegistry::new(),
            previews: PreviewBroker::new(),
            default_editor: deps.default_editor,
            preview_timeout: deps.preview_timeout,
        }
    }

    pub fn prompts(&self) -> &Arc<PromptCoordinator> {
        &self.prompts
    }

    pub fn widgets(&self) -> &WidgetRegistry {
        &self.widgets
    }

    pub fn previews(&self) -> &PreviewBroker {
        &self.previews
    }

    /// Decode one inbound message from process `origin` and handle it.
    ///
    /// Returns false when the payload was malformed and dropped.
    pub fn dispatch(&self, origin: u32, envelope: &Envelope, port: &Arc<dyn MessagePort>) -> bool {
        match decode(envelope.channel, &envelope.payload) {
            Ok(request) => {
                self.handle(origin, request, Responder::new(origin, envelope.channel, Arc::clone(port)));
                true
            }
            Err(reason) => {
                debug!(pid = origin, channel = %envelope.channel, reason = %reason, "Dropping malformed request");
                false
            }
        }
    }

    pub fn handle(&self, pid: u32, request: Request, responder: Responder) {
        match request {
            Request::Open { path } => {
                let result = if is_url(&path) {
                    self.desktop.open_url(&path)
                } else {
                    self.desktop.open_path(&path)
                };
                result.log_err();
            }
            Request::Copy { text } => {
                self.desktop.copy(&text).log_err();
            }
            Request::Paste => {
                let result = self
                    .desktop
                    .read_clipboard()
                    .and_then(|text| self.desktop.write_selection(&text));
                result.log_err();
            }
            Request::Write { text } => {
                self.desktop.write_selection(&text).log_err();
            }
            Request::GetEnv { name } => self.get_env(pid, name, responder),
            Request::Arg {
                name,
                options,
                hint,
            } => {
                let ticket = self.prompts.ask_for(pid, &name, options, hint);
                spawn_prompt_waiter(pid, move || match ticket.wait() {
                    Ok(value) => responder.respond_value(Some(Value::String(value))),
                    // a declined prompt answers `{value: undefined}`
                    Err(PromptError::UserExited) => responder.respond_value(None),
                    Err(e) => responder.respond_error(e),
                });
            }
            Request::Hide => self.ui.emit(HostEvent::Hide),
            Request::Show => self.ui.emit(HostEvent::Show),
            Request::Error { error } => {
                if is_user_exit(&error) {
                    debug!(pid, "Suppressing user-exit error report");
                    return;
                }
                let name = self.registry.display_name(pid).unwrap_or_default();
                logging::log_error("SCRIPT", &error, Some(&name));
                self.ui.emit(HostEvent::DisplayError { name, error });
            }
            Request::ShowWidget { code, title } => {
                let Some(code) = code else {
                    responder.respond_value(None);
                    return;
                };
                let widget = self.widgets.create(pid, title.as_deref().unwrap_or(""), &code);
                info!(pid, widget_id = %widget.id, "Widget created");
                self.ui.emit(HostEvent::WidgetOpen {
                    id: widget.id.clone(),
                    title,
                    html: widget.html,
                });
                responder.respond_value(Some(Value::String(widget.id)));
            }
            Request::ShowDevtools { value } => self.ui.emit(HostEvent::Devtools { value }),
            Request::UpdateWidget { id, content } => {
                if self.widgets.update(&id, &content) {
                    self.ui.emit(HostEvent::WidgetUpdate { id, html: content });
                } else {
                    debug!(widget_id = %id, "UPDATE_WIDGET for unknown widget");
                }
            }
            Request::UpdateErrorLoader { patch } => {
                self.ui.emit(HostEvent::Show);
                self.ui.emit(HostEvent::LoaderUpdate { patch });
            }
            Request::SetTabData { tabs } => {
                self.ui.emit(HostEvent::Show);
                self.ui.emit(HostEvent::UserTabsSet { tabs });
            }
            Request::SetDivData { html } => {
                self.ui.emit(HostEvent::Show);
                self.ui.emit(HostEvent::SetUserWindowCode { html });
                self.prompts.invalidate();
            }
            Request::SwitchTab { tab } => self.ui.emit(HostEvent::SwitchTab { name: tab }),
            Request::SetPreview { data, key } => {
                self.previews.fulfill(&key, data.clone());
                self.ui.emit(HostEvent::SetPreview { data, key });
            }
            Request::Drop => self.ui.emit(HostEvent::Drop),
            Request::CloseWidget { widget_id } => {
                if self.widgets.remove(&widget_id).is_some() {
                    self.ui.emit(HostEvent::WidgetClose { id: widget_id });
                }
            }
            Request::StartDrag { file } => self.ui.emit(HostEvent::StartDrag { file }),
            Request::RunInEditor { file } => {
                let editor = self
                    .app_config
                    .get_string("editor")
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| self.default_editor.clone());
                self.desktop.launch_editor(&editor, &file).log_err();
            }
            Request::Textarea { name } => self.ui.emit(HostEvent::Textarea { name }),
            Request::SendNotification { title, description } => {
                self.desktop.notify(&title, description.as_deref()).log_err();
            }
        }
    }

    fn get_env(&self, pid: u32, name: String, responder: Responder) {
        match self.env.get(&name).log_err().flatten() {
            Some(value) => responder.respond_value(Some(Value::String(value))),
            None => {
                let prompt = format!("Environment: {}", name);
                let ticket = self.prompts.ask_for(pid, &prompt, Vec::new(), None);
                let env = Arc::clone(&self.env);
                spawn_prompt_waiter(pid, move || match ticket.wait() {
                    Ok(value) => {
                        env.set(&name, &value).log_err();
                        responder.respond_value(Some(Value::String(value)));
                    }
                    Err(e) => {
                        debug!(pid, env = %name, reason = %e, "Env prompt not answered");
                        responder.respond_value(None);
                    }
                });
            }
        }
    }

    // Host-originated fan-out to every live process

    pub fn select_tab(&self, tab: &str) -> usize {
        let mut data = Map::new();
        data.insert("tab".to_string(), Value::String(tab.to_string()));
        self.registry.broadcast(Channel::OnTab, &data)
    }

    /// Ask live scripts for the preview of `key`; blocks up to the preview
    /// timeout. On timeout the presentation layer gets an empty preview.
    pub fn request_preview(&self, key: &str) -> PreviewOutcome {
        let request = self.previews.request(key);
        let mut data = Map::new();
        data.insert("key".to_string(), Value::String(key.to_string()));
        self.registry.broadcast(Channel::GetPreview, &data);

        let outcome = self.previews.wait(request, self.preview_timeout);
        if outcome.timed_out {
            self.ui.emit(HostEvent::SetPreview {
                data: None,
                key: outcome.key.clone(),
            });
        }
        outcome
    }

    /// Read a dropped file and deliver it to every live process.
    pub fn drop_file(&self, path: &Path) -> Result<usize> {
        let bytes = fs::read(path).map_err(|e| HostError::io(path, e))?;
        let name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut data = Map::new();
        data.insert(
            "file".to_string(),
            json!({
                "path": path.display().to_string(),
                "name": name,
                "size": bytes.len(),
                "data": base64::engine::general_purpose::STANDARD.encode(&bytes),
            }),
        );
        let delivered = self.registry.broadcast(Channel::Drop, &data);
        self.ui.emit(HostEvent::DropEnd);
        Ok(delivered)
    }

    /// Forward a DOM-style event captured in a widget
    pub fn widget_event(&self, event: &str, args: Vec<Value>, widget_id: Option<String>) -> usize {
        let mut data = Map::new();
        data.insert("event".to_string(), Value::String(event.to_string()));
        data.insert("args".to_string(), Value::Array(args));
        if let Some(id) = widget_id {
            data.insert("widgetId".to_string(), Value::String(id));
        }
        self.registry.broadcast(Channel::OnEvent, &data)
    }

    /// Deliver the full-screen editor's text (`None` = cancelled)
    pub fn textarea_submit(&self, value: Option<String>) -> usize {
        let mut data = Map::new();
        if let Some(value) = value {
            data.insert("value".to_string(), Value::String(value));
        }
        self.registry.broadcast(Channel::Textarea, &data)
    }
}

fn spawn_prompt_waiter(pid: u32, wait: impl FnOnce() + Send + 'static) {
    let spawned = thread::Builder::new()
        .name(format!("prompt-{}", pid))
        .spawn(wait);
    if let Err(e) = spawned {
        logging::log_error("BROKER", &e.to_string(), Some("spawning prompt waiter"));
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
