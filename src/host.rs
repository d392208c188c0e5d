//! Wires the components together and routes commands between them.
//!
//! Every input (presentation layer, control endpoint, hotkeys, scheduler,
//! file watcher) becomes a [`HostCommand`] handled on one loop. Anything that
//! waits on a user or a child process runs on its own thread.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::appearance;
use crate::broker::{Broker, BrokerDeps, Desktop};
use crate::compile::{BuildCache, Compiler};
use crate::config::{AppConfigStore, HostConfig};
use crate::control_server::{ControlHandler, LaunchRequest};
use crate::env_store::EnvStore;
use crate::error::{HostError, ResultExt};
use crate::executor::Launcher;
use crate::gist::{GistFetcher, GistImporter, ImportOutcome};
use crate::hotkeys::{HotkeyBackend, HotkeyRegistry, HotkeyTarget};
use crate::logging;
use crate::orchestrator::Orchestrator;
use crate::process_manager::ProcessRegistry;
use crate::scheduler::{Scheduler, SchedulerEvent};
use crate::scripts::{self, ScriptStore, SyncReport};
use crate::setup::KitPaths;
use crate::triggers::TriggerRegistrar;
use crate::ui::{HostEvent, UiSink};
use crate::ui_bridge::{response_text, UiCommand};
use crate::watcher::WatchEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Ui(UiCommand),
    /// From the control endpoint or a `bin/` shim
    Launch(LaunchRequest),
    Hotkey(u32),
    Scheduled(PathBuf),
    Watch(WatchEvent),
    Resync,
    Shutdown,
}

/// The collaborators a host is built from
pub struct HostParts {
    pub paths: KitPaths,
    pub config: HostConfig,
    pub ui: Arc<dyn UiSink>,
    pub desktop: Arc<dyn Desktop>,
    pub compiler: Arc<dyn Compiler>,
    pub launcher: Arc<dyn Launcher>,
    pub hotkeys: Box<dyn HotkeyBackend>,
    pub gists: Arc<dyn GistFetcher>,
}

pub struct Host {
    paths: KitPaths,
    ui: Arc<dyn UiSink>,
    store: Arc<ScriptStore>,
    builds: Arc<BuildCache>,
    registry: Arc<ProcessRegistry>,
    broker: Arc<Broker>,
    orchestrator: Arc<Orchestrator>,
    triggers: Arc<TriggerRegistrar>,
    importer: Arc<GistImporter>,
    app_config: Arc<AppConfigStore>,
    schedule_events: Mutex<Option<Receiver<SchedulerEvent>>>,
}

impl Host {
    pub fn new(parts: HostParts) -> Self {
        let HostParts {
            paths,
            config,
            ui,
            desktop,
            compiler,
            launcher,
            hotkeys,
            gists,
        } = parts;

        let store = Arc::new(ScriptStore::new(paths.scripts_dir(), config.source_cache_ttl()));
        let builds = Arc::new(BuildCache::new(compiler, Arc::clone(&ui)));
        let registry = Arc::new(ProcessRegistry::new(paths.active_pids_file()));
        let app_config = Arc::new(AppConfigStore::new(paths.app_config_file()));

        let broker = Arc::new(Broker::new(BrokerDeps {
            ui: Arc::clone(&ui),
            desktop,
            env: Arc::new(EnvStore::new(paths.env_file())),
            app_config: Arc::clone(&app_config),
            registry: Arc::clone(&registry),
            default_editor: config.default_editor.clone(),
            preview_timeout: config.preview_timeout(),
        }));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&builds),
            Arc::clone(&registry),
            Arc::clone(&broker),
            launcher,
            Arc::clone(&ui),
        ));

        let (scheduler, schedule_events) = Scheduler::new(config.scheduler_check_interval());
        let triggers = Arc::new(TriggerRegistrar::new(
            Arc::clone(&store),
            HotkeyRegistry::new(hotkeys),
            scheduler,
        ));
        let importer = Arc::new(GistImporter::new(
            gists,
            Arc::clone(broker.prompts()),
            paths.scripts_dir(),
        ));

        Self {
            paths,
            ui,
            store,
            builds,
            registry,
            broker,
            orchestrator,
            triggers,
            importer,
            app_config,
            schedule_events: Mutex::new(Some(schedule_events)),
        }
    }

    pub fn store(&self) -> &Arc<ScriptStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn triggers(&self) -> &Arc<TriggerRegistrar> {
        &self.triggers
    }

    /// Kill leftovers from a previous session, load scripts, bind triggers.
    pub fn start(&self) {
        let orphans = self.registry.cleanup_orphans();
        if orphans > 0 {
            info!(count = orphans, "Killed orphaned script processes");
        }

        self.resync();

        let shortcut = appearance::read_shortcut(&self.paths);
        if let Err(e) = self.triggers.register_main(&shortcut) {
            logging::log_error("HOTKEY", &e.to_string(), Some("main shortcut"));
        }
        self.triggers.start_scheduler().log_err();
        info!(scripts = self.store.files().len(), "Host started");
    }

    /// Rescan scripts, rebuild what changed, refresh shims and triggers.
    ///
    /// `None` when a resync was already running.
    pub fn resync(&self) -> Option<SyncReport> {
        let report = self.store.sync()?;
        let scripts_dir = self.paths.scripts_dir();

        for removed in &report.removed {
            self.builds.forget(&scripts_dir.join(removed));
        }
        // builds run on workers; runs join an in-flight build through `wait_for`
        for file in report.needs_build() {
            self.builds.spawn_build(scripts_dir.join(file));
        }

        scripts::sync_bin_dir(&scripts_dir, &self.paths.bin_dir(), &self.paths.run_shim())
            .warn_on_err();
        scripts::remove_orphan_artifacts(&scripts_dir).warn_on_err();

        self.triggers.reload();
        self.ui.emit(HostEvent::ScriptChange {
            scripts: self.store.list(),
        });
        Some(report)
    }

    pub fn handle(&self, command: HostCommand) {
        match command {
            HostCommand::Ui(cmd) => self.handle_ui(cmd),
            HostCommand::Launch(request) => self.run_script(request.script, request.args),
            HostCommand::Hotkey(id) => match self.triggers.target_for(id) {
                Some(HotkeyTarget::Main) => self.ui.emit(HostEvent::Show),
                Some(HotkeyTarget::Script(path)) => self.run_path(&path),
                None => warn!(id, "Hotkey with no binding"),
            },
            HostCommand::Scheduled(path) => self.run_path(&path),
            HostCommand::Watch(event) => self.handle_watch(event),
            HostCommand::Resync => {
                self.resync();
            }
            HostCommand::Shutdown => self.shutdown(),
        }
    }

    fn handle_ui(&self, cmd: UiCommand) {
        match cmd {
            UiCommand::Respond { value } => {
                self.broker.prompts().respond(response_text(&value));
            }
            UiCommand::SelectTab { tab } => {
                self.broker.select_tab(&tab);
            }
            UiCommand::Preview { key } => {
                let broker = Arc::clone(&self.broker);
                spawn_named("preview", move || {
                    broker.request_preview(&key);
                });
            }
            UiCommand::DropFile { path } => {
                if let Err(e) = self.broker.drop_file(Path::new(&path)) {
                    self.surface("drop", &e);
                }
            }
            UiCommand::Event {
                event,
                args,
                widget_id,
            } => {
                self.broker.widget_event(&event, args, widget_id);
            }
            UiCommand::Textarea { value } => {
                self.broker.textarea_submit(value);
            }
            UiCommand::Run { script, args } => self.run_script(script, args),
            UiCommand::Kill { pid } => {
                self.orchestrator.kill(pid);
            }
            UiCommand::ListProcs => self.ui.emit(HostEvent::Procs {
                procs: self.registry.list(),
            }),
            UiCommand::ListScripts => self.ui.emit(HostEvent::ScriptChange {
                scripts: self.store.list(),
            }),
            UiCommand::GetScript { name } => match self.store.get(&name) {
                Some(file) => self.ui.emit(HostEvent::ScriptSource {
                    source: self.store.source(&file.info.file),
                    file: file.info.file,
                }),
                None => self.surface(&name, &HostError::UnknownScript(name.clone())),
            },
            UiCommand::GetLogs => self.ui.emit(HostEvent::Logs {
                lines: logging::get_recent_logs(),
            }),
            UiCommand::SetColorScheme { name } => {
                if let Err(e) = appearance::set_color_scheme(&self.paths, &name) {
                    self.surface(&name, &e);
                }
            }
            UiCommand::SetFont { font } => {
                if let Err(e) = appearance::set_font(&self.paths, &font) {
                    self.surface("font", &e);
                }
            }
            UiCommand::SetShortcut { shortcut } => {
                if let Err(e) = appearance::set_shortcut(&self.paths, &shortcut) {
                    self.surface("shortcut", &e);
                }
            }
            UiCommand::CreateScript { name } => {
                self.manage(&name, scripts::create(&self.paths.scripts_dir(), &name).map(|_| ()))
            }
            UiCommand::RemoveScript { name } => {
                self.manage(&name, scripts::remove(&self.paths.scripts_dir(), &name))
            }
            UiCommand::RenameScript { from, to } => self.manage(
                &from,
                scripts::rename(&self.paths.scripts_dir(), &from, &to).map(|_| ()),
            ),
            UiCommand::SetConfig { key, value } => {
                if let Err(e) = self.app_config.set(&key, value) {
                    self.surface(&key, &e);
                }
            }
            UiCommand::Quit => self.shutdown(),
        }
    }

    fn handle_watch(&self, event: WatchEvent) {
        match event {
            WatchEvent::ScriptsChanged(path) => {
                logging::log_debug("WATCH", &format!("Script changed: {}", path.display()));
                self.resync();
            }
            WatchEvent::ColorScheme => self.ui.emit(HostEvent::ColorChange {
                scheme: appearance::read_color_scheme(&self.paths),
            }),
            WatchEvent::Font => self.ui.emit(HostEvent::FontChange {
                font: appearance::read_font(&self.paths),
            }),
            WatchEvent::Shortcut => {
                let shortcut = appearance::read_shortcut(&self.paths);
                if let Err(e) = self.triggers.register_main(&shortcut) {
                    self.surface("shortcut", &e);
                }
                self.ui.emit(HostEvent::ShortcutChange { shortcut });
            }
        }
    }

    fn manage(&self, name: &str, result: crate::error::Result<()>) {
        match result {
            Ok(()) => {
                self.resync();
            }
            Err(e) => self.surface(name, &e),
        }
    }

    fn run_path(&self, path: &Path) {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(file) => self.run_script(file.to_string(), Vec::new()),
            None => warn!(path = %path.display(), "Trigger without a script file name"),
        }
    }

    /// Launch on a worker; a build in flight for the script is awaited there.
    fn run_script(&self, script: String, args: Vec<String>) {
        let orchestrator = Arc::clone(&self.orchestrator);
        spawn_named("run", move || {
            // errors are already surfaced as display-error
            let _ = orchestrator.spawn_run(&script, &args);
        });
    }

    fn surface(&self, name: &str, err: &HostError) {
        logging::log_error("HOST", &err.to_string(), Some(name));
        self.ui.emit(HostEvent::DisplayError {
            name: name.to_string(),
            error: err.user_message(),
        });
    }

    /// Forward scheduler firings into the command queue (once).
    pub fn forward_schedule(&self, commands: async_channel::Sender<HostCommand>) {
        let Some(events) = self.schedule_events.lock().take() else {
            return;
        };
        spawn_named("schedule-forward", move || {
            for event in events {
                let command = match event {
                    SchedulerEvent::RunScript(path) => HostCommand::Scheduled(path),
                    SchedulerEvent::Error(msg) => {
                        logging::log_error("SCHEDULE", &msg, None);
                        continue;
                    }
                };
                if commands.send_blocking(command).is_err() {
                    break;
                }
            }
        });
    }

    /// Bridge for the control endpoint: launches go through the command queue,
    /// gist imports run on the connection's thread.
    pub fn control_handler(&self, commands: async_channel::Sender<HostCommand>) -> Arc<dyn ControlHandler> {
        Arc::new(HostControl {
            commands,
            importer: Arc::clone(&self.importer),
        })
    }

    pub fn shutdown(&self) {
        info!("Host shutting down");
        self.triggers.stop();
        self.orchestrator.kill_all();
    }
}

struct HostControl {
    commands: async_channel::Sender<HostCommand>,
    importer: Arc<GistImporter>,
}

impl ControlHandler for HostControl {
    fn launch(&self, request: LaunchRequest) {
        if self.commands.send_blocking(HostCommand::Launch(request)).is_err() {
            warn!("Command queue closed, dropping launch");
        }
    }

    fn add_script(&self, gist: &str) -> ImportOutcome {
        let outcome = self.importer.import(gist);
        if matches!(outcome, ImportOutcome::Added(_)) {
            let _ = self.commands.send_blocking(HostCommand::Resync);
        }
        outcome
    }
}

/// Forwards hotkey presses into the command queue
pub fn hotkey_forwarder(commands: async_channel::Sender<HostCommand>) -> Arc<dyn Fn(u32) + Send + Sync> {
    Arc::new(move |id| {
        if commands.send_blocking(HostCommand::Hotkey(id)).is_err() {
            warn!(id, "Command queue closed, dropping hotkey");
        }
    })
}

/// Forwards watcher events into the command queue
pub fn forward_watch(events: Receiver<WatchEvent>, commands: async_channel::Sender<HostCommand>) {
    spawn_named("watch-forward", move || {
        for event in events {
            if commands.send_blocking(HostCommand::Watch(event)).is_err() {
                break;
            }
        }
    });
}

fn spawn_named(name: &str, f: impl FnOnce() + Send + 'static) {
    if let Err(e) = thread::Builder::new().name(name.to_string()).spawn(f) {
        logging::log_error("HOST", &e.to_string(), Some(name));
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
