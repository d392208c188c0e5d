//! Invocation Orchestrator
//!
//! `run(script, args)`: wait out any in-flight build, refuse failed or
//! missing artifacts, launch the runtime, register the process, pump its
//! channel into the broker, and clean up exactly once on the first
//! terminal event (exit, disconnect, error, or kill).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{info, instrument, warn};

use crate::broker::{Broker, PromptCoordinator};
use crate::compile::BuildCache;
use crate::error::{HostError, Result};
use crate::executor::{LaunchSpec, Launcher, MessagePort, TerminalKind};
use crate::logging;
use crate::process_manager::{ProcessEntry, ProcessRegistry};
use crate::protocol::JsonlReader;
use crate::scripts::ScriptStore;
use crate::ui::{HostEvent, UiSink};

/// One-shot terminal event for a single process.
///
/// Whichever of exit / disconnect / error / kill arrives first wins;
/// later signals are ignored.
pub struct Termination {
    entry: Arc<ProcessEntry>,
    registry: Arc<ProcessRegistry>,
    prompts: Arc<PromptCoordinator>,
    ui: Arc<dyn UiSink>,
    fired: AtomicBool,
    /// Set after cleanup, so waiters wake to a settled registry
    outcome: Mutex<Option<TerminalKind>>,
    done: Condvar,
}

impl Termination {
    fn new(
        entry: Arc<ProcessEntry>,
        registry: Arc<ProcessRegistry>,
        prompts: Arc<PromptCoordinator>,
        ui: Arc<dyn UiSink>,
    ) -> Self {
        Self {
            entry,
            registry,
            prompts,
            ui,
            fired: AtomicBool::new(false),
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    /// Record the terminal event; returns false if one was already recorded.
    pub fn fire(&self, kind: TerminalKind) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }

        let name = self.entry.display_name();
        let success = matches!(kind, TerminalKind::Exit(Some(0)));
        logging::log_script_event(&name, "exited", Some(self.entry.pid), success);
        if let TerminalKind::Error(e) = &kind {
            warn!(pid = self.entry.pid, error = %e, "Script process error");
        }

        cleanup(&self.registry, &self.prompts, self.ui.as_ref(), &self.entry);
        *self.outcome.lock() = Some(kind);
        self.done.notify_all();
        true
    }

    pub fn is_done(&self) -> bool {
        self.outcome.lock().is_some()
    }

    /// Block until the terminal event
    pub fn wait(&self) -> TerminalKind {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(kind) = outcome.as_ref() {
                return kind.clone();
            }
            self.done.wait(&mut outcome);
        }
    }
}

/// Unregister, drop the script's pending prompt and reset the UI; only the
/// call that removes the entry notifies.
fn cleanup(
    registry: &ProcessRegistry,
    prompts: &PromptCoordinator,
    ui: &dyn UiSink,
    entry: &Arc<ProcessEntry>,
) -> bool {
    if !registry.unregister_entry(entry) {
        return false;
    }
    prompts.invalidate_owned_by(entry.pid);
    for event in HostEvent::reset_after_exit(entry.pid) {
        ui.emit(event);
    }
    true
}

/// A started run
pub struct RunHandle {
    pub pid: u32,
    termination: Arc<Termination>,
}

impl RunHandle {
    /// Block until the process terminates
    pub fn wait(&self) -> TerminalKind {
        self.termination.wait()
    }

    pub fn is_done(&self) -> bool {
        self.termination.is_done()
    }
}

pub struct Orchestrator {
    store: Arc<ScriptStore>,
    builds: Arc<BuildCache>,
    registry: Arc<ProcessRegistry>,
    broker: Arc<Broker>,
    launcher: Arc<dyn Launcher>,
    ui: Arc<dyn UiSink>,
    terminations: Mutex<Vec<Arc<Termination>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ScriptStore>,
        builds: Arc<BuildCache>,
        registry: Arc<ProcessRegistry>,
        broker: Arc<Broker>,
        launcher: Arc<dyn Launcher>,
        ui: Arc<dyn UiSink>,
    ) -> Self {
        Self {
            store,
            builds,
            registry,
            broker,
            launcher,
            ui,
            terminations: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Run `script` and block until its process terminates.
    pub fn run(&self, script: &str, args: &[String]) -> Result<TerminalKind> {
        Ok(self.spawn_run(script, args)?.wait())
    }

    /// Launch `script` and return once the process is registered.
    #[instrument(level = "info", skip(self, args), fields(arg_count = args.len()))]
    pub fn spawn_run(&self, script: &str, args: &[String]) -> Result<RunHandle> {
        let Some(file) = self.store.get(script) else {
            logging::log("EXEC", &format!("Refusing to run unknown script: {}", script));
            return Err(HostError::UnknownScript(script.to_string()));
        };
        let name = file.info.file.clone();

        // compilation is driven by the watcher; only an in-flight build is awaited
        if self.builds.wait_for(&file.path) == Some(false) {
            let err = HostError::CompilationFailed(file.path.clone());
            self.surface(&name, &err);
            return Err(err);
        }
        if !file.artifact.exists() {
            let err = HostError::MissingArtifact(file.path.clone());
            self.surface(&name, &err);
            return Err(err);
        }

        let spec = LaunchSpec {
            script: file.path.clone(),
            artifact: file.artifact.clone(),
            args: args.to_vec(),
        };
        let launched = match self.launcher.launch(&spec) {
            Ok(launched) => launched,
            Err(err) => {
                self.surface(&name, &err);
                return Err(err);
            }
        };

        let pid = launched.pid;
        if pid == 0 {
            warn!(script = %name, "Launcher reported pid 0");
        }
        info!(pid, script = %name, "Script started");
        logging::log_script_event(&name, "started", Some(pid), true);

        let entry = self.registry.register(ProcessEntry::new(
            pid,
            file.path.clone(),
            file.artifact.clone(),
            Arc::clone(&launched.port),
            launched.control,
        ));
        let termination = Arc::new(Termination::new(
            Arc::clone(&entry),
            Arc::clone(&self.registry),
            Arc::clone(self.broker.prompts()),
            Arc::clone(&self.ui),
        ));
        {
            let mut terminations = self.terminations.lock();
            terminations.retain(|t| !t.is_done());
            terminations.push(Arc::clone(&termination));
        }

        self.spawn_message_pump(pid, launched.reader, launched.port, Arc::clone(&termination));
        let waiter = Arc::clone(&termination);
        let wait = launched.wait;
        spawn_named(format!("wait-{}", pid), move || {
            waiter.fire(wait());
        });

        Ok(RunHandle { pid, termination })
    }

    /// Terminate `pid` and run the exit cleanup now. Unknown pids are a no-op.
    pub fn kill(&self, pid: u32) -> bool {
        let Some(entry) = self.registry.get(pid) else {
            logging::log_debug("EXEC", &format!("kill: PID {} not registered", pid));
            return false;
        };
        logging::log(
            "EXEC",
            &format!("{} killed (pid: {})", entry.display_name(), pid),
        );
        entry.terminate();

        let termination = self
            .terminations
            .lock()
            .iter()
            .find(|t| Arc::ptr_eq(&t.entry, &entry))
            .cloned();
        match termination {
            Some(termination) => termination.fire(TerminalKind::Exit(None)),
            None => cleanup(&self.registry, self.broker.prompts(), self.ui.as_ref(), &entry),
        }
    }

    /// Kill every running script (host shutdown)
    pub fn kill_all(&self) {
        for pid in self.registry.list().into_keys() {
            self.kill(pid);
        }
    }

    fn surface(&self, name: &str, err: &HostError) {
        logging::log_error("EXEC", &err.to_string(), Some(name));
        self.ui.emit(HostEvent::DisplayError {
            name: name.to_string(),
            error: err.user_message(),
        });
    }

    fn spawn_message_pump(
        &self,
        pid: u32,
        reader: Box<dyn std::io::Read + Send>,
        port: Arc<dyn MessagePort>,
        termination: Arc<Termination>,
    ) {
        let broker = Arc::clone(&self.broker);
        spawn_named(format!("ipc-{}", pid), move || {
            let mut reader = JsonlReader::new(reader);
            loop {
                match reader.next_envelope() {
                    Ok(Some(envelope)) => {
                        logging::log_protocol_recv(pid, envelope.channel.name(), envelope.payload.len());
                        broker.dispatch(pid, &envelope, &port);
                    }
                    Ok(None) => {
                        termination.fire(TerminalKind::Disconnect);
                        break;
                    }
                    Err(e) => {
                        termination.fire(TerminalKind::Error(e.to_string()));
                        break;
                    }
                }
            }
        });
    }
}

fn spawn_named(name: String, f: impl FnOnce() + Send + 'static) {
    if let Err(e) = thread::Builder::new().name(name.clone()).spawn(f) {
        logging::log_error("EXEC", &e.to_string(), Some(&name));
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
