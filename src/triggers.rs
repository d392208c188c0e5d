//! Rebuilds hotkey and schedule bindings from the script metadata table.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::hotkeys::{HotkeyRegistry, HotkeyTarget};
use crate::logging;
use crate::scheduler::Scheduler;
use crate::scripts::ScriptStore;

/// Outcome of one reload
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    pub hotkeys: usize,
    pub schedules: usize,
    /// `"<file>: <reason>"` for every binding that was not made
    pub skipped: Vec<String>,
}

/// Resets the in-progress flag however `reload` returns
struct ReloadGuard<'a>(&'a AtomicBool);

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TriggerRegistrar {
    store: Arc<ScriptStore>,
    hotkeys: Mutex<HotkeyRegistry>,
    scheduler: Mutex<Scheduler>,
    reloading: AtomicBool,
}

impl TriggerRegistrar {
    pub fn new(store: Arc<ScriptStore>, hotkeys: HotkeyRegistry, scheduler: Scheduler) -> Self {
        Self {
            store,
            hotkeys: Mutex::new(hotkeys),
            scheduler: Mutex::new(scheduler),
            reloading: AtomicBool::new(false),
        }
    }

    /// Drop every script binding and rebuild from the current table.
    ///
    /// Returns `None` without doing anything when a reload is already running.
    #[instrument(level = "debug", skip(self))]
    pub fn reload(&self) -> Option<ReloadReport> {
        if self
            .reloading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Trigger reload already in progress, skipping");
            return None;
        }
        let _guard = ReloadGuard(&self.reloading);

        let mut hotkeys = self.hotkeys.lock();
        let scheduler = self.scheduler.lock();
        hotkeys.unregister_scripts();
        scheduler.clear();

        let mut report = ReloadReport::default();
        // files() is ordered by file name, so the first claimant of a shortcut wins
        for script in self.store.files() {
            let file = &script.info.file;

            if let Some(shortcut) = script.info.shortcut.as_deref().filter(|s| !s.trim().is_empty()) {
                match hotkeys.register(HotkeyTarget::Script(script.path.clone()), shortcut) {
                    Ok(_) => report.hotkeys += 1,
                    Err(e) => {
                        logging::log_error("HOTKEY", &e.to_string(), Some(file));
                        report.skipped.push(format!("{}: {}", file, e));
                    }
                }
            }

            if let Some(schedule) = script.info.schedule.as_deref().filter(|s| !s.trim().is_empty()) {
                match scheduler.add_script(script.path.clone(), schedule) {
                    Ok(_) => report.schedules += 1,
                    Err(e) => {
                        logging::log_error("SCHEDULE", &e.to_string(), Some(file));
                        report.skipped.push(format!("{}: {}", file, e));
                    }
                }
            }
        }

        info!(
            hotkeys = report.hotkeys,
            schedules = report.schedules,
            skipped = report.skipped.len(),
            "Triggers reloaded"
        );
        Some(report)
    }

    /// (Re)bind the main palette accelerator.
    ///
    /// The previous binding is released first; on failure the palette has no
    /// hotkey until a valid one is set.
    pub fn register_main(&self, shortcut: &str) -> Result<u32> {
        let mut hotkeys = self.hotkeys.lock();
        hotkeys.unregister_target(&HotkeyTarget::Main);
        hotkeys.register(HotkeyTarget::Main, shortcut.trim())
    }

    pub fn target_for(&self, hotkey_id: u32) -> Option<HotkeyTarget> {
        self.hotkeys.lock().target_for(hotkey_id)
    }

    pub fn hotkey_bindings(&self) -> Vec<(String, HotkeyTarget)> {
        self.hotkeys.lock().bindings()
    }

    pub fn scheduled(&self) -> Vec<PathBuf> {
        self.scheduler
            .lock()
            .list_scripts()
            .into_iter()
            .map(|s| s.path)
            .collect()
    }

    pub fn start_scheduler(&self) -> Result<()> {
        self.scheduler.lock().start()
    }

    pub fn stop(&self) {
        self.scheduler.lock().stop();
    }
}
