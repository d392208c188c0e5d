//! Process Registry
//!
//! The authoritative table of running script processes, keyed by pid.
//!
//! - Thread-safe registration/unregistration (idempotent)
//! - Display names derived from the launched artifact
//! - Fan-out sends to every live process
//! - Active pids persisted to `tmp/active-pids.json` for orphan cleanup
//!   after a crash

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sysinfo::{Pid, System};

use crate::executor::{MessagePort, ProcessControl};
use crate::logging;
use crate::protocol::{outbound, Channel};

/// Record persisted for orphan detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Path to the script being executed
    pub script_path: String,
    pub started_at: DateTime<Utc>,
}

/// One running script process.
pub struct ProcessEntry {
    pub pid: u32,
    pub script_path: PathBuf,
    /// The compiled artifact the runtime was launched with
    pub artifact: PathBuf,
    pub started_at: DateTime<Utc>,
    port: Arc<dyn MessagePort>,
    control: Arc<dyn ProcessControl>,
    alive: AtomicBool,
}

impl ProcessEntry {
    pub fn new(
        pid: u32,
        script_path: PathBuf,
        artifact: PathBuf,
        port: Arc<dyn MessagePort>,
        control: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            pid,
            script_path,
            artifact,
            started_at: Utc::now(),
            port,
            control,
            alive: AtomicBool::new(true),
        }
    }

    /// Artifact file name with the compiled extension rewritten to `.ts`
    pub fn display_name(&self) -> String {
        display_name_for(&self.artifact)
    }

    /// False once the process was killed or reached its terminal event
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.control.is_terminated()
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn port(&self) -> &Arc<dyn MessagePort> {
        &self.port
    }

    /// Mark dead and stop the process group (idempotent)
    pub fn terminate(&self) {
        self.mark_dead();
        self.control.terminate();
    }

    /// Send `data` on `channel`, stamped with this entry's pid
    pub fn send(&self, channel: Channel, data: Map<String, Value>) -> std::io::Result<()> {
        self.port.send(&outbound(self.pid, channel, data))
    }

    fn info(&self) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            script_path: self.script_path.display().to_string(),
            started_at: self.started_at,
        }
    }
}

impl std::fmt::Debug for ProcessEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEntry")
            .field("pid", &self.pid)
            .field("script_path", &self.script_path)
            .field("alive", &self.is_alive())
            .finish()
    }
}

pub fn display_name_for(artifact: &Path) -> String {
    let file = artifact
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown script".to_string());
    match file.strip_suffix(".js") {
        Some(stem) => format!("{}.ts", stem),
        None => file,
    }
}

/// Thread-safe registry of running script processes
#[derive(Debug)]
pub struct ProcessRegistry {
    active_processes: RwLock<HashMap<u32, Arc<ProcessEntry>>>,
    /// Path to active child PIDs JSON file; `None` disables persistence
    active_pids_path: Option<PathBuf>,
}

impl ProcessRegistry {
    pub fn new(active_pids_path: impl Into<PathBuf>) -> Self {
        Self {
            active_processes: RwLock::new(HashMap::new()),
            active_pids_path: Some(active_pids_path.into()),
        }
    }

    /// Registry without pid persistence
    pub fn in_memory() -> Self {
        Self {
            active_processes: RwLock::new(HashMap::new()),
            active_pids_path: None,
        }
    }

    pub fn register(&self, entry: ProcessEntry) -> Arc<ProcessEntry> {
        logging::log(
            "PROC",
            &format!(
                "Registering process PID {} for script: {}",
                entry.pid,
                entry.script_path.display()
            ),
        );
        let entry = Arc::new(entry);
        self.active_processes.write().insert(entry.pid, Arc::clone(&entry));
        self.persist_or_log();
        entry
    }

    /// Remove a pid; returns the entry only on the first call.
    pub fn unregister(&self, pid: u32) -> Option<Arc<ProcessEntry>> {
        let removed = self.active_processes.write().remove(&pid);
        match &removed {
            Some(entry) => {
                entry.mark_dead();
                logging::log("PROC", &format!("Unregistered process PID {}", pid));
                self.persist_or_log();
            }
            None => logging::log_debug("PROC", &format!("PID {} was not registered", pid)),
        }
        removed
    }

    /// Remove `entry` only if it is still the one registered under its pid,
    /// so a late cleanup can't evict a process that reused the pid.
    pub fn unregister_entry(&self, entry: &Arc<ProcessEntry>) -> bool {
        let removed = {
            let mut processes = self.active_processes.write();
            match processes.get(&entry.pid) {
                Some(current) if Arc::ptr_eq(current, entry) => processes.remove(&entry.pid).is_some(),
                _ => false,
            }
        };
        entry.mark_dead();
        if removed {
            logging::log("PROC", &format!("Unregistered process PID {}", entry.pid));
            self.persist_or_log();
        }
        removed
    }

    pub fn get(&self, pid: u32) -> Option<Arc<ProcessEntry>> {
        self.active_processes.read().get(&pid).cloned()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.active_processes.read().contains_key(&pid)
    }

    /// `{pid: displayName}` for every registered process
    pub fn list(&self) -> BTreeMap<u32, String> {
        self.active_processes
            .read()
            .values()
            .map(|entry| (entry.pid, entry.display_name()))
            .collect()
    }

    pub fn display_name(&self, pid: u32) -> Option<String> {
        self.get(pid).map(|entry| entry.display_name())
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.active_processes.read().len()
    }

    /// Send to every live process; dead entries are skipped, not pruned.
    ///
    /// Returns the number of processes the message was written to.
    pub fn broadcast(&self, channel: Channel, data: &Map<String, Value>) -> usize {
        let targets: Vec<Arc<ProcessEntry>> = self
            .active_processes
            .read()
            .values()
            .filter(|entry| entry.is_alive())
            .cloned()
            .collect();

        let mut delivered = 0;
        for entry in targets {
            match entry.send(channel, data.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => logging::log(
                    "PROC",
                    &format!("Broadcast {} to PID {} failed: {}", channel, entry.pid, e),
                ),
            }
        }
        delivered
    }

    /// Detect and kill process groups left by a previous crash.
    ///
    /// Call at startup, before anything is registered. Returns the number of
    /// orphans killed.
    pub fn cleanup_orphans(&self) -> usize {
        let Some(path) = &self.active_pids_path else {
            return 0;
        };
        logging::log("PROC", "Checking for orphaned processes from previous session");

        let orphans = load_persisted_pids(path);
        if orphans.is_empty() {
            logging::log("PROC", "No orphaned processes found");
            return 0;
        }

        let mut killed_count = 0;
        for info in &orphans {
            if is_process_running(info.pid) {
                logging::log(
                    "PROC",
                    &format!(
                        "Killing orphaned process PID {} (script: {})",
                        info.pid, info.script_path
                    ),
                );
                match crate::executor::kill_process_group(info.pid, libc::SIGKILL) {
                    Ok(()) => killed_count += 1,
                    Err(e) => logging::log(
                        "PROC",
                        &format!("Failed to kill orphan {}: {}", info.pid, e),
                    ),
                }
            } else {
                logging::log("PROC", &format!("Orphan PID {} already exited", info.pid));
            }
        }

        if let Err(e) = fs::remove_file(path) {
            logging::log("PROC", &format!("Failed to remove orphan PIDs file: {}", e));
        }
        if killed_count > 0 {
            logging::log("PROC", &format!("Cleaned up {} orphaned process(es)", killed_count));
        }
        killed_count
    }

    fn persist_or_log(&self) {
        if let Err(e) = self.persist_active_pids() {
            logging::log("PROC", &format!("Failed to persist active PIDs: {}", e));
        }
    }

    fn persist_active_pids(&self) -> std::io::Result<()> {
        let Some(path) = &self.active_pids_path else {
            return Ok(());
        };
        let processes: Vec<ProcessInfo> = self
            .active_processes
            .read()
            .values()
            .map(|entry| entry.info())
            .collect();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&processes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(json.as_bytes())
    }
}

pub fn is_process_running(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    system.process(Pid::from_u32(pid)).is_some()
}

fn load_persisted_pids(path: &Path) -> Vec<ProcessInfo> {
    if !path.exists() {
        return Vec::new();
    }
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            logging::log("PROC", &format!("Failed to read active PIDs file: {}", e));
            return Vec::new();
        }
    };
    match serde_json::from_str(&contents) {
        Ok(pids) => pids,
        Err(e) => {
            logging::log("PROC", &format!("Failed to parse active PIDs JSON: {}", e));
            Vec::new()
        }
    }
}
