//! Script process launching
//!
//! This module handles:
//! - The host ↔ script channel transport (a socketpair on the child's fd 3)
//! - Spawning the runtime bootstrap in its own process group
//! - Terminating a process group with SIGTERM → SIGKILL escalation
//!
//! The traits here are the seams the orchestrator and registry depend on,
//! so tests can substitute in-memory processes.

mod runner;
mod transport;

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;

pub use runner::{find_executable, NodeLauncher, ProcessHandle};
pub(crate) use runner::kill_process_group;
pub use transport::JsonlPort;

/// Write side of a process's message channel
pub trait MessagePort: Send + Sync {
    fn send(&self, message: &Value) -> io::Result<()>;
}

/// Ability to stop a running process
pub trait ProcessControl: Send + Sync {
    /// Idempotent; later calls are no-ops.
    fn terminate(&self);
    fn is_terminated(&self) -> bool;
}

/// How a process ended, whichever signal arrived first
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalKind {
    Exit(Option<i32>),
    Disconnect,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub script: PathBuf,
    pub artifact: PathBuf,
    pub args: Vec<String>,
}

/// A freshly spawned script process and the handles to drive it.
pub struct LaunchedProcess {
    pub pid: u32,
    pub port: Arc<dyn MessagePort>,
    /// Read side of the channel; EOF means the child disconnected
    pub reader: Box<dyn Read + Send>,
    pub control: Arc<dyn ProcessControl>,
    /// Blocks until the process exits
    pub wait: Box<dyn FnOnce() -> TerminalKind + Send>,
}

pub trait Launcher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedProcess>;
}
