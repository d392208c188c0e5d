//! Spawning the runtime bootstrap and terminating its process group.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{error, info, instrument};

use super::transport::JsonlPort;
use super::{LaunchSpec, LaunchedProcess, Launcher, ProcessControl, TerminalKind};
use crate::error::{HostError, Result};
use crate::logging;

/// fd the runtime expects its IPC channel on (`NODE_CHANNEL_FD`)
const CHILD_CHANNEL_FD: i32 = 3;

// Unix-specific process control using libc
mod unix_process {
    use libc::{c_int, pid_t, ESRCH};

    /// Send a signal to a process group (negative PID targets the group)
    pub fn kill_process_group(pgid: u32, signal: c_int) -> Result<(), &'static str> {
        // Safety: kill() is a plain syscall
        let rc = unsafe { libc::kill(-(pgid as pid_t), signal) };
        if rc == 0 {
            Ok(())
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            match errno {
                libc::ESRCH => Err("No such process group"),
                libc::EPERM => Err("Permission denied"),
                libc::EINVAL => Err("Invalid signal"),
                _ => Err("Unknown error"),
            }
        }
    }

    /// Signal 0 checks for existence; EPERM still means alive.
    pub fn process_group_alive(pgid: u32) -> bool {
        // Safety: kill() with signal 0 only checks existence
        let rc = unsafe { libc::kill(-(pgid as pid_t), 0) };
        if rc == 0 {
            true
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            errno != ESRCH
        }
    }

    pub const SIGTERM: c_int = libc::SIGTERM;
    pub const SIGKILL: c_int = libc::SIGKILL;
}

pub(crate) use unix_process::kill_process_group;

/// Find an executable on PATH, then in common locations GUI-launched hosts miss
pub fn find_executable(name: &str) -> Option<PathBuf> {
    if let Ok(path) = which::which(name) {
        return Some(path);
    }

    let common_paths = [
        dirs::home_dir().map(|h| h.join(".volta/bin")),
        dirs::home_dir().map(|h| h.join(".nvm/current/bin")),
        dirs::home_dir().map(|h| h.join(".bun/bin")),
        dirs::home_dir().map(|h| h.join(".local/bin")),
        Some(PathBuf::from("/opt/homebrew/bin")),
        Some(PathBuf::from("/usr/local/bin")),
        Some(PathBuf::from("/usr/bin")),
    ];
    for dir in common_paths.iter().flatten() {
        let candidate = dir.join(name);
        if candidate.exists() {
            logging::log("EXEC", &format!("Found {} at {}", name, candidate.display()));
            return Some(candidate);
        }
    }

    logging::log("EXEC", &format!("{} not found in PATH or common paths", name));
    None
}

/// Tracks a spawned process group for termination.
///
/// The child runs with `process_group(0)`, so its PID is also the PGID.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    killed: AtomicBool,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            killed: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// SIGTERM the group, wait up to 250ms (polling every 50ms), then SIGKILL.
    pub fn kill(&self) {
        const TERM_GRACE_MS: u64 = 250;
        const POLL_INTERVAL_MS: u64 = 50;

        if self.killed.swap(true, Ordering::AcqRel) {
            logging::log_debug("EXEC", &format!("Process {} already killed, skipping", self.pid));
            return;
        }

        use unix_process::{process_group_alive, SIGKILL, SIGTERM};
        let pgid = self.pid;

        match kill_process_group(pgid, SIGTERM) {
            Ok(()) => logging::log("EXEC", &format!("SIGTERM sent to PGID {}", pgid)),
            Err("No such process group") => {
                logging::log("EXEC", &format!("Process group {} already exited", pgid));
                return;
            }
            Err(e) => {
                // fall through to SIGKILL
                logging::log("EXEC", &format!("Failed to send SIGTERM to PGID {}: {}", pgid, e));
            }
        }

        let start = std::time::Instant::now();
        let grace = std::time::Duration::from_millis(TERM_GRACE_MS);
        let poll = std::time::Duration::from_millis(POLL_INTERVAL_MS);
        while start.elapsed() < grace {
            if !process_group_alive(pgid) {
                logging::log("EXEC", &format!("Process group {} terminated after SIGTERM", pgid));
                return;
            }
            thread::sleep(poll);
        }

        logging::log(
            "EXEC",
            &format!("Process group {} still alive after {}ms, sending SIGKILL", pgid, TERM_GRACE_MS),
        );
        match kill_process_group(pgid, SIGKILL) {
            Ok(()) => logging::log("EXEC", &format!("Killed process group {} with SIGKILL", pgid)),
            Err("No such process group") => {
                logging::log("EXEC", &format!("Process group {} exited just before SIGKILL", pgid))
            }
            Err(e) => logging::log("EXEC", &format!("SIGKILL failed for PGID {}: {}", pgid, e)),
        }
    }

    pub fn is_alive(&self) -> bool {
        unix_process::process_group_alive(self.pid)
    }
}

impl ProcessControl for ProcessHandle {
    fn terminate(&self) {
        self.kill();
    }

    fn is_terminated(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }
}

/// Launches `<runtime> <bootstrap> <artifact> args...` with the channel on fd 3.
pub struct NodeLauncher {
    runtime: PathBuf,
    bootstrap: PathBuf,
    scripts_dir: PathBuf,
}

impl NodeLauncher {
    pub fn new(runtime: &str, bootstrap: impl Into<PathBuf>, scripts_dir: impl Into<PathBuf>) -> Self {
        let runtime = find_executable(runtime).unwrap_or_else(|| PathBuf::from(runtime));
        Self {
            runtime,
            bootstrap: bootstrap.into(),
            scripts_dir: scripts_dir.into(),
        }
    }

    pub fn runtime(&self) -> &Path {
        &self.runtime
    }
}

/// Copy a child's output to the host's stderr, one prefixed line at a time.
fn forward_lines(stream: impl Read + Send + 'static, label: String) {
    let spawned = thread::Builder::new()
        .name(format!("fwd-{}", label))
        .spawn(move || {
            let reader = BufReader::new(stream);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                let mut stderr = std::io::stderr().lock();
                let _ = writeln!(stderr, "[{}] {}", label, line);
            }
        });
    if let Err(e) = spawned {
        error!(error = %e, "Failed to spawn output forwarder");
    }
}

impl Launcher for NodeLauncher {
    #[instrument(skip_all, fields(script = %spec.script.display()))]
    fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedProcess> {
        let (host_end, child_end) =
            UnixStream::pair().map_err(|e| HostError::Spawn(format!("socketpair: {}", e)))?;
        let child_fd = child_end.as_raw_fd();

        let mut command = Command::new(&self.runtime);
        command
            .arg(&self.bootstrap)
            .arg(&spec.artifact)
            .args(&spec.args)
            .current_dir(&self.scripts_dir)
            .env("NODE_CHANNEL_FD", CHILD_CHANNEL_FD.to_string())
            .env("NODE_CHANNEL_SERIALIZATION_MODE", "json")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        // Safety: only async-signal-safe calls (dup2/fcntl) between fork and exec
        unsafe {
            command.pre_exec(move || {
                if child_fd == CHILD_CHANNEL_FD {
                    if libc::fcntl(child_fd, libc::F_SETFD, 0) == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                } else if libc::dup2(child_fd, CHILD_CHANNEL_FD) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|e| {
            error!(error = %e, runtime = %self.runtime.display(), "Process spawn failed");
            HostError::Spawn(format!("Failed to spawn '{}': {}", self.runtime.display(), e))
        })?;
        drop(child_end);

        let pid = child.id();
        let label = spec
            .script
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        info!(pid = pid, pgid = pid, runtime = %self.runtime.display(), "Process spawned");

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, format!("{}:{}", label, pid));
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, format!("{}:{}:err", label, pid));
        }

        let reader = host_end
            .try_clone()
            .map_err(|e| HostError::Spawn(format!("channel clone: {}", e)))?;

        Ok(LaunchedProcess {
            pid,
            port: Arc::new(JsonlPort::new(pid, host_end)),
            reader: Box::new(reader),
            control: Arc::new(ProcessHandle::new(pid)),
            wait: Box::new(move || match child.wait() {
                Ok(status) => TerminalKind::Exit(status.code()),
                Err(e) => TerminalKind::Error(e.to_string()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_find_executable_on_path() {
        assert!(find_executable("sh").is_some());
        assert!(find_executable("definitely-not-a-real-binary-xyz").is_none());
    }

    #[test]
    fn test_kill_is_idempotent_for_missing_group() {
        // pid far above any real pid_max; the group does not exist
        let handle = ProcessHandle::new(999_999_999);
        assert!(!handle.is_terminated());
        handle.terminate();
        assert!(handle.is_terminated());
        handle.terminate();
    }

    /// `sh` stands in for the runtime: the "bootstrap" writes a line to fd 3.
    #[test]
    fn test_launch_wires_channel_on_fd3() {
        let temp = TempDir::new().unwrap();
        let bootstrap = temp.path().join("boot.sh");
        std::fs::write(
            &bootstrap,
            "echo \"{\\\"pid\\\":$$,\\\"channel\\\":7,\\\"fd\\\":\\\"$NODE_CHANNEL_FD\\\"}\" >&3\n",
        )
        .unwrap();

        let launcher = NodeLauncher::new("sh", &bootstrap, temp.path());
        let spec = LaunchSpec {
            script: temp.path().join("a.ts"),
            artifact: temp.path().join("a.js"),
            args: vec![],
        };
        let launched = launcher.launch(&spec).unwrap();
        let pid = launched.pid;

        let mut reader = launched.reader;
        let mut line = String::new();
        let mut buf = [0u8; 256];
        while !line.contains('\n') {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            line.push_str(std::str::from_utf8(&buf[..n]).unwrap());
        }
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["pid"], serde_json::json!(pid));
        assert_eq!(value["fd"], "3");

        assert_eq!((launched.wait)(), TerminalKind::Exit(Some(0)));
    }
}
