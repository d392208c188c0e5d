//! Structured JSONL logging plus human-readable stderr output.
//!
//! - **JSONL to file** (`<root>/logs/script-kit-runner.jsonl`) for tooling
//! - **Compact to stderr** for developers
//!
//! stdout is never written here; it carries the UI event stream.
//!
//! # Usage
//!
//! ```rust,ignore
//! use script_kit_runner::logging;
//!
//! // MUST keep guard alive for duration of program
//! let _guard = logging::init(&paths.logs_dir());
//! tracing::info!(event_type = "app_start", "Host started");
//! ```

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::protocol::log_preview;

static LOG_BUFFER: OnceLock<Mutex<VecDeque<String>>> = OnceLock::new();
const MAX_LOG_LINES: usize = 50;

pub const LOG_FILE_NAME: &str = "script-kit-runner.jsonl";

/// Guard that must be kept alive for the duration of the program.
/// Dropping this guard will flush and close the log file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize the dual-output logging system.
///
/// Returns a guard that MUST be kept alive for the duration of the program.
pub fn init(log_dir: &Path) -> LoggingGuard {
    let _ = LOG_BUFFER.set(Mutex::new(VecDeque::with_capacity(MAX_LOG_LINES)));

    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("[LOGGING] Failed to create log directory: {}", e);
    }

    let log_path = log_path(log_dir);
    eprintln!("[SCRIPT-KIT-RUNNER] JSONL log: {}", log_path.display());

    let (non_blocking_file, file_guard) =
        match OpenOptions::new().create(true).append(true).open(&log_path) {
            Ok(file) => tracing_appender::non_blocking(file),
            Err(e) => {
                eprintln!("[LOGGING] Failed to open log file: {}", e);
                tracing_appender::non_blocking(std::io::sink())
            }
        };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ureq=warn,notify=warn"));

    let json_layer = fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE);

    let pretty_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .compact();

    // try_init: tests and embedders may have installed a subscriber already
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init();

    tracing::info!(
        event_type = "app_lifecycle",
        action = "started",
        log_path = %log_path.display(),
        "Host logging initialized"
    );

    LoggingGuard {
        _file_guard: file_guard,
    }
}

/// Path of the JSONL log inside a log directory
pub fn log_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE_NAME)
}

/// Category-tagged log line, also kept in the recent-lines buffer.
///
/// Prefer tracing macros directly when there are structured fields to attach.
pub fn log(category: &str, message: &str) {
    add_to_buffer(category, message);
    tracing::info!(category = category, legacy = true, "{}", message);
}

/// Debug-only logging - compiled out in release builds
#[cfg(debug_assertions)]
pub fn log_debug(category: &str, message: &str) {
    add_to_buffer(category, message);
    tracing::debug!(category = category, legacy = true, "{}", message);
}

#[cfg(not(debug_assertions))]
pub fn log_debug(_category: &str, _message: &str) {}

fn add_to_buffer(category: &str, message: &str) {
    if let Some(buffer) = LOG_BUFFER.get() {
        if let Ok(mut buf) = buffer.lock() {
            if buf.len() >= MAX_LOG_LINES {
                buf.pop_front();
            }
            buf.push_back(format!("[{}] {}", category, message));
        }
    }
}

/// Recent log lines, oldest first
pub fn get_recent_logs() -> Vec<String> {
    if let Some(buffer) = LOG_BUFFER.get() {
        if let Ok(buf) = buffer.lock() {
            return buf.iter().cloned().collect();
        }
    }
    Vec::new()
}

/// Log a script lifecycle event with structured fields
pub fn log_script_event(script: &str, action: &str, pid: Option<u32>, success: bool) {
    add_to_buffer(
        "SCRIPT",
        &format!("{} {} (success={})", action, script, success),
    );

    match pid {
        Some(pid) => tracing::info!(
            event_type = "script_event",
            script = script,
            action = action,
            pid = pid,
            success = success,
            "Script {} {}", action, script
        ),
        None => tracing::info!(
            event_type = "script_event",
            script = script,
            action = action,
            success = success,
            "Script {} {}", action, script
        ),
    }
}

/// Log an inbound channel message without its payload
pub fn log_protocol_recv(pid: u32, channel: &str, bytes: usize) {
    tracing::debug!(
        event_type = "protocol",
        direction = "recv",
        pid = pid,
        channel = channel,
        bytes = bytes,
        "<- {} from {}", channel, pid
    );
}

/// Log an outbound channel message with a truncated preview
pub fn log_protocol_send(pid: u32, json: &str) {
    let (preview, len) = log_preview(json);
    tracing::debug!(
        event_type = "protocol",
        direction = "send",
        pid = pid,
        bytes = len,
        preview = preview,
        "-> {}", pid
    );
}

/// Log an error with structured fields and context
pub fn log_error(category: &str, error: &str, context: Option<&str>) {
    let msg = match context {
        Some(ctx) => format!("{}: {} (context: {})", category, error, ctx),
        None => format!("{}: {}", category, error),
    };
    add_to_buffer("ERROR", &msg);

    tracing::error!(
        event_type = "error",
        category = category,
        error_message = error,
        context = context,
        "{}", msg
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path_uses_file_name() {
        let path = log_path(Path::new("/tmp/kit/logs"));
        assert_eq!(path, PathBuf::from("/tmp/kit/logs/script-kit-runner.jsonl"));
    }

    #[test]
    fn test_buffer_is_bounded() {
        let _ = LOG_BUFFER.set(Mutex::new(VecDeque::with_capacity(MAX_LOG_LINES)));
        for i in 0..(MAX_LOG_LINES + 10) {
            log("TEST", &format!("line {}", i));
        }
        let lines = get_recent_logs();
        assert!(lines.len() <= MAX_LOG_LINES);
        assert!(lines.last().is_some_and(|l| l.starts_with("[")));
    }
}
