use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, warn};

/// Marker text scripts match on when the user dismisses a prompt.
pub const USER_EXITED: &str = "User exited";
/// Marker text scripts match on when a prompt was replaced by another UI.
pub const UI_CHANGED: &str = "UI changed";

/// Error severity for UI display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,     // Blue - informational
    Warning,  // Yellow - recoverable
    Error,    // Red - operation failed
    Critical, // Red + modal - requires user action
}

/// Domain-specific errors for the script host
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Unknown script: {0}")]
    UnknownScript(String),

    #[error("compilation failed: {}", .0.display())]
    CompilationFailed(PathBuf),

    #[error("Compiled artifact missing for {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("Process spawn failed: {0}")]
    Spawn(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File watch error: {0}")]
    Watch(String),

    #[error("Hotkey error: {0}")]
    Hotkey(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Script already exists: {0}")]
    ScriptExists(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl HostError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into().display().to_string(),
            source,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::UnknownScript(_) => ErrorSeverity::Warning,
            Self::CompilationFailed(_) => ErrorSeverity::Error,
            Self::MissingArtifact(_) => ErrorSeverity::Error,
            Self::Spawn(_) => ErrorSeverity::Error,
            Self::Io { .. } => ErrorSeverity::Error,
            Self::Json(_) => ErrorSeverity::Warning,
            Self::Config(_) => ErrorSeverity::Warning,
            Self::Watch(_) => ErrorSeverity::Warning,
            Self::Hotkey(_) => ErrorSeverity::Warning,
            Self::Schedule(_) => ErrorSeverity::Warning,
            Self::ScriptExists(_) => ErrorSeverity::Info,
            Self::Http(_) => ErrorSeverity::Warning,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::UnknownScript(name) => format!("No script named {}", name),
            Self::CompilationFailed(path) => {
                format!("{} failed to compile, fix it and save again", path.display())
            }
            Self::MissingArtifact(path) => {
                format!("{} has not been compiled yet", path.display())
            }
            Self::Spawn(msg) => format!("Could not start process: {}", msg),
            Self::Io { path, .. } => format!("Could not access {}", path),
            Self::Json(e) => format!("Invalid JSON: {}", e),
            Self::Config(msg) => format!("Configuration issue: {}", msg),
            Self::Watch(msg) => format!("File watcher issue: {}", msg),
            Self::Hotkey(msg) => msg.clone(),
            Self::Schedule(msg) => msg.clone(),
            Self::ScriptExists(name) => format!("{} already exists", name),
            Self::Http(msg) => msg.clone(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

/// Why a prompt resolved without a value.
///
/// The Display text is what the script runtime sees, so it stays identical
/// to the marker strings scripts already special-case.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptError {
    #[error("User exited")]
    UserExited,
    #[error("UI changed")]
    UiChanged,
}

/// True when an error text carries the "user exited" marker (any case).
pub fn is_user_exit(text: &str) -> bool {
    text.to_lowercase().contains(&USER_EXITED.to_lowercase())
}

/// Extension trait for silent error logging with caller location tracking.
/// Use when the operation is recoverable and user doesn't need to know.
///
/// # Examples
///
/// ```ignore
/// use script_kit_runner::error::ResultExt;
///
/// let scheme = read_color_scheme(&paths).log_err();
/// let cached = read_cache().warn_on_err();
/// ```
pub trait ResultExt<T> {
    /// Log error with caller location and return None. Use for recoverable failures.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None. Use for expected failures.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_error_marker_text() {
        assert_eq!(PromptError::UserExited.to_string(), USER_EXITED);
        assert_eq!(PromptError::UiChanged.to_string(), UI_CHANGED);
    }

    #[test]
    fn test_is_user_exit_ignores_case() {
        assert!(is_user_exit("Error: USER EXITED"));
        assert!(is_user_exit("user exited"));
        assert!(!is_user_exit("TypeError: x is undefined"));
    }

    #[test]
    fn test_compilation_failed_message() {
        let err = HostError::CompilationFailed(PathBuf::from("/s/foo.ts"));
        assert!(err.to_string().starts_with("compilation failed"));
        assert_eq!(err.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn test_log_err_returns_none_on_error() {
        let result: std::result::Result<u8, &str> = Err("boom");
        assert_eq!(result.log_err(), None);
        let ok: std::result::Result<u8, &str> = Ok(3);
        assert_eq!(ok.warn_on_err(), Some(3));
    }
}
