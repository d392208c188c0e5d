//! OS side effects the broker performs on behalf of scripts.

use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result};
use arboard::Clipboard;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Clipboard, opener, notifications and editor launch.
///
/// A trait so the broker can be driven without a desktop session.
pub trait Desktop: Send + Sync {
    fn open_url(&self, url: &str) -> Result<()>;
    fn open_path(&self, path: &str) -> Result<()>;
    fn copy(&self, text: &str) -> Result<()>;
    /// Write to the selection buffer (X11/Wayland primary selection)
    fn write_selection(&self, text: &str) -> Result<()>;
    fn read_clipboard(&self) -> Result<String>;
    fn notify(&self, title: &str, body: Option<&str>) -> Result<()>;
    fn launch_editor(&self, editor: &str, file: &str) -> Result<()>;
}

/// The real desktop.
///
/// The clipboard handle is created on first use and kept alive: on Linux
/// the contents are only served while a `Clipboard` exists.
#[derive(Default)]
pub struct SystemDesktop {
    clipboard: Mutex<Option<Clipboard>>,
}

impl SystemDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_clipboard<T>(&self, f: impl FnOnce(&mut Clipboard) -> Result<T>) -> Result<T> {
        let mut guard = self.clipboard.lock();
        if guard.is_none() {
            *guard = Some(Clipboard::new().context("Failed to access clipboard")?);
        }
        match guard.as_mut() {
            Some(clipboard) => f(clipboard),
            None => anyhow::bail!("clipboard unavailable"),
        }
    }
}

impl Desktop for SystemDesktop {
    fn open_url(&self, url: &str) -> Result<()> {
        info!(url = %url, "Opening URL");
        open::that_detached(url).with_context(|| format!("Failed to open {}", url))
    }

    fn open_path(&self, path: &str) -> Result<()> {
        info!(path = %path, "Opening path");
        let expanded = shellexpand::tilde(path).to_string();
        open::that_detached(Path::new(&expanded)).with_context(|| format!("Failed to open {}", path))
    }

    fn copy(&self, text: &str) -> Result<()> {
        debug!(len = text.len(), "Writing clipboard");
        self.with_clipboard(|clipboard| {
            clipboard
                .set_text(text.to_string())
                .context("Failed to set clipboard text")
        })
    }

    #[cfg(target_os = "linux")]
    fn write_selection(&self, text: &str) -> Result<()> {
        use arboard::SetExtLinux;

        debug!(len = text.len(), "Writing primary selection");
        self.with_clipboard(|clipboard| {
            clipboard
                .set()
                .clipboard(arboard::LinuxClipboardKind::Primary)
                .text(text.to_string())
                .context("Failed to set primary selection")
        })
    }

    // No primary selection off Linux; the regular clipboard stands in
    #[cfg(not(target_os = "linux"))]
    fn write_selection(&self, text: &str) -> Result<()> {
        self.copy(text)
    }

    fn read_clipboard(&self) -> Result<String> {
        self.with_clipboard(|clipboard| clipboard.get_text().context("Failed to read clipboard"))
    }

    fn notify(&self, title: &str, body: Option<&str>) -> Result<()> {
        info!(%title, "Sending desktop notification");
        let mut notification = notify_rust::Notification::new();
        notification.summary(title);
        if let Some(body) = body {
            notification.body(body);
        }
        match notification.show() {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(%title, error = %e, "Desktop notification failed");
                Err(anyhow::anyhow!("notification failed: {}", e))
            }
        }
    }

    fn launch_editor(&self, editor: &str, file: &str) -> Result<()> {
        info!(editor = %editor, file = %file, "Launching editor");
        let mut command = Command::new(editor);
        command.arg(file);
        spawn_detached(&mut command)
            .with_context(|| format!("Failed to launch editor '{}'", editor))?;
        Ok(())
    }
}

/// Spawn with null stdio and reap the child on a background thread.
fn spawn_detached(command: &mut Command) -> std::io::Result<u32> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    let pid = child.id();
    thread::Builder::new()
        .name(format!("reap-{}", pid))
        .spawn(move || {
            if let Err(e) = child.wait() {
                warn!(pid, error = %e, "Failed to reap detached child");
            }
        })?;
    Ok(pid)
}

#[cfg(test)]
pub mod fake {
    use super::*;

    /// One recorded desktop call
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DesktopCall {
        OpenUrl(String),
        OpenPath(String),
        Copy(String),
        WriteSelection(String),
        Notify(String, Option<String>),
        Editor(String, String),
    }

    /// Records calls; `read_clipboard` returns `clipboard`.
    #[derive(Default)]
    pub struct FakeDesktop {
        pub calls: Mutex<Vec<DesktopCall>>,
        pub clipboard: Mutex<String>,
    }

    impl FakeDesktop {
        pub fn calls(&self) -> Vec<DesktopCall> {
            self.calls.lock().clone()
        }
    }

    impl Desktop for FakeDesktop {
        fn open_url(&self, url: &str) -> Result<()> {
            self.calls.lock().push(DesktopCall::OpenUrl(url.into()));
            Ok(())
        }
        fn open_path(&self, path: &str) -> Result<()> {
            self.calls.lock().push(DesktopCall::OpenPath(path.into()));
            Ok(())
        }
        fn copy(&self, text: &str) -> Result<()> {
            *self.clipboard.lock() = text.to_string();
            self.calls.lock().push(DesktopCall::Copy(text.into()));
            Ok(())
        }
        fn write_selection(&self, text: &str) -> Result<()> {
            self.calls.lock().push(DesktopCall::WriteSelection(text.into()));
            Ok(())
        }
        fn read_clipboard(&self) -> Result<String> {
            Ok(self.clipboard.lock().clone())
        }
        fn notify(&self, title: &str, body: Option<&str>) -> Result<()> {
            self.calls
                .lock()
                .push(DesktopCall::Notify(title.into(), body.map(String::from)));
            Ok(())
        }
        fn launch_editor(&self, editor: &str, file: &str) -> Result<()> {
            self.calls
                .lock()
                .push(DesktopCall::Editor(editor.into(), file.into()));
            Ok(())
        }
    }
}


#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    #[test]
    fn test_detached_child_is_reaped() {
        let pid = spawn_detached(&mut Command::new("true")).unwrap();
        let proc_dir = PathBuf::from(format!("/proc/{}", pid));

        let deadline = Instant::now() + Duration::from_secs(5);
        while proc_dir.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!proc_dir.exists(), "pid {} was left as a zombie", pid);
    }

    #[test]
    fn test_launch_editor_reports_missing_program() {
        let desktop = SystemDesktop::new();
        let err = desktop
            .launch_editor("/no/such/editor", "/dev/null")
            .unwrap_err();
        assert!(err.to_string().contains("/no/such/editor"));
    }
}
