//! File watching for scripts and the kit's appearance files.
//!
//! One `notify` watcher covers the scripts dir and the kit root. Raw events
//! are classified, debounced per path, and delivered as [`WatchEvent`]s.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use notify::{recommended_watcher, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{HostError, Result};
use crate::scripts::is_script_file;
use crate::setup::KitPaths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A script source was created, modified or removed
    ScriptsChanged(PathBuf),
    ColorScheme,
    Font,
    Shortcut,
}

/// Maps a changed path to the event it stands for
#[derive(Debug, Clone)]
struct Classifier {
    scripts_dir: PathBuf,
    color_scheme: PathBuf,
    font: PathBuf,
    shortcut: PathBuf,
}

impl Classifier {
    fn new(paths: &KitPaths) -> Self {
        Self {
            scripts_dir: paths.scripts_dir(),
            color_scheme: paths.color_scheme_file(),
            font: paths.font_file(),
            shortcut: paths.shortcut_file(),
        }
    }

    fn classify(&self, path: &Path) -> Option<WatchEvent> {
        if path == self.color_scheme {
            return Some(WatchEvent::ColorScheme);
        }
        if path == self.font {
            return Some(WatchEvent::Font);
        }
        if path == self.shortcut {
            return Some(WatchEvent::Shortcut);
        }
        if path.parent() == Some(self.scripts_dir.as_path()) {
            let file_name = path.file_name()?.to_str()?;
            if !file_name.starts_with('.') && is_script_file(file_name) {
                return Some(WatchEvent::ScriptsChanged(path.to_path_buf()));
            }
        }
        None
    }
}

/// Per-path debounce: an event is released once its path has been quiet
/// for the whole interval.
#[derive(Debug)]
struct Debouncer {
    interval: Duration,
    pending: HashMap<PathBuf, (WatchEvent, Instant)>,
}

impl Debouncer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: HashMap::new(),
        }
    }

    fn push(&mut self, path: PathBuf, event: WatchEvent, at: Instant) {
        self.pending.insert(path, (event, at));
    }

    fn take_ready(&mut self, now: Instant) -> Vec<WatchEvent> {
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= self.interval)
            .map(|(path, _)| path.clone())
            .collect();
        ready
            .into_iter()
            .filter_map(|path| self.pending.remove(&path).map(|(event, _)| event))
            .collect()
    }
}

pub struct KitWatcher {
    paths: KitPaths,
    debounce: Duration,
    tx: Option<Sender<WatchEvent>>,
    stop: Arc<AtomicBool>,
    watcher_thread: Option<thread::JoinHandle<()>>,
}

impl KitWatcher {
    /// Returns the watcher and the receiver its events arrive on
    pub fn new(paths: KitPaths, debounce: Duration) -> (Self, Receiver<WatchEvent>) {
        let (tx, rx) = channel();
        let watcher = KitWatcher {
            paths,
            debounce,
            tx: Some(tx),
            stop: Arc::new(AtomicBool::new(false)),
            watcher_thread: None,
        };
        (watcher, rx)
    }

    pub fn start(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| HostError::Watch("watcher already started".into()))?;

        let (raw_tx, raw_rx) = channel();
        let mut watcher = recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = raw_tx.send(res);
        })
        .map_err(|e| HostError::Watch(e.to_string()))?;

        let scripts_dir = self.paths.scripts_dir();
        watcher
            .watch(&scripts_dir, RecursiveMode::NonRecursive)
            .map_err(|e| HostError::Watch(format!("{}: {}", scripts_dir.display(), e)))?;
        watcher
            .watch(self.paths.root(), RecursiveMode::NonRecursive)
            .map_err(|e| HostError::Watch(format!("{}: {}", self.paths.root().display(), e)))?;
        info!(
            scripts = %scripts_dir.display(),
            root = %self.paths.root().display(),
            "Kit watcher started"
        );

        let classifier = Classifier::new(&self.paths);
        let debouncer = Arc::new(Mutex::new(Debouncer::new(self.debounce)));
        let stop = Arc::clone(&self.stop);

        let handle = thread::Builder::new()
            .name("kit-watcher".into())
            .spawn(move || {
                // Keeps the OS watch alive for the life of the loop
                let _watcher = watcher;
                loop {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    match raw_rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(Ok(event)) => {
                            if !matches!(
                                event.kind,
                                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                            ) {
                                continue;
                            }
                            let now = Instant::now();
                            let mut pending = debouncer.lock();
                            for path in &event.paths {
                                if let Some(kind) = classifier.classify(path) {
                                    pending.push(path.clone(), kind, now);
                                }
                            }
                        }
                        Ok(Err(e)) => warn!(error = %e, "File watcher error"),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }

                    for event in debouncer.lock().take_ready(Instant::now()) {
                        debug!(event = ?event, "Emitting watch event");
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                }
                info!("Kit watcher shutting down");
            })
            .map_err(|e| HostError::Watch(e.to_string()))?;

        self.watcher_thread = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.watcher_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for KitWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
