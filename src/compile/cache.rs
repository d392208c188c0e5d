//! Single-flight build cache.
//!
//! At most one compilation per file is in flight. Callers arriving while a
//! build runs are queued and released in arrival order once it finishes;
//! builds of different files run in parallel.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use super::transform::wrap_top_level;
use crate::scripts::artifact_for;
use crate::ui::{HostEvent, UiSink};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The external source-to-JS transpiler
pub trait Compiler: Send + Sync {
    /// Compile already-transformed `contents` (originally `source`) into `artifact`.
    fn compile(&self, source: &Path, contents: &str, artifact: &Path) -> Result<(), CompileError>;
}

#[derive(Default)]
struct BuildState {
    /// Waiters queued behind the running build, FIFO
    in_flight: HashMap<PathBuf, Vec<mpsc::Sender<bool>>>,
    /// Last outcome per file; absent means never built
    status: HashMap<PathBuf, bool>,
}

pub struct BuildCache {
    compiler: Arc<dyn Compiler>,
    ui: Arc<dyn UiSink>,
    state: Mutex<BuildState>,
}

impl BuildCache {
    pub fn new(compiler: Arc<dyn Compiler>, ui: Arc<dyn UiSink>) -> Self {
        Self {
            compiler,
            ui,
            state: Mutex::new(BuildState::default()),
        }
    }

    /// Build `file`, or wait for the build already running for it.
    ///
    /// Blocks until that build finishes and returns whether it succeeded.
    /// Failures are recorded and surfaced as `display-error`, never returned as `Err`.
    pub fn ensure_built(&self, file: &Path) -> bool {
        match self.claim(file) {
            Some(rx) => rx.recv().unwrap_or(false),
            None => self.run_claimed(file),
        }
    }

    /// Start building `file` on a worker thread and return immediately.
    ///
    /// The build is marked in flight before this returns, so a later
    /// `wait_for` or `ensure_built` joins it. No-op while one is running.
    pub fn spawn_build(self: &Arc<Self>, file: PathBuf) {
        if self.claim(&file).is_some() {
            return;
        }
        let cache = Arc::clone(self);
        let worker_file = file.clone();
        let name = format!(
            "build-{}",
            file.file_name().map(|f| f.to_string_lossy()).unwrap_or_default()
        );
        if let Err(e) = thread::Builder::new()
            .name(name)
            .spawn(move || {
                cache.run_claimed(&worker_file);
            })
        {
            warn!(error = %e, file = %file.display(), "Build worker unavailable, building inline");
            self.run_claimed(&file);
        }
    }

    /// Mark `file` in flight, or queue behind the build that already is.
    ///
    /// `None` means the caller now owns the build and must call `run_claimed`.
    fn claim(&self, file: &Path) -> Option<mpsc::Receiver<bool>> {
        let mut state = self.state.lock();
        match state.in_flight.get_mut(file) {
            Some(waiters) => {
                let (tx, rx) = mpsc::channel();
                waiters.push(tx);
                Some(rx)
            }
            None => {
                state.in_flight.insert(file.to_path_buf(), Vec::new());
                None
            }
        }
    }

    fn run_claimed(&self, file: &Path) -> bool {
        let ok = self.build(file);

        let waiters = {
            let mut state = self.state.lock();
            state.status.insert(file.to_path_buf(), ok);
            state.in_flight.remove(file).unwrap_or_default()
        };
        for waiter in waiters {
            let _ = waiter.send(ok);
        }
        ok
    }

    /// Wait for an in-flight build of `file`, if any, without starting one.
    /// Returns the recorded status afterwards.
    pub fn wait_for(&self, file: &Path) -> Option<bool> {
        let rx = {
            let mut state = self.state.lock();
            match state.in_flight.get_mut(file) {
                Some(waiters) => {
                    let (tx, rx) = mpsc::channel();
                    waiters.push(tx);
                    rx
                }
                None => return state.status.get(file).copied(),
            }
        };
        rx.recv().ok()
    }

    pub fn is_building(&self, file: &Path) -> bool {
        self.state.lock().in_flight.contains_key(file)
    }

    /// Last outcome: `Some(true)` built, `Some(false)` failed, `None` never built
    pub fn status(&self, file: &Path) -> Option<bool> {
        self.state.lock().status.get(file).copied()
    }

    /// Drop the recorded status of a removed script
    pub fn forget(&self, file: &Path) {
        self.state.lock().status.remove(file);
    }

    #[instrument(level = "info", skip(self), fields(file = %file.display()))]
    fn build(&self, file: &Path) -> bool {
        info!("Initiating build");
        let artifact = artifact_for(file);
        let result = fs::read_to_string(file)
            .map_err(|e| CompileError::new(format!("Failed to read {}: {}", file.display(), e)))
            .and_then(|source| {
                let contents = wrap_top_level(&source);
                self.compiler.compile(file, &contents, &artifact)
            });

        match result {
            Ok(()) => {
                info!(artifact = %artifact.display(), "Finished build");
                true
            }
            Err(e) => {
                error!(error = %e, "Build failed");
                let name = file
                    .file_name()
                    .map(|f| f.to_string_lossy().to_string())
                    .unwrap_or_else(|| file.display().to_string());
                self.ui.emit(HostEvent::DisplayError {
                    name: format!("Error while compiling {}", name),
                    error: e.message,
                });
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::testing::RecordingSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Counts calls; each compile sleeps so overlapping requests really overlap.
    struct SlowCompiler {
        calls: AtomicUsize,
        delay: Duration,
        fail_on: Option<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl SlowCompiler {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                fail_on: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Compiler for SlowCompiler {
        fn compile(&self, source: &Path, contents: &str, artifact: &Path) -> Result<(), CompileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(contents.to_string());
            thread::sleep(self.delay);
            let name = source.file_name().unwrap().to_string_lossy().to_string();
            if Some(name.as_str()) == self.fail_on {
                return Err(CompileError::new("Unexpected token"));
            }
            fs::write(artifact, contents).map_err(|e| CompileError::new(e.to_string()))
        }
    }

    fn setup(compiler: SlowCompiler) -> (TempDir, Arc<SlowCompiler>, Arc<RecordingSink>, Arc<BuildCache>) {
        let temp = TempDir::new().unwrap();
        let compiler = Arc::new(compiler);
        let ui = Arc::new(RecordingSink::default());
        let cache = Arc::new(BuildCache::new(compiler.clone(), ui.clone()));
        (temp, compiler, ui, cache)
    }

    #[test]
    fn test_concurrent_builds_of_one_file_compile_once() {
        let (temp, compiler, _ui, cache) = setup(SlowCompiler::new(Duration::from_millis(200)));
        let file = temp.path().join("a.ts");
        fs::write(&file, "import x from 'x'\nawait x();\n").unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                let file = file.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.ensure_built(&file)
                })
            })
            .collect();
        let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results, vec![true, true]);
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
        assert!(temp.path().join("a.js").exists());
        assert_eq!(cache.status(&file), Some(true));
        assert!(!cache.is_building(&file));
    }

    #[test]
    fn test_different_files_build_in_parallel() {
        let (temp, compiler, _ui, cache) = setup(SlowCompiler::new(Duration::from_millis(300)));
        let a = temp.path().join("a.ts");
        let b = temp.path().join("b.ts");
        fs::write(&a, "").unwrap();
        fs::write(&b, "").unwrap();

        let started = std::time::Instant::now();
        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|file| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.ensure_built(&file))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        assert_eq!(compiler.calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_millis(550));
    }

    #[test]
    fn test_failure_is_recorded_and_surfaced() {
        let mut compiler = SlowCompiler::new(Duration::ZERO);
        compiler.fail_on = Some("bad.ts");
        let (temp, _compiler, ui, cache) = setup(compiler);
        let file = temp.path().join("bad.ts");
        fs::write(&file, "import a from 'a'\nlet = ;\n").unwrap();

        assert_eq!(cache.status(&file), None);
        assert!(!cache.ensure_built(&file));
        assert_eq!(cache.status(&file), Some(false));
        assert_eq!(
            ui.events(),
            vec![HostEvent::DisplayError {
                name: "Error while compiling bad.ts".into(),
                error: "Unexpected token".into()
            }]
        );
    }

    #[test]
    fn test_missing_source_is_a_failure() {
        let (temp, compiler, _ui, cache) = setup(SlowCompiler::new(Duration::ZERO));
        assert!(!cache.ensure_built(&temp.path().join("nope.ts")));
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wait_for_does_not_start_a_build() {
        let (temp, compiler, _ui, cache) = setup(SlowCompiler::new(Duration::from_millis(200)));
        let file = temp.path().join("a.ts");
        fs::write(&file, "").unwrap();

        assert_eq!(cache.wait_for(&file), None);
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 0);

        let builder = {
            let cache = Arc::clone(&cache);
            let file = file.clone();
            thread::spawn(move || cache.ensure_built(&file))
        };
        while !cache.is_building(&file) && !builder.is_finished() {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(cache.wait_for(&file), Some(true));
        assert!(builder.join().unwrap());
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawn_build_is_joinable_immediately() {
        let (temp, compiler, _ui, cache) = setup(SlowCompiler::new(Duration::from_millis(200)));
        let a = temp.path().join("a.ts");
        let b = temp.path().join("b.ts");
        fs::write(&a, "").unwrap();
        fs::write(&b, "").unwrap();

        let started = std::time::Instant::now();
        cache.spawn_build(a.clone());
        cache.spawn_build(b.clone());
        cache.spawn_build(a.clone());
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(cache.is_building(&a));

        assert_eq!(cache.wait_for(&a), Some(true));
        assert_eq!(cache.wait_for(&b), Some(true));
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_millis(350));
    }

    #[test]
    fn test_transform_is_applied() {
        let (temp, compiler, _ui, cache) = setup(SlowCompiler::new(Duration::ZERO));
        let file = temp.path().join("a.ts");
        fs::write(&file, "import a from 'a'\nawait a();").unwrap();
        cache.ensure_built(&file);
        assert!(compiler.seen.lock()[0].contains("/**/(async ()=>{"));
    }
}
