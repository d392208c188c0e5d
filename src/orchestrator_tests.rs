use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use super::*;
use crate::broker::fake::{DesktopCall, FakeDesktop};
use crate::broker::BrokerDeps;
use crate::compile::{CompileError, Compiler};
use crate::config::AppConfigStore;
use crate::env_store::EnvStore;
use crate::executor::{JsonlPort, LaunchedProcess, ProcessControl};
use crate::process_manager::testing::FakeControl;
use crate::ui::testing::RecordingSink;

/// Writes the transformed source as the artifact; sources containing
/// `FAIL` don't compile.
struct CopyCompiler;

impl Compiler for CopyCompiler {
    fn compile(&self, _source: &Path, contents: &str, artifact: &Path) -> std::result::Result<(), CompileError> {
        if contents.contains("FAIL") {
            return Err(CompileError::new("syntax error"));
        }
        std::fs::write(artifact, contents).map_err(|e| CompileError::new(e.to_string()))
    }
}

/// The script side of a fake launch
struct Session {
    pid: u32,
    stream: UnixStream,
    exit: mpsc::Sender<TerminalKind>,
    control: Arc<FakeControl>,
}

impl Session {
    fn send(&mut self, message: Value) {
        let line = format!("{}\n", message);
        self.stream.write_all(line.as_bytes()).unwrap();
    }

    fn send_raw(&mut self, line: &str) {
        self.send_bytes(line.as_bytes());
    }

    fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    fn recv(&self) -> Value {
        let mut reader = BufReader::new(self.stream.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        serde_json::from_str(line.trim()).unwrap()
    }
}

#[derive(Default)]
struct FakeLauncher {
    next_pid: AtomicU32,
    fail: AtomicBool,
    sessions: parking_lot::Mutex<Vec<Session>>,
}

impl FakeLauncher {
    fn take_session(&self) -> Session {
        self.sessions.lock().remove(0)
    }

    fn launches(&self) -> u32 {
        self.next_pid.load(Ordering::SeqCst)
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, _spec: &LaunchSpec) -> Result<LaunchedProcess> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostError::Spawn("runtime not found".into()));
        }
        let pid = 4000 + self.next_pid.fetch_add(1, Ordering::SeqCst) + 1;
        let (host, script) = UnixStream::pair().unwrap();
        script.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let reader = host.try_clone().unwrap();
        let (exit, rx) = mpsc::channel();
        let control = Arc::new(FakeControl::default());

        self.sessions.lock().push(Session {
            pid,
            stream: script,
            exit,
            control: Arc::clone(&control),
        });
        Ok(LaunchedProcess {
            pid,
            port: Arc::new(JsonlPort::new(pid, host)),
            reader: Box::new(reader),
            control: control as Arc<dyn ProcessControl>,
            wait: Box::new(move || rx.recv().unwrap_or(TerminalKind::Disconnect)),
        })
    }
}

struct Harness {
    orchestrator: Orchestrator,
    launcher: Arc<FakeLauncher>,
    builds: Arc<BuildCache>,
    broker: Arc<Broker>,
    ui: Arc<RecordingSink>,
    desktop: Arc<FakeDesktop>,
    env: Arc<EnvStore>,
    temp: TempDir,
}

impl Harness {
    fn scripts_dir(&self) -> std::path::PathBuf {
        self.temp.path().join("scripts")
    }

    fn resets(&self, pid: u32) -> usize {
        self.ui.count(|e| *e == HostEvent::ProcExit { pid })
    }
}

fn harness(scripts: &[(&str, &str)]) -> Harness {
    let temp = TempDir::new().unwrap();
    let scripts_dir = temp.path().join("scripts");
    std::fs::create_dir_all(&scripts_dir).unwrap();

    let ui = Arc::new(RecordingSink::default());
    let builds = Arc::new(BuildCache::new(Arc::new(CopyCompiler), ui.clone()));
    for (name, source) in scripts {
        let path = scripts_dir.join(name);
        std::fs::write(&path, source).unwrap();
        builds.ensure_built(&path);
    }
    let store = Arc::new(ScriptStore::new(&scripts_dir, Duration::from_millis(1000)));
    store.sync();

    let registry = Arc::new(ProcessRegistry::in_memory());
    let desktop = Arc::new(FakeDesktop::default());
    let env = Arc::new(EnvStore::new(temp.path().join("env.json")));
    let broker = Arc::new(Broker::new(BrokerDeps {
        ui: ui.clone(),
        desktop: desktop.clone(),
        env: env.clone(),
        app_config: Arc::new(AppConfigStore::new(temp.path().join(".config.json"))),
        registry: registry.clone(),
        default_editor: "code".into(),
        preview_timeout: Duration::from_secs(7),
    }));
    let launcher = Arc::new(FakeLauncher::default());
    let orchestrator = Orchestrator::new(
        store,
        builds.clone(),
        registry,
        broker.clone(),
        launcher.clone(),
        ui.clone(),
    );
    Harness {
        orchestrator,
        launcher,
        builds,
        broker,
        ui,
        desktop,
        env,
        temp,
    }
}

const GREET: &str = "/** @name Greet */\nimport \"os\";\nconsole.log('hi');\n";

#[test]
fn test_unknown_script_is_refused() {
    let h = harness(&[]);
    let err = h.orchestrator.spawn_run("nope", &[]).err().unwrap();
    assert!(matches!(err, HostError::UnknownScript(_)));
    assert_eq!(h.launcher.launches(), 0);
}

#[test]
fn test_run_resolves_on_exit_and_cleans_up() {
    let h = harness(&[("greet.ts", GREET)]);
    let handle = h.orchestrator.spawn_run("greet", &["a".into()]).unwrap();
    let session = h.launcher.take_session();
    assert_eq!(handle.pid, session.pid);
    assert_eq!(h.orchestrator.registry().list().get(&handle.pid).map(String::as_str), Some("greet.ts"));
    assert!(!handle.is_done());

    session.exit.send(TerminalKind::Exit(Some(0))).unwrap();
    assert_eq!(handle.wait(), TerminalKind::Exit(Some(0)));

    assert!(h.orchestrator.registry().get(handle.pid).is_none());
    let resets: Vec<HostEvent> = h
        .ui
        .events()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                HostEvent::ProcExit { .. }
                    | HostEvent::UserTabsSet { .. }
                    | HostEvent::LoaderUpdate { .. }
                    | HostEvent::ArgEnd
            )
        })
        .collect();
    assert_eq!(resets, HostEvent::reset_after_exit(handle.pid).to_vec());
}

#[test]
fn test_terminal_events_clean_up_once() {
    let h = harness(&[("greet.ts", GREET)]);
    let handle = h.orchestrator.spawn_run("greet.ts", &[]).unwrap();
    let session = h.launcher.take_session();

    // disconnect first, then exit
    session.stream.shutdown(std::net::Shutdown::Both).unwrap();
    assert_eq!(handle.wait(), TerminalKind::Disconnect);
    session.exit.send(TerminalKind::Exit(Some(1))).unwrap();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(h.resets(handle.pid), 1);
    assert_eq!(h.ui.count(|e| *e == HostEvent::ArgEnd), 1);
    assert_eq!(handle.wait(), TerminalKind::Disconnect);
}

#[test]
fn test_kill_twice_is_noop_the_second_time() {
    let h = harness(&[("greet.ts", GREET)]);
    let handle = h.orchestrator.spawn_run("greet", &[]).unwrap();
    let session = h.launcher.take_session();

    assert!(h.orchestrator.kill(handle.pid));
    assert!(!h.orchestrator.kill(handle.pid));
    assert_eq!(handle.wait(), TerminalKind::Exit(None));

    // the real exit arriving later changes nothing
    session.exit.send(TerminalKind::Exit(Some(143))).unwrap();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(session.control.terminations.load(Ordering::SeqCst), 1);
    assert_eq!(h.resets(handle.pid), 1);
    assert!(h.orchestrator.registry().get(handle.pid).is_none());
}

#[test]
fn test_kill_unknown_pid() {
    let h = harness(&[]);
    assert!(!h.orchestrator.kill(12345));
    assert!(h.ui.events().is_empty());
}

#[test]
fn test_failed_build_blocks_run() {
    let h = harness(&[("broken.ts", "import 'x';\nFAIL\n")]);
    let err = h.orchestrator.spawn_run("broken", &[]).err().unwrap();
    assert!(matches!(err, HostError::CompilationFailed(_)));
    assert_eq!(h.launcher.launches(), 0);
    assert_eq!(
        h.ui.count(|e| matches!(e, HostEvent::DisplayError { error, .. } if error.contains("failed to compile"))),
        1
    );
}

#[test]
fn test_missing_artifact_blocks_run() {
    let h = harness(&[("greet.ts", GREET)]);
    std::fs::remove_file(h.scripts_dir().join("greet.js")).unwrap();
    h.builds.forget(&h.scripts_dir().join("greet.ts"));

    let err = h.orchestrator.spawn_run("greet", &[]).err().unwrap();
    assert!(matches!(err, HostError::MissingArtifact(_)));
}

#[test]
fn test_spawn_failure_is_surfaced() {
    let h = harness(&[("greet.ts", GREET)]);
    h.launcher.fail.store(true, Ordering::SeqCst);
    let err = h.orchestrator.spawn_run("greet", &[]).err().unwrap();
    assert!(matches!(err, HostError::Spawn(_)));
    assert_eq!(h.ui.count(|e| matches!(e, HostEvent::DisplayError { .. })), 1);
    assert!(h.orchestrator.registry().list().is_empty());
}

#[test]
fn test_malformed_messages_are_dropped() {
    let h = harness(&[("greet.ts", GREET)]);
    let handle = h.orchestrator.spawn_run("greet", &[]).unwrap();
    let mut session = h.launcher.take_session();
    let pid = session.pid;

    session.send_raw("not json\n");
    session.send(json!({"channel": 1, "string": "no pid"}));
    session.send(json!({"pid": pid, "channel": "1", "string": "bad channel"}));
    session.send(json!({"pid": pid, "channel": 99}));
    session.send(json!({"pid": pid, "channel": 1}));
    session.send(json!({"pid": pid, "channel": 1, "string": "kept"}));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while h.desktop.calls().is_empty() && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(h.desktop.calls(), vec![DesktopCall::Copy("kept".into())]);
    assert!(!handle.is_done());

    session.exit.send(TerminalKind::Exit(Some(0))).unwrap();
    handle.wait();
}

#[test]
fn test_non_utf8_line_keeps_process_registered() {
    let h = harness(&[("greet.ts", GREET)]);
    let handle = h.orchestrator.spawn_run("greet", &[]).unwrap();
    let mut session = h.launcher.take_session();
    let pid = session.pid;

    session.send_bytes(b"\xff\xfe garbage\n");
    session.send(json!({"pid": pid, "channel": 1, "string": "kept"}));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while h.desktop.calls().is_empty() && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(h.desktop.calls(), vec![DesktopCall::Copy("kept".into())]);
    assert!(!handle.is_done());
    assert!(h.orchestrator.registry().get(pid).is_some());

    session.exit.send(TerminalKind::Exit(Some(0))).unwrap();
    handle.wait();
}

#[test]
fn test_exit_drops_the_scripts_pending_prompt() {
    let h = harness(&[("greet.ts", GREET)]);
    let handle = h.orchestrator.spawn_run("greet", &[]).unwrap();
    let mut session = h.launcher.take_session();
    session.send(json!({"pid": session.pid, "channel": 5, "name": "Pick", "options": []}));

    h.ui.wait_for(|e| matches!(e, HostEvent::ArgOpen { .. })).unwrap();
    assert!(h.broker.prompts().is_pending());

    session.exit.send(TerminalKind::Exit(Some(0))).unwrap();
    handle.wait();
    assert!(!h.broker.prompts().is_pending());
    assert!(!h.broker.prompts().respond(Some("late".into())));
}

#[test]
fn test_get_env_prompt_end_to_end() {
    let h = harness(&[("greet.ts", GREET)]);

    let first = h.orchestrator.spawn_run("greet", &[]).unwrap();
    let mut session = h.launcher.take_session();
    session.send(json!({"pid": session.pid, "channel": 3, "name": "NAME"}));

    let opened = h.ui.wait_for(|e| matches!(e, HostEvent::ArgOpen { .. })).unwrap();
    assert_eq!(
        opened,
        HostEvent::ArgOpen {
            name: "Environment: NAME".into(),
            options: vec![],
            hint: None,
        }
    );
    h.broker.prompts().respond(Some("Ada".into()));
    assert_eq!(
        session.recv(),
        json!({"pid": session.pid, "channel": 3, "value": "Ada"})
    );
    assert_eq!(h.env.get("NAME").unwrap(), Some("Ada".into()));
    session.exit.send(TerminalKind::Exit(Some(0))).unwrap();
    first.wait();

    let second = h.orchestrator.spawn_run("greet", &[]).unwrap();
    let mut session = h.launcher.take_session();
    session.send(json!({"pid": session.pid, "channel": 3, "name": "NAME"}));
    assert_eq!(
        session.recv(),
        json!({"pid": session.pid, "channel": 3, "value": "Ada"})
    );
    assert_eq!(h.ui.count(|e| matches!(e, HostEvent::ArgOpen { .. })), 1);
    session.exit.send(TerminalKind::Exit(Some(0))).unwrap();
    second.wait();
}

#[test]
fn test_messages_processed_in_order() {
    let h = harness(&[("greet.ts", GREET)]);
    let handle = h.orchestrator.spawn_run("greet", &[]).unwrap();
    let mut session = h.launcher.take_session();
    let pid = session.pid;
    for i in 0..20 {
        session.send(json!({"pid": pid, "channel": 1, "string": format!("{}", i)}));
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while h.desktop.calls().len() < 20 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    let expected: Vec<DesktopCall> = (0..20).map(|i| DesktopCall::Copy(format!("{}", i))).collect();
    assert_eq!(h.desktop.calls(), expected);

    session.exit.send(TerminalKind::Exit(Some(0))).unwrap();
    handle.wait();
}
