use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use script_kit_runner::broker::SystemDesktop;
use script_kit_runner::compile::ExternalCompiler;
use script_kit_runner::config::load_config;
use script_kit_runner::control_server::ControlServer;
use script_kit_runner::executor::NodeLauncher;
use script_kit_runner::gist::UreqGistFetcher;
use script_kit_runner::host::{forward_watch, hotkey_forwarder, Host, HostCommand, HostParts};
use script_kit_runner::hotkeys::{DisabledBackend, GlobalHotkeyBackend, HotkeyBackend};
use script_kit_runner::logging;
use script_kit_runner::setup::{ensure_setup, KitPaths};
use script_kit_runner::ui::ChannelSink;
use script_kit_runner::ui_bridge::{
    spawn_command_reader, spawn_event_writer, UiCommand, COMMAND_QUEUE_CAPACITY,
};
use script_kit_runner::watcher::KitWatcher;

/// Script host: runs kit scripts and brokers their requests.
///
/// UI events are written to stdout as JSON lines; UI commands are read from stdin.
#[derive(Parser, Debug)]
#[command(name = "script-kit-runner", version, about)]
struct Args {
    /// Kit root (defaults to $SK_PATH, then ~/.sk/runner)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Port for the local control endpoint
    #[arg(long)]
    port: Option<u16>,

    /// Don't start the control endpoint
    #[arg(long)]
    no_control: bool,

    /// Don't register global hotkeys
    #[arg(long)]
    no_hotkeys: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let paths = match &args.root {
        Some(root) => KitPaths::new(root),
        None => KitPaths::from_env(),
    };
    let _log_guard = logging::init(&paths.logs_dir());

    let mut config = load_config(&paths.host_config_file());
    if let Some(port) = args.port {
        config.control_port = port;
    }
    if args.no_control {
        config.control_enabled = false;
    }

    let setup = ensure_setup(&paths, &config.runtime, config.control_port);
    for warning in &setup.warnings {
        warn!(warning = %warning, "Setup warning");
    }

    let (event_tx, event_rx) = async_channel::unbounded();
    let _writer = spawn_event_writer(event_rx, io::stdout());

    let (command_tx, command_rx) = async_channel::bounded(COMMAND_QUEUE_CAPACITY);
    {
        let tx = command_tx.clone();
        spawn_command_reader(BufReader::new(io::stdin()), move |cmd| {
            tx.send_blocking(HostCommand::Ui(cmd)).is_ok()
        });
    }

    let hotkeys: Box<dyn HotkeyBackend> = if args.no_hotkeys {
        Box::new(DisabledBackend)
    } else {
        match GlobalHotkeyBackend::start(hotkey_forwarder(command_tx.clone())) {
            Ok(backend) => Box::new(backend),
            Err(e) => {
                logging::log_error("HOTKEY", &e.to_string(), Some("global hotkeys disabled"));
                Box::new(DisabledBackend)
            }
        }
    };

    let scripts_dir = paths.scripts_dir();
    let launcher = NodeLauncher::new(&config.runtime, paths.bootstrap_file(), &scripts_dir);
    let compiler = ExternalCompiler::new(&config.compiler, &scripts_dir);

    let host = Host::new(HostParts {
        paths: paths.clone(),
        config: config.clone(),
        ui: Arc::new(ChannelSink::new(event_tx)),
        desktop: Arc::new(SystemDesktop::new()),
        compiler: Arc::new(compiler),
        launcher: Arc::new(launcher),
        hotkeys,
        gists: Arc::new(UreqGistFetcher),
    });
    host.start();
    host.forward_schedule(command_tx.clone());

    let (mut watcher, watch_rx) = KitWatcher::new(paths.clone(), config.watch_debounce());
    match watcher.start() {
        Ok(()) => forward_watch(watch_rx, command_tx.clone()),
        Err(e) => logging::log_error("WATCH", &e.to_string(), Some("file watching disabled")),
    }

    let server = if config.control_enabled {
        let handle = ControlServer::start(config.control_port, host.control_handler(command_tx.clone()))
            .context("Failed to start control endpoint")?;
        info!(addr = %handle.local_addr(), "Control endpoint listening");
        Some(handle)
    } else {
        None
    };

    info!(root = %paths.root().display(), "Host ready");

    while let Ok(command) = command_rx.recv_blocking() {
        let done = matches!(command, HostCommand::Shutdown | HostCommand::Ui(UiCommand::Quit));
        host.handle(command);
        if done {
            break;
        }
    }

    watcher.stop();
    if let Some(server) = server {
        server.stop();
    }
    info!("Host exited");
    Ok(())
}
