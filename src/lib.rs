//! Script Kit Runner - script execution and capability broker host
//!
//! Compiles user scripts, runs each one as a child process connected over a
//! JSONL message channel, and brokers the capabilities scripts request
//! (prompts, clipboard, notifications, env values, widgets) against the
//! desktop and an external presentation layer.

pub mod appearance;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod setup;
pub mod ui;

// Script catalog and builds
pub mod compile;
pub mod scripts;

// Processes and the message broker
pub mod broker;
pub mod env_store;
pub mod executor;
pub mod orchestrator;
pub mod process_manager;

// Triggers: hotkeys, schedules, file watching
pub mod hotkeys;
pub mod scheduler;
pub mod triggers;
pub mod watcher;

// Outer surfaces
pub mod control_server;
pub mod gist;
pub mod host;
pub mod ui_bridge;
