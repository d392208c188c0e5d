//! Configuration module - host settings and user key/value stores
//!
//! This module provides functionality for:
//! - Loading host settings from `<root>/host.json`
//! - Default values for all settings
//! - Flat JSON key/value documents (`.config.json`, `env.json`)
//!
//! # Module Structure
//!
//! - `defaults` - All default constant values
//! - `types` - `HostConfig`
//! - `loader` - File system loading and parsing
//! - `store` - Read-modify-write JSON key/value files

mod defaults;
mod loader;
mod store;
mod types;

pub use defaults::*;
pub use loader::load_config;
pub use store::{AppConfigStore, JsonKvFile};
pub use types::HostConfig;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
