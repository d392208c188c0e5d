//! Configuration loading from file system

use std::path::Path;

use tracing::{info, instrument, warn};

use super::types::HostConfig;

/// Load host settings from `path`.
///
/// Returns `HostConfig::default()` when the file is missing or unparsable.
#[instrument(name = "load_config", skip_all, fields(path = %path.display()))]
pub fn load_config(path: &Path) -> HostConfig {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Config file not found, using defaults");
            return HostConfig::default();
        }
        Err(e) => {
            warn!(error = %e, "Failed to read config, using defaults");
            return HostConfig::default();
        }
    };

    if contents.trim().is_empty() {
        return HostConfig::default();
    }

    match serde_json::from_str::<HostConfig>(&contents) {
        Ok(config) => {
            info!("Successfully loaded config");
            config
        }
        Err(e) => {
            let hint = if e.to_string().contains("invalid type") {
                "check that ports and timeouts are numbers, not strings"
            } else {
                ""
            };
            warn!(error = %e, hint = %hint, "Failed to parse config JSON, using defaults");
            HostConfig::default()
        }
    }
}
