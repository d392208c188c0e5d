//! Configuration type definitions

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults::*;

/// Host settings read from `host.json`. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
    /// Program that executes compiled scripts (default: node)
    pub runtime: String,
    /// Transpiler invoked by the build cache (default: esbuild)
    pub compiler: String,
    /// Port of the local HTTP control endpoint (default: 1205)
    pub control_port: u16,
    /// Set false to skip starting the control endpoint
    pub control_enabled: bool,
    pub preview_timeout_ms: u64,
    pub source_cache_ttl_ms: u64,
    pub watch_debounce_ms: u64,
    pub scheduler_check_secs: u64,
    /// Fallback editor when `.config.json` has no `editor`
    pub default_editor: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            runtime: DEFAULT_RUNTIME.to_string(),
            compiler: DEFAULT_COMPILER.to_string(),
            control_port: DEFAULT_CONTROL_PORT,
            control_enabled: true,
            preview_timeout_ms: DEFAULT_PREVIEW_TIMEOUT_MS,
            source_cache_ttl_ms: DEFAULT_SOURCE_CACHE_TTL_MS,
            watch_debounce_ms: DEFAULT_WATCH_DEBOUNCE_MS,
            scheduler_check_secs: DEFAULT_SCHEDULER_CHECK_SECS,
            default_editor: DEFAULT_EDITOR.to_string(),
        }
    }
}

impl HostConfig {
    pub fn preview_timeout(&self) -> Duration {
        Duration::from_millis(self.preview_timeout_ms)
    }

    pub fn source_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.source_cache_ttl_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub fn scheduler_check_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_check_secs.max(1))
    }
}
