//! Default configuration values

/// Script runtime executable
pub const DEFAULT_RUNTIME: &str = "node";
/// External transpiler executable
pub const DEFAULT_COMPILER: &str = "esbuild";
/// Control endpoint port
pub const DEFAULT_CONTROL_PORT: u16 = 1205;

/// Hard timeout for an autocomplete preview request
pub const DEFAULT_PREVIEW_TIMEOUT_MS: u64 = 7000;
/// TTL of the script source text cache
pub const DEFAULT_SOURCE_CACHE_TTL_MS: u64 = 1000;
/// Per-path debounce for file watch events
pub const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 500;
/// How often the scheduler looks for due scripts
pub const DEFAULT_SCHEDULER_CHECK_SECS: u64 = 30;

/// Editor used by RUN_IN_EDITOR when `.config.json` has no `editor` key
pub const DEFAULT_EDITOR: &str = "code";
