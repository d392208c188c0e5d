//! Install layout and first-run initialization.
//!
//! Ensures the kit root exists with required directories and starter files.
//! The root can be overridden via the SK_PATH environment variable.
//! Idempotent: user-owned files are never overwritten; app-owned files may be refreshed.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

/// Runtime bootstrap every script process is launched through
const EMBEDDED_GLOBALS: &str = include_str!("../runtime/globals.js");

/// Environment variable to override the default ~/.sk/runner path
pub const SK_PATH_ENV: &str = "SK_PATH";

/// Default accelerator for the main palette
pub const DEFAULT_SHORTCUT: &str = "Super+Q";

const EMBEDDED_PACKAGE_JSON: &str = r#"{
  "name": "script-kit-runner-scripts",
  "private": true,
  "dependencies": {}
}
"#;

/// Every path the host reads or writes, derived from one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KitPaths {
    root: PathBuf,
}

impl KitPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root from SK_PATH, then ~/.sk/runner, then a temp dir.
    pub fn from_env() -> Self {
        Self::new(get_kit_path())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }
    pub fn color_schemes_dir(&self) -> PathBuf {
        self.root.join("color-schemes")
    }
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }
    pub fn env_file(&self) -> PathBuf {
        self.root.join("env.json")
    }
    pub fn app_config_file(&self) -> PathBuf {
        self.root.join(".config.json")
    }
    pub fn color_scheme_file(&self) -> PathBuf {
        self.root.join(".color-scheme.json")
    }
    pub fn font_file(&self) -> PathBuf {
        self.root.join("font")
    }
    pub fn shortcut_file(&self) -> PathBuf {
        self.root.join("shortcut")
    }
    pub fn host_config_file(&self) -> PathBuf {
        self.root.join("host.json")
    }
    pub fn bootstrap_file(&self) -> PathBuf {
        self.root.join("runtime").join("globals.js")
    }
    pub fn run_shim(&self) -> PathBuf {
        self.root.join("run")
    }
    pub fn package_json(&self) -> PathBuf {
        self.scripts_dir().join("package.json")
    }
    pub fn active_pids_file(&self) -> PathBuf {
        self.tmp_dir().join("active-pids.json")
    }
}

/// Result of setup process
#[derive(Debug)]
pub struct SetupResult {
    /// Whether the root didn't exist before this run
    pub is_fresh_install: bool,
    pub paths: KitPaths,
    /// Whether a script runtime looks discoverable on this machine
    pub runtime_available: bool,
    /// Any warnings encountered during setup
    pub warnings: Vec<String>,
}

/// Get the kit path, respecting SK_PATH environment variable
///
/// Priority:
/// 1. SK_PATH environment variable (if set)
/// 2. ~/.sk/runner (default)
/// 3. Temp directory fallback (if home dir unavailable)
pub fn get_kit_path() -> PathBuf {
    if let Ok(sk_path) = std::env::var(SK_PATH_ENV) {
        return PathBuf::from(shellexpand::tilde(&sk_path).as_ref());
    }

    match dirs::home_dir() {
        Some(home) => home.join(".sk").join("runner"),
        None => std::env::temp_dir().join("script-kit-runner"),
    }
}

/// Shell shim that forwards `run <script> args...` to the control endpoint.
pub fn run_shim_contents(port: u16) -> String {
    format!(
        r#"#!/bin/bash
# Managed by script-kit-runner - regenerated on start
SCRIPT="$1"
shift
ARGS=""
for a in "$@"; do
  a=${{a//\\/\\\\}}
  a=${{a//\"/\\\"}}
  ARGS="$ARGS${{ARGS:+,}}\"$a\""
done
curl -s -X POST -H "Content-Type: application/json" \
  -d "{{\"script\":\"$SCRIPT\",\"args\":[$ARGS]}}" \
  http://localhost:{}/
"#,
        port
    )
}

/// Ensure the layout exists.
///
/// # Returns
/// `SetupResult` with information about the setup process.
#[instrument(level = "info", name = "ensure_setup", skip(paths))]
pub fn ensure_setup(paths: &KitPaths, runtime: &str, control_port: u16) -> SetupResult {
    let mut warnings = Vec::new();
    let root = paths.root();
    let is_fresh_install = !root.exists();

    if std::env::var(SK_PATH_ENV).is_ok() {
        info!(kit_path = %root.display(), "Using SK_PATH override");
    }

    if let Err(e) = fs::create_dir_all(root) {
        warnings.push(format!("Failed to create kit root {}: {}", root.display(), e));
        return SetupResult {
            is_fresh_install,
            paths: paths.clone(),
            runtime_available: false,
            warnings,
        };
    }

    for dir in [
        paths.scripts_dir(),
        paths.bin_dir(),
        paths.color_schemes_dir(),
        paths.logs_dir(),
        paths.tmp_dir(),
    ] {
        ensure_dir(&dir, &mut warnings);
    }

    // User-owned: only create if missing
    write_string_if_missing(&paths.env_file(), "{}\n", &mut warnings, "env.json");
    write_string_if_missing(&paths.app_config_file(), "{}\n", &mut warnings, ".config.json");
    write_string_if_missing(&paths.color_scheme_file(), "{}\n", &mut warnings, ".color-scheme.json");
    write_string_if_missing(&paths.font_file(), "", &mut warnings, "font");
    write_string_if_missing(&paths.shortcut_file(), DEFAULT_SHORTCUT, &mut warnings, "shortcut");
    write_string_if_missing(&paths.package_json(), EMBEDDED_PACKAGE_JSON, &mut warnings, "package.json");

    // App-managed: refresh if changed
    write_string_if_changed(&paths.bootstrap_file(), EMBEDDED_GLOBALS, &mut warnings, "runtime/globals.js");
    let run_shim = paths.run_shim();
    write_string_if_changed(&run_shim, &run_shim_contents(control_port), &mut warnings, "run");
    if let Err(e) = make_executable(&run_shim) {
        warnings.push(format!("Failed to chmod {}: {}", run_shim.display(), e));
    }

    let runtime_available = which::which(runtime).is_ok();
    if !runtime_available {
        warnings.push(format!(
            "{} not found on PATH. Scripts will not run until it is installed.",
            runtime
        ));
    }

    info!(
        kit_path = %root.display(),
        is_fresh_install,
        runtime_available,
        warning_count = warnings.len(),
        "Kit setup complete"
    );

    SetupResult {
        is_fresh_install,
        paths: paths.clone(),
        runtime_available,
        warnings,
    }
}

/// Mark a file executable for its owner (no-op off unix)
pub fn make_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn ensure_dir(path: &Path, warnings: &mut Vec<String>) {
    if path.exists() {
        return;
    }
    if let Err(e) = fs::create_dir_all(path) {
        warnings.push(format!("Failed to create directory {}: {}", path.display(), e));
    } else {
        debug!(path = %path.display(), "Created directory");
    }
}

fn write_string_if_missing(path: &Path, contents: &str, warnings: &mut Vec<String>, label: &str) {
    if path.exists() {
        return;
    }
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warnings.push(format!(
                "Failed to create parent dir for {} ({}): {}",
                label,
                parent.display(),
                e
            ));
            return;
        }
    }
    if let Err(e) = fs::write(path, contents) {
        warnings.push(format!("Failed to write {} ({}): {}", label, path.display(), e));
    } else {
        info!(path = %path.display(), "Created {}", label);
    }
}

fn write_string_if_changed(path: &Path, contents: &str, warnings: &mut Vec<String>, label: &str) {
    if let Ok(existing) = fs::read_to_string(path) {
        if existing == contents {
            return;
        }
    }

    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warnings.push(format!(
                "Failed to create parent dir for {} ({}): {}",
                label,
                parent.display(),
                e
            ));
            return;
        }
    }

    if let Err(e) = fs::write(path, contents) {
        warnings.push(format!("Failed to write {} ({}): {}", label, path.display(), e));
    } else {
        debug!(path = %path.display(), "Updated {}", label);
    }
}
