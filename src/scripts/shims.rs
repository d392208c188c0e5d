//! `bin/` shims and orphaned artifact cleanup

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use super::store::is_script_file;
use crate::error::{HostError, Result};
use crate::setup::make_executable;

fn shim_contents(run_shim: &Path, file: &str) -> String {
    format!("#!/bin/bash\n\n\"{}\" \"{}\" \"$@\"", run_shim.display(), file)
}

fn script_stems(scripts_dir: &Path) -> Result<HashSet<String>> {
    let entries = fs::read_dir(scripts_dir).map_err(|e| HostError::io(scripts_dir, e))?;
    Ok(entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .filter(|name| is_script_file(name))
        .filter_map(|name| name.strip_suffix(".ts").map(String::from))
        .collect())
}

/// One executable shim per script in `bin_dir`; shims without a script are removed.
pub fn sync_bin_dir(scripts_dir: &Path, bin_dir: &Path, run_shim: &Path) -> Result<()> {
    let stems = script_stems(scripts_dir)?;
    fs::create_dir_all(bin_dir).map_err(|e| HostError::io(bin_dir, e))?;

    let mut existing = HashSet::new();
    for entry in fs::read_dir(bin_dir).map_err(|e| HostError::io(bin_dir, e))?.flatten() {
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        if stems.contains(&name) {
            existing.insert(name);
        } else if let Err(e) = fs::remove_file(entry.path()) {
            warn!(error = %e, shim = %name, "Failed to remove orphaned shim");
        } else {
            debug!(shim = %name, "Removed orphaned shim");
        }
    }

    for stem in stems.difference(&existing) {
        let path = bin_dir.join(stem);
        let contents = shim_contents(run_shim, &format!("{}.ts", stem));
        fs::write(&path, contents).map_err(|e| HostError::io(&path, e))?;
        make_executable(&path).map_err(|e| HostError::io(&path, e))?;
        debug!(shim = %stem, "Created shim");
    }
    Ok(())
}

/// Delete compiled `.js` files whose `.ts` source is gone. Returns how many.
pub fn remove_orphan_artifacts(scripts_dir: &Path) -> Result<usize> {
    let stems = script_stems(scripts_dir)?;
    let mut removed = 0;
    for entry in fs::read_dir(scripts_dir).map_err(|e| HostError::io(scripts_dir, e))?.flatten() {
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        let Some(stem) = name.strip_suffix(".js") else {
            continue;
        };
        if stems.contains(stem) || !entry.path().is_file() {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(error = %e, artifact = %name, "Failed to remove orphaned artifact"),
        }
    }
    Ok(removed)
}
