//! Creating, removing and renaming scripts

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use super::store::normalize_file_name;
use super::types::artifact_for;
use crate::error::{HostError, Result};

/// Lowercase; spaces become `-`; ASCII letters, digits, `-` and `.` are kept;
/// everything else is dropped; runs of `-` collapse to one.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        let c = match c {
            ' ' => '-',
            c if c.is_ascii_alphanumeric() || c == '-' || c == '.' => c.to_ascii_lowercase(),
            _ => continue,
        };
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }
    slug
}

fn template(name: &str) -> String {
    format!(
        "/**\n * @name {}\n * @description \n */\n\nconst value = await arg(\"Say something\");\nnotify(\"{}\", value);\n",
        name,
        name.replace('"', "\\\"")
    )
}

/// Write `<slug>.ts` from the starter template.
pub fn create(scripts_dir: &Path, name: &str) -> Result<PathBuf> {
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(HostError::Config(format!("'{}' is not a usable script name", name)));
    }
    let path = scripts_dir.join(format!("{}.ts", slug));
    write_new(&path, &template(name))?;
    info!(path = %path.display(), "Created script");
    Ok(path)
}

/// Write `contents` to a new script named after `file_name` (gist import).
pub fn create_from_file(scripts_dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf> {
    let stem = file_name.strip_suffix(".ts").unwrap_or(file_name);
    let slug = slugify(stem);
    if slug.is_empty() {
        return Err(HostError::Config(format!("'{}' is not a usable script name", file_name)));
    }
    let path = scripts_dir.join(format!("{}.ts", slug));
    write_new(&path, contents)?;
    info!(path = %path.display(), "Imported script");
    Ok(path)
}

fn write_new(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        let name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        return Err(HostError::ScriptExists(name));
    }
    fs::write(path, contents).map_err(|e| HostError::io(path, e))
}

/// Delete a script's source and compiled artifact.
pub fn remove(scripts_dir: &Path, name: &str) -> Result<()> {
    let path = scripts_dir.join(normalize_file_name(name));
    if !path.exists() {
        return Err(HostError::UnknownScript(name.to_string()));
    }
    fs::remove_file(&path).map_err(|e| HostError::io(&path, e))?;

    let artifact = artifact_for(&path);
    if artifact.exists() {
        fs::remove_file(&artifact).map_err(|e| HostError::io(&artifact, e))?;
    }
    info!(path = %path.display(), "Removed script");
    Ok(())
}

/// Move `from` to `<slugify(to)>.ts`, taking the artifact along.
pub fn rename(scripts_dir: &Path, from: &str, to: &str) -> Result<PathBuf> {
    let old = scripts_dir.join(normalize_file_name(from));
    if !old.exists() {
        return Err(HostError::UnknownScript(from.to_string()));
    }
    let slug = slugify(to.strip_suffix(".ts").unwrap_or(to));
    if slug.is_empty() {
        return Err(HostError::Config(format!("'{}' is not a usable script name", to)));
    }
    let new = scripts_dir.join(format!("{}.ts", slug));
    if new == old {
        return Ok(new);
    }
    if new.exists() {
        return Err(HostError::ScriptExists(format!("{}.ts", slug)));
    }

    fs::rename(&old, &new).map_err(|e| HostError::io(&old, e))?;
    let old_artifact = artifact_for(&old);
    if old_artifact.exists() {
        let new_artifact = artifact_for(&new);
        fs::rename(&old_artifact, &new_artifact).map_err(|e| HostError::io(&old_artifact, e))?;
    }
    info!(from = %old.display(), to = %new.display(), "Renamed script");
    Ok(new)
}
