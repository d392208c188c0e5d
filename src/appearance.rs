//! Color scheme, font and main-shortcut files under the kit root.

use std::fs;

use serde_json::Value;
use tracing::info;

use crate::error::{HostError, Result};
use crate::setup::{KitPaths, DEFAULT_SHORTCUT};

/// Copy `color-schemes/<name>.json` over `.color-scheme.json`.
///
/// The scheme must be valid JSON; the watcher picks up the change and
/// emits `color-change`.
pub fn set_color_scheme(paths: &KitPaths, name: &str) -> Result<Value> {
    let source = paths.color_schemes_dir().join(format!("{}.json", name));
    let contents = fs::read_to_string(&source).map_err(|e| HostError::io(&source, e))?;
    let scheme: Value = serde_json::from_str(&contents)?;

    let target = paths.color_scheme_file();
    fs::write(&target, contents).map_err(|e| HostError::io(&target, e))?;
    info!(scheme = name, "Color scheme applied");
    Ok(scheme)
}

/// Active scheme; `{}` when the file is missing or unreadable.
pub fn read_color_scheme(paths: &KitPaths) -> Value {
    fs::read_to_string(paths.color_scheme_file())
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(|| Value::Object(Default::default()))
}

pub fn set_font(paths: &KitPaths, font: &str) -> Result<()> {
    let path = paths.font_file();
    fs::write(&path, font.trim()).map_err(|e| HostError::io(&path, e))
}

pub fn read_font(paths: &KitPaths) -> String {
    fs::read_to_string(paths.font_file())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

pub fn set_shortcut(paths: &KitPaths, shortcut: &str) -> Result<()> {
    let path = paths.shortcut_file();
    fs::write(&path, shortcut.trim()).map_err(|e| HostError::io(&path, e))
}

/// Main palette accelerator, `DEFAULT_SHORTCUT` when unset.
pub fn read_shortcut(paths: &KitPaths) -> String {
    match fs::read_to_string(paths.shortcut_file()) {
        Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => DEFAULT_SHORTCUT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn paths() -> (TempDir, KitPaths) {
        let temp = TempDir::new().unwrap();
        let paths = KitPaths::new(temp.path());
        fs::create_dir_all(paths.color_schemes_dir()).unwrap();
        (temp, paths)
    }

    #[test]
    fn test_set_color_scheme_copies_named_file() {
        let (_temp, paths) = paths();
        fs::write(paths.color_schemes_dir().join("night.json"), r##"{"bg":"#000"}"##).unwrap();

        let scheme = set_color_scheme(&paths, "night").unwrap();
        assert_eq!(scheme, json!({"bg": "#000"}));
        assert_eq!(read_color_scheme(&paths), json!({"bg": "#000"}));
    }

    #[test]
    fn test_set_color_scheme_unknown_name() {
        let (_temp, paths) = paths();
        assert!(set_color_scheme(&paths, "missing").is_err());
        assert_eq!(read_color_scheme(&paths), json!({}));
    }

    #[test]
    fn test_font_and_shortcut() {
        let (_temp, paths) = paths();
        assert_eq!(read_shortcut(&paths), DEFAULT_SHORTCUT);

        set_font(&paths, " Fira Code \n").unwrap();
        set_shortcut(&paths, "Ctrl+Shift+Space").unwrap();
        assert_eq!(read_font(&paths), "Fira Code");
        assert_eq!(read_shortcut(&paths), "Ctrl+Shift+Space");
    }
}
