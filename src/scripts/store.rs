//! In-memory table of known scripts, resynchronized from the scripts dir.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use glob::glob;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use super::metadata::parse_script_info;
use super::types::{artifact_for, ScriptFile, ScriptInfo, SyncReport};

/// Text returned by `source()` when a script cannot be read
pub const SOURCE_READ_ERROR: &str = "Error";

pub struct ScriptStore {
    scripts_dir: PathBuf,
    scripts: RwLock<BTreeMap<String, ScriptFile>>,
    syncing: AtomicBool,
    source_ttl: Duration,
    source_cache: Mutex<HashMap<String, (Instant, String)>>,
}

/// Resets the in-progress flag however `sync` returns
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// `*.ts`, excluding declaration and module files
pub fn is_script_file(file_name: &str) -> bool {
    file_name.ends_with(".ts") && !file_name.ends_with(".d.ts") && !file_name.ends_with(".module.ts")
}

/// Accepts `greet` or `greet.ts`
pub fn normalize_file_name(name: &str) -> String {
    if name.ends_with(".ts") {
        name.to_string()
    } else {
        format!("{}.ts", name)
    }
}

impl ScriptStore {
    pub fn new(scripts_dir: impl Into<PathBuf>, source_ttl: Duration) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            scripts: RwLock::new(BTreeMap::new()),
            syncing: AtomicBool::new(false),
            source_ttl,
            source_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Rescan the scripts dir and replace the table.
    ///
    /// Returns `None` without scanning if another sync is in progress.
    #[instrument(level = "debug", skip(self), fields(dir = %self.scripts_dir.display()))]
    pub fn sync(&self) -> Option<SyncReport> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Script sync already in progress, skipping");
            return None;
        }
        let _guard = SyncGuard(&self.syncing);

        let scanned = self.scan();
        let mut report = SyncReport::default();
        {
            let mut scripts = self.scripts.write();
            for (file, script) in &scanned {
                match scripts.get(file) {
                    None => report.added.push(file.clone()),
                    Some(old) if old.modified != script.modified || old.info != script.info => {
                        report.changed.push(file.clone())
                    }
                    Some(_) => {}
                }
            }
            report.removed = scripts
                .keys()
                .filter(|file| !scanned.contains_key(*file))
                .cloned()
                .collect();
            *scripts = scanned;
        }

        if !report.is_empty() {
            let mut cache = self.source_cache.lock();
            for file in report.changed.iter().chain(report.removed.iter()) {
                cache.remove(file);
            }
        }

        debug!(
            added = report.added.len(),
            changed = report.changed.len(),
            removed = report.removed.len(),
            "Scripts synced"
        );
        Some(report)
    }

    fn scan(&self) -> BTreeMap<String, ScriptFile> {
        let pattern = self.scripts_dir.join("*.ts");
        let pattern_str = pattern.to_string_lossy().to_string();
        let mut found = BTreeMap::new();

        let paths = match glob(&pattern_str) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, pattern = %pattern_str, "Failed to glob scripts directory");
                return found;
            }
        };

        for path in paths.filter_map(|p| p.ok()) {
            let Some(file) = path.file_name().and_then(|f| f.to_str()).map(String::from) else {
                continue;
            };
            if !is_script_file(&file) || !path.is_file() {
                continue;
            }
            // unreadable files are left out, the next change retries them
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Failed to read script");
                    continue;
                }
            };
            let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
            found.insert(
                file.clone(),
                ScriptFile {
                    info: parse_script_info(&file, &content),
                    artifact: artifact_for(&path),
                    path,
                    modified,
                },
            );
        }
        found
    }

    pub fn get(&self, name: &str) -> Option<ScriptFile> {
        self.scripts.read().get(&normalize_file_name(name)).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts.read().contains_key(&normalize_file_name(name))
    }

    /// Snapshot of every known script
    pub fn files(&self) -> Vec<ScriptFile> {
        self.scripts.read().values().cloned().collect()
    }

    /// Metadata records sorted by display name
    pub fn list(&self) -> Vec<ScriptInfo> {
        let mut infos: Vec<ScriptInfo> = self.scripts.read().values().map(|s| s.info.clone()).collect();
        infos.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.file.cmp(&b.file)));
        infos
    }

    /// Source text, served from a short-lived cache.
    pub fn source(&self, name: &str) -> String {
        let file = normalize_file_name(name);
        let mut cache = self.source_cache.lock();
        if let Some((read_at, text)) = cache.get(&file) {
            if read_at.elapsed() < self.source_ttl {
                return text.clone();
            }
        }
        let text = fs::read_to_string(self.scripts_dir.join(&file))
            .unwrap_or_else(|_| SOURCE_READ_ERROR.to_string());
        cache.insert(file, (Instant::now(), text.clone()));
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store() -> (TempDir, ScriptStore) {
        let temp = TempDir::new().unwrap();
        let store = ScriptStore::new(temp.path(), Duration::from_secs(60));
        (temp, store)
    }

    #[test]
    fn test_sync_filters_and_reports() {
        let (temp, store) = store();
        fs::write(temp.path().join("b.ts"), "/** @name Beta */").unwrap();
        fs::write(temp.path().join("a.ts"), "/** @name alpha */").unwrap();
        fs::write(temp.path().join("types.d.ts"), "").unwrap();
        fs::write(temp.path().join("lib.module.ts"), "").unwrap();
        fs::write(temp.path().join("a.js"), "").unwrap();

        let report = store.sync().unwrap();
        assert_eq!(report.added, vec!["a.ts", "b.ts"]);

        let names: Vec<String> = store.list().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["alpha", "Beta"]);
        assert!(store.get("a").is_some());
        assert!(store.get("types.d.ts").is_none());
        assert_eq!(store.get("a.ts").unwrap().artifact, temp.path().join("a.js"));
    }

    #[test]
    fn test_sync_detects_changes_and_removals() {
        let (temp, store) = store();
        fs::write(temp.path().join("a.ts"), "/** @name One */").unwrap();
        fs::write(temp.path().join("b.ts"), "").unwrap();
        store.sync().unwrap();

        fs::write(temp.path().join("a.ts"), "/** @name Two */").unwrap();
        fs::remove_file(temp.path().join("b.ts")).unwrap();
        let report = store.sync().unwrap();

        assert_eq!(report.changed, vec!["a.ts"]);
        assert_eq!(report.removed, vec!["b.ts"]);
        assert_eq!(store.get("a").unwrap().info.name, "Two");
    }

    #[test]
    fn test_sync_is_guarded() {
        let (_temp, store) = store();
        store.syncing.store(true, Ordering::Release);
        assert!(store.sync().is_none());
        store.syncing.store(false, Ordering::Release);
        assert!(store.sync().is_some());
    }

    #[test]
    fn test_source_cache_and_read_error() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(ScriptStore::new(temp.path(), Duration::from_secs(60)));
        fs::write(temp.path().join("a.ts"), "first").unwrap();

        assert_eq!(store.source("a"), "first");
        fs::write(temp.path().join("a.ts"), "second").unwrap();
        assert_eq!(store.source("a"), "first");

        assert_eq!(store.source("missing"), SOURCE_READ_ERROR);
    }

    #[test]
    fn test_source_cache_expires() {
        let temp = TempDir::new().unwrap();
        let store = ScriptStore::new(temp.path(), Duration::ZERO);
        fs::write(temp.path().join("a.ts"), "first").unwrap();
        assert_eq!(store.source("a.ts"), "first");
        fs::write(temp.path().join("a.ts"), "second").unwrap();
        assert_eq!(store.source("a.ts"), "second");
    }
}
