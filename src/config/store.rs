//! Flat JSON key/value documents.
//!
//! Each file is one JSON object. Every write re-reads the file, updates one
//! key and writes the whole object back. Writers inside this process are
//! serialized by a per-file lock; writers in other processes still race and
//! the later write wins.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::{HostError, Result};

#[derive(Debug)]
pub struct JsonKvFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonKvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whole document; a missing, empty or non-object file reads as `{}`.
    pub fn read(&self) -> Result<Map<String, Value>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(HostError::io(&self.path, e)),
        };
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read()?.remove(key))
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut map = self.read()?;
        map.insert(key.to_string(), value);
        self.write_map(&map)
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.write_lock.lock();
        let mut map = self.read()?;
        let removed = map.remove(key);
        if removed.is_some() {
            self.write_map(&map)?;
        }
        Ok(removed)
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| HostError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(map)?;
        // temp + rename so readers never see a half-written document
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| HostError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| HostError::io(&self.path, e))
    }
}

/// App-level settings in `.config.json` (e.g. `editor`).
#[derive(Debug)]
pub struct AppConfigStore {
    file: JsonKvFile,
}

impl AppConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonKvFile::new(path),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match self.file.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, key = key, "Failed to read app config");
                None
            }
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        self.file.set(key, value)
    }
}
