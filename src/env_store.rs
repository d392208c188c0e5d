//! Per-install environment values (`env.json`) served to GET_ENV.

use std::path::PathBuf;

use serde_json::Value;

use crate::config::JsonKvFile;
use crate::error::Result;

#[derive(Debug)]
pub struct EnvStore {
    file: JsonKvFile,
}

impl EnvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonKvFile::new(path),
        }
    }

    /// Stored value for `name`. Empty strings count as absent so the user
    /// is asked again; non-string values are returned as their JSON text.
    pub fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(match self.file.get(name)? {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        })
    }

    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        self.file.set(name, Value::String(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_set() {
        let temp = TempDir::new().unwrap();
        let store = EnvStore::new(temp.path().join("env.json"));
        assert_eq!(store.get("NAME").unwrap(), None);

        store.set("NAME", "Ada").unwrap();
        assert_eq!(store.get("NAME").unwrap(), Some("Ada".to_string()));
    }

    #[test]
    fn test_empty_and_non_string_values() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("env.json");
        std::fs::write(&path, r#"{"EMPTY": "", "PORT": 8080, "NIL": null}"#).unwrap();
        let store = EnvStore::new(&path);

        assert_eq!(store.get("EMPTY").unwrap(), None);
        assert_eq!(store.get("NIL").unwrap(), None);
        assert_eq!(store.get("PORT").unwrap(), Some("8080".to_string()));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("env.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(EnvStore::new(&path).get("A").is_err());
    }
}
