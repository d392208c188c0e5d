//! Script type definitions

use std::path::PathBuf;
use std::time::SystemTime;

use serde::Serialize;

/// `@author` attribution. Social usernames are derived from `url`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube: Option<String>,
}

/// Declarative metadata from a script's doc-comment block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptInfo {
    /// File name relative to the scripts dir, e.g. `greet.ts`
    pub file: String,
    /// `@name`, or the file stem when absent
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    /// `@uses`, comma-separated capability tags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    pub hidden: bool,
}

/// A known script on disk
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptFile {
    pub info: ScriptInfo,
    pub path: PathBuf,
    /// Compiled sibling (`foo.ts` → `foo.js`)
    pub artifact: PathBuf,
    pub modified: Option<SystemTime>,
}

/// Difference between two scans of the scripts dir
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Files whose source is new or different and needs a rebuild
    pub fn needs_build(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.changed.iter())
    }
}

/// Compiled artifact path for a source path
pub fn artifact_for(source: &std::path::Path) -> PathBuf {
    source.with_extension("js")
}
