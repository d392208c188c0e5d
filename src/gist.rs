//! Importing a script from a GitHub gist after the user confirms.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tracing::{info, warn};

use crate::broker::PromptCoordinator;
use crate::scripts;

const GIST_API: &str = "https://api.github.com/gists";

/// One file taken from a gist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GistFile {
    pub file_name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Added(PathBuf),
    Cancelled,
    InvalidGist,
    FetchFailed(String),
    AlreadyExists(String),
}

/// Fetches the gist API document for an id.
pub trait GistFetcher: Send + Sync {
    fn fetch(&self, id: &str) -> anyhow::Result<Value>;
}

pub struct UreqGistFetcher;

impl GistFetcher for UreqGistFetcher {
    fn fetch(&self, id: &str) -> anyhow::Result<Value> {
        let url = format!("{}/{}", GIST_API, id);
        let mut body = ureq::get(&url)
            .header("User-Agent", "script-kit-runner")
            .header("Accept", "application/vnd.github+json")
            .call()
            .with_context(|| format!("Failed to fetch {}", url))?
            .into_body();
        body.read_json::<Value>()
            .context("Failed to read gist response")
    }
}

/// Last path segment of a gist URL, or the input itself when it is a bare id.
pub fn gist_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let without_query = trimmed.split(['?', '#']).next().unwrap_or_default();
    let id = without_query.trim_end_matches('/').rsplit('/').next()?;
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(id.to_string())
}

/// The alphabetically first file with content
pub fn first_file(gist: &Value) -> Option<GistFile> {
    let files = gist.get("files")?.as_object()?;
    files.iter().find_map(|(name, file)| {
        let content = file.get("content")?.as_str()?;
        let file_name = file
            .get("filename")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string();
        Some(GistFile {
            file_name,
            content: content.to_string(),
        })
    })
}

pub struct GistImporter {
    fetcher: Arc<dyn GistFetcher>,
    prompts: Arc<PromptCoordinator>,
    scripts_dir: PathBuf,
}

impl GistImporter {
    pub fn new(
        fetcher: Arc<dyn GistFetcher>,
        prompts: Arc<PromptCoordinator>,
        scripts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            prompts,
            scripts_dir: scripts_dir.into(),
        }
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Fetch, ask `yes`/`no`, and write the script. Blocks until the user answers.
    pub fn import(&self, input: &str) -> ImportOutcome {
        let Some(id) = gist_id(input) else {
            return ImportOutcome::InvalidGist;
        };

        let gist = match self.fetcher.fetch(&id) {
            Ok(gist) => gist,
            Err(e) => {
                warn!(gist = %id, error = %e, "Gist fetch failed");
                return ImportOutcome::FetchFailed(e.to_string());
            }
        };
        let Some(file) = first_file(&gist) else {
            return ImportOutcome::InvalidGist;
        };

        let ticket = self.prompts.ask(
            &format!("Add {} to your scripts?", file.file_name),
            vec![Value::from("yes"), Value::from("no")],
            None,
        );
        match ticket.wait() {
            Ok(answer) if answer == "yes" => {}
            _ => {
                info!(gist = %id, "Gist import cancelled");
                return ImportOutcome::Cancelled;
            }
        }

        match scripts::create_from_file(&self.scripts_dir, &file.file_name, &file.content) {
            Ok(path) => {
                info!(gist = %id, path = %path.display(), "Imported gist");
                ImportOutcome::Added(path)
            }
            Err(crate::error::HostError::ScriptExists(name)) => ImportOutcome::AlreadyExists(name),
            Err(e) => {
                warn!(gist = %id, error = %e, "Failed to write imported script");
                ImportOutcome::InvalidGist
            }
        }
    }
}
