//! Scripts module - the script metadata store and script file management
//!
//! # Module Structure
//!
//! - `types` - `ScriptInfo`, `ScriptFile`, `Author`, `SyncReport`
//! - `metadata` - doc-comment metadata extraction
//! - `store` - `ScriptStore`, the resynchronized in-memory table
//! - `manage` - create / import / remove / rename
//! - `shims` - `bin/` shims and orphaned artifact cleanup

mod manage;
mod metadata;
mod shims;
mod store;
mod types;

pub use manage::{create, create_from_file, remove, rename, slugify};
pub use metadata::{parse_author, parse_script_info};
pub use shims::{remove_orphan_artifacts, sync_bin_dir};
pub use store::{is_script_file, normalize_file_name, ScriptStore, SOURCE_READ_ERROR};
pub use types::{artifact_for, Author, ScriptFile, ScriptInfo, SyncReport};
