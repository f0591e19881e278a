//! Index discovery (§4.5): resolve a repository root to a compatible,
//! on-disk index without the caller needing to know where indexes live.
//! A priority-ordered, template-resolved list of candidate directories is
//! walked in order; the first candidate that both exists and passes
//! compatibility validation wins. Nothing here creates an index — that's
//! the watcher/indexing worker's job (§4.4); discovery only locates and
//! validates one that already exists.
//!
//! Grounded on the teacher's `IndexPersistence` path-resolution logic
//! (`src/persistence.rs`), generalized from a single fixed location into
//! the multi-path search list plus `current`-pointer indirection required
//! here, and supplemented with the manifest sibling that records the
//! embedding-model tag a semantic-aware caller must match.

pub mod manifest;

use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::error::DiscoveryError;
use crate::storage::migrations::{CURRENT_SCHEMA_VERSION, current_version};
use crate::storage::schema::table_exists;

pub use manifest::Manifest;

/// The name of the pointer file inside each candidate directory. Its
/// content, trimmed, is the filename (relative to the same directory) of
/// the active database — indirection that lets an atomic index rebuild
/// swap the pointer instead of the database file itself (§4.5 "atomic
/// index swaps").
const CURRENT_POINTER_FILE: &str = "current";
const DEFAULT_DB_FILENAME: &str = "index.db";

#[derive(Debug, Clone)]
pub struct DiscoveredIndex {
    pub db_path: PathBuf,
    pub manifest: Manifest,
}

/// Template-resolved candidate directories, highest priority first:
/// an explicit `MCP_INDEX_STORAGE_PATH`/`storage_path` override, then
/// `MCP_INDEX_PATHS`/`index_paths` templates (`{repo_hash}`, `{repo}`,
/// `{project}` substituted), then the built-in default under the user's
/// data directory.
pub fn candidate_dirs(settings: &Settings, repo_root: &Path, repo_hash: &str) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    let project = repo_root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("project")
        .to_string();

    if let Some(storage_path) = &settings.storage.storage_path {
        candidates.push(storage_path.clone());
    }

    if settings.storage.enable_multi_path {
        if let Some(templates) = &settings.storage.index_paths {
            for template in templates.split(':').filter(|t| !t.is_empty()) {
                candidates.push(PathBuf::from(resolve_template(
                    template,
                    repo_hash,
                    repo_root,
                    &project,
                )));
            }
        }
    }

    if let Some(data_dir) = dirs::data_local_dir() {
        candidates.push(data_dir.join("codeindex").join(repo_hash));
    }
    candidates.push(repo_root.join(".codeindex"));

    candidates
}

fn resolve_template(template: &str, repo_hash: &str, repo_root: &Path, project: &str) -> String {
    template
        .replace("{repo_hash}", repo_hash)
        .replace("{repo}", &repo_root.to_string_lossy())
        .replace("{project}", project)
}

/// §4.5: locate and validate a compatible index for `repo_root`.
/// `require_semantic_tag`, when set, rejects a manifest whose
/// `embedding_model_tag` doesn't match — a schema-compatible index with
/// the wrong (or no) embeddings still works for lookup/BM25, just not for
/// the semantic tier.
pub fn discover(
    settings: &Settings,
    repo_root: &Path,
    repo_hash: &str,
    require_semantic_tag: Option<&str>,
) -> Result<DiscoveredIndex, DiscoveryError> {
    let mut attempted = Vec::new();
    for dir in candidate_dirs(settings, repo_root, repo_hash) {
        let db_path = resolve_current(&dir);
        attempted.push(db_path.clone());
        match validate(&db_path, settings.storage.min_supported_schema_version, require_semantic_tag) {
            Ok(manifest) => return Ok(DiscoveredIndex { db_path, manifest }),
            Err(_) => continue,
        }
    }
    Err(DiscoveryError::NoneFound { attempted })
}

/// Read the `current` pointer in `dir`, falling back to the default
/// filename when no pointer file exists yet (a fresh, never-rebuilt
/// index).
fn resolve_current(dir: &Path) -> PathBuf {
    let pointer = dir.join(CURRENT_POINTER_FILE);
    match std::fs::read_to_string(&pointer) {
        Ok(contents) => dir.join(contents.trim()),
        Err(_) => dir.join(DEFAULT_DB_FILENAME),
    }
}

/// Atomically repoint `dir`'s `current` file at `db_filename` (§4.5
/// "atomic index swaps"): write to a temp file in the same directory,
/// then rename over the pointer, so a reader never observes a
/// half-written pointer.
pub fn set_current(dir: &Path, db_filename: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".{CURRENT_POINTER_FILE}.tmp"));
    std::fs::write(&tmp, db_filename)?;
    std::fs::rename(&tmp, dir.join(CURRENT_POINTER_FILE))
}

fn validate(
    db_path: &Path,
    min_supported_schema_version: u32,
    require_semantic_tag: Option<&str>,
) -> Result<Manifest, DiscoveryError> {
    if !db_path.is_file() {
        return Err(DiscoveryError::NoneFound {
            attempted: vec![db_path.to_path_buf()],
        });
    }

    let conn = rusqlite::Connection::open_with_flags(db_path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|source| {
            DiscoveryError::Storage(crate::error::StorageError::Open {
                path: db_path.to_path_buf(),
                source,
            })
        })?;

    let found_version = current_version(&conn)?;
    if found_version < min_supported_schema_version || found_version > CURRENT_SCHEMA_VERSION {
        return Err(DiscoveryError::Storage(crate::error::StorageError::SchemaIncompatible {
            found: found_version,
            min_supported: min_supported_schema_version,
            max_supported: CURRENT_SCHEMA_VERSION,
        }));
    }
    if !table_exists(&conn, "files")? {
        return Err(DiscoveryError::Storage(crate::error::StorageError::MissingTable { table: "files" }));
    }

    let manifest = manifest::read(db_path).unwrap_or_else(|_| Manifest::new(found_version, None, String::new()));

    if let Some(wanted_tag) = require_semantic_tag {
        if manifest.embedding_model_tag.as_deref() != Some(wanted_tag) {
            return Err(DiscoveryError::Storage(crate::error::StorageError::SchemaIncompatible {
                found: found_version,
                min_supported: min_supported_schema_version,
                max_supported: CURRENT_SCHEMA_VERSION,
            }));
        }
    }

    Ok(manifest)
}
