//! The JSON manifest sibling that sits next to every index database file
//! (§4.5 "manifest"): what schema version it was built at, what embedding
//! model tagged its vectors (if any), and which repository it belongs to.
//! The database itself is the source of truth for schema version —
//! [`super::validate`] always re-reads it from SQLite — the manifest
//! exists so the embedding-model tag can be checked without opening the
//! database at all.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub embedding_model_tag: Option<String>,
    pub repo_hash: String,
    /// Format of this manifest file itself, independent of `schema_version`
    /// (§6 "on-disk formats"): bumped only when the manifest's own JSON
    /// shape changes, not when the database schema does.
    #[serde(default = "default_manifest_version")]
    pub manifest_version: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

fn default_manifest_version() -> String {
    "1".to_string()
}

impl Manifest {
    /// Build a manifest with today's manifest format and no VCS metadata,
    /// the common case for a freshly built index where the caller doesn't
    /// track commit/branch.
    pub fn new(schema_version: u32, embedding_model_tag: Option<String>, repo_hash: String) -> Self {
        Self {
            schema_version,
            embedding_model_tag,
            repo_hash,
            manifest_version: default_manifest_version(),
            created_at: None,
            commit: None,
            branch: None,
        }
    }
}

fn sidecar_path(db_path: &Path) -> std::path::PathBuf {
    let mut path = db_path.to_path_buf();
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.set_file_name(format!("{file_name}.manifest.json"));
    path
}

pub fn read(db_path: &Path) -> std::io::Result<Manifest> {
    let raw = std::fs::read_to_string(sidecar_path(db_path))?;
    serde_json::from_str(&raw).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Write-once-per-build: the maintenance/reindex pass calls this exactly
/// once after a build completes, never incrementally (§4.5 "manifest ...
/// write-once").
pub fn write(db_path: &Path, manifest: &Manifest) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(sidecar_path(db_path), json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        let manifest = Manifest::new(3, Some("model-x".to_string()), "abc123".to_string());
        write(&db_path, &manifest).unwrap();
        let read_back = read(&db_path).unwrap();
        assert_eq!(read_back, manifest);
    }

    #[test]
    fn sidecar_path_sits_next_to_the_database_file() {
        let path = sidecar_path(Path::new("/tmp/foo/index.db"));
        assert_eq!(path, Path::new("/tmp/foo/index.db.manifest.json"));
    }
}
