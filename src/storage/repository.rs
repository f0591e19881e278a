//! Repository identification and persistence (§3 Repository, §4.5
//! "Repository identification").

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::StorageError;
use crate::types::RepositoryId;

#[derive(Debug, Clone, PartialEq)]
pub struct Repository {
    pub id: RepositoryId,
    pub repo_hash: String,
    pub canonical_path: String,
    pub remote_url: Option<String>,
}

/// Hex hash identifying a repository: of the canonicalized remote URL when
/// present, else of the canonical absolute root path. Stable across
/// machines for the same remote, and across processes for the same local
/// path.
pub fn repo_hash(remote_url: Option<&str>, root: &Path) -> String {
    let mut hasher = Sha256::new();
    match remote_url {
        Some(url) => hasher.update(normalize_remote_url(url).as_bytes()),
        None => {
            let canon = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
            hasher.update(canon.to_string_lossy().as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Normalize a git remote URL so that `git@host:org/repo.git`,
/// `https://host/org/repo.git`, and `https://host/org/repo` all hash the
/// same.
fn normalize_remote_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .or_else(|| trimmed.strip_prefix("ssh://git@"))
        .unwrap_or(trimmed);
    let unified = without_scheme.replacen(':', "/", 1);
    let without_git_at = unified.strip_prefix("git@").unwrap_or(&unified);
    without_git_at
        .strip_suffix(".git")
        .unwrap_or(without_git_at)
        .trim_end_matches('/')
        .to_ascii_lowercase()
}

/// Thin hex module so we don't pull in the `hex` crate for one call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

pub fn upsert_repository(
    conn: &rusqlite::Connection,
    repo_hash: &str,
    canonical_path: &str,
    remote_url: Option<&str>,
) -> Result<RepositoryId, StorageError> {
    conn.execute(
        "INSERT INTO repositories(repo_hash, canonical_path, remote_url)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(repo_hash) DO UPDATE SET canonical_path = excluded.canonical_path",
        rusqlite::params![repo_hash, canonical_path, remote_url],
    )
    .map_err(|source| StorageError::Sqlite {
        operation: "upsert_repository",
        source,
    })?;
    let id: i64 = conn
        .query_row(
            "SELECT id FROM repositories WHERE repo_hash = ?1",
            [repo_hash],
            |row| row.get(0),
        )
        .map_err(|source| StorageError::Sqlite {
            operation: "select_repository_id",
            source,
        })?;
    Ok(RepositoryId(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_remote_url_hashes_equal_across_forms() {
        let a = normalize_remote_url("https://github.com/org/repo.git");
        let b = normalize_remote_url("git@github.com:org/repo.git");
        let c = normalize_remote_url("https://github.com/org/repo");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn repo_hash_is_stable_for_same_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let h1 = repo_hash(None, dir.path());
        let h2 = repo_hash(None, dir.path());
        assert_eq!(h1, h2);
    }

    #[test]
    fn repo_hash_differs_between_remote_and_local_identity() {
        let dir = tempfile::tempdir().unwrap();
        let by_path = repo_hash(None, dir.path());
        let by_remote = repo_hash(Some("https://github.com/org/repo"), dir.path());
        assert_ne!(by_path, by_remote);
    }
}
