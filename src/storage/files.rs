//! File persistence: upsert, soft-delete, and move detection (§3 File,
//! §3 File move, §4.2 Key operations).

use rusqlite::{OptionalExtension, params};

use crate::error::StorageError;
use crate::types::{FileId, MoveKind, RepositoryId};

#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: FileId,
    pub repository_id: RepositoryId,
    pub relative_path: String,
    pub language: Option<String>,
    pub size: u64,
    pub mtime: i64,
    pub content_hash: Option<String>,
    pub is_deleted: bool,
}

fn sqlite_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> StorageError {
    move |source| StorageError::Sqlite { operation, source }
}

/// Insert or update the `(repository_id, relative_path)` row. If the row
/// already exists, its content hash/size/mtime are updated. Returns the
/// file id along with whether the content hash actually changed (the
/// caller uses this to decide whether `replace_symbols` is needed — this
/// is the content-hash gate from §4.4 step 3).
pub fn upsert_file(
    conn: &rusqlite::Connection,
    repository_id: RepositoryId,
    relative_path: &str,
    content_hash: &str,
    language: Option<&str>,
    size: u64,
    mtime: i64,
) -> Result<(FileId, bool), StorageError> {
    let existing: Option<(i64, Option<String>)> = conn
        .query_row(
            "SELECT id, content_hash FROM files WHERE repository_id = ?1 AND relative_path = ?2",
            params![repository_id.0, relative_path],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(sqlite_err("upsert_file_lookup"))?;

    match existing {
        Some((id, prev_hash)) => {
            let changed = prev_hash.as_deref() != Some(content_hash);
            conn.execute(
                "UPDATE files SET content_hash = ?1, hash = ?1, language = ?2, size = ?3, mtime = ?4,
                 is_deleted = 0, deleted_at = NULL, indexed_at = strftime('%s','now')
                 WHERE id = ?5",
                params![content_hash, language, size as i64, mtime, id],
            )
            .map_err(sqlite_err("upsert_file_update"))?;
            Ok((FileId(id), changed))
        }
        None => {
            conn.execute(
                "INSERT INTO files(repository_id, relative_path, language, size, mtime, hash, content_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    repository_id.0,
                    relative_path,
                    language,
                    size as i64,
                    mtime,
                    content_hash,
                ],
            )
            .map_err(sqlite_err("upsert_file_insert"))?;
            let id = conn.last_insert_rowid();
            Ok((FileId(id), true))
        }
    }
}

pub fn mark_file_deleted(conn: &rusqlite::Connection, file_id: FileId) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE files SET is_deleted = 1, deleted_at = strftime('%s','now') WHERE id = ?1",
        params![file_id.0],
    )
    .map_err(sqlite_err("mark_file_deleted"))?;
    Ok(())
}

/// A non-deleted file under a *different* path sharing `content_hash`,
/// whose own path record no longer exists as `old_candidate_path` — the
/// caller has already determined `new_rel_path` is a fresh path.
pub struct MoveCandidate {
    pub file_id: FileId,
    pub old_path: String,
}

pub fn find_move_candidate(
    conn: &rusqlite::Connection,
    repository_id: RepositoryId,
    content_hash: &str,
    new_rel_path: &str,
) -> Result<Option<MoveCandidate>, StorageError> {
    conn.query_row(
        "SELECT id, relative_path FROM files
         WHERE repository_id = ?1 AND content_hash = ?2 AND relative_path != ?3 AND is_deleted = 1
         ORDER BY deleted_at DESC LIMIT 1",
        params![repository_id.0, content_hash, new_rel_path],
        |row| {
            Ok(MoveCandidate {
                file_id: FileId(row.get(0)?),
                old_path: row.get(1)?,
            })
        },
    )
    .optional()
    .map_err(sqlite_err("find_move_candidate"))
}

/// Append a `file_moves` row and repoint the existing file record at the
/// new path in place, clearing its soft-delete flag. Symbol rows for the
/// file id are left untouched — a move never re-extracts.
pub fn record_move(
    conn: &rusqlite::Connection,
    repository_id: RepositoryId,
    candidate: &MoveCandidate,
    new_rel_path: &str,
    content_hash: &str,
) -> Result<(), StorageError> {
    let kind = MoveKind::classify(&candidate.old_path, new_rel_path);
    conn.execute(
        "INSERT INTO file_moves(repository_id, old_path, new_path, content_hash, move_kind)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            repository_id.0,
            candidate.old_path,
            new_rel_path,
            content_hash,
            kind.as_str(),
        ],
    )
    .map_err(sqlite_err("record_move_insert"))?;

    conn.execute(
        "UPDATE files SET relative_path = ?1, is_deleted = 0, deleted_at = NULL WHERE id = ?2",
        params![new_rel_path, candidate.file_id.0],
    )
    .map_err(sqlite_err("record_move_repoint"))?;

    // `fts_code` is keyed by path, not file id; a move leaves the content
    // row behind under the old path unless it's repointed too.
    conn.execute(
        "UPDATE fts_code SET file_path = ?1 WHERE file_path = ?2",
        params![new_rel_path, candidate.old_path],
    )
    .map_err(sqlite_err("record_move_repoint_fts"))?;
    Ok(())
}

pub fn get_file(conn: &rusqlite::Connection, file_id: FileId) -> Result<Option<FileRecord>, StorageError> {
    conn.query_row(
        "SELECT id, repository_id, relative_path, language, size, mtime, content_hash, is_deleted
         FROM files WHERE id = ?1",
        params![file_id.0],
        |row| {
            Ok(FileRecord {
                id: FileId(row.get(0)?),
                repository_id: RepositoryId(row.get(1)?),
                relative_path: row.get(2)?,
                language: row.get(3)?,
                size: row.get::<_, i64>(4)? as u64,
                mtime: row.get(5)?,
                content_hash: row.get(6)?,
                is_deleted: row.get::<_, i64>(7)? != 0,
            })
        },
    )
    .optional()
    .map_err(sqlite_err("get_file"))
}

pub fn get_file_by_path(
    conn: &rusqlite::Connection,
    repository_id: RepositoryId,
    relative_path: &str,
) -> Result<Option<FileRecord>, StorageError> {
    conn.query_row(
        "SELECT id, repository_id, relative_path, language, size, mtime, content_hash, is_deleted
         FROM files WHERE repository_id = ?1 AND relative_path = ?2",
        params![repository_id.0, relative_path],
        |row| {
            Ok(FileRecord {
                id: FileId(row.get(0)?),
                repository_id: RepositoryId(row.get(1)?),
                relative_path: row.get(2)?,
                language: row.get(3)?,
                size: row.get::<_, i64>(4)? as u64,
                mtime: row.get(5)?,
                content_hash: row.get(6)?,
                is_deleted: row.get::<_, i64>(7)? != 0,
            })
        },
    )
    .optional()
    .map_err(sqlite_err("get_file_by_path"))
}

/// Hard-delete files soft-deleted longer than `retention_secs` ago, and
/// everything that cascades from them (symbols, references, embeddings).
/// The maintenance pass described in SPEC_FULL §3.
pub fn hard_delete_expired(conn: &rusqlite::Connection, retention_secs: u64) -> Result<u64, StorageError> {
    if retention_secs == u64::MAX {
        return Ok(0);
    }
    let cutoff = chrono::Utc::now().timestamp() - retention_secs as i64;
    let rows: Vec<(i64, String)> = {
        let mut stmt = conn
            .prepare("SELECT id, relative_path FROM files WHERE is_deleted = 1 AND deleted_at < ?1")
            .map_err(sqlite_err("hard_delete_select"))?;
        let rows = stmt
            .query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(sqlite_err("hard_delete_select"))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_err("hard_delete_select"))?
    };
    for (id, relative_path) in &rows {
        conn.execute("DELETE FROM symbol_references WHERE file_id = ?1", params![id])
            .map_err(sqlite_err("hard_delete_refs"))?;
        conn.execute("DELETE FROM imports WHERE file_id = ?1", params![id])
            .map_err(sqlite_err("hard_delete_imports"))?;
        conn.execute(
            "DELETE FROM embeddings WHERE file_id = ?1 OR symbol_id IN (SELECT id FROM symbols WHERE file_id = ?1)",
            params![id],
        )
        .map_err(sqlite_err("hard_delete_embeddings"))?;
        conn.execute("DELETE FROM symbols WHERE file_id = ?1", params![id])
            .map_err(sqlite_err("hard_delete_symbols"))?;
        conn.execute("DELETE FROM fts_code WHERE file_path = ?1", params![relative_path])
            .map_err(sqlite_err("hard_delete_fts_code"))?;
        conn.execute("DELETE FROM files WHERE id = ?1", params![id])
            .map_err(sqlite_err("hard_delete_files"))?;
    }
    Ok(rows.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::{CURRENT_SCHEMA_VERSION, migrate_to};
    use crate::storage::repository::upsert_repository;
    use rusqlite::Connection;

    fn setup() -> (Connection, RepositoryId) {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to(&mut conn, CURRENT_SCHEMA_VERSION).unwrap();
        let repo_id = upsert_repository(&conn, "hash", "/tmp/repo", None).unwrap();
        (conn, repo_id)
    }

    #[test]
    fn upsert_file_reports_hash_change_on_first_insert_and_on_content_change() {
        let (conn, repo) = setup();
        let (id1, changed1) = upsert_file(&conn, repo, "a.rs", "hash1", Some("rust"), 10, 0).unwrap();
        assert!(changed1);
        let (id2, changed2) = upsert_file(&conn, repo, "a.rs", "hash1", Some("rust"), 10, 0).unwrap();
        assert_eq!(id1, id2);
        assert!(!changed2, "same content hash must not be reported as changed");
        let (id3, changed3) = upsert_file(&conn, repo, "a.rs", "hash2", Some("rust"), 11, 1).unwrap();
        assert_eq!(id1, id3);
        assert!(changed3);
    }

    #[test]
    fn move_detection_finds_deleted_file_with_same_hash() {
        let (conn, repo) = setup();
        let (file_id, _) = upsert_file(&conn, repo, "src/x.py", "samehash", Some("python"), 5, 0).unwrap();
        mark_file_deleted(&conn, file_id).unwrap();

        let candidate = find_move_candidate(&conn, repo, "samehash", "src/y.py").unwrap();
        assert!(candidate.is_some());
        let candidate = candidate.unwrap();
        assert_eq!(candidate.old_path, "src/x.py");

        record_move(&conn, repo, &candidate, "src/y.py", "samehash").unwrap();
        let moved = get_file(&conn, file_id).unwrap().unwrap();
        assert_eq!(moved.relative_path, "src/y.py");
        assert!(!moved.is_deleted);

        let move_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM file_moves", [], |r| r.get(0))
            .unwrap();
        assert_eq!(move_count, 1);
    }
}
