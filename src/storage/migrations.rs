//! The schema migration ladder (§4.2).
//!
//! `schema_version` is a singleton row; `migrations` is an append-only log
//! of `(from_version, to_version, completed_at, status)`. Applying
//! migration N requires 1..N-1 to already have completed. Every migration
//! is additive and idempotent: running it twice is a no-op, verified by the
//! `IF NOT EXISTS`/`column_exists`/`WHERE ... IS NULL` guards inside each
//! `up`.

use rusqlite::{Connection, params};

use crate::error::StorageError;
use crate::storage::schema::{add_column_if_not_exists, column_exists, table_exists};

pub const CURRENT_SCHEMA_VERSION: u32 = 3;
pub const MIN_SUPPORTED_SCHEMA_VERSION: u32 = 2;

pub trait Migration: Send + Sync {
    fn version(&self) -> u32;
    fn name(&self) -> &'static str;
    fn up(&self, conn: &Connection) -> Result<(), StorageError>;
}

pub struct V1InitialSchema;
pub struct V2RenameTracking;
pub struct V3Hardening;

fn sqlite_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> StorageError {
    move |source| StorageError::Sqlite { operation, source }
}

impl Migration for V1InitialSchema {
    fn version(&self) -> u32 {
        1
    }

    fn name(&self) -> &'static str {
        "initial_schema"
    }

    fn up(&self, conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE TABLE IF NOT EXISTS migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_version INTEGER NOT NULL,
                to_version INTEGER NOT NULL,
                completed_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                status TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS index_config (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repo_hash TEXT NOT NULL UNIQUE,
                canonical_path TEXT NOT NULL,
                remote_url TEXT,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repository_id INTEGER NOT NULL REFERENCES repositories(id),
                relative_path TEXT NOT NULL,
                language TEXT,
                size INTEGER NOT NULL DEFAULT 0,
                mtime INTEGER NOT NULL DEFAULT 0,
                hash TEXT,
                indexed_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                UNIQUE(repository_id, relative_path)
            );

            CREATE TABLE IF NOT EXISTS symbols (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL REFERENCES files(id),
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                start_col INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                end_col INTEGER NOT NULL,
                signature TEXT,
                doc TEXT,
                container TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);
            CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);

            CREATE TABLE IF NOT EXISTS symbol_references (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol_name TEXT NOT NULL,
                file_id INTEGER NOT NULL REFERENCES files(id),
                line INTEGER NOT NULL,
                column INTEGER NOT NULL,
                kind TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_refs_name ON symbol_references(symbol_name);
            CREATE INDEX IF NOT EXISTS idx_refs_file ON symbol_references(file_id);

            CREATE TABLE IF NOT EXISTS imports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL REFERENCES files(id),
                module_path TEXT NOT NULL,
                imported_name TEXT,
                alias TEXT,
                line INTEGER NOT NULL,
                is_relative INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_imports_file ON imports(file_id);

            CREATE VIRTUAL TABLE IF NOT EXISTS fts_symbols USING fts5(
                name, doc, content='', tokenize='porter unicode61'
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS fts_code USING fts5(
                file_path, body, tokenize='porter unicode61'
            );

            CREATE TABLE IF NOT EXISTS symbol_trigrams (
                symbol_id INTEGER NOT NULL REFERENCES symbols(id),
                trigram TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trigrams_value ON symbol_trigrams(trigram);

            CREATE TABLE IF NOT EXISTS embeddings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER REFERENCES files(id),
                symbol_id INTEGER REFERENCES symbols(id),
                chunk_start INTEGER NOT NULL,
                chunk_end INTEGER NOT NULL,
                vector BLOB NOT NULL,
                model_version TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS query_cache (
                query_hash TEXT PRIMARY KEY,
                result_json TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS parse_cache (
                file_hash TEXT PRIMARY KEY,
                language TEXT NOT NULL,
                symbols_json TEXT NOT NULL,
                cached_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE TRIGGER IF NOT EXISTS symbols_ai AFTER INSERT ON symbols BEGIN
                INSERT INTO fts_symbols(rowid, name, doc) VALUES (new.id, new.name, coalesce(new.doc, ''));
            END;
            CREATE TRIGGER IF NOT EXISTS symbols_ad AFTER DELETE ON symbols BEGIN
                INSERT INTO fts_symbols(fts_symbols, rowid, name, doc) VALUES ('delete', old.id, old.name, coalesce(old.doc, ''));
            END;
            CREATE TRIGGER IF NOT EXISTS symbols_au AFTER UPDATE ON symbols BEGIN
                INSERT INTO fts_symbols(fts_symbols, rowid, name, doc) VALUES ('delete', old.id, old.name, coalesce(old.doc, ''));
                INSERT INTO fts_symbols(rowid, name, doc) VALUES (new.id, new.name, coalesce(new.doc, ''));
            END;
            "#,
        )
        .map_err(sqlite_err("v1_initial_schema"))?;
        Ok(())
    }
}

impl Migration for V2RenameTracking {
    fn version(&self) -> u32 {
        2
    }

    fn name(&self) -> &'static str {
        "rename_tracking"
    }

    fn up(&self, conn: &Connection) -> Result<(), StorageError> {
        add_column_if_not_exists(conn, "files", "content_hash", "TEXT")?;
        add_column_if_not_exists(conn, "files", "is_deleted", "INTEGER NOT NULL DEFAULT 0")?;
        add_column_if_not_exists(conn, "files", "deleted_at", "INTEGER")?;

        if !table_exists(conn, "file_moves")? {
            conn.execute_batch(
                r#"
                CREATE TABLE file_moves (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    repository_id INTEGER NOT NULL REFERENCES repositories(id),
                    old_path TEXT NOT NULL,
                    new_path TEXT NOT NULL,
                    content_hash TEXT NOT NULL,
                    move_kind TEXT NOT NULL,
                    moved_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
                );
                CREATE INDEX idx_file_moves_hash ON file_moves(content_hash);
                "#,
            )
            .map_err(sqlite_err("v2_file_moves"))?;
        }
        Ok(())
    }
}

impl Migration for V3Hardening {
    fn version(&self) -> u32 {
        3
    }

    fn name(&self) -> &'static str {
        "hardening"
    }

    fn up(&self, conn: &Connection) -> Result<(), StorageError> {
        // Re-assert v2 additions with IF NOT EXISTS semantics, in case a
        // database jumped straight from v1 to v3.
        add_column_if_not_exists(conn, "files", "content_hash", "TEXT")?;
        add_column_if_not_exists(conn, "files", "is_deleted", "INTEGER NOT NULL DEFAULT 0")?;
        add_column_if_not_exists(conn, "files", "deleted_at", "INTEGER")?;

        // Backfill content_hash from the legacy `hash` column where null.
        if column_exists(conn, "files", "hash")? {
            conn.execute(
                "UPDATE files SET content_hash = hash WHERE content_hash IS NULL AND hash IS NOT NULL",
                [],
            )
            .map_err(sqlite_err("v3_backfill_content_hash"))?;
        }

        // Deduplicate embeddings on the uniqueness scope, keeping the
        // lowest row id per key, before creating the unique index.
        conn.execute(
            r#"
            DELETE FROM embeddings
            WHERE id NOT IN (
                SELECT MIN(id) FROM embeddings
                GROUP BY file_id, symbol_id, chunk_start, chunk_end
            )
            "#,
            [],
        )
        .map_err(sqlite_err("v3_dedupe_embeddings"))?;

        conn.execute(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_embeddings_unique
            ON embeddings(
                coalesce(file_id, -1), coalesce(symbol_id, -1), chunk_start, chunk_end
            )
            "#,
            [],
        )
        .map_err(sqlite_err("v3_embeddings_unique_index"))?;

        conn.execute(
            "INSERT OR REPLACE INTO index_config(key, value) VALUES ('manifest_version', '1')",
            [],
        )
        .map_err(sqlite_err("v3_manifest_version"))?;

        Ok(())
    }
}

pub fn all_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(V1InitialSchema),
        Box::new(V2RenameTracking),
        Box::new(V3Hardening),
    ]
}

/// Read the current `schema_version` singleton, or 0 if the table doesn't
/// exist yet (a brand-new database).
pub fn current_version(conn: &Connection) -> Result<u32, StorageError> {
    if !table_exists(conn, "schema_version")? {
        return Ok(0);
    }
    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .map_err(sqlite_err("current_version"))
        .or_else(|e| match e {
            StorageError::Sqlite {
                source: rusqlite::Error::QueryReturnedNoRows,
                ..
            } => Ok(None),
            other => Err(other),
        })?;
    Ok(version.unwrap_or(0))
}

/// Apply every migration from the database's current version up to
/// `target`, in order, logging each step to the `migrations` table.
/// Idempotent: calling `migrate_to(v)` twice in a row is equivalent to
/// calling it once, because each `up()` itself only ever adds/backfills
/// and every step is individually guarded.
pub fn migrate_to(conn: &mut Connection, target: u32) -> Result<(), StorageError> {
    let tx = conn.transaction().map_err(sqlite_err("begin_migration_tx"))?;
    let from_version = current_version(&tx)?;

    if from_version >= target {
        tx.commit().map_err(sqlite_err("commit_migration_tx"))?;
        return Ok(());
    }

    for migration in all_migrations() {
        if migration.version() <= from_version || migration.version() > target {
            continue;
        }
        let result = migration.up(&tx);
        match result {
            Ok(()) => {
                tx.execute(
                    "INSERT INTO migrations(from_version, to_version, status) VALUES (?1, ?2, 'ok')",
                    params![migration.version() - 1, migration.version()],
                )
                .map_err(sqlite_err("log_migration"))?;
            }
            Err(e) => {
                return Err(StorageError::MigrationFailed {
                    version: migration.version(),
                    name: migration.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    tx.execute(
        "INSERT INTO schema_version(version) VALUES (?1)
         ON CONFLICT(version) DO NOTHING",
        params![target],
    )
    .map_err(sqlite_err("touch_schema_version_unique"))?;
    // schema_version has no UNIQUE/PRIMARY-KEY conflict target beyond the
    // row's own `version` PK, so replace the singleton row outright.
    tx.execute("DELETE FROM schema_version WHERE version != ?1", params![target])
        .map_err(sqlite_err("prune_schema_version"))?;

    tx.commit().map_err(sqlite_err("commit_migration_tx"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn memory_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn migrating_twice_is_idempotent() {
        let mut conn = memory_conn();
        migrate_to(&mut conn, CURRENT_SCHEMA_VERSION).unwrap();
        let version_after_first = current_version(&conn).unwrap();
        migrate_to(&mut conn, CURRENT_SCHEMA_VERSION).unwrap();
        let version_after_second = current_version(&conn).unwrap();
        assert_eq!(version_after_first, version_after_second);
        assert_eq!(version_after_second, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn stepwise_migration_matches_direct_migration() {
        let mut stepwise = memory_conn();
        migrate_to(&mut stepwise, 1).unwrap();
        migrate_to(&mut stepwise, 2).unwrap();
        migrate_to(&mut stepwise, CURRENT_SCHEMA_VERSION).unwrap();

        let mut direct = memory_conn();
        migrate_to(&mut direct, CURRENT_SCHEMA_VERSION).unwrap();

        for table in crate::storage::schema::EXPECTED_TABLES {
            assert_eq!(
                table_exists(&stepwise, table).unwrap(),
                table_exists(&direct, table).unwrap(),
                "table {table} presence differs between stepwise and direct migration"
            );
        }
    }

    #[test]
    fn backfills_content_hash_from_legacy_hash_column() {
        let mut conn = memory_conn();
        migrate_to(&mut conn, 1).unwrap();
        conn.execute(
            "INSERT INTO repositories(repo_hash, canonical_path) VALUES ('r', '/tmp/r')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO files(repository_id, relative_path, hash) VALUES (1, 'a.rs', 'abc123')",
            [],
        )
        .unwrap();
        migrate_to(&mut conn, CURRENT_SCHEMA_VERSION).unwrap();
        let content_hash: String = conn
            .query_row("SELECT content_hash FROM files WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(content_hash, "abc123");
    }

    #[test]
    fn embeddings_unique_index_rejects_duplicate_chunk_key() {
        let mut conn = memory_conn();
        migrate_to(&mut conn, CURRENT_SCHEMA_VERSION).unwrap();
        conn.execute(
            "INSERT INTO embeddings(file_id, symbol_id, chunk_start, chunk_end, vector, model_version)
             VALUES (1, NULL, 0, 10, x'00', 'm1')",
            [],
        )
        .unwrap();
        let second = conn.execute(
            "INSERT INTO embeddings(file_id, symbol_id, chunk_start, chunk_end, vector, model_version)
             VALUES (1, NULL, 0, 10, x'01', 'm1')",
            [],
        );
        assert!(second.is_err());
    }
}
