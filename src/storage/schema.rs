//! Schema DDL and the catalog-introspection helper every migration uses to
//! emulate `ADD COLUMN IF NOT EXISTS` (SQLite has no such clause).
//!
//! Per the REDESIGN FLAGS in §9: "Ad-hoc IF NOT EXISTS emulation ...
//! re-express as a small catalog-introspection helper used uniformly by
//! every migration."

use rusqlite::Connection;

use crate::error::StorageError;

/// True if `table` already has a column named `column`.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, StorageError> {
    let sql = format!("PRAGMA table_info({table})");
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|source| StorageError::Sqlite {
            operation: "pragma_table_info",
            source,
        })?;
    let mut rows = stmt
        .query([])
        .map_err(|source| StorageError::Sqlite {
            operation: "pragma_table_info",
            source,
        })?;
    while let Some(row) = rows.next().map_err(|source| StorageError::Sqlite {
        operation: "pragma_table_info",
        source,
    })? {
        let name: String = row.get(1).map_err(|source| StorageError::Sqlite {
            operation: "pragma_table_info",
            source,
        })?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// True if a table with this name exists in the database.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, StorageError> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type IN ('table','view') AND name = ?1)",
            [table],
            |row| row.get(0),
        )
        .map_err(|source| StorageError::Sqlite {
            operation: "table_exists",
            source,
        })?;
    Ok(exists)
}

/// `ALTER TABLE ... ADD COLUMN ...` emulated as idempotent: no-op if the
/// column is already present.
pub fn add_column_if_not_exists(
    conn: &Connection,
    table: &str,
    column: &str,
    column_ddl: &str,
) -> Result<(), StorageError> {
    if column_exists(conn, table, column)? {
        return Ok(());
    }
    let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {column_ddl}");
    conn.execute(&sql, []).map_err(|source| StorageError::Sqlite {
        operation: "add_column_if_not_exists",
        source,
    })?;
    Ok(())
}

/// The set of tables the rest of the crate assumes exist once the schema is
/// at the current version. Used by `health()` and by discovery's
/// validation step.
pub const EXPECTED_TABLES: &[&str] = &[
    "repositories",
    "files",
    "symbols",
    "symbol_references",
    "imports",
    "file_moves",
    "fts_symbols",
    "fts_code",
    "symbol_trigrams",
    "embeddings",
    "query_cache",
    "parse_cache",
    "migrations",
    "index_config",
];
