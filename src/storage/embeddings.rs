//! Embedding row persistence (§3 Embedding row). Only exercised when the
//! `semantic` feature is enabled and a [`crate::plugin::SemanticSearcher`]
//! is configured; the table and its uniqueness index exist unconditionally
//! so a later `semantic=true` query never meets an incompatible schema.

use rusqlite::params;

use crate::error::StorageError;
use crate::types::{FileId, SymbolId};

fn sqlite_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> StorageError {
    move |source| StorageError::Sqlite { operation, source }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingKey {
    pub file_id: Option<FileId>,
    pub symbol_id: Option<SymbolId>,
    pub chunk_start: u32,
    pub chunk_end: u32,
}

/// Insert an embedding row. Duplicate `(file_id, symbol_id, chunk_start,
/// chunk_end)` keys supersede the prior row per §3's uniqueness invariant;
/// the unique index from migration v3 makes `ON CONFLICT DO UPDATE` the
/// natural expression of "duplicate inserts supersede".
pub fn upsert_embedding(
    conn: &rusqlite::Connection,
    key: &EmbeddingKey,
    vector: &[u8],
    model_version: &str,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO embeddings(file_id, symbol_id, chunk_start, chunk_end, vector, model_version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(coalesce(file_id, -1), coalesce(symbol_id, -1), chunk_start, chunk_end)
         DO UPDATE SET vector = excluded.vector, model_version = excluded.model_version",
        params![
            key.file_id.map(|id| id.0),
            key.symbol_id.map(|id| id.0),
            key.chunk_start,
            key.chunk_end,
            vector,
            model_version,
        ],
    )
    .map_err(sqlite_err("upsert_embedding"))?;
    Ok(())
}

pub fn count_for_model(conn: &rusqlite::Connection, model_version: &str) -> Result<u64, StorageError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM embeddings WHERE model_version = ?1",
            params![model_version],
            |row| row.get(0),
        )
        .map_err(sqlite_err("count_embeddings_for_model"))?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::{CURRENT_SCHEMA_VERSION, migrate_to};
    use rusqlite::Connection;

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to(&mut conn, CURRENT_SCHEMA_VERSION).unwrap();
        conn
    }

    #[test]
    fn duplicate_key_supersedes_rather_than_duplicates() {
        let conn = setup();
        let key = EmbeddingKey {
            file_id: Some(FileId(1)),
            symbol_id: None,
            chunk_start: 0,
            chunk_end: 10,
        };
        upsert_embedding(&conn, &key, &[0u8], "m1").unwrap();
        upsert_embedding(&conn, &key, &[1u8], "m1").unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
        let vector: Vec<u8> = conn
            .query_row("SELECT vector FROM embeddings", [], |r| r.get(0))
            .unwrap();
        assert_eq!(vector, vec![1u8]);
    }
}
