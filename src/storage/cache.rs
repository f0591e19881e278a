//! Query cache persistence (§3 Query cache): query-hash to serialized
//! result with a TTL, invalidated wholesale on every committed write.

use rusqlite::{OptionalExtension, params};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

fn sqlite_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> StorageError {
    move |source| StorageError::Sqlite { operation, source }
}

/// Stable hash for a cache key. Combines the raw query text with the
/// caller-visible options that change its result (limit, semantic flag,
/// repository filter) so two differently-scoped queries never collide.
pub fn query_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// An entry whose TTL has elapsed is never returned (§3 invariant); the
/// store purges lazily rather than on a timer.
pub fn get(conn: &rusqlite::Connection, hash: &str) -> Result<Option<String>, StorageError> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT result_json, expires_at FROM query_cache WHERE query_hash = ?1",
            params![hash],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(sqlite_err("cache_get"))?;

    match row {
        Some((json, expires_at)) if expires_at > chrono::Utc::now().timestamp() => Ok(Some(json)),
        Some(_) => {
            conn.execute("DELETE FROM query_cache WHERE query_hash = ?1", params![hash])
                .map_err(sqlite_err("cache_purge_expired"))?;
            Ok(None)
        }
        None => Ok(None),
    }
}

pub fn set(
    conn: &rusqlite::Connection,
    hash: &str,
    result_json: &str,
    ttl_secs: u64,
) -> Result<(), StorageError> {
    let expires_at = chrono::Utc::now().timestamp() + ttl_secs as i64;
    conn.execute(
        "INSERT INTO query_cache(query_hash, result_json, expires_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(query_hash) DO UPDATE SET result_json = excluded.result_json, expires_at = excluded.expires_at",
        params![hash, result_json, expires_at],
    )
    .map_err(sqlite_err("cache_set"))?;
    Ok(())
}

/// Invalidate the whole cache. Called by the indexing worker after every
/// committed file change (§3 Lifecycle, §5 ordering guarantees).
pub fn invalidate_all(conn: &rusqlite::Connection) -> Result<(), StorageError> {
    conn.execute("DELETE FROM query_cache", [])
        .map_err(sqlite_err("cache_invalidate_all"))?;
    Ok(())
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
    fn set_then_get_round_trips() {
        let conn = setup();
        let hash = query_hash(&["greet", "limit=10"]);
        set(&conn, &hash, "[]", 60).unwrap();
        assert_eq!(get(&conn, &hash).unwrap(), Some("[]".to_string()));
    }

    #[test]
    fn expired_entry_is_never_returned() {
        let conn = setup();
        let hash = query_hash(&["greet"]);
        set(&conn, &hash, "[]", 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(get(&conn, &hash).unwrap(), None);
    }

    #[test]
    fn invalidate_all_clears_every_entry() {
        let conn = setup();
        set(&conn, &query_hash(&["a"]), "[]", 60).unwrap();
        set(&conn, &query_hash(&["b"]), "[]", 60).unwrap();
        invalidate_all(&conn).unwrap();
        assert_eq!(get(&conn, &query_hash(&["a"])).unwrap(), None);
        assert_eq!(get(&conn, &query_hash(&["b"])).unwrap(), None);
    }
}
