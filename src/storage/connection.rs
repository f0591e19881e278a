//! Connection management: one long-lived writer connection owned by the
//! indexing worker, and a pool of short-lived reader connections for query
//! paths. Both sides of the same WAL-mode database file (§4.2, §5).

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::StorageError;

pub type ReaderPool = r2d2::Pool<SqliteConnectionManager>;

fn apply_pragmas(conn: &Connection) -> Result<(), StorageError> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|source| StorageError::Sqlite {
            operation: "set_journal_mode",
            source,
        })?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|source| StorageError::Sqlite {
            operation: "set_foreign_keys",
            source,
        })?;
    conn.pragma_update(None, "busy_timeout", 5_000)
        .map_err(|source| StorageError::Sqlite {
            operation: "set_busy_timeout",
            source,
        })?;
    Ok(())
}

/// Open the single writer connection and run migrations up to `target`.
pub fn open_writer(path: &Path, target: u32) -> Result<Connection, StorageError> {
    let mut conn = Connection::open(path).map_err(|source| StorageError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    apply_pragmas(&conn)?;
    super::migrations::migrate_to(&mut conn, target)?;
    Ok(conn)
}

/// Build a reader pool against the same database file. Readers never block
/// the writer and vice versa under WAL mode.
pub fn open_reader_pool(path: &Path) -> Result<ReaderPool, StorageError> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "query_only", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;
        Ok(())
    });
    r2d2::Pool::builder()
        .max_size(8)
        .build(manager)
        .map_err(|e| StorageError::Pool(e.to_string()))
}

/// A shared handle to the writer connection, passed to the indexing worker.
/// Wrapped in a `parking_lot::Mutex` because `rusqlite::Connection` is
/// `Send` but not `Sync`, and only one writer transaction may be open at a
/// time regardless.
#[derive(Clone)]
pub struct WriterHandle(pub Arc<Mutex<Connection>>);

impl WriterHandle {
    pub fn new(conn: Connection) -> Self {
        Self(Arc::new(Mutex::new(conn)))
    }
}
