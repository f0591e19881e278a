//! The storage engine (§4.2): a WAL-mode SQLite database holding files,
//! symbols, references, embeddings, and full-text/trigram indexes behind a
//! versioned migration ladder. [`Store`] is the single owner of the
//! database handle (§3 Ownership) — the indexing worker holds its writer
//! side, query paths hold its reader side, and nothing else touches the
//! file directly.

pub mod cache;
pub mod connection;
pub mod embeddings;
pub mod files;
pub mod migrations;
pub mod repository;
pub mod schema;
pub mod search;
pub mod symbols;
pub mod trigram;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::StorageError;
use migrations::CURRENT_SCHEMA_VERSION;

pub use connection::WriterHandle;
pub use files::FileRecord;
pub use repository::Repository;
pub use search::{Bm25Hit, Corpus, FuzzyHit, HealthReport};

/// Owns the writer connection and a pool of reader connections against the
/// same WAL-mode file. Cheaply `Clone`-able: every clone shares the same
/// writer mutex and reader pool.
#[derive(Clone)]
pub struct Store {
    path: PathBuf,
    writer: WriterHandle,
    readers: connection::ReaderPool,
}

impl Store {
    /// Open (creating if absent) the database at `path` and migrate it to
    /// [`CURRENT_SCHEMA_VERSION`].
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let writer_conn = connection::open_writer(path, CURRENT_SCHEMA_VERSION)?;
        let readers = connection::open_reader_pool(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: WriterHandle::new(writer_conn),
            readers,
        })
    }

    /// An in-memory store, for tests and for the dry-run `index verify`
    /// path when no on-disk database is wanted.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let mut conn = Connection::open_in_memory().map_err(|source| StorageError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::migrate_to(&mut conn, CURRENT_SCHEMA_VERSION)?;
        let writer = WriterHandle::new(conn);
        // r2d2_sqlite can't share an in-memory database across connections,
        // so the "reader pool" for this mode is the same writer mutex,
        // accessed through the same locking path as a real reader would be.
        Ok(Self {
            path: PathBuf::from(":memory:"),
            writer: writer.clone(),
            readers: connection::open_reader_pool(Path::new(":memory:"))
                .unwrap_or_else(|_| in_memory_fallback_pool()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn writer_handle(&self) -> WriterHandle {
        self.writer.clone()
    }

    /// Run `f` with the writer connection locked. The indexing worker is
    /// the only regular caller of this; query paths should prefer
    /// [`Store::with_reader`].
    pub fn with_writer<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StorageError>) -> Result<T, StorageError> {
        let guard = self.writer.0.lock();
        f(&guard)
    }

    /// Run `f` with a short-lived reader connection from the pool. Falls
    /// back to the writer lock if the pool is exhausted or this is the
    /// in-memory test mode, since a blocked reader must never deadlock a
    /// query path (§5 "no component calls blocking ... longer than the
    /// per-request deadline").
    pub fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StorageError>) -> Result<T, StorageError> {
        if self.path == Path::new(":memory:") {
            return self.with_writer(f);
        }
        match self.readers.get() {
            Ok(conn) => f(&conn),
            Err(e) => {
                tracing::warn!(error = %e, "reader pool exhausted, falling back to writer connection");
                self.with_writer(f)
            }
        }
    }

    pub fn health(&self) -> HealthReport {
        self.with_reader(|conn| Ok(search::health(conn)))
            .unwrap_or_else(|e| HealthReport {
                tables_present: false,
                fts_available: false,
                wal_enabled: false,
                schema_version: 0,
                warnings: vec![format!("health check failed to open a connection: {e}")],
            })
    }
}

fn in_memory_fallback_pool() -> connection::ReaderPool {
    // Only reached if the shared-cache URI trick in `open_reader_pool`
    // rejects `:memory:`; `with_reader` never actually uses this pool in
    // that mode, so an unconnected pool is harmless.
    let manager = r2d2_sqlite::SqliteConnectionManager::memory();
    r2d2::Pool::builder()
        .max_size(1)
        .build_unchecked(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_runs_migrations() {
        let store = Store::open_in_memory().unwrap();
        let report = store.health();
        assert!(report.tables_present);
        assert_eq!(report.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn open_on_disk_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("current.db");
        {
            let store = Store::open(&db_path).unwrap();
            store
                .with_writer(|conn| repository::upsert_repository(conn, "h", "/tmp/r", None).map(|_| ()))
                .unwrap();
        }
        let reopened = Store::open(&db_path).unwrap();
        let count: i64 = reopened
            .with_reader(|conn| {
                conn.query_row("SELECT COUNT(*) FROM repositories", [], |r| r.get(0))
                    .map_err(|source| StorageError::Sqlite {
                        operation: "count_repositories",
                        source,
                    })
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
