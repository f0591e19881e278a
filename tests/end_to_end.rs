//! End-to-end scenarios (§8): each test drives the pipeline a caller would
//! actually exercise — Indexer → Store → Dispatcher, or discovery → Store
//! — rather than one module's internals in isolation, so a regression at a
//! module boundary shows up here even if each module's own unit tests
//! still pass.

use std::path::Path;
use std::sync::Arc;

use codeindex::config::{DispatcherConfig, Settings};
use codeindex::dispatcher::Dispatcher;
use codeindex::discovery;
use codeindex::plugin::registry::PluginRegistry;
use codeindex::semantic::NullSemanticSearcher;
use codeindex::storage::migrations::{self, CURRENT_SCHEMA_VERSION};
use codeindex::storage::repository::upsert_repository;
use codeindex::storage::Store;
use codeindex::watcher::pipeline::{IndexOutcome, Indexer};

fn plugins() -> Arc<PluginRegistry> {
    Arc::new(PluginRegistry::with_all_generic().unwrap())
}

fn dispatcher_over(store: Store) -> Dispatcher {
    Dispatcher::new(store, plugins(), Arc::new(NullSemanticSearcher), DispatcherConfig::default(), 60)
}

/// Scenario 1: cold lookup.
#[tokio::test]
async fn cold_lookup_finds_a_freshly_indexed_symbol() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x.py"), "def greet(name):\n    pass\n").unwrap();

    let store = Store::open_in_memory().unwrap();
    let repository_id = store
        .with_writer(|conn| upsert_repository(conn, "hash", &dir.path().to_string_lossy(), None))
        .unwrap();
    let indexer = Indexer::new(store.clone(), plugins(), repository_id, dir.path().to_path_buf(), 5 * 1024 * 1024);
    let report = indexer.full_scan(&[]);
    assert_eq!(report.indexed, 1);

    let dispatcher = dispatcher_over(store);
    let found = dispatcher.lookup(dir.path(), "greet", None).await.expect("greet should be found");
    assert_eq!(found.file_path, "x.py");
    assert_eq!(found.start_line, 1);
    assert_eq!(found.kind.as_str(), "function");
}

/// Scenario 2: rename. A file move must produce exactly one `file_move`
/// row and leave no duplicate symbol rows for the unchanged content hash.
#[tokio::test]
async fn rename_is_tracked_without_duplicating_symbols() {
    let dir = tempfile::tempdir().unwrap();
    let old_path = dir.path().join("x.py");
    std::fs::write(&old_path, "def greet(name):\n    pass\n").unwrap();

    let store = Store::open_in_memory().unwrap();
    let repository_id = store
        .with_writer(|conn| upsert_repository(conn, "hash", &dir.path().to_string_lossy(), None))
        .unwrap();
    let indexer = Indexer::new(store.clone(), plugins(), repository_id, dir.path().to_path_buf(), 5 * 1024 * 1024);

    indexer.index_path(&old_path).unwrap();
    indexer.remove_path(&old_path).unwrap();

    let new_path = dir.path().join("y.py");
    std::fs::rename(&old_path, &new_path).unwrap();
    let outcome = indexer.index_path(&new_path).unwrap();
    assert!(matches!(outcome, IndexOutcome::Moved { .. }), "expected a move, got {outcome:?}");

    let move_rows: i64 = store
        .with_reader(|conn| {
            conn.query_row("SELECT COUNT(*) FROM file_moves", [], |r| r.get(0)).map_err(|source| {
                codeindex::error::StorageError::Sqlite { operation: "count_file_moves", source }
            })
        })
        .unwrap();
    assert_eq!(move_rows, 1, "exactly one file_move row expected for the rename");

    let symbol_rows: i64 = store
        .with_reader(|conn| {
            conn.query_row("SELECT COUNT(*) FROM symbols WHERE name = 'greet'", [], |r| r.get(0))
                .map_err(|source| codeindex::error::StorageError::Sqlite { operation: "count_symbols", source })
        })
        .unwrap();
    assert_eq!(symbol_rows, 1, "a rename must not leave duplicate symbol rows");

    let dispatcher = dispatcher_over(store);
    let found = dispatcher.lookup(dir.path(), "greet", None).await.expect("greet should still resolve");
    assert_eq!(found.file_path, "y.py");
}

/// Scenario 4: schema mismatch. An index built at an older schema version
/// is migrated forward transparently the next time it's opened, rather
/// than rejected — `discover` only rejects versions outside the supported
/// range, and `Store::open` is what actually carries a compatible-but-old
/// database up to `CURRENT_SCHEMA_VERSION`.
#[test]
fn opening_an_older_schema_migrates_it_forward() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("index.db");
    {
        let mut conn = rusqlite::Connection::open(&db_path).unwrap();
        migrations::migrate_to(&mut conn, 2).unwrap();
        conn.execute(
            "INSERT INTO repositories (repo_hash, canonical_path) VALUES ('hash', '/tmp/repo')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO files (repository_id, relative_path, hash, size, mtime) \
             VALUES (1, 'legacy.py', 'abc', 10, 0)",
            [],
        )
        .unwrap();
    }

    let mut settings = Settings::default();
    settings.storage.storage_path = Some(dir.path().to_path_buf());
    settings.storage.enable_multi_path = false;
    settings.storage.min_supported_schema_version = 1;

    let repo_hash = "hash";
    let discovered = discovery::discover(&settings, Path::new("/tmp/repo"), repo_hash, None)
        .expect("a schema-compatible-but-old index must still be discoverable");
    assert_eq!(discovered.manifest.schema_version, 2, "manifest still reports the on-disk version pre-migration");

    let store = Store::open(&discovered.db_path).unwrap();
    let health = store.health();
    assert_eq!(health.schema_version, CURRENT_SCHEMA_VERSION, "opening the store must carry it to the current schema");
}

/// Scenario 6: no-index fallback. With nothing discoverable, `discover`
/// reports every attempted path and `search` on an otherwise-empty store
/// returns an empty result set rather than raising.
#[tokio::test]
async fn no_discoverable_index_degrades_to_an_empty_search_instead_of_raising() {
    let mut settings = Settings::default();
    settings.storage.storage_path = Some(std::path::PathBuf::from("/nonexistent/for/this/test"));
    settings.storage.enable_multi_path = false;

    let err = discovery::discover(&settings, Path::new("/tmp/repo"), "hash", None).unwrap_err();
    match err {
        codeindex::error::DiscoveryError::NoneFound { attempted } => assert!(!attempted.is_empty()),
        other => panic!("expected NoneFound, got {other:?}"),
    }

    let store = Store::open_in_memory().unwrap();
    let dispatcher = dispatcher_over(store);
    let results = dispatcher.search(Path::new("/tmp/repo"), "anything", None, 10).await;
    assert!(results.is_empty());
}
