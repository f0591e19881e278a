//! CLI entry point (§6 "CLI (minimal)"): `index build`/`verify`/`rebuild`
//! and `server`, the same four surfaces the MCP tools expose over
//! JSON-RPC for callers that would rather drive this from a shell.
//!
//! Grounded on the teacher's `main.rs` for the `clap`-derive `Cli`/
//! `Commands` shape and the stdio-transport `serve` wiring; narrowed to
//! this crate's four subcommands and their documented exit codes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use codeindex::config::Settings;
use codeindex::discovery::{self, DiscoveredIndex};
use codeindex::dispatcher::Dispatcher;
use codeindex::error::{DiscoveryError, ServiceError, StorageError};
use codeindex::mcp::CodeIndexServer;
use codeindex::plugin::registry::PluginRegistry;
use codeindex::semantic::{NullSemanticSearcher, SemanticSearcher};
use codeindex::storage::migrations::CURRENT_SCHEMA_VERSION;
use codeindex::storage::repository;
use codeindex::storage::Store;
use codeindex::watcher::pipeline::{Indexer, ScanReport};
use codeindex::watcher::RepositoryWatcher;

#[derive(Parser)]
#[command(name = "codeindex")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A local-first code index and retrieval service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, verify, or rebuild the on-disk index for a repository.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// Run the MCP server over stdio for a repository.
    Server {
        /// Repository root to serve. Defaults to the current directory.
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Full scan, then atomically swap the `current` pointer to the result.
    Build {
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Discover the active index for a repository and confirm it's
    /// schema-compatible, without indexing anything.
    Verify {
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Build a fresh index for the current directory regardless of
    /// whether a compatible one can already be discovered.
    Rebuild,
}

#[tokio::main]
async fn main() {
    codeindex::logging::init();
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Index { action } => run_index(action).await,
        Commands::Server { root } => run_server(root).await,
    };

    std::process::exit(exit_code);
}

fn resolve_root(root: Option<PathBuf>) -> PathBuf {
    root.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

async fn run_index(action: IndexAction) -> i32 {
    match action {
        IndexAction::Build { root } => report_outcome("index build", build_index(resolve_root(root))),
        IndexAction::Verify { root } => match verify_index(resolve_root(root)) {
            Ok(found) => {
                println!("compatible index at {}", found.db_path.display());
                0
            }
            Err(e) => {
                eprintln!("index verify failed: {e}");
                e.exit_code()
            }
        },
        IndexAction::Rebuild => report_outcome("index rebuild", build_index(resolve_root(None))),
    }
}

fn report_outcome(label: &str, result: Result<ScanReport, ServiceError>) -> i32 {
    match result {
        Ok(report) => {
            println!(
                "{label}: indexed {} unchanged {} moved {} skipped {} failed {}",
                report.indexed, report.unchanged, report.moved, report.skipped, report.failed
            );
            0
        }
        Err(e) => {
            eprintln!("{label} failed: {e}");
            e.exit_code()
        }
    }
}

async fn run_server(root: Option<PathBuf>) -> i32 {
    let root = resolve_root(root);
    match serve(root).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("server failed: {e}");
            e.exit_code()
        }
    }
}

/// `io::Error` doesn't belong to the §7 error taxonomy on its own, so
/// filesystem failures around the database file are folded into
/// [`StorageError::Open`].
fn io_to_storage(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Open {
        path: path.to_path_buf(),
        source: rusqlite::Error::ModuleError(source.to_string()),
    }
}

fn build_index(root: PathBuf) -> Result<ScanReport, ServiceError> {
    let settings = Settings::load(&root).map_err(ServiceError::Configuration)?;
    let repo_hash = repository::repo_hash(None, &root);
    let dir = discovery::candidate_dirs(&settings, &root, &repo_hash)
        .into_iter()
        .next()
        .expect("candidate_dirs always yields at least the built-in default");
    std::fs::create_dir_all(&dir).map_err(|source| ServiceError::StorageUnusable(io_to_storage(&dir, source)))?;

    let db_filename = format!("index-{}.db", chrono::Utc::now().format("%Y%m%d%H%M%S%3f"));
    let db_path = dir.join(&db_filename);

    let store = Store::open(&db_path).map_err(ServiceError::StorageUnusable)?;
    let repository_id = store
        .with_writer(|conn| repository::upsert_repository(conn, &repo_hash, &root.to_string_lossy(), None))
        .map_err(ServiceError::StorageUnusable)?;

    let plugins = Arc::new(PluginRegistry::build(&settings).expect("built-in plugin grammars always load"));
    let indexer = Indexer::new(store, plugins, repository_id, root.clone(), settings.indexing.max_file_size_bytes)
        .with_failure_policy(settings.indexing.plugin_failure_window as usize, settings.indexing.plugin_failure_threshold as usize);
    let report = indexer.full_scan(&settings.indexing.extra_ignore_patterns);

    let manifest = discovery::Manifest::new(CURRENT_SCHEMA_VERSION, settings.semantic.model_tag.clone(), repo_hash);
    discovery::manifest::write(&db_path, &manifest)
        .map_err(|source| ServiceError::StorageUnusable(io_to_storage(&db_path, source)))?;

    discovery::set_current(&dir, &db_filename).map_err(|source| ServiceError::StorageUnusable(io_to_storage(&dir, source)))?;

    Ok(report)
}

fn verify_index(root: PathBuf) -> Result<DiscoveredIndex, ServiceError> {
    let settings = Settings::load(&root).map_err(ServiceError::Configuration)?;
    let repo_hash = repository::repo_hash(None, &root);
    let require_tag = settings.semantic.model_tag.as_deref().filter(|_| settings.semantic.enabled);
    discovery::discover(&settings, &root, &repo_hash, require_tag).map_err(ServiceError::from)
}

async fn serve(root: PathBuf) -> Result<(), ServiceError> {
    let settings = Settings::load(&root).map_err(ServiceError::Configuration)?;
    let repo_hash = repository::repo_hash(None, &root);
    let require_tag = settings.semantic.model_tag.as_deref().filter(|_| settings.semantic.enabled);

    let discovered = match discovery::discover(&settings, &root, &repo_hash, require_tag) {
        Ok(found) => found,
        Err(DiscoveryError::NoneFound { .. }) => {
            tracing::info!("no existing index found for this repository, building one before serving");
            build_index(root.clone())?;
            discovery::discover(&settings, &root, &repo_hash, require_tag).map_err(ServiceError::from)?
        }
        Err(e) => return Err(ServiceError::from(e)),
    };

    let store = Store::open(&discovered.db_path).map_err(ServiceError::StorageUnusable)?;
    let repository_id = store
        .with_writer(|conn| repository::upsert_repository(conn, &repo_hash, &root.to_string_lossy(), None))
        .map_err(ServiceError::StorageUnusable)?;

    let plugins = Arc::new(PluginRegistry::build(&settings).expect("built-in plugin grammars always load"));
    let semantic: Arc<dyn SemanticSearcher> = Arc::new(NullSemanticSearcher);
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        plugins.clone(),
        semantic,
        settings.dispatcher.clone(),
        settings.storage.query_cache_ttl_secs,
    ));

    let indexer = Indexer::new(
        store.clone(),
        plugins.clone(),
        repository_id,
        root.clone(),
        settings.indexing.max_file_size_bytes,
    )
    .with_failure_policy(settings.indexing.plugin_failure_window as usize, settings.indexing.plugin_failure_threshold as usize);
    let watcher = RepositoryWatcher::new(root.clone(), settings.watcher.clone(), &settings.indexing.extra_ignore_patterns, indexer);
    let _watch_handle = watcher.spawn().map_err(|e| {
        ServiceError::StorageUnusable(StorageError::Sqlite {
            operation: "watcher_spawn",
            source: rusqlite::Error::ModuleError(e.to_string()),
        })
    })?;

    let server = CodeIndexServer::new(dispatcher, plugins, repository_id, root.clone(), Arc::new(settings));

    tracing::info!(root = %root.display(), "starting MCP server on stdio transport");
    use rmcp::ServiceExt;
    use rmcp::transport::stdio;
    let service = server.serve(stdio()).await.map_err(|e| {
        ServiceError::StorageUnusable(StorageError::Sqlite {
            operation: "mcp_serve",
            source: rusqlite::Error::ModuleError(e.to_string()),
        })
    })?;
    service.waiting().await.map_err(|e| {
        ServiceError::StorageUnusable(StorageError::Sqlite {
            operation: "mcp_wait",
            source: rusqlite::Error::ModuleError(e.to_string()),
        })
    })?;
    Ok(())
}
