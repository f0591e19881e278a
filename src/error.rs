//! Error taxonomy for the code index service.
//!
//! Each subsystem gets its own `thiserror` enum; [`ErrorKind`] maps every
//! variant onto the category an implementer must surface (§7 of the spec):
//! not-found, timeout, schema-incompatible, plugin-failure, storage-failure,
//! semantic-unavailable, configuration-error. The dispatcher and MCP layer
//! never let a raw internal error cross the JSON-RPC boundary; they convert
//! through `ErrorKind` first.

use std::path::PathBuf;
use thiserror::Error;

/// The category an error belongs to, independent of which subsystem raised
/// it. This is what's allowed to reach a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Timeout,
    SchemaIncompatible,
    PluginFailure,
    StorageFailure,
    SemanticUnavailable,
    ConfigurationError,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to open database at '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("sqlite error during {operation}: {source}")]
    Sqlite {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("connection pool exhausted or poisoned: {0}")]
    Pool(String),

    #[error(
        "schema version {found} is incompatible: runtime supports {min_supported}..={max_supported}"
    )]
    SchemaIncompatible {
        found: u32,
        min_supported: u32,
        max_supported: u32,
    },

    #[error("migration {version} ('{name}') failed: {reason}")]
    MigrationFailed {
        version: u32,
        name: String,
        reason: String,
    },

    #[error("database file missing at '{path}'")]
    MissingDatabase { path: PathBuf },

    #[error("required table '{table}' is absent from the index")]
    MissingTable { table: &'static str },
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::SchemaIncompatible { .. } => ErrorKind::SchemaIncompatible,
            StorageError::MissingDatabase { .. } | StorageError::MissingTable { .. } => {
                ErrorKind::StorageFailure
            }
            _ => ErrorKind::StorageFailure,
        }
    }
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("plugin '{language}' failed to parse '{path}': {reason}")]
    ParseFailed {
        language: String,
        path: PathBuf,
        reason: String,
    },

    #[error("plugin '{language}' is degraded after {failures} failures and was skipped")]
    Degraded { language: String, failures: u32 },

    #[error("plugin load for '{language}' exceeded the {ceiling_ms}ms ceiling")]
    LoadTimedOut { language: String, ceiling_ms: u64 },

    #[error("no plugin registered for language '{0}'")]
    NoPluginForLanguage(String),
}

impl PluginError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PluginFailure
    }
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to start watching '{path}': {source}")]
    Start {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("indexing worker channel closed unexpectedly")]
    ChannelClosed,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("no compatible index found; attempted paths: {attempted:?}")]
    NoneFound { attempted: Vec<PathBuf> },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl DiscoveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiscoveryError::NoneFound { .. } => ErrorKind::NotFound,
            DiscoveryError::Storage(e) => e.kind(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },

    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigurationError
    }
}

/// Top-level error a dispatcher call can surface to the JSON-RPC boundary.
/// Only raised for the request-as-a-whole failures enumerated in §7: a
/// whole-request timeout, a schema-incompatible index, or a configuration
/// error at startup. Everything else downgrades to an empty result.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("request exceeded its deadline")]
    Timeout,

    #[error(transparent)]
    SchemaIncompatible(#[from] DiscoveryError),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("storage is unusable: {0}")]
    StorageUnusable(#[from] StorageError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Timeout => ErrorKind::Timeout,
            ServiceError::SchemaIncompatible(e) => e.kind(),
            ServiceError::Configuration(e) => e.kind(),
            ServiceError::StorageUnusable(e) => e.kind(),
        }
    }

    /// Exit code for the CLI, per §6.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::NotFound => 2,
            ErrorKind::SchemaIncompatible => 3,
            ErrorKind::ConfigurationError => 4,
            _ => 1,
        }
    }
}
