//! Layered configuration for the code index service.
//!
//! Precedence, lowest to highest: compiled-in defaults, an optional
//! `codeindex.toml` at the repository root, environment variables (the
//! `MCP_*` variables from §6, plus `CODEINDEX__` prefixed nested overrides),
//! then explicit CLI flags applied by the caller after [`Settings::load`]
//! returns. Built once at startup and passed explicitly to every component
//! that needs it — see the "global mutable singletons" redesign flag.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    #[serde(default = "default_schema_version")]
    pub config_version: u32,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub semantic: SemanticConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Colon-separated list of path templates overriding the default
    /// discovery search order. Mirrors `MCP_INDEX_PATHS`.
    #[serde(default)]
    pub index_paths: Option<String>,

    /// Absolute override for the storage root. Mirrors
    /// `MCP_INDEX_STORAGE_PATH`.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub enable_multi_path: bool,

    #[serde(default = "default_min_schema_version")]
    pub min_supported_schema_version: u32,

    /// How long a soft-deleted file row is retained before it becomes
    /// eligible for the maintenance pass's hard delete.
    #[serde(default = "default_retention_secs")]
    pub soft_delete_retention_secs: u64,

    #[serde(default = "default_query_cache_ttl_secs")]
    pub query_cache_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    #[serde(default)]
    pub extra_ignore_patterns: Vec<String>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,

    #[serde(default = "default_failure_threshold")]
    pub plugin_failure_threshold: u32,

    #[serde(default = "default_failure_window")]
    pub plugin_failure_window: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatcherConfig {
    #[serde(default = "default_plugin_load_ceiling_ms")]
    pub plugin_load_ceiling_ms: u64,

    #[serde(default = "default_request_deadline_ms")]
    pub default_request_deadline_ms: u64,

    #[serde(default = "default_weight_plugin")]
    pub weight_plugin: f64,
    #[serde(default = "default_weight_semantic")]
    pub weight_semantic: f64,
    #[serde(default = "default_weight_bm25")]
    pub weight_bm25: f64,
}

impl DispatcherConfig {
    pub fn plugin_load_ceiling(&self) -> Duration {
        Duration::from_millis(self.plugin_load_ceiling_ms)
    }

    pub fn default_request_deadline(&self) -> Duration {
        Duration::from_millis(self.default_request_deadline_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SemanticConfig {
    /// Mirrors `SEMANTIC_SEARCH_ENABLED`.
    #[serde(default = "default_false")]
    pub enabled: bool,

    #[serde(default)]
    pub model_tag: Option<String>,
}

fn default_schema_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_min_schema_version() -> u32 {
    2
}
fn default_retention_secs() -> u64 {
    // "retained for the process lifetime" per the spec's open question;
    // the config knob exists so operators can opt into a bounded TTL.
    u64::MAX
}
fn default_query_cache_ttl_secs() -> u64 {
    60
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_max_file_size() -> u64 {
    5 * 1024 * 1024
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_failure_window() -> u32 {
    50
}
fn default_plugin_load_ceiling_ms() -> u64 {
    5_000
}
fn default_request_deadline_ms() -> u64 {
    2_000
}
fn default_weight_plugin() -> f64 {
    0.5
}
fn default_weight_semantic() -> f64 {
    0.35
}
fn default_weight_bm25() -> f64 {
    0.15
}
fn default_debounce_ms() -> u64 {
    200
}
fn default_queue_capacity() -> usize {
    4096
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            index_paths: None,
            storage_path: None,
            enable_multi_path: default_true(),
            min_supported_schema_version: default_min_schema_version(),
            soft_delete_retention_secs: default_retention_secs(),
            query_cache_ttl_secs: default_query_cache_ttl_secs(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
            extra_ignore_patterns: Vec::new(),
            max_file_size_bytes: default_max_file_size(),
            plugin_failure_threshold: default_failure_threshold(),
            plugin_failure_window: default_failure_window(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            plugin_load_ceiling_ms: default_plugin_load_ceiling_ms(),
            default_request_deadline_ms: default_request_deadline_ms(),
            weight_plugin: default_weight_plugin(),
            weight_semantic: default_weight_semantic(),
            weight_bm25: default_weight_bm25(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: default_false(),
            model_tag: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_version: default_schema_version(),
            storage: StorageConfig::default(),
            indexing: IndexingConfig::default(),
            dispatcher: DispatcherConfig::default(),
            watcher: WatcherConfig::default(),
            semantic: SemanticConfig::default(),
        }
    }
}

impl Settings {
    /// Load layered settings: defaults, then `<root>/codeindex.toml` if
    /// present, then environment variables. `MCP_*` variables map onto
    /// specific fields; anything else uses the `CODEINDEX__section__key`
    /// nested-override convention figment provides out of the box.
    pub fn load(root: &std::path::Path) -> Result<Self, ConfigError> {
        let config_path = root.join("codeindex.toml");

        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if config_path.exists() {
            figment = figment.merge(Toml::file(&config_path));
        }
        figment = figment.merge(Env::prefixed("CODEINDEX__").split("__"));

        let mut settings: Settings = figment
            .extract()
            .map_err(|e| ConfigError::Invalid { reason: e.to_string() })?;

        apply_legacy_env_vars(&mut settings);
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.indexing.parallel_threads == 0 {
            return Err(ConfigError::Invalid {
                reason: "indexing.parallel_threads must be at least 1".into(),
            });
        }
        let total = self.dispatcher.weight_plugin
            + self.dispatcher.weight_semantic
            + self.dispatcher.weight_bm25;
        if !(0.0..=3.0).contains(&total) {
            return Err(ConfigError::Invalid {
                reason: format!("tier weights sum to an implausible {total}"),
            });
        }
        Ok(())
    }
}

/// Apply the §6 environment variables, which are documented by exact name
/// rather than the `CODEINDEX__section__key` nested convention.
fn apply_legacy_env_vars(settings: &mut Settings) {
    if let Ok(v) = std::env::var("MCP_INDEX_PATHS") {
        settings.storage.index_paths = Some(v);
    }
    if let Ok(v) = std::env::var("MCP_INDEX_STORAGE_PATH") {
        settings.storage.storage_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("MCP_ENABLE_MULTI_PATH") {
        settings.storage.enable_multi_path = parse_bool(&v, settings.storage.enable_multi_path);
    }
    if let Ok(v) = std::env::var("SEMANTIC_SEARCH_ENABLED") {
        settings.semantic.enabled = parse_bool(&v, settings.semantic.enabled);
    }
}

fn parse_bool(s: &str, fallback: bool) -> bool {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => fallback,
    }
}

/// True when `MCP_DEBUG` is set to a truthy value.
pub fn debug_logging_enabled() -> bool {
    std::env::var("MCP_DEBUG")
        .map(|v| parse_bool(&v, false))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_zero_threads() {
        let mut settings = Settings::default();
        settings.indexing.parallel_threads = 0;
        assert!(settings.validate().is_err());
    }
}
