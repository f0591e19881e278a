//! The dispatcher (§4.1): the single entry point every MCP tool and CLI
//! command calls through. It owns the tiered fallback chain — plugin fast
//! path, then semantic search, then BM25 — and the storage-backed exact
//! lookup/reference paths, and it is the only place that knows about the
//! per-call plugin load/call ceiling.
//!
//! Grounded on the teacher's `SimpleIndexer` (`src/indexer.rs`) as the
//! "one façade in front of storage + parsing" shape, generalized here into
//! an explicit multi-tier merge instead of a single in-process index.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};

use crate::config::DispatcherConfig;
use crate::plugin::{Plugin, PluginContext, PluginSearchHit};
use crate::query::{self, Reference, SearchResult, Source, SymbolDefinition, TierWeights};
use crate::semantic::SemanticSearcher;
use crate::storage::{Corpus, HealthReport, Store};
use crate::types::SymbolKind;

/// Availability of a language's plugin fast path. Once a plugin overruns
/// the load/call ceiling it is marked `Unavailable` for the rest of the
/// process — the dispatcher does not retry it until [`Dispatcher::reload_plugin`]
/// is called explicitly (§4.1 "permanently unavailable ... until explicit
/// reload").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Availability {
    Available,
    Unavailable,
}

/// Snapshot returned by [`Dispatcher::health`] (§4.1 `health`): storage's
/// own report plus which language tags currently have a usable plugin
/// fast path and whether semantic search is live.
#[derive(Debug, Clone)]
pub struct DispatcherHealth {
    pub storage: HealthReport,
    pub unavailable_plugins: Vec<String>,
    pub semantic_available: bool,
}

pub struct Dispatcher {
    store: Store,
    plugins: Arc<crate::plugin::registry::PluginRegistry>,
    semantic: Arc<dyn SemanticSearcher>,
    config: DispatcherConfig,
    availability: DashMap<String, Availability>,
    query_cache_ttl_secs: u64,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        plugins: Arc<crate::plugin::registry::PluginRegistry>,
        semantic: Arc<dyn SemanticSearcher>,
        config: DispatcherConfig,
        query_cache_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            plugins,
            semantic,
            config,
            availability: DashMap::new(),
            query_cache_ttl_secs,
        }
    }

    /// Look up a cached, still-live result for `hash` and deserialize it.
    /// A cache miss, an expired entry, or a deserialization failure are all
    /// treated as "nothing cached" — the caller falls through to the
    /// tiered chain rather than erroring (§3 Query cache is an optimization,
    /// never a correctness dependency).
    fn cache_lookup<T: DeserializeOwned>(&self, hash: &str) -> Option<T> {
        let json = self.store.with_reader(|conn| crate::storage::cache::get(conn, hash)).ok().flatten()?;
        serde_json::from_str(&json).ok()
    }

    /// Serialize and persist `value` under `hash` with the configured TTL.
    /// Best-effort: a failure to cache never surfaces past the query path.
    fn cache_store<T: Serialize>(&self, hash: &str, value: &T) {
        let Ok(json) = serde_json::to_string(value) else {
            return;
        };
        if let Err(e) = self
            .store
            .with_writer(|conn| crate::storage::cache::set(conn, hash, &json, self.query_cache_ttl_secs))
        {
            tracing::warn!(error = %e, "failed to populate query cache");
        }
    }

    /// Re-arms a plugin that tripped the load/call ceiling. Only an
    /// operator action (a CLI `reload` or an MCP custom request) should
    /// call this — the dispatcher itself never clears the flag on its own.
    pub fn reload_plugin(&self, language_tag: &str) {
        self.availability.insert(language_tag.to_string(), Availability::Available);
    }

    fn is_available(&self, language_tag: &str) -> bool {
        !matches!(
            self.availability.get(language_tag).map(|a| *a),
            Some(Availability::Unavailable)
        )
    }

    fn mark_unavailable(&self, language_tag: &str) {
        tracing::warn!(language = language_tag, "plugin exceeded load/call ceiling, marking unavailable");
        self.availability.insert(language_tag.to_string(), Availability::Unavailable);
    }

    /// Run a plugin call on a blocking thread under the configured
    /// ceiling. On timeout the blocking task is detached (not cancelled —
    /// `tokio::task::spawn_blocking` offers no cooperative cancellation)
    /// and the language tag is marked permanently unavailable (§4.1, §9
    /// "detach rather than cancel runaway plugin work").
    async fn call_plugin_with_ceiling<T, F>(&self, language_tag: &str, call: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if !self.is_available(language_tag) {
            return None;
        }
        let ceiling = self.config.plugin_load_ceiling();
        let handle = tokio::task::spawn_blocking(call);
        match tokio::time::timeout(ceiling, handle).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(join_err)) => {
                tracing::warn!(language = language_tag, error = %join_err, "plugin task panicked");
                None
            }
            Err(_elapsed) => {
                self.mark_unavailable(language_tag);
                None
            }
        }
    }

    /// §4.1 `search`: tiered fallback chain, cumulative per-request
    /// deadline, cross-tier dedup + merge. `language_hint` narrows which
    /// plugin's fast path is attempted; it never excludes BM25/semantic
    /// results in other languages.
    pub async fn search(
        &self,
        repo_root: &Path,
        query_text: &str,
        language_hint: Option<&str>,
        limit: usize,
    ) -> Vec<SearchResult> {
        let hash = crate::storage::cache::query_hash(&[
            "search",
            query_text,
            language_hint.unwrap_or(""),
            &limit.to_string(),
        ]);
        if let Some(cached) = self.cache_lookup::<Vec<SearchResult>>(&hash) {
            return cached;
        }

        let deadline = self.config.default_request_deadline();
        let started = std::time::Instant::now();

        let plugin_tier = self.plugin_search_tier(repo_root, query_text, language_hint, limit).await;
        let merged = if started.elapsed() >= deadline {
            query::merge(vec![plugin_tier], self.weights())
        } else {
            let semantic_tier = self.semantic_search_tier(query_text, limit);
            if started.elapsed() >= deadline {
                query::merge(vec![plugin_tier, semantic_tier], self.weights())
            } else {
                let bm25_tier = self.bm25_search_tier(query_text, limit);
                query::merge(vec![plugin_tier, semantic_tier, bm25_tier], self.weights())
            }
        };

        self.cache_store(&hash, &merged);
        merged
    }

    fn weights(&self) -> TierWeights {
        TierWeights {
            plugin: self.config.weight_plugin,
            semantic: self.config.weight_semantic,
            bm25: self.config.weight_bm25,
        }
    }

    async fn plugin_search_tier(
        &self,
        repo_root: &Path,
        query_text: &str,
        language_hint: Option<&str>,
        limit: usize,
    ) -> Vec<SearchResult> {
        let Some(tag) = language_hint else {
            return Vec::new();
        };
        let Some(plugin) = self.plugins.for_tag(tag) else {
            return Vec::new();
        };
        if !plugin.has_search() {
            return Vec::new();
        }
        let context = PluginContext::new(repo_root);
        let query_owned = query_text.to_string();
        let tag_owned = tag.to_string();
        let hits = self
            .call_plugin_with_ceiling(tag, move || plugin.search(&query_owned, &context))
            .await
            .unwrap_or_default();
        hits.into_iter()
            .take(limit)
            .map(|hit: PluginSearchHit| plugin_hit_to_result(hit, &tag_owned))
            .collect()
    }

    fn semantic_search_tier(&self, query_text: &str, limit: usize) -> Vec<SearchResult> {
        if !self.semantic.is_available() {
            return Vec::new();
        }
        self.semantic.search(query_text, limit)
    }

    fn bm25_search_tier(&self, query_text: &str, limit: usize) -> Vec<SearchResult> {
        self.store
            .with_reader(|conn| {
                Ok(crate::storage::search::search_bm25(conn, query_text, Corpus::Code, limit, 0))
            })
            .unwrap_or_default()
            .into_iter()
            .map(|hit| SearchResult {
                file_path: hit.path,
                language: hit.language,
                start_line: 1,
                end_line: 1,
                snippet: hit.snippet,
                score: hit.score,
                source: Source::Bm25,
                symbol_name: None,
            })
            .collect()
    }

    /// §4.1 `lookup`: plugin fast path first, falling back to the symbol
    /// table's exact match, then to fuzzy rescoring if nothing exact
    /// exists (§4.2 `search_fuzzy`).
    pub async fn lookup(
        &self,
        repo_root: &Path,
        symbol_name: &str,
        language_hint: Option<&str>,
    ) -> Option<SymbolDefinition> {
        if let Some(tag) = language_hint {
            if let Some(plugin) = self.plugins.for_tag(tag) {
                if plugin.has_lookup() {
                    let context = PluginContext::new(repo_root);
                    let name_owned = symbol_name.to_string();
                    if let Some(Some(hit)) = self
                        .call_plugin_with_ceiling(tag, move || plugin.lookup(&name_owned, &context))
                        .await
                    {
                        return Some(lookup_hit_to_definition(hit));
                    }
                }
            }
        }

        let hash = crate::storage::cache::query_hash(&["lookup", symbol_name, language_hint.unwrap_or("")]);
        if let Some(cached) = self.cache_lookup::<Option<SymbolDefinition>>(&hash) {
            return cached;
        }

        let found = self.lookup_storage(symbol_name);
        self.cache_store(&hash, &found);
        found
    }

    fn lookup_storage(&self, symbol_name: &str) -> Option<SymbolDefinition> {
        let exact = self
            .store
            .with_reader(|conn| crate::storage::symbols::find_symbols_by_name(conn, symbol_name, 1))
            .unwrap_or_default();
        if let Some((symbol, path)) = exact.into_iter().next() {
            return Some(symbol_to_definition(symbol, path));
        }

        let fuzzy = self
            .store
            .with_reader(|conn| Ok(crate::storage::search::search_fuzzy(conn, symbol_name, 1)))
            .unwrap_or_default();
        let closest = fuzzy.into_iter().next()?;
        let exact_on_fuzzy = self
            .store
            .with_reader(|conn| crate::storage::symbols::find_symbols_by_name(conn, &closest.name, 1))
            .unwrap_or_default();
        exact_on_fuzzy
            .into_iter()
            .next()
            .map(|(symbol, path)| symbol_to_definition(symbol, path))
    }

    /// §4.1 `find_references`: plugin fast path, falling back to the
    /// reference table.
    pub async fn find_references(
        &self,
        repo_root: &Path,
        symbol_name: &str,
        language_hint: Option<&str>,
        limit: usize,
    ) -> Vec<Reference> {
        if let Some(tag) = language_hint {
            if let Some(plugin) = self.plugins.for_tag(tag) {
                if plugin.has_references() {
                    let context = PluginContext::new(repo_root);
                    let name_owned = symbol_name.to_string();
                    if let Some(refs) = self
                        .call_plugin_with_ceiling(tag, move || plugin.references(&name_owned, &context))
                        .await
                    {
                        if !refs.is_empty() {
                            return refs
                                .into_iter()
                                .take(limit)
                                .map(|r| Reference {
                                    symbol_name: r.symbol_name,
                                    file_path: String::new(),
                                    line: r.line,
                                    column: r.column,
                                    kind: r.kind,
                                })
                                .collect();
                        }
                    }
                }
            }
        }

        let hash = crate::storage::cache::query_hash(&[
            "find_references",
            symbol_name,
            language_hint.unwrap_or(""),
            &limit.to_string(),
        ]);
        if let Some(cached) = self.cache_lookup::<Vec<Reference>>(&hash) {
            return cached;
        }

        let refs = self
            .store
            .with_reader(|conn| crate::storage::symbols::find_references(conn, symbol_name, limit))
            .unwrap_or_default()
            .into_iter()
            .map(|(reference, path)| Reference {
                symbol_name: reference.symbol_name,
                file_path: path,
                line: reference.line,
                column: reference.column,
                kind: reference.kind,
            })
            .collect::<Vec<_>>();
        self.cache_store(&hash, &refs);
        refs
    }

    /// §4.1 `health`: storage health plus per-language plugin
    /// availability and whether semantic search is wired up.
    pub fn health(&self) -> DispatcherHealth {
        let unavailable_plugins = self
            .availability
            .iter()
            .filter(|entry| *entry.value() == Availability::Unavailable)
            .map(|entry| entry.key().clone())
            .collect();
        DispatcherHealth {
            storage: self.store.health(),
            unavailable_plugins,
            semantic_available: self.semantic.is_available(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn plugin_load_ceiling(&self) -> Duration {
        self.config.plugin_load_ceiling()
    }
}

fn plugin_hit_to_result(hit: PluginSearchHit, language_tag: &str) -> SearchResult {
    SearchResult {
        file_path: hit.file_path,
        language: Some(language_tag.to_string()),
        start_line: hit.start_line,
        end_line: hit.end_line,
        snippet: hit.snippet,
        score: hit.score,
        source: Source::Plugin,
        symbol_name: hit.symbol_name,
    }
}

fn lookup_hit_to_definition(hit: crate::plugin::LookupHit) -> SymbolDefinition {
    symbol_to_definition(hit.symbol, hit.file_path)
}

fn symbol_to_definition(symbol: crate::symbol::Symbol, file_path: String) -> SymbolDefinition {
    SymbolDefinition {
        name: symbol.name,
        kind: symbol.kind,
        file_path,
        start_line: symbol.range.start_line,
        end_line: symbol.range.end_line,
        signature: symbol.signature,
        doc: symbol.doc,
        container: symbol.container,
    }
}

#[allow(dead_code)]
fn kind_matches(kind: &SymbolKind, wanted: &str) -> bool {
    kind.as_str().eq_ignore_ascii_case(wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatcherConfig;
    use crate::plugin::registry::PluginRegistry;
    use crate::semantic::NullSemanticSearcher;
    use crate::storage::repository::upsert_repository;
    use crate::symbol::Symbol;
    use crate::types::Range;

    fn dispatcher_with_symbol() -> Dispatcher {
        let store = Store::open_in_memory().unwrap();
        store
            .with_writer(|conn| {
                let repo = upsert_repository(conn, "h", "/tmp/repo", None)?;
                let (file_id, _) =
                    crate::storage::files::upsert_file(conn, repo, "src/x.py", "h1", Some("python"), 10, 0)?;
                let sym = Symbol::new(file_id, "greet", SymbolKind::Function, Range::new(1, 0, 1, 20))
                    .with_signature("def greet():");
                crate::storage::symbols::replace_symbols(conn, file_id, &[sym], &[], &[])?;
                Ok(())
            })
            .unwrap();
        let plugins = Arc::new(PluginRegistry::with_all_generic().unwrap());
        Dispatcher::new(store, plugins, Arc::new(NullSemanticSearcher), DispatcherConfig::default(), 60)
    }

    #[tokio::test]
    async fn lookup_falls_back_to_storage_when_no_plugin_fast_path_matches() {
        let dispatcher = dispatcher_with_symbol();
        let found = dispatcher.lookup(Path::new("/tmp/repo"), "greet", None).await;
        assert!(found.is_some());
        assert_eq!(found.unwrap().file_path, "src/x.py");
    }

    #[tokio::test]
    async fn lookup_returns_none_for_unknown_symbol() {
        let dispatcher = dispatcher_with_symbol();
        let found = dispatcher.lookup(Path::new("/tmp/repo"), "nonexistent", None).await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn lookup_is_served_from_cache_on_repeat_query() {
        let dispatcher = dispatcher_with_symbol();
        let first = dispatcher.lookup(Path::new("/tmp/repo"), "greet", None).await;
        assert!(first.is_some());

        // Remove the underlying row without going through the indexing
        // pipeline's `invalidate_all` — a second query must still see the
        // cached answer rather than recomputing from (now-empty) storage.
        dispatcher
            .store
            .with_writer(|conn| {
                conn.execute("DELETE FROM symbols", [])
                    .map_err(|source| crate::error::StorageError::Sqlite { operation: "test_wipe_symbols", source })?;
                Ok(())
            })
            .unwrap();

        let second = dispatcher.lookup(Path::new("/tmp/repo"), "greet", None).await;
        assert_eq!(second, first, "a cached lookup must be served without re-querying storage");
    }

    #[tokio::test]
    async fn cache_invalidation_forces_a_fresh_lookup() {
        let dispatcher = dispatcher_with_symbol();
        dispatcher.lookup(Path::new("/tmp/repo"), "greet", None).await;

        dispatcher
            .store
            .with_writer(|conn| {
                conn.execute("DELETE FROM symbols", [])
                    .map_err(|source| crate::error::StorageError::Sqlite { operation: "test_wipe_symbols", source })?;
                crate::storage::cache::invalidate_all(conn)
            })
            .unwrap();

        let after_invalidate = dispatcher.lookup(Path::new("/tmp/repo"), "greet", None).await;
        assert!(after_invalidate.is_none(), "invalidation must force the cache to be bypassed");
    }

    #[tokio::test]
    async fn search_falls_back_to_bm25_with_no_plugin_or_semantic_tier() {
        let dispatcher = dispatcher_with_symbol();
        dispatcher
            .store
            .with_writer(|conn| {
                conn.execute(
                    "INSERT INTO fts_code(file_path, body) VALUES ('src/x.py', 'def greet(): pass')",
                    [],
                )
                .map_err(|source| crate::error::StorageError::Sqlite {
                    operation: "test_seed_fts_code",
                    source,
                })?;
                Ok(())
            })
            .unwrap();
        let results = dispatcher.search(Path::new("/tmp/repo"), "greet", None, 10).await;
        assert!(!results.is_empty());
        assert_eq!(results[0].source, Source::Bm25);
    }

    #[tokio::test]
    async fn health_reports_no_unavailable_plugins_initially() {
        let dispatcher = dispatcher_with_symbol();
        let health = dispatcher.health();
        assert!(health.unavailable_plugins.is_empty());
        assert!(!health.semantic_available);
    }

    #[tokio::test]
    async fn plugin_ceiling_marks_language_unavailable_on_timeout() {
        let dispatcher = dispatcher_with_symbol();
        let mut config = DispatcherConfig::default();
        config.plugin_load_ceiling_ms = 10;
        let dispatcher = Dispatcher { config, ..dispatcher };

        let result: Option<()> = dispatcher
            .call_plugin_with_ceiling("python", || {
                std::thread::sleep(Duration::from_millis(200));
            })
            .await;
        assert!(result.is_none());
        assert!(!dispatcher.is_available("python"));

        dispatcher.reload_plugin("python");
        assert!(dispatcher.is_available("python"));
    }
}
