//! The indexing worker's per-file pipeline (§4.4 "Indexing pipeline"):
//! filter (size ceiling, binary sniff) → hash → content-hash gate → move
//! detection → parse + extract (skipped if the language is degraded,
//! §4.3) → replace + invalidate cache, and the deletion counterpart
//! (soft-delete).
//!
//! Grounded on the teacher's pipeline stage split (`indexing/pipeline/stages/`),
//! collapsed here into one struct since a single file's worth of work
//! doesn't need the teacher's multi-stage channel handoff — the channel
//! handoff this crate needs is watcher → worker (§4.4, §9), not
//! stage-to-stage within one file's processing.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::error::{PluginError, WatchError};
use crate::plugin::registry::PluginRegistry;
use crate::storage::Store;
use crate::types::RepositoryId;

/// Default rolling-window size and failure threshold (§4.3: "N=5 failures
/// within the most recent 50 files"), used when nothing more specific is
/// configured — matches `IndexingConfig`'s own defaults.
const DEFAULT_FAILURE_WINDOW: usize = 50;
const DEFAULT_FAILURE_THRESHOLD: usize = 5;

/// §4.3 "Failure isolation": a per-language rolling window of parse
/// outcomes. A plugin that racks up `threshold` failures within the most
/// recent `window` files is marked degraded and skipped for the remainder
/// of the indexing pass — a repeat of the dispatcher's permanent-
/// unavailability map (`dispatcher::Availability`) at the scope of a
/// single scan instead of the process lifetime.
struct FailureTracker {
    window: usize,
    threshold: usize,
    windows: Mutex<HashMap<String, VecDeque<bool>>>,
    degraded: Mutex<std::collections::HashSet<String>>,
}

impl FailureTracker {
    fn new(window: usize, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            windows: Mutex::new(HashMap::new()),
            degraded: Mutex::new(std::collections::HashSet::new()),
        }
    }

    fn is_degraded(&self, language_tag: &str) -> bool {
        self.degraded.lock().contains(language_tag)
    }

    /// Records one file's parse outcome for `language_tag`. Returns
    /// `Some(failures_in_window)` the first time this call pushes
    /// `language_tag` over `threshold`, `None` otherwise (still below
    /// threshold, or already degraded from an earlier call) — so the
    /// caller logs the degradation exactly once.
    fn record(&self, language_tag: &str, failed: bool) -> Option<u32> {
        let mut windows = self.windows.lock();
        let window = windows.entry(language_tag.to_string()).or_default();
        window.push_back(failed);
        if window.len() > self.window {
            window.pop_front();
        }
        let failures = window.iter().filter(|f| **f).count();
        drop(windows);
        if failures >= self.threshold && self.degraded.lock().insert(language_tag.to_string()) {
            Some(failures as u32)
        } else {
            None
        }
    }
}

/// Tally returned by [`Indexer::full_scan`] — the CLI's `index build` and
/// the MCP `reindex` tool both report this back to the caller instead of
/// the per-file `IndexOutcome` the watcher logs at debug level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub indexed: usize,
    pub unchanged: usize,
    pub moved: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ScanReport {
    pub fn total(&self) -> usize {
        self.indexed + self.unchanged + self.moved + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { symbols: usize },
    /// Content hash unchanged since the last index pass (§4.4 step 3's
    /// at-most-once-per-content-version rule).
    Unchanged,
    /// Detected as a rename/move of a previously indexed, now-missing
    /// path sharing the same content hash; symbols were not re-extracted.
    Moved { from: String },
    /// Skipped by the ignore list, the size ceiling, or an unrecognized
    /// extension — never an error.
    Skipped,
}

#[derive(Clone)]
pub struct Indexer {
    store: Store,
    plugins: std::sync::Arc<PluginRegistry>,
    repository_id: RepositoryId,
    repo_root: PathBuf,
    max_file_size_bytes: u64,
    failures: Arc<FailureTracker>,
}

impl Indexer {
    pub fn new(
        store: Store,
        plugins: std::sync::Arc<PluginRegistry>,
        repository_id: RepositoryId,
        repo_root: PathBuf,
        max_file_size_bytes: u64,
    ) -> Self {
        Self {
            store,
            plugins,
            repository_id,
            repo_root,
            max_file_size_bytes,
            failures: Arc::new(FailureTracker::new(DEFAULT_FAILURE_WINDOW, DEFAULT_FAILURE_THRESHOLD)),
        }
    }

    /// Overrides the rolling-window size/threshold from `IndexingConfig`
    /// (§4.3); callers that only need the spec's own defaults can skip this.
    pub fn with_failure_policy(mut self, window: usize, threshold: usize) -> Self {
        self.failures = Arc::new(FailureTracker::new(window, threshold));
        self
    }

    fn relative_path(&self, absolute_path: &Path) -> Option<String> {
        absolute_path
            .strip_prefix(&self.repo_root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    /// Index one file: called on debounced create/modify events. Failures
    /// are per-file (§4.3 "Failure isolation") — they never propagate past
    /// the caller's log line.
    pub fn index_path(&self, absolute_path: &Path) -> Result<IndexOutcome, WatchError> {
        let Some(relative_path) = self.relative_path(absolute_path) else {
            return Ok(IndexOutcome::Skipped);
        };

        let metadata = match std::fs::metadata(absolute_path) {
            Ok(m) if m.is_file() => m,
            _ => return Ok(IndexOutcome::Skipped),
        };
        if metadata.len() > self.max_file_size_bytes {
            tracing::debug!(path = %relative_path, size = metadata.len(), "skipping oversized file");
            return Ok(IndexOutcome::Skipped);
        }

        let Some(plugin) = self.plugins.for_path(absolute_path) else {
            return Ok(IndexOutcome::Skipped);
        };

        if looks_binary(absolute_path) {
            tracing::debug!(path = %relative_path, "skipping binary file");
            return Ok(IndexOutcome::Skipped);
        }

        let content = match std::fs::read_to_string(absolute_path) {
            Ok(c) => c,
            Err(_) => {
                // Not valid UTF-8 or unreadable; not a plugin failure, just
                // not something the text pipeline can index.
                return Ok(IndexOutcome::Skipped);
            }
        };
        let content_hash = hash_content(&content);
        let mtime = mtime_unix(&metadata);
        let size = metadata.len();
        let language_tag = plugin.language_tag().0;
        let degraded = self.failures.is_degraded(&language_tag);

        let (outcome, parse_failed) = self.store.with_writer(|conn| {
            if let Some(candidate) = crate::storage::files::find_move_candidate(
                conn,
                self.repository_id,
                &content_hash,
                &relative_path,
            )? {
                let from = candidate.old_path.clone();
                crate::storage::files::record_move(conn, self.repository_id, &candidate, &relative_path, &content_hash)?;
                crate::storage::cache::invalidate_all(conn)?;
                return Ok((IndexOutcome::Moved { from }, false));
            }

            let (file_id, changed) = crate::storage::files::upsert_file(
                conn,
                self.repository_id,
                &relative_path,
                &content_hash,
                Some(&language_tag),
                size,
                mtime,
            )?;
            if !changed {
                return Ok((IndexOutcome::Unchanged, false));
            }

            // §4.3 "Failure isolation": a plugin past the rolling-window
            // threshold is skipped rather than retried — the file is still
            // recorded (with no symbols) so it isn't silently re-queued
            // forever by the content-hash gate.
            if degraded {
                tracing::debug!(path = %relative_path, language = %language_tag, "plugin degraded, skipping extraction");
                crate::storage::symbols::replace_symbols(conn, file_id, &[], &[], &[])?;
                crate::storage::search::replace_file_body(conn, &relative_path, &content)?;
                crate::storage::cache::invalidate_all(conn)?;
                return Ok((IndexOutcome::Indexed { symbols: 0 }, false));
            }

            match plugin.parse(file_id, &relative_path, &content) {
                Ok(parsed) => {
                    let symbol_count = parsed.symbols.len();
                    crate::storage::symbols::replace_symbols(
                        conn,
                        file_id,
                        &parsed.symbols,
                        &parsed.references,
                        &parsed.imports,
                    )?;
                    crate::storage::search::replace_file_body(conn, &relative_path, &content)?;
                    crate::storage::cache::invalidate_all(conn)?;
                    Ok((IndexOutcome::Indexed { symbols: symbol_count }, false))
                }
                Err(e) => {
                    tracing::warn!(path = %relative_path, language = %language_tag, error = %e, "parse failed, file recorded with no symbols");
                    crate::storage::symbols::replace_symbols(conn, file_id, &[], &[], &[])?;
                    crate::storage::search::replace_file_body(conn, &relative_path, &content)?;
                    crate::storage::cache::invalidate_all(conn)?;
                    Ok((IndexOutcome::Indexed { symbols: 0 }, true))
                }
            }
        })?;

        if !degraded {
            if let Some(failures) = self.failures.record(&language_tag, parse_failed) {
                tracing::warn!(
                    "{}",
                    PluginError::Degraded {
                        language: language_tag.clone(),
                        failures,
                    }
                );
            }
        }

        Ok(outcome)
    }

    /// Soft-delete a removed file (§3 File Lifecycle). Called immediately
    /// on a delete event, with no debounce — a delete can't be coalesced
    /// away the way a burst of saves can.
    pub fn remove_path(&self, absolute_path: &Path) -> Result<(), WatchError> {
        let Some(relative_path) = self.relative_path(absolute_path) else {
            return Ok(());
        };
        self.store.with_writer(|conn| {
            if let Some(record) =
                crate::storage::files::get_file_by_path(conn, self.repository_id, &relative_path)?
            {
                crate::storage::files::mark_file_deleted(conn, record.id)?;
                crate::storage::cache::invalidate_all(conn)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// A full indexing pass over every file under the repository root
    /// (§6 CLI `index build`, MCP `reindex`). Grounded on the teacher's
    /// `FileWalker` (`indexing/walker.rs`) for the `ignore::WalkBuilder`
    /// traversal and on its pipeline's `index.rs` stage for parallelizing
    /// the per-file work with `rayon` — discovery and parse run across
    /// threads, but each file still goes through [`Indexer::index_path`],
    /// so the single-writer invariant (§4.2 "Concurrency") holds exactly
    /// as it does for watcher-driven events.
    pub fn full_scan(&self, extra_ignore_patterns: &[String]) -> ScanReport {
        let mut builder = ignore::WalkBuilder::new(&self.repo_root);
        builder
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false);

        let mut overrides = ignore::overrides::OverrideBuilder::new(&self.repo_root);
        for pattern in extra_ignore_patterns {
            if let Err(e) = overrides.add(&format!("!{pattern}")) {
                tracing::warn!(pattern, error = %e, "invalid configured ignore pattern, skipping");
            }
        }
        if let Ok(overrides) = overrides.build() {
            builder.overrides(overrides);
        }

        let paths: Vec<PathBuf> = builder
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.into_path())
            .collect();

        let outcomes: Vec<Result<IndexOutcome, WatchError>> =
            paths.par_iter().map(|path| self.index_path(path)).collect();

        let mut report = ScanReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(IndexOutcome::Indexed { .. }) => report.indexed += 1,
                Ok(IndexOutcome::Unchanged) => report.unchanged += 1,
                Ok(IndexOutcome::Moved { .. }) => report.moved += 1,
                Ok(IndexOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "full scan: file failed to index");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// §4.4 step 1 "reject binary files by content sniff": a NUL byte in the
/// first 8KiB is the cheap, ecosystem-standard heuristic (`git`, `ripgrep`,
/// and friends use the same threshold) — cheaper than attempting a full
/// UTF-8 decode of a potentially large binary file just to throw it away.
const BINARY_SNIFF_WINDOW: usize = 8192;

fn looks_binary(path: &Path) -> bool {
    use std::io::Read;
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut buf = [0u8; BINARY_SNIFF_WINDOW];
    let Ok(read) = file.read(&mut buf) else {
        return false;
    };
    buf[..read].contains(&0)
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn mtime_unix(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::upsert_repository;

    fn setup(dir: &Path) -> Indexer {
        let store = Store::open_in_memory().unwrap();
        let repository_id = store
            .with_writer(|conn| upsert_repository(conn, "hash", &dir.to_string_lossy(), None))
            .unwrap();
        let plugins = std::sync::Arc::new(PluginRegistry::with_all_generic().unwrap());
        Indexer::new(store, plugins, repository_id, dir.to_path_buf(), 5 * 1024 * 1024)
    }

    #[test]
    fn indexing_a_new_python_file_extracts_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("greet.py");
        std::fs::write(&file_path, "def greet():\n    pass\n").unwrap();

        let indexer = setup(dir.path());
        let outcome = indexer.index_path(&file_path).unwrap();
        assert_eq!(outcome, IndexOutcome::Indexed { symbols: 1 });
    }

    #[test]
    fn indexing_a_file_makes_its_content_phrase_searchable_via_bm25() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("greet.py");
        std::fs::write(&file_path, "def greet():\n    # prints a friendly banner\n    pass\n").unwrap();

        let indexer = setup(dir.path());
        indexer.index_path(&file_path).unwrap();

        let hits = indexer
            .store
            .with_reader(|conn| {
                Ok(crate::storage::search::search_bm25(
                    conn,
                    "banner",
                    crate::storage::Corpus::Code,
                    10,
                    0,
                ))
            })
            .unwrap();
        assert!(!hits.is_empty(), "a phrase only present in a comment must be findable via the content corpus");
        assert_eq!(hits[0].path, "greet.py");
    }

    #[test]
    fn reindexing_unchanged_content_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("greet.py");
        std::fs::write(&file_path, "def greet():\n    pass\n").unwrap();

        let indexer = setup(dir.path());
        indexer.index_path(&file_path).unwrap();
        let second = indexer.index_path(&file_path).unwrap();
        assert_eq!(second, IndexOutcome::Unchanged);
    }

    #[test]
    fn renaming_a_file_is_detected_as_a_move_not_a_reextraction() {
        let dir = tempfile::tempdir().unwrap();
        let old_path = dir.path().join("greet.py");
        std::fs::write(&old_path, "def greet():\n    pass\n").unwrap();

        let indexer = setup(dir.path());
        indexer.index_path(&old_path).unwrap();
        indexer.remove_path(&old_path).unwrap();

        let new_path = dir.path().join("hello.py");
        std::fs::write(&new_path, "def greet():\n    pass\n").unwrap();
        let outcome = indexer.index_path(&new_path).unwrap();
        assert_eq!(outcome, IndexOutcome::Moved { from: "greet.py".to_string() });

        let found = indexer
            .store
            .with_reader(|conn| {
                crate::storage::files::get_file_by_path(conn, indexer.repository_id, "hello.py")
            })
            .unwrap();
        assert!(found.is_some());
        assert!(!found.unwrap().is_deleted);
    }

    #[test]
    fn oversized_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("big.py");
        std::fs::write(&file_path, "x = 1\n").unwrap();

        let store = Store::open_in_memory().unwrap();
        let repository_id = store
            .with_writer(|conn| upsert_repository(conn, "hash", &dir.path().to_string_lossy(), None))
            .unwrap();
        let plugins = std::sync::Arc::new(PluginRegistry::with_all_generic().unwrap());
        let indexer = Indexer::new(store, plugins, repository_id, dir.path().to_path_buf(), 1);

        assert_eq!(indexer.index_path(&file_path).unwrap(), IndexOutcome::Skipped);
    }

    #[test]
    fn binary_files_are_skipped_by_content_sniff() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("embedded.py");
        std::fs::write(&file_path, b"def greet():\n\0\x01\x02binary\n").unwrap();

        let indexer = setup(dir.path());
        assert_eq!(indexer.index_path(&file_path).unwrap(), IndexOutcome::Skipped);
    }

    #[test]
    fn removing_a_file_soft_deletes_it() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("greet.py");
        std::fs::write(&file_path, "def greet():\n    pass\n").unwrap();

        let indexer = setup(dir.path());
        indexer.index_path(&file_path).unwrap();
        indexer.remove_path(&file_path).unwrap();

        let found = indexer
            .store
            .with_reader(|conn| {
                crate::storage::files::get_file_by_path(conn, indexer.repository_id, "greet.py")
            })
            .unwrap()
            .unwrap();
        assert!(found.is_deleted);
    }

    #[test]
    fn failure_tracker_stays_available_below_threshold() {
        let tracker = FailureTracker::new(DEFAULT_FAILURE_WINDOW, DEFAULT_FAILURE_THRESHOLD);
        for _ in 0..DEFAULT_FAILURE_THRESHOLD - 1 {
            assert!(tracker.record("python", true).is_none());
        }
        assert!(!tracker.is_degraded("python"));
    }

    #[test]
    fn failure_tracker_degrades_at_threshold_and_stays_degraded() {
        let tracker = FailureTracker::new(DEFAULT_FAILURE_WINDOW, DEFAULT_FAILURE_THRESHOLD);
        let mut tripped = false;
        for _ in 0..DEFAULT_FAILURE_THRESHOLD {
            tripped |= tracker.record("python", true).is_some();
        }
        assert!(tripped);
        assert!(tracker.is_degraded("python"));

        // Once degraded it doesn't re-trip on every subsequent call, but it
        // also never clears itself — only a fresh pass (a new `Indexer`)
        // re-arms it.
        assert!(tracker.record("python", true).is_none());
        assert!(tracker.is_degraded("python"));
    }

    #[test]
    fn failure_tracker_is_independent_per_language() {
        let tracker = FailureTracker::new(DEFAULT_FAILURE_WINDOW, DEFAULT_FAILURE_THRESHOLD);
        for _ in 0..DEFAULT_FAILURE_THRESHOLD {
            tracker.record("python", true);
        }
        assert!(tracker.is_degraded("python"));
        assert!(!tracker.is_degraded("rust"));
    }

    #[test]
    fn failure_tracker_window_forgets_old_successes_pattern() {
        let tracker = FailureTracker::new(DEFAULT_FAILURE_WINDOW, DEFAULT_FAILURE_THRESHOLD);
        // A long run of successes pushes earlier failures out of the
        // window, so scattered historical failures never accumulate.
        for _ in 0..DEFAULT_FAILURE_THRESHOLD - 1 {
            tracker.record("go", true);
        }
        for _ in 0..DEFAULT_FAILURE_WINDOW {
            tracker.record("go", false);
        }
        assert!(!tracker.is_degraded("go"));
    }
}
