//! The watcher (§4.4): observes create/modify/delete/move events under a
//! repository root, debounces them per path, and hands the result to the
//! indexing worker through a bounded channel — the "bounded message
//! channel with explicit debouncing" redesign from §9, replacing the
//! source's coroutine/async-await watcher-to-indexer handoff. The watcher
//! is the producer; the worker thread spawned by [`RepositoryWatcher::spawn`]
//! is the single consumer, matching §5's "one dedicated indexing worker
//! task" and §4.2's "one writer connection" invariant.
//!
//! Grounded on the teacher's `UnifiedWatcher` (`src/watcher/unified.rs`)
//! for the notify-driven event loop shape, simplified from its
//! multi-handler dispatch (code/document/config) down to the single
//! code-indexing handler this crate has, and on `ignore::gitignore` (used
//! by the teacher's own `WalkBuilder`-based directory scans) for the
//! ignore-file semantics §6 calls for.

pub mod debouncer;
pub mod pipeline;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};

use crate::config::WatcherConfig;
use crate::error::WatchError;
use debouncer::Debouncer;
use pipeline::Indexer;

/// Default patterns excluded from watching even when the repository has no
/// `.gitignore` of its own — directories that are never source (§4.4
/// "Filter: reject paths matching the configured ignore list").
const DEFAULT_IGNORES: &[&str] = &[
    ".git/",
    "target/",
    "node_modules/",
    ".indexes/",
    ".mcp-index/",
    ".codeindex/",
];

/// The repository-root-relative ignore file named in §6 ("Ignore file").
const IGNORE_FILE_NAME: &str = ".indexignore";

fn load_ignore(repo_root: &Path, extra_patterns: &[String]) -> Gitignore {
    let mut builder = GitignoreBuilder::new(repo_root);
    for pattern in DEFAULT_IGNORES {
        if let Err(e) = builder.add_line(None, pattern) {
            tracing::warn!(pattern, error = %e, "invalid built-in ignore pattern");
        }
    }
    for pattern in extra_patterns {
        if let Err(e) = builder.add_line(None, pattern) {
            tracing::warn!(pattern, error = %e, "invalid configured ignore pattern");
        }
    }
    if let Some(err) = builder.add(repo_root.join(".gitignore")) {
        tracing::debug!(error = %err, "no repository .gitignore (or it failed to parse)");
    }
    let custom = repo_root.join(IGNORE_FILE_NAME);
    if custom.is_file() {
        if let Some(err) = builder.add(&custom) {
            tracing::warn!(error = %err, "failed to parse .indexignore");
        }
    }
    builder.build().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to build ignore set, falling back to defaults only");
        GitignoreBuilder::new(repo_root).build().expect("empty gitignore builder never fails")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WorkItem {
    Changed(PathBuf),
    Removed(PathBuf),
}

/// Handle to a running watcher. `cancel` requests the worker thread stop;
/// it is honored between files, never mid-transaction (§4.4 "Cancellation").
#[derive(Clone)]
pub struct WatchHandle {
    cancelled: Arc<AtomicBool>,
}

impl WatchHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Watches one repository root and feeds every accepted change through to
/// an [`Indexer`]. Construct with [`RepositoryWatcher::new`] and consume
/// with [`RepositoryWatcher::spawn`].
pub struct RepositoryWatcher {
    repo_root: PathBuf,
    config: WatcherConfig,
    ignore: Gitignore,
    indexer: Indexer,
}

impl RepositoryWatcher {
    pub fn new(repo_root: PathBuf, config: WatcherConfig, extra_ignore_patterns: &[String], indexer: Indexer) -> Self {
        let ignore = load_ignore(&repo_root, extra_ignore_patterns);
        Self {
            repo_root,
            config,
            ignore,
            indexer,
        }
    }

    /// Start watching on a dedicated pair of OS threads — one debouncing
    /// raw `notify` events, one draining the resulting work queue through
    /// the indexer (§5 "indexing worker task", "serialized writes").
    /// `notify`'s watcher and this crate's `Indexer` are both synchronous,
    /// so plain threads plus a bounded `crossbeam_channel` model the
    /// producer/consumer split without pulling the filesystem watch loop
    /// onto the async runtime.
    pub fn spawn(self) -> Result<WatchHandle, WatchError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = WatchHandle {
            cancelled: cancelled.clone(),
        };

        let (raw_tx, raw_rx) = crossbeam_channel::unbounded::<notify::Result<Event>>();
        let mut fs_watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| {
                // The notify callback runs on its own internal thread; errors
                // sending just mean the debounce thread already exited.
                let _ = raw_tx.send(res);
            })
            .map_err(|source| WatchError::Start {
                path: self.repo_root.clone(),
                source,
            })?;
        fs_watcher
            .watch(&self.repo_root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Start {
                path: self.repo_root.clone(),
                source,
            })?;

        let (work_tx, work_rx) = crossbeam_channel::bounded::<WorkItem>(self.config.queue_capacity);
        let queued: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));
        let debounce_queued = queued.clone();
        let worker_queued = queued;
        let ignore = self.ignore.clone();
        let repo_root = self.repo_root.clone();
        let debounce_ms = self.config.debounce_ms;

        // Debounce thread. Owns `fs_watcher` so the underlying OS watch
        // handles stay alive for as long as this thread runs.
        std::thread::spawn(move || {
            let _fs_watcher = fs_watcher;
            let mut debouncer = Debouncer::new(debounce_ms);
            loop {
                match raw_rx.recv_timeout(Duration::from_millis(50)) {
                    Ok(Ok(event)) => {
                        handle_raw_event(event, &ignore, &repo_root, &mut debouncer, &work_tx, &debounce_queued)
                    }
                    Ok(Err(e)) => tracing::warn!(error = %e, "filesystem watch error"),
                    Err(RecvTimeoutError::Timeout) => {
                        for path in debouncer.take_ready() {
                            enqueue(&work_tx, &debounce_queued, WorkItem::Changed(path));
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        // Worker thread: the single consumer (§5 "serialized writes").
        let indexer = self.indexer;
        std::thread::spawn(move || {
            for item in work_rx.iter() {
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                // Clear the in-flight marker as soon as the item is
                // dequeued, not after processing: a change arriving while
                // this item is being indexed must be allowed back onto the
                // queue rather than silently deduplicated away forever.
                let path = match &item {
                    WorkItem::Changed(p) | WorkItem::Removed(p) => p.clone(),
                };
                worker_queued.lock().unwrap().remove(&path);
                process(&indexer, item);
            }
        });

        Ok(handle)
    }
}

fn process(indexer: &Indexer, item: WorkItem) {
    match item {
        WorkItem::Changed(path) => match indexer.index_path(&path) {
            Ok(outcome) => tracing::debug!(path = %path.display(), ?outcome, "processed watcher event"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "indexing failed for watcher event"),
        },
        WorkItem::Removed(path) => {
            if let Err(e) = indexer.remove_path(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to mark removed path deleted");
            }
        }
    }
}

fn handle_raw_event(
    event: Event,
    ignore: &Gitignore,
    repo_root: &Path,
    debouncer: &mut Debouncer,
    work_tx: &Sender<WorkItem>,
    queued: &Arc<Mutex<HashSet<PathBuf>>>,
) {
    for path in event.paths {
        if !path.starts_with(repo_root) {
            continue;
        }
        if ignore.matched(&path, path.is_dir()).is_ignore() {
            continue;
        }
        match event.kind {
            EventKind::Modify(_) | EventKind::Create(_) => {
                debouncer.record(path);
            }
            EventKind::Remove(_) => {
                debouncer.remove(&path);
                enqueue(work_tx, queued, WorkItem::Removed(path));
            }
            _ => {}
        }
    }
}

/// §4.4 Backpressure: when the bounded queue is full, drop the event for a
/// path that's already queued rather than blocking the debounce thread —
/// the debouncer already collapsed same-path bursts, so only a second,
/// distinct path competing for the last slot is ever actually dropped.
fn enqueue(work_tx: &Sender<WorkItem>, queued: &Arc<Mutex<HashSet<PathBuf>>>, item: WorkItem) {
    let path = match &item {
        WorkItem::Changed(p) | WorkItem::Removed(p) => p.clone(),
    };
    {
        let mut guard = queued.lock().unwrap();
        if !guard.insert(path.clone()) {
            return;
        }
    }
    if work_tx.try_send(item).is_err() {
        tracing::warn!(path = %path.display(), "watcher work queue full, dropping event");
        queued.lock().unwrap().remove(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ignores_exclude_git_and_target_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ignore = load_ignore(dir.path(), &[]);
        assert!(ignore.matched(dir.path().join(".git/HEAD"), false).is_ignore());
        assert!(ignore.matched(dir.path().join("target/debug/foo"), false).is_ignore());
        assert!(!ignore.matched(dir.path().join("src/main.rs"), false).is_ignore());
    }

    #[test]
    fn repository_gitignore_patterns_are_honored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*.log\nbuild/\n").unwrap();
        let ignore = load_ignore(dir.path(), &[]);
        assert!(ignore.matched(dir.path().join("debug.log"), false).is_ignore());
        assert!(ignore.matched(dir.path().join("build/out"), false).is_ignore());
        assert!(!ignore.matched(dir.path().join("src/lib.rs"), false).is_ignore());
    }

    #[test]
    fn extra_configured_patterns_are_honored() {
        let dir = tempfile::tempdir().unwrap();
        let ignore = load_ignore(dir.path(), &["*.generated.rs".to_string()]);
        assert!(ignore.matched(dir.path().join("schema.generated.rs"), false).is_ignore());
    }

    #[test]
    fn indexignore_file_is_honored_alongside_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".indexignore"), "vendor/\n").unwrap();
        let ignore = load_ignore(dir.path(), &[]);
        assert!(ignore.matched(dir.path().join("vendor/lib.py"), false).is_ignore());
    }

    #[test]
    fn enqueue_drops_a_second_distinct_path_once_the_queue_is_full() {
        let (tx, rx) = crossbeam_channel::bounded::<WorkItem>(1);
        let queued: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));
        enqueue(&tx, &queued, WorkItem::Changed(PathBuf::from("a.py")));
        enqueue(&tx, &queued, WorkItem::Changed(PathBuf::from("b.py")));
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), WorkItem::Changed(PathBuf::from("a.py")));
    }

    #[test]
    fn enqueue_deduplicates_the_same_path_already_queued() {
        let (tx, rx) = crossbeam_channel::bounded::<WorkItem>(4);
        let queued: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));
        enqueue(&tx, &queued, WorkItem::Changed(PathBuf::from("a.py")));
        enqueue(&tx, &queued, WorkItem::Changed(PathBuf::from("a.py")));
        assert_eq!(rx.len(), 1);
    }
}
