//! Debounces file change events by path so a burst of saves (auto-save,
//! IDE formatting, a git checkout touching many files at once) collapses
//! into one indexing pass per file instead of one per raw filesystem
//! event (§4.4 "Debouncing").

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Debouncer {
    pending: HashMap<PathBuf, Instant>,
    duration: Duration,
}

impl Debouncer {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            duration: Duration::from_millis(debounce_ms),
        }
    }

    /// Record a change, resetting the debounce timer for this path.
    pub fn record(&mut self, path: PathBuf) {
        self.pending.insert(path, Instant::now());
    }

    pub fn remove(&mut self, path: &PathBuf) {
        self.pending.remove(path);
    }

    /// Take every path that has been stable for the debounce duration,
    /// removing them from the pending set.
    pub fn take_ready(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut ready = Vec::new();
        self.pending.retain(|path, last_change| {
            if now.duration_since(*last_change) >= self.duration {
                ready.push(path.clone());
                false
            } else {
                true
            }
        });
        ready
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn becomes_ready_only_after_the_debounce_window_elapses() {
        let mut debouncer = Debouncer::new(50);
        let path = PathBuf::from("/test/file.rs");
        debouncer.record(path.clone());

        assert!(debouncer.take_ready().is_empty());
        assert!(debouncer.has_pending());

        sleep(Duration::from_millis(60));
        let ready = debouncer.take_ready();
        assert_eq!(ready, vec![path]);
        assert!(!debouncer.has_pending());
    }

    #[test]
    fn a_second_change_resets_the_timer() {
        let mut debouncer = Debouncer::new(50);
        let path = PathBuf::from("/test/file.rs");
        debouncer.record(path.clone());

        sleep(Duration::from_millis(30));
        debouncer.record(path.clone());

        sleep(Duration::from_millis(30));
        assert!(debouncer.take_ready().is_empty(), "only 30ms since the reset");

        sleep(Duration::from_millis(30));
        assert_eq!(debouncer.take_ready(), vec![path]);
    }

    #[test]
    fn tracks_multiple_files_independently() {
        let mut debouncer = Debouncer::new(50);
        let path1 = PathBuf::from("/test/file1.rs");
        let path2 = PathBuf::from("/test/file2.rs");

        debouncer.record(path1.clone());
        sleep(Duration::from_millis(30));
        debouncer.record(path2.clone());

        sleep(Duration::from_millis(25));
        assert_eq!(debouncer.take_ready(), vec![path1]);
        assert!(debouncer.has_pending());

        sleep(Duration::from_millis(30));
        assert_eq!(debouncer.take_ready(), vec![path2]);
    }

    #[test]
    fn remove_drops_a_pending_path() {
        let mut debouncer = Debouncer::new(50);
        let path = PathBuf::from("/test/file.rs");
        debouncer.record(path.clone());
        assert!(debouncer.has_pending());

        debouncer.remove(&path);
        assert!(!debouncer.has_pending());
        assert_eq!(debouncer.pending_count(), 0);
    }
}
