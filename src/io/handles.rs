//! Bounded pool of open random-access file handles.
//!
//! A slide spreads its pixels over one binary file per (channel, timepoint)
//! combination, so streaming a large multi-position acquisition touches far
//! more files than an OS process may keep open. The pool maps each path to an
//! open [`File`] and caps the total at [`MAX_OPEN_STREAMS`], evicting in FIFO
//! order: the insertion order of first opens, not last access.
//!
//! The pool is single-threaded by design; callers serialise access to the
//! reader that owns it.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

/// Maximum number of simultaneously open streams.
pub const MAX_OPEN_STREAMS: usize = 100;

/// FIFO-bounded mapping from path to open file handle.
#[derive(Debug, Default)]
pub struct HandleCache {
    streams: HashMap<PathBuf, File>,
    /// Insertion-ordered index; the smallest counter is evicted first.
    order: BTreeMap<u64, PathBuf>,
    counter: u64,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the open stream for `path`, opening it on first use.
    ///
    /// When the pool is full the oldest stream is closed before the new one
    /// is opened, so the count never exceeds [`MAX_OPEN_STREAMS`].
    pub fn get(&mut self, path: &Path) -> io::Result<&mut File> {
        if !self.streams.contains_key(path) {
            while self.streams.len() >= MAX_OPEN_STREAMS {
                self.evict_oldest();
            }
            let file = File::open(path)?;
            self.streams.insert(path.to_path_buf(), file);
            self.order.insert(self.counter, path.to_path_buf());
            self.counter += 1;
            trace!(path = %path.display(), open = self.streams.len(), "opened stream");
        }
        self.streams
            .get_mut(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "stream missing from pool"))
    }

    fn evict_oldest(&mut self) {
        if let Some((counter, path)) = self.order.pop_first() {
            trace!(counter, path = %path.display(), "evicting oldest stream");
            self.streams.remove(&path);
        } else {
            // Order index out of sync; drop everything rather than loop.
            self.streams.clear();
        }
    }

    /// Number of currently open streams.
    pub fn open_count(&self) -> usize {
        self.streams.len()
    }

    /// Whether a stream for `path` is currently open.
    pub fn is_open(&self, path: &Path) -> bool {
        self.streams.contains_key(path)
    }

    /// Close every stream in the pool.
    pub fn close_all(&mut self) {
        trace!(open = self.streams.len(), "closing all streams");
        self.streams.clear();
        self.order.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_files(dir: &TempDir, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.path().join(format!("file_{i:04}.npy"));
                let mut file = File::create(&path).unwrap();
                writeln!(file, "{i}").unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_open_and_reuse() {
        let dir = TempDir::new().unwrap();
        let paths = make_files(&dir, 2);
        let mut cache = HandleCache::new();

        cache.get(&paths[0]).unwrap();
        cache.get(&paths[1]).unwrap();
        cache.get(&paths[0]).unwrap();

        assert_eq!(cache.open_count(), 2);
        assert!(cache.is_open(&paths[0]));
        assert!(cache.is_open(&paths[1]));
    }

    #[test]
    fn test_missing_file_error() {
        let dir = TempDir::new().unwrap();
        let mut cache = HandleCache::new();
        let result = cache.get(&dir.path().join("absent.npy"));
        assert!(result.is_err());
        assert_eq!(cache.open_count(), 0);
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let dir = TempDir::new().unwrap();
        let paths = make_files(&dir, MAX_OPEN_STREAMS + 1);
        let mut cache = HandleCache::new();

        for path in &paths {
            cache.get(path).unwrap();
        }

        // The 101st open evicts the very first stream, nothing else.
        assert_eq!(cache.open_count(), MAX_OPEN_STREAMS);
        assert!(!cache.is_open(&paths[0]));
        for path in &paths[1..] {
            assert!(cache.is_open(path));
        }
    }

    #[test]
    fn test_eviction_is_first_open_order_not_last_access() {
        let dir = TempDir::new().unwrap();
        let paths = make_files(&dir, MAX_OPEN_STREAMS + 1);
        let mut cache = HandleCache::new();

        for path in &paths[..MAX_OPEN_STREAMS] {
            cache.get(path).unwrap();
        }
        // Re-touch the oldest; FIFO order must ignore the access.
        cache.get(&paths[0]).unwrap();
        cache.get(&paths[MAX_OPEN_STREAMS]).unwrap();

        assert!(!cache.is_open(&paths[0]));
        assert!(cache.is_open(&paths[MAX_OPEN_STREAMS]));
    }

    #[test]
    fn test_close_all() {
        let dir = TempDir::new().unwrap();
        let paths = make_files(&dir, 3);
        let mut cache = HandleCache::new();
        for path in &paths {
            cache.get(path).unwrap();
        }

        cache.close_all();
        assert_eq!(cache.open_count(), 0);

        // The pool is reusable after closing.
        cache.get(&paths[1]).unwrap();
        assert_eq!(cache.open_count(), 1);
    }

    #[test]
    fn test_bound_holds_under_churn() {
        let dir = TempDir::new().unwrap();
        let paths = make_files(&dir, MAX_OPEN_STREAMS + 50);
        let mut cache = HandleCache::new();

        for path in &paths {
            cache.get(path).unwrap();
            assert!(cache.open_count() <= MAX_OPEN_STREAMS);
        }
    }
}
