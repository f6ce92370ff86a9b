//! The set of logs a dashboard may open, and the per-session handles on them.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use super::error::{LogError, Result};
use super::handle::{LogHandle, DEFAULT_CHUNK_SIZE};
use super::searcher::SearchDirection;

/// A handle shared between the registry and whoever is currently using it.
pub type SharedLogHandle = Arc<Mutex<LogHandle>>;

/// Open handles kept before idle ones are closed to make room.
pub const DEFAULT_MAX_HANDLES: usize = 256;

/// Listing entry for one available log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub path: PathBuf,
    pub size: u64,
    pub atime: Option<DateTime<Utc>>,
    pub mtime: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HandleKey {
    path: PathBuf,
    session: Option<String>,
}

struct OpenHandle {
    handle: SharedLogHandle,
    last_used: Instant,
}

#[derive(Default)]
struct RegistryInner {
    available: BTreeSet<PathBuf>,
    handles: HashMap<HandleKey, OpenHandle>,
}

impl RegistryInner {
    /// Remove the least recently used handle nobody outside the registry holds.
    fn take_idle(&mut self) -> Option<(HandleKey, SharedLogHandle)> {
        let key = self
            .handles
            .iter()
            .filter(|(_, open)| Arc::strong_count(&open.handle) == 1)
            .min_by_key(|(_, open)| open.last_used)
            .map(|(key, _)| key.clone())?;
        self.handles.remove(&key).map(|open| (key, open.handle))
    }
}

/// Thread-safe registry of available logs and open handles.
///
/// Membership in the available set is what allows a path to be opened at
/// all. Every `(path, session)` pair gets its own handle and descriptor so
/// concurrent viewers never share a cursor. Once `max_handles` are open,
/// the least recently used idle handle is closed for each new one; its
/// session starts over from the tail on its next request.
pub struct LogRegistry {
    inner: Mutex<RegistryInner>,
    chunk_size: usize,
    direction: SearchDirection,
    max_handles: usize,
}

impl LogRegistry {
    pub fn new() -> Self {
        Self::with_options(DEFAULT_CHUNK_SIZE, SearchDirection::Reverse)
    }

    pub fn with_options(chunk_size: usize, direction: SearchDirection) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            chunk_size: chunk_size.max(1),
            direction,
            max_handles: DEFAULT_MAX_HANDLES,
        }
    }

    pub fn with_max_handles(mut self, max_handles: usize) -> Self {
        self.max_handles = max_handles.max(1);
        self
    }

    /// Make `path` available after checking it opens as a regular file.
    ///
    /// Returns `true` when the path was not available before.
    pub fn add_available(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        probe(path)?;

        let added = self.inner.lock().available.insert(path.to_path_buf());
        if added {
            tracing::debug!(path = %path.display(), "log added");
        }
        Ok(added)
    }

    /// Expand glob patterns and add every regular file they match.
    ///
    /// Bad patterns and unreadable matches are logged and skipped. Returns
    /// the number of newly added paths.
    pub fn add_patterns<I, S>(&self, patterns: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let paths = match glob::glob(pattern) {
                Ok(paths) => paths,
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "invalid log pattern");
                    continue;
                }
            };

            for entry in paths {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::debug!(pattern, error = %e, "skipping unreadable match");
                        continue;
                    }
                };

                match fs::symlink_metadata(&path) {
                    Ok(meta) if meta.file_type().is_file() => {}
                    _ => continue,
                }

                match self.add_available(&path) {
                    Ok(true) => added += 1,
                    Ok(false) => {}
                    Err(e) => tracing::info!(error = %e, "skipping log"),
                }
            }
        }

        if added > 0 {
            tracing::info!(added, "added logs from patterns");
        }
        added
    }

    /// Remove `path` from the available set and close all of its handles.
    pub fn remove_available(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let evicted: Vec<SharedLogHandle> = {
            let mut inner = self.inner.lock();
            inner.available.remove(path);
            let keys: Vec<HandleKey> = inner
                .handles
                .keys()
                .filter(|k| k.path == path)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|k| inner.handles.remove(k))
                .map(|open| open.handle)
                .collect()
        };

        for handle in &evicted {
            handle.lock().close();
        }
        tracing::info!(path = %path.display(), handles = evicted.len(), "log removed");
    }

    pub fn is_available(&self, path: impl AsRef<Path>) -> bool {
        self.inner.lock().available.contains(path.as_ref())
    }

    pub fn available_paths(&self) -> Vec<PathBuf> {
        self.inner.lock().available.iter().cloned().collect()
    }

    /// Listing of available logs; entries that can no longer be stat'ed are
    /// dropped from the available set.
    pub fn get_available(&self) -> Vec<LogEntry> {
        let mut entries = Vec::new();

        for path in self.available_paths() {
            match fs::metadata(&path) {
                Ok(meta) => entries.push(LogEntry {
                    size: meta.len(),
                    atime: meta.accessed().ok().map(to_utc),
                    mtime: meta.modified().ok().map(to_utc),
                    path,
                }),
                Err(e) => {
                    tracing::info!(
                        path = %path.display(),
                        error = %e,
                        "could not stat log, removing from available logs"
                    );
                    self.remove_available(&path);
                }
            }
        }

        entries
    }

    /// The handle for `(path, session)`, opening one if needed.
    pub fn get(&self, path: impl AsRef<Path>, session: Option<&str>) -> Result<SharedLogHandle> {
        let path = path.as_ref();
        let mut inner = self.inner.lock();

        if !inner.available.contains(path) {
            return Err(LogError::NotAvailable(path.to_path_buf()));
        }

        let key = HandleKey {
            path: path.to_path_buf(),
            session: session.map(str::to_string),
        };
        if let Some(open) = inner.handles.get_mut(&key) {
            open.last_used = Instant::now();
            return Ok(Arc::clone(&open.handle));
        }

        let handle = LogHandle::open(path, key.session.clone(), self.chunk_size, self.direction)?;
        let handle = Arc::new(Mutex::new(handle));

        let idle = if inner.handles.len() >= self.max_handles {
            inner.take_idle()
        } else {
            None
        };
        inner.handles.insert(
            key,
            OpenHandle {
                handle: Arc::clone(&handle),
                last_used: Instant::now(),
            },
        );
        let open = inner.handles.len();
        drop(inner);

        match idle {
            Some((idle_key, idle_handle)) => {
                idle_handle.lock().close();
                tracing::debug!(
                    path = %idle_key.path.display(),
                    session = ?idle_key.session,
                    "closed idle log handle"
                );
            }
            None if open > self.max_handles => {
                tracing::warn!(open, max = self.max_handles, "every open log handle is in use");
            }
            None => {}
        }
        Ok(handle)
    }

    /// Number of open handles across all sessions.
    pub fn handle_count(&self) -> usize {
        self.inner.lock().handles.len()
    }

    /// Close and drop every handle; the available set is kept.
    pub fn clear(&self) {
        let handles: Vec<SharedLogHandle> = {
            let mut inner = self.inner.lock();
            inner.handles.drain().map(|(_, open)| open.handle).collect()
        };
        for handle in &handles {
            handle.lock().close();
        }
    }

    /// Close every handle and forget every available path.
    pub fn clear_available(&self) {
        self.clear();
        self.inner.lock().available.clear();
    }
}

impl Default for LogRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LogRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}

fn probe(path: &Path) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| LogError::probe(path, e.to_string()))?;
    if !meta.is_file() {
        return Err(LogError::probe(path, "not a regular file"));
    }
    File::open(path).map_err(|e| LogError::probe(path, e.to_string()))?;
    Ok(())
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;
    use tempfile::TempDir;

    fn write_log(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn pattern(dir: &TempDir, glob: &str) -> String {
        dir.path().join(glob).to_string_lossy().into_owned()
    }

    #[test]
    fn add_non_existing_fails() {
        let registry = LogRegistry::new();
        let err = registry
            .add_available("/var/log/w0ntre4lly3xist.log")
            .unwrap_err();
        assert!(matches!(err, LogError::Probe { .. }));
        assert!(registry.available_paths().is_empty());
    }

    #[test]
    fn add_available_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "app.log", b"hello\n");
        let registry = LogRegistry::new();

        assert!(registry.add_available(&path).unwrap());
        assert!(!registry.add_available(&path).unwrap());
        assert_eq!(registry.available_paths(), vec![path]);
    }

    #[test]
    fn add_patterns_counts_new_files_once() {
        let dir = TempDir::new().unwrap();
        write_log(&dir, "one.log", b"1\n");
        write_log(&dir, "two.log", b"2\n");
        write_log(&dir, "notes.txt", b"3\n");
        let registry = LogRegistry::new();
        let patterns = vec![pattern(&dir, "*.log")];

        assert_eq!(registry.add_patterns(&patterns), 2);
        assert_eq!(registry.add_patterns(&patterns), 0);
        assert_eq!(registry.available_paths().len(), 2);
    }

    #[test]
    fn add_patterns_recurses_and_skips_directories() {
        let dir = TempDir::new().unwrap();
        write_log(&dir, "a.log", b"a\n");
        write_log(&dir, "nested/deeper/b.log", b"b\n");
        fs::create_dir_all(dir.path().join("dir.log")).unwrap();
        let registry = LogRegistry::new();

        assert_eq!(registry.add_patterns([pattern(&dir, "**/*.log")]), 2);
        assert_eq!(
            registry.add_patterns([dir.path().to_string_lossy().into_owned()]),
            0
        );
    }

    #[cfg(unix)]
    #[test]
    fn add_patterns_skips_symlinks() {
        let dir = TempDir::new().unwrap();
        let target = write_log(&dir, "real.log", b"x\n");
        std::os::unix::fs::symlink(&target, dir.path().join("link.log")).unwrap();
        let registry = LogRegistry::new();

        assert_eq!(registry.add_patterns([pattern(&dir, "*.log")]), 1);
        assert!(registry.is_available(&target));
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        let dir = TempDir::new().unwrap();
        write_log(&dir, "a.log", b"a\n");
        let registry = LogRegistry::new();

        let added = registry.add_patterns(["[unclosed".to_string(), pattern(&dir, "*.log")]);
        assert_eq!(added, 1);
    }

    #[test]
    fn get_rejects_paths_outside_available_set() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "exists.log", b"on disk\n");
        let registry = LogRegistry::new();

        let err = registry.get(&path, None).unwrap_err();
        assert!(matches!(err, LogError::NotAvailable(p) if p == path));
    }

    #[test]
    fn sessions_get_isolated_handles() {
        let dir = TempDir::new().unwrap();
        let mut content = b"x".repeat(1000);
        content[100..106].copy_from_slice(b"NEEDLE");
        content[800..806].copy_from_slice(b"NEEDLE");
        let path = write_log(&dir, "app.log", &content);
        let registry = LogRegistry::new();
        registry.add_available(&path).unwrap();

        let alice = registry.get(&path, Some("alice")).unwrap();
        let bob = registry.get(&path, Some("bob")).unwrap();
        assert!(!Arc::ptr_eq(&alice, &bob));
        assert!(Arc::ptr_eq(&alice, &registry.get(&path, Some("alice")).unwrap()));
        assert_eq!(registry.handle_count(), 2);

        assert_eq!(alice.lock().search(b"NEEDLE").unwrap().position, Some(800));
        assert_eq!(alice.lock().search(b"NEEDLE").unwrap().position, Some(100));
        assert_eq!(bob.lock().search(b"NEEDLE").unwrap().position, Some(800));
    }

    #[test]
    fn concurrent_get_creates_one_handle() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "app.log", b"shared\n");
        let registry = Arc::new(LogRegistry::new());
        registry.add_available(&path).unwrap();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let path = path.clone();
                thread::spawn(move || registry.get(&path, Some("same")).unwrap())
            })
            .collect();
        let handles: Vec<SharedLogHandle> =
            workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert_eq!(registry.handle_count(), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn idle_handles_are_closed_past_the_limit() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "app.log", b"data\n");
        let registry = LogRegistry::new().with_max_handles(2);
        registry.add_available(&path).unwrap();

        let alice = registry.get(&path, Some("alice")).unwrap();
        let bob = Arc::downgrade(&registry.get(&path, Some("bob")).unwrap());
        registry.get(&path, Some("carol")).unwrap();

        assert_eq!(registry.handle_count(), 2);
        assert!(bob.upgrade().is_none());
        assert!(!alice.lock().is_closed());
        assert!(Arc::ptr_eq(&alice, &registry.get(&path, Some("alice")).unwrap()));
    }

    #[test]
    fn handles_in_use_are_never_closed_for_room() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "app.log", b"data\n");
        let registry = LogRegistry::new().with_max_handles(1);
        registry.add_available(&path).unwrap();

        let first = registry.get(&path, Some("first")).unwrap();
        let second = registry.get(&path, Some("second")).unwrap();

        assert_eq!(registry.handle_count(), 2);
        assert!(!first.lock().is_closed());
        assert!(!second.lock().is_closed());
    }

    #[test]
    fn remove_available_closes_handles() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "app.log", b"data\n");
        let other = write_log(&dir, "other.log", b"data\n");
        let registry = LogRegistry::new();
        registry.add_available(&path).unwrap();
        registry.add_available(&other).unwrap();

        let handle = registry.get(&path, Some("s1")).unwrap();
        registry.get(&path, None).unwrap();
        registry.get(&other, None).unwrap();

        registry.remove_available(&path);

        assert!(handle.lock().is_closed());
        assert_eq!(registry.handle_count(), 1);
        assert!(!registry.is_available(&path));
        assert!(matches!(
            registry.get(&path, None),
            Err(LogError::NotAvailable(_))
        ));
    }

    #[test]
    fn get_available_prunes_missing_files() {
        let dir = TempDir::new().unwrap();
        let keep = write_log(&dir, "keep.log", b"12345");
        let gone = write_log(&dir, "gone.log", b"x");
        let registry = LogRegistry::new();
        registry.add_available(&keep).unwrap();
        registry.add_available(&gone).unwrap();

        fs::remove_file(&gone).unwrap();
        let entries = registry.get_available();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, keep);
        assert_eq!(entries[0].size, 5);
        assert!(entries[0].mtime.is_some());
        assert!(!registry.is_available(&gone));
    }

    #[test]
    fn clear_keeps_available_set() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "app.log", b"data\n");
        let registry = LogRegistry::new();
        registry.add_available(&path).unwrap();
        let handle = registry.get(&path, None).unwrap();

        registry.clear();
        assert!(handle.lock().is_closed());
        assert_eq!(registry.handle_count(), 0);
        assert!(registry.is_available(&path));

        registry.clear_available();
        assert!(registry.available_paths().is_empty());
    }

    #[test]
    fn handles_use_registry_chunk_size() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "app.log", &b"y".repeat(5000));
        let registry = LogRegistry::with_options(1024, SearchDirection::Reverse);
        registry.add_available(&path).unwrap();

        let handle = registry.get(&path, None).unwrap();
        let mut handle = handle.lock();
        handle.set_tail_position().unwrap();
        assert_eq!(handle.read().unwrap().len(), 1024);
    }
}
