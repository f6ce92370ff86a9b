//! Request-level operations the dashboard front-end calls into.
//!
//! Wraps the registry with the behavior a viewer expects: search cycles back
//! to the end once exhausted, and a log that disappears is dropped from the
//! available set instead of failing every later request.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::logs::{LogEntry, LogError, LogRegistry, Result, SearchDirection};

/// Search response as sent to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResponse {
    /// Absolute offset of the match, `-1` when nothing was found
    pub position: i64,
    /// Offset of the match inside `content`, `-1` when nothing was found
    pub buffer_pos: i64,
    pub filesize: u64,
    /// Context around the match, decoded leniently
    pub content: String,
    /// The full line containing the match, when it fits in the window
    pub line: String,
}

#[derive(Clone)]
pub struct LogService {
    registry: Arc<LogRegistry>,
}

impl LogService {
    pub fn new(registry: Arc<LogRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<LogRegistry> {
        &self.registry
    }

    /// Expand configured patterns; returns how many logs were new.
    pub fn refresh(&self, patterns: &[String]) -> usize {
        self.registry.add_patterns(patterns)
    }

    pub fn list_logs(&self) -> Vec<LogEntry> {
        self.registry.get_available()
    }

    /// Next chunk of `path` for `session`, optionally starting from the tail.
    pub fn read_log(&self, path: &Path, session: Option<&str>, seek_tail: bool) -> Result<Vec<u8>> {
        let result = self.registry.get(path, session).and_then(|handle| {
            let mut handle = handle.lock();
            if seek_tail {
                handle.set_tail_position()?;
            }
            handle.read()
        });
        self.evict_on_io_failure(path, result)
    }

    /// Find the next occurrence of `text` for `session`.
    pub fn search_log(
        &self,
        path: &Path,
        text: &str,
        session: Option<&str>,
    ) -> Result<SearchResponse> {
        self.search_log_in(path, text, session, None)
    }

    /// Like [`search_log`](Self::search_log), switching the session's search
    /// direction first when `direction` is given.
    pub fn search_log_in(
        &self,
        path: &Path,
        text: &str,
        session: Option<&str>,
        direction: Option<SearchDirection>,
    ) -> Result<SearchResponse> {
        let result = self.registry.get(path, session).and_then(|handle| {
            let mut handle = handle.lock();
            if let Some(direction) = direction {
                handle.set_direction(direction)?;
            }

            let found = handle.search(text.as_bytes())?;
            if handle.reached_end() {
                handle.reset()?;
            }
            let filesize = handle.len()?;

            Ok(match found.position {
                Some(position) => SearchResponse {
                    position: position as i64,
                    buffer_pos: found.window_offset as i64,
                    filesize,
                    line: String::from_utf8_lossy(line_around(&found.content, found.window_offset))
                        .into_owned(),
                    content: String::from_utf8_lossy(&found.content).into_owned(),
                },
                None => SearchResponse {
                    position: -1,
                    buffer_pos: -1,
                    filesize,
                    content: String::new(),
                    line: String::new(),
                },
            })
        });
        self.evict_on_io_failure(path, result)
    }

    fn evict_on_io_failure<T>(&self, path: &Path, result: Result<T>) -> Result<T> {
        if let Err(LogError::Io { source, .. }) = &result {
            tracing::info!(
                path = %path.display(),
                error = %source,
                "log no longer readable, removing from available logs"
            );
            self.registry.remove_available(path);
        }
        result
    }
}

/// The line of `buf` containing byte `at`, without its newline.
fn line_around(buf: &[u8], at: usize) -> &[u8] {
    let at = at.min(buf.len());
    let start = memchr::memrchr(b'\n', &buf[..at]).map_or(0, |i| i + 1);
    let end = memchr::memchr(b'\n', &buf[at..]).map_or(buf.len(), |i| at + i);
    &buf[start..end]
}
