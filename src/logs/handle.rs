//! A single open log file with its read cursor and search state.

use std::fs;
use std::path::{Path, PathBuf};

use super::accessor::ChunkedFileAccessor;
use super::error::{LogError, Result};
use super::searcher::{BoundarySearcher, SearchDirection};
use super::window::window_around;

/// Bytes read per I/O call unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Bytes sampled around the search cursor to notice a log rewritten in place.
const ANCHOR_LEN: usize = 64;

/// Outcome of one "find next" call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// Absolute offset of the match, `None` when nothing was found
    pub position: Option<u64>,
    /// Offset of the match inside `content`
    pub window_offset: usize,
    /// Context around the match; may split multi-byte characters at the edges
    pub content: Vec<u8>,
}

impl SearchResult {
    fn not_found() -> Self {
        Self {
            position: None,
            window_offset: 0,
            content: Vec::new(),
        }
    }

    pub fn is_found(&self) -> bool {
        self.position.is_some()
    }
}

/// File contents next to the search cursor as last seen.
///
/// Appending leaves these bytes alone, so a difference means the file was
/// truncated and written again since the last search.
#[derive(Debug)]
struct Anchor {
    offset: u64,
    bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct LogHandle {
    path: PathBuf,
    session: Option<String>,
    chunk_size: usize,
    cursor: u64,
    accessor: Option<ChunkedFileAccessor>,
    identity: Option<FileIdentity>,
    searcher: BoundarySearcher,
    anchor: Option<Anchor>,
}

impl LogHandle {
    /// Open `path` with the read cursor positioned at the tail.
    pub fn open(
        path: impl AsRef<Path>,
        session: Option<String>,
        chunk_size: usize,
        direction: SearchDirection,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let chunk_size = chunk_size.max(1);

        let accessor = ChunkedFileAccessor::open(&path).map_err(|e| LogError::io(&path, e))?;
        let size = accessor.len().map_err(|e| LogError::io(&path, e))?;
        let identity = fs::metadata(&path).ok().as_ref().and_then(file_identity);

        tracing::debug!(path = %path.display(), ?session, size, "opened log handle");

        let mut handle = Self {
            cursor: tail_position(size, chunk_size),
            searcher: BoundarySearcher::new(direction, size),
            path,
            session,
            chunk_size,
            accessor: Some(accessor),
            identity,
            anchor: None,
        };
        handle.mark_anchor()?;
        Ok(handle)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the next sequential read.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn is_closed(&self) -> bool {
        self.accessor.is_none()
    }

    /// Current size of the file.
    pub fn len(&self) -> Result<u64> {
        let accessor = live_accessor(&self.path, &self.accessor)?;
        accessor.len().map_err(|e| LogError::io(&self.path, e))
    }

    /// Read up to one chunk from the cursor and advance past it.
    ///
    /// A log replaced at the same path, or truncated below the cursor, is
    /// read again from its start.
    pub fn read(&mut self) -> Result<Vec<u8>> {
        self.reopen_if_rotated()?;
        let size = self.len()?;
        if self.cursor > size {
            tracing::info!(
                path = %self.path.display(),
                cursor = self.cursor,
                size,
                "log shrank below read cursor, reading from start"
            );
            self.cursor = 0;
        }

        let accessor = live_accessor(&self.path, &self.accessor)?;
        let buf = accessor
            .read_at(self.cursor, self.chunk_size)
            .map_err(|e| LogError::io(&self.path, e))?;
        self.cursor += buf.len() as u64;
        Ok(buf)
    }

    /// Position the read cursor so the next read returns the last chunk.
    pub fn set_tail_position(&mut self) -> Result<()> {
        let size = self.len()?;
        self.cursor = tail_position(size, self.chunk_size);
        Ok(())
    }

    /// Find the next occurrence of `needle` and return it with context.
    ///
    /// When [`reached_end`](Self::reached_end) turns true the caller should
    /// [`reset`](Self::reset) before searching again.
    pub fn search(&mut self, needle: &[u8]) -> Result<SearchResult> {
        self.check_needle(needle)?;
        self.restart_if_changed()?;

        let accessor = live_accessor(&self.path, &self.accessor)?;
        let path = &self.path;
        let found = self
            .searcher
            .find_next(accessor, self.chunk_size, needle)
            .map_err(|e| LogError::io(path, e))?;

        let result = match found {
            Some(pos) => {
                let window = window_around(accessor, pos, self.chunk_size)
                    .map_err(|e| LogError::io(path, e))?;
                tracing::trace!(path = %path.display(), pos, "search hit");
                SearchResult {
                    position: Some(pos),
                    window_offset: window.offset,
                    content: window.content,
                }
            }
            None => {
                tracing::debug!(path = %path.display(), "search exhausted");
                SearchResult::not_found()
            }
        };

        self.mark_anchor()?;
        Ok(result)
    }

    /// Every remaining occurrence of `needle`, in search order.
    pub fn find_all(&mut self, needle: &[u8]) -> Result<Vec<u64>> {
        self.check_needle(needle)?;
        self.restart_if_changed()?;

        let accessor = live_accessor(&self.path, &self.accessor)?;
        let path = &self.path;
        let positions = self
            .searcher
            .find_all(accessor, self.chunk_size, needle)
            .map_err(|e| LogError::io(path, e))?;

        self.mark_anchor()?;
        Ok(positions)
    }

    pub fn reached_end(&self) -> bool {
        self.searcher.reached_end()
    }

    /// Restart searching from the file end (reverse) or start (forward).
    ///
    /// Picks up a replaced file at the same path and the current size, so a
    /// rotated or truncated log is searched from its new end.
    pub fn reset(&mut self) -> Result<()> {
        self.reopen_if_rotated()?;
        let size = self.len()?;
        self.searcher.reset(size);
        if self.cursor > size {
            self.cursor = tail_position(size, self.chunk_size);
        }
        self.mark_anchor()
    }

    /// Switch search direction; the search restarts when it changes.
    pub fn set_direction(&mut self, direction: SearchDirection) -> Result<()> {
        if direction != self.searcher.direction() {
            let size = self.len()?;
            tracing::debug!(path = %self.path.display(), %direction, "search direction changed");
            self.searcher = BoundarySearcher::new(direction, size);
            self.mark_anchor()?;
        }
        Ok(())
    }

    /// Release the file. Further operations fail with an I/O error.
    pub fn close(&mut self) {
        if self.accessor.take().is_some() {
            self.anchor = None;
            tracing::debug!(
                path = %self.path.display(),
                session = ?self.session,
                "closed log handle"
            );
        }
    }

    fn check_needle(&self, needle: &[u8]) -> Result<()> {
        if needle.is_empty() {
            return Err(LogError::InvalidNeedle("needle is empty".to_string()));
        }
        if needle.len() > self.chunk_size {
            return Err(LogError::InvalidNeedle(format!(
                "needle of {} bytes is longer than the {} byte chunk size",
                needle.len(),
                self.chunk_size
            )));
        }
        Ok(())
    }

    /// Restart the search when the file was replaced, shrank, or was
    /// rewritten since the last search.
    fn restart_if_changed(&mut self) -> Result<()> {
        self.reopen_if_rotated()?;

        let size = self.len()?;
        let was = self.searcher.file_size();
        if size < was {
            tracing::info!(
                path = %self.path.display(),
                was,
                now = size,
                "log shrank, restarting search"
            );
            return self.reset();
        }
        if !self.anchor_intact()? {
            tracing::info!(path = %self.path.display(), "log was rewritten, restarting search");
            return self.reset();
        }
        Ok(())
    }

    fn reopen_if_rotated(&mut self) -> Result<()> {
        if self.accessor.is_none() {
            return Ok(());
        }
        let meta = fs::metadata(&self.path).map_err(|e| LogError::io(&self.path, e))?;
        let current = file_identity(&meta);
        if current.is_none() || current == self.identity {
            return Ok(());
        }

        let accessor =
            ChunkedFileAccessor::open(&self.path).map_err(|e| LogError::io(&self.path, e))?;
        let size = accessor.len().map_err(|e| LogError::io(&self.path, e))?;
        tracing::info!(path = %self.path.display(), size, "log was replaced, reopening");

        self.accessor = Some(accessor);
        self.identity = current;
        self.cursor = 0;
        self.searcher.reset(size);
        self.mark_anchor()
    }

    fn mark_anchor(&mut self) -> Result<()> {
        let Some(accessor) = self.accessor.as_ref() else {
            self.anchor = None;
            return Ok(());
        };
        let offset = self.searcher.cursor().saturating_sub(ANCHOR_LEN as u64 / 2);
        let bytes = accessor
            .read_at(offset, ANCHOR_LEN)
            .map_err(|e| LogError::io(&self.path, e))?;
        self.anchor = Some(Anchor { offset, bytes });
        Ok(())
    }

    fn anchor_intact(&self) -> Result<bool> {
        let Some(anchor) = &self.anchor else {
            return Ok(true);
        };
        let accessor = live_accessor(&self.path, &self.accessor)?;
        let current = accessor
            .read_at(anchor.offset, anchor.bytes.len())
            .map_err(|e| LogError::io(&self.path, e))?;
        Ok(current == anchor.bytes)
    }
}

fn tail_position(size: u64, chunk_size: usize) -> u64 {
    size.saturating_sub(chunk_size as u64)
}

/// The accessor, provided the handle is open and the path still resolves.
fn live_accessor<'a>(
    path: &Path,
    accessor: &'a Option<ChunkedFileAccessor>,
) -> Result<&'a ChunkedFileAccessor> {
    let accessor = accessor.as_ref().ok_or_else(|| {
        LogError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::Other, "log handle is closed"),
        )
    })?;
    fs::metadata(path).map_err(|e| LogError::io(path, e))?;
    Ok(accessor)
}

type FileIdentity = (u64, u64);

#[cfg(unix)]
fn file_identity(meta: &fs::Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &fs::Metadata) -> Option<FileIdentity> {
    None
}
