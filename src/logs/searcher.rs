//! Resumable chunked substring search over a file.
//!
//! The searcher never holds more than one chunk plus a small carried
//! fragment in memory. The fragment is the edge of the previously scanned
//! chunk and lets a needle that straddles two chunks still match.

use memchr::memmem;
use serde::{Deserialize, Serialize};
use std::io;

use super::accessor::ChunkedFileAccessor;

/// Minimum number of bytes carried across a chunk boundary.
pub const DEFAULT_EXTRA_SIZE: usize = 200;

/// Anything that can serve bounded reads at an explicit offset.
pub trait ChunkSource {
    fn read_at(&self, offset: u64, max_len: usize) -> io::Result<Vec<u8>>;
}

impl ChunkSource for ChunkedFileAccessor {
    fn read_at(&self, offset: u64, max_len: usize) -> io::Result<Vec<u8>> {
        ChunkedFileAccessor::read_at(self, offset, max_len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDirection {
    /// From the end of the file toward the start (most recent first)
    #[default]
    Reverse,
    /// From the start of the file toward the end
    Forward,
}

impl std::fmt::Display for SearchDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reverse => write!(f, "reverse"),
            Self::Forward => write!(f, "forward"),
        }
    }
}

/// Size of the fragment carried between chunks for `needle`.
pub fn extra_size(needle: &[u8]) -> usize {
    DEFAULT_EXTRA_SIZE.max(needle.len())
}

/// Stateful "find next" search in one direction.
#[derive(Debug, Clone)]
pub struct BoundarySearcher {
    direction: SearchDirection,
    cursor: u64,
    file_size: u64,
    exhausted: bool,
}

impl BoundarySearcher {
    pub fn new(direction: SearchDirection, file_size: u64) -> Self {
        let mut searcher = Self {
            direction,
            cursor: 0,
            file_size,
            exhausted: false,
        };
        searcher.reset(file_size);
        searcher
    }

    pub fn direction(&self) -> SearchDirection {
        self.direction
    }

    /// Offset the next search resumes from.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// File size as of construction or the last reset.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// True once there is nothing left to scan in the current direction.
    pub fn reached_end(&self) -> bool {
        if self.exhausted {
            return true;
        }
        match self.direction {
            SearchDirection::Reverse => self.cursor == 0,
            SearchDirection::Forward => self.cursor >= self.file_size,
        }
    }

    /// Restart from the end (reverse) or the start (forward) of a file that is
    /// now `file_size` bytes long.
    pub fn reset(&mut self, file_size: u64) {
        self.file_size = file_size;
        self.exhausted = false;
        self.cursor = match self.direction {
            SearchDirection::Reverse => file_size,
            SearchDirection::Forward => 0,
        };
    }

    /// Find the next occurrence of `needle` and advance past it.
    ///
    /// Returns `Ok(None)` when the scan runs out of file. In that case the
    /// cursor is left where it was and [`reached_end`](Self::reached_end)
    /// reports true until the next reset.
    pub fn find_next<S: ChunkSource + ?Sized>(
        &mut self,
        source: &S,
        chunk_size: usize,
        needle: &[u8],
    ) -> io::Result<Option<u64>> {
        let found = match self.direction {
            SearchDirection::Reverse => self.find_reverse(source, chunk_size, needle)?,
            SearchDirection::Forward => self.find_forward(source, chunk_size, needle)?,
        };
        if found.is_none() {
            self.exhausted = true;
        }
        Ok(found)
    }

    /// Collect every remaining occurrence in search order.
    pub fn find_all<S: ChunkSource + ?Sized>(
        &mut self,
        source: &S,
        chunk_size: usize,
        needle: &[u8],
    ) -> io::Result<Vec<u64>> {
        let mut positions = Vec::new();
        while let Some(pos) = self.find_next(source, chunk_size, needle)? {
            positions.push(pos);
        }
        Ok(positions)
    }

    fn find_reverse<S: ChunkSource + ?Sized>(
        &mut self,
        source: &S,
        chunk_size: usize,
        needle: &[u8],
    ) -> io::Result<Option<u64>> {
        let extra = extra_size(needle);
        let mut carry: Vec<u8> = Vec::new();
        let mut pos = self.cursor;

        while pos > 0 {
            let len = (chunk_size as u64).min(pos);
            let start = pos - len;
            let mut buf = source.read_at(start, len as usize)?;
            if buf.is_empty() {
                break;
            }

            // carry holds the bytes that directly follow this chunk
            buf.extend_from_slice(&carry);
            if let Some(i) = memmem::rfind(&buf, needle) {
                let found = start + i as u64;
                self.cursor = found;
                return Ok(Some(found));
            }

            buf.truncate(extra.min(buf.len()));
            carry = buf;
            pos = start;
        }

        Ok(None)
    }

    fn find_forward<S: ChunkSource + ?Sized>(
        &mut self,
        source: &S,
        chunk_size: usize,
        needle: &[u8],
    ) -> io::Result<Option<u64>> {
        let extra = extra_size(needle);
        let mut carry: Vec<u8> = Vec::new();
        let mut pos = self.cursor;

        while pos < self.file_size {
            let len = (chunk_size as u64).min(self.file_size - pos);
            let chunk = source.read_at(pos, len as usize)?;
            if chunk.is_empty() {
                break;
            }

            let base = pos - carry.len() as u64;
            let read = chunk.len() as u64;
            let mut buf = carry;
            buf.extend_from_slice(&chunk);

            if let Some(i) = memmem::find(&buf, needle) {
                let found = base + i as u64;
                self.cursor = found + needle.len() as u64;
                return Ok(Some(found));
            }

            let keep_from = buf.len().saturating_sub(extra);
            carry = buf.split_off(keep_from);
            pos += read;
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct MemorySource(Vec<u8>);

    impl ChunkSource for MemorySource {
        fn read_at(&self, offset: u64, max_len: usize) -> io::Result<Vec<u8>> {
            let start = (offset as usize).min(self.0.len());
            let end = (start + max_len).min(self.0.len());
            Ok(self.0[start..end].to_vec())
        }
    }

    fn filler(lines: usize) -> Vec<u8> {
        b"TESTING SOME SEARCHING!\n".repeat(lines)
    }

    fn place(buf: &mut [u8], pos: usize, needle: &[u8]) {
        buf[pos..pos + needle.len()].copy_from_slice(needle);
    }

    #[test]
    fn reverse_search_walks_toward_start() {
        let mut data = filler(1000);
        let positions = [1000, 2000, 2500, 3700, 7034, 8343, 20_000];
        for &p in &positions {
            place(&mut data, p, b"THENEEDLE");
        }
        let source = MemorySource(data);
        let mut searcher = BoundarySearcher::new(SearchDirection::Reverse, source.0.len() as u64);

        let found = searcher.find_all(&source, 1024, b"THENEEDLE").unwrap();
        let expected: Vec<u64> = positions.iter().rev().map(|&p| p as u64).collect();
        assert_eq!(found, expected);
        assert!(searcher.reached_end());
    }

    #[test]
    fn forward_search_walks_toward_end() {
        let mut data = filler(1000);
        let positions = [3, 1023, 4090, 15_000];
        for &p in &positions {
            place(&mut data, p, b"THENEEDLE");
        }
        let source = MemorySource(data);
        let mut searcher = BoundarySearcher::new(SearchDirection::Forward, source.0.len() as u64);

        let found = searcher.find_all(&source, 1024, b"THENEEDLE").unwrap();
        let expected: Vec<u64> = positions.iter().map(|&p| p as u64).collect();
        assert_eq!(found, expected);
        assert_eq!(searcher.cursor(), 15_009);
        assert!(searcher.reached_end());
    }

    #[test]
    fn needle_straddling_every_boundary_offset() {
        let needle = b"THENEEDLE";
        let chunk = 256;
        let base = filler(100);
        // Slide the needle across the last chunk boundary one byte at a time
        for shift in 0..needle.len() + 2 {
            let mut data = base.clone();
            let pos = data.len() - chunk - shift;
            place(&mut data, pos, needle);
            let source = MemorySource(data);

            let mut reverse =
                BoundarySearcher::new(SearchDirection::Reverse, source.0.len() as u64);
            assert_eq!(
                reverse.find_all(&source, chunk, needle).unwrap(),
                vec![pos as u64],
                "reverse, shift {}",
                shift
            );

            let mut forward =
                BoundarySearcher::new(SearchDirection::Forward, source.0.len() as u64);
            assert_eq!(
                forward.find_all(&source, chunk, needle).unwrap(),
                vec![pos as u64],
                "forward, shift {}",
                shift
            );
        }
    }

    #[test]
    fn long_needle_uses_wider_carry() {
        let needle = b"x".repeat(300);
        assert_eq!(extra_size(&needle), 300);
        assert_eq!(extra_size(b"short"), DEFAULT_EXTRA_SIZE);

        let mut data = vec![b'.'; 4096];
        // Straddles the 2048 boundary with more than DEFAULT_EXTRA_SIZE bytes after it
        place(&mut data, 1998, &needle);
        let source = MemorySource(data);
        let mut searcher = BoundarySearcher::new(SearchDirection::Reverse, 4096);

        assert_eq!(searcher.find_next(&source, 2048, &needle).unwrap(), Some(1998));
    }

    #[test]
    fn not_found_keeps_cursor() {
        let mut data = filler(200);
        place(&mut data, 100, b"NEEDLE");
        let source = MemorySource(data);
        let mut searcher = BoundarySearcher::new(SearchDirection::Reverse, source.0.len() as u64);

        assert_eq!(searcher.find_next(&source, 512, b"NEEDLE").unwrap(), Some(100));
        assert!(!searcher.reached_end());
        assert_eq!(searcher.find_next(&source, 512, b"NEEDLE").unwrap(), None);
        assert_eq!(searcher.cursor(), 100);
        assert!(searcher.reached_end());

        searcher.reset(source.0.len() as u64);
        assert!(!searcher.reached_end());
        assert_eq!(searcher.find_next(&source, 512, b"NEEDLE").unwrap(), Some(100));
    }

    #[test]
    fn match_at_file_start_reaches_end() {
        let mut data = filler(10);
        place(&mut data, 0, b"NEEDLE");
        let source = MemorySource(data);
        let mut searcher = BoundarySearcher::new(SearchDirection::Reverse, source.0.len() as u64);

        assert_eq!(searcher.find_next(&source, 64, b"NEEDLE").unwrap(), Some(0));
        assert!(searcher.reached_end());
    }

    #[test]
    fn empty_source_finds_nothing() {
        let source = MemorySource(Vec::new());
        let mut searcher = BoundarySearcher::new(SearchDirection::Reverse, 0);
        assert!(searcher.reached_end());
        assert_eq!(searcher.find_next(&source, 64, b"x").unwrap(), None);
    }
}
