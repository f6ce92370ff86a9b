//! Positional, bounded reads over an open log file.

use std::fs::File;
use std::io;
use std::path::Path;

/// Wraps an open file and reads explicit byte ranges from it.
///
/// Reads go through the platform's positional read call, so the OS file
/// position is never relied on and no logical cursor is disturbed.
#[derive(Debug)]
pub struct ChunkedFileAccessor {
    file: File,
}

impl ChunkedFileAccessor {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file })
    }

    /// Read up to `max_len` bytes starting at `offset`.
    ///
    /// Short reads are retried until either `max_len` bytes are collected or
    /// end-of-file is hit; past the end an empty buffer is returned.
    pub fn read_at(&self, offset: u64, max_len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let mut filled = 0;

        while filled < max_len {
            match positional_read(&self.file, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        buf.truncate(filled);
        Ok(buf)
    }

    /// Current size of the file behind the descriptor.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(unix)]
fn positional_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn positional_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
