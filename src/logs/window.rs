use std::io;

use super::searcher::ChunkSource;

/// Context bytes read around a search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultWindow {
    /// Position of the hit inside `content`
    pub offset: usize,
    pub content: Vec<u8>,
}

/// Read `chunk_size` bytes with the hit at `pos` centred where possible.
///
/// Near the start of the file the window is simply shifted left; no padding
/// is added.
pub fn window_around<S: ChunkSource + ?Sized>(
    source: &S,
    pos: u64,
    chunk_size: usize,
) -> io::Result<ResultWindow> {
    let start = pos.saturating_sub(chunk_size as u64 / 2);
    let content = source.read_at(start, chunk_size)?;
    Ok(ResultWindow {
        offset: (pos - start) as usize,
        content,
    })
}
