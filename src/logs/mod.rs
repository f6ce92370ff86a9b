//! Buffered log access: tail reads and resumable search over files that may
//! be large, growing, rotated or deleted while being viewed.

pub mod accessor;
pub mod error;
pub mod handle;
pub mod refresh;
pub mod registry;
pub mod searcher;
pub mod window;

pub use accessor::ChunkedFileAccessor;
pub use error::{LogError, Result};
pub use handle::{LogHandle, SearchResult, DEFAULT_CHUNK_SIZE};
pub use refresh::{spawn_refresh, DEFAULT_REFRESH_INTERVAL};
pub use registry::{LogEntry, LogRegistry, SharedLogHandle, DEFAULT_MAX_HANDLES};
pub use searcher::{BoundarySearcher, SearchDirection};
