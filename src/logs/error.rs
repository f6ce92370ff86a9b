use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LogError>;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid search needle: {0}")]
    InvalidNeedle(String),

    #[error("no log with path '{}' is available", .0.display())]
    NotAvailable(PathBuf),

    #[error("could not add log '{}': {reason}", .path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("log '{}' is no longer readable: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LogError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn probe(path: &Path, reason: impl Into<String>) -> Self {
        Self::Probe {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// True when the error means the file itself went away or became unreadable.
    pub fn is_io_failure(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}
