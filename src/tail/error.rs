//! Tailing engine error types.

use std::path::PathBuf;

use super::sink::SinkError;

/// Errors that can occur while tailing a directory tree.
#[derive(thiserror::Error, Debug)]
pub enum TailError {
    /// Tracked file disappeared between identity resolution and open.
    #[error("Tracked file vanished: {0}")]
    FileVanished(PathBuf),

    /// A directory could not be subscribed for change notifications.
    #[error("Failed to subscribe {path}: {source}")]
    Subscribe {
        path: PathBuf,
        source: notify::Error,
    },

    /// Notify watcher error.
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// Record hand-off to the sink failed.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TailError {
    /// Whether this error means the file is gone, which is routine during rotation.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::FileVanished(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
