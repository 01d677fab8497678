//! Custom error types for the restore agent.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A write, chmod, link or copy against a target path failed.
    #[error("{action} failed for '{}': {source}", path.display())]
    FileOp {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A partially written file could not be removed. The on-disk state of
    /// `path` is unknown; the session must not continue.
    #[error("failed to remove partially written file '{}': {source}", path.display())]
    Fatal {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid increment for '{}': {reason}", path.display())]
    InvalidIncrement { path: PathBuf, reason: String },

    #[error("Invalid archive entry '{name}': {reason}")]
    InvalidEntry { name: String, reason: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Global fsync of '{}' failed with error code {code}", path.display())]
    GlobalSync { path: PathBuf, code: i32 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Restore cancelled")]
    Cancelled,

    #[error("Task error: {0}")]
    Task(String),
}

impl RestoreError {
    /// Returns a `map_err` adapter that attaches `action` and `path` to an I/O error.
    pub fn file_op<'a>(
        action: &'static str,
        path: &'a Path,
    ) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| RestoreError::FileOp {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RestoreError::Fatal { .. })
    }
}

pub type Result<T> = std::result::Result<T, RestoreError>;
