#![forbid(unsafe_code)]
//! Error types for BoxFS.
//!
//! Defines `BfsError` and a `Result<T>` alias used throughout the workspace.

use bfs_types::ParseError;
use thiserror::Error;

/// Unified error type for all BoxFS operations.
#[derive(Debug, Error)]
pub enum BfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid container format: {0}")]
    Format(String),

    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("no space left in container")]
    NoSpace,

    #[error("inode table exhausted")]
    NoInodes,

    #[error("filesystem or handle is closed")]
    Closed,

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl From<ParseError> for BfsError {
    fn from(err: ParseError) -> Self {
        Self::Format(err.to_string())
    }
}

/// Result alias using `BfsError`.
pub type Result<T> = std::result::Result<T, BfsError>;
