use thiserror::Error;

use crate::compression::Compression;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("file is finalized: {0}")]
    Finalized(String),

    #[error("{compression} codec failed: {reason}")]
    Compression {
        compression: Compression,
        reason: String,
    },

    #[error("invalid file name: {0:?}")]
    InvalidName(String),
}

pub type Result<T> = std::result::Result<T, FsError>;
