//! Hash index errors.

use thiserror::Error;

use crate::buffer::BufferError;

/// Result type for hash index operations.
pub type HashResult<T> = Result<T, HashError>;

/// Errors that can occur during hash index operations.
#[derive(Debug, Error)]
pub enum HashError {
    /// Unique-key insert collision.
    #[error("duplicate key")]
    DuplicateKey,

    /// The directory is at its maximum depth and the bucket cannot split.
    #[error("directory is full")]
    DirectoryFull,

    /// Buffer pool failure.
    #[error("buffer pool error: {0}")]
    Buffer(#[from] BufferError),
}
