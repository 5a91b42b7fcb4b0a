//! B+Tree errors.

use thiserror::Error;

use crate::buffer::BufferError;

/// Result type for B+Tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Errors that can occur during B+Tree operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Unique-key insert collision.
    #[error("duplicate key")]
    DuplicateKey,

    /// Buffer pool failure, typically out of memory during a split.
    #[error("buffer pool error: {0}")]
    Buffer(#[from] BufferError),
}
