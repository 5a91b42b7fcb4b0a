//! Buffer pool errors.

use granite_common::types::PageId;
use thiserror::Error;

use crate::disk::DiskError;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer pool operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// No free frame and no evictable candidate.
    #[error("out of memory: no free frames and nothing evictable")]
    OutOfMemory,

    /// Page cannot be deleted while pinned.
    #[error("page {page_id} is pinned")]
    PagePinned {
        /// The pinned page.
        page_id: PageId,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },

    /// Disk layer failure.
    #[error("disk error: {0}")]
    Disk(#[from] DiskError),
}

impl BufferError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried after unpinning pages.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OutOfMemory | Self::PagePinned { .. })
    }
}
