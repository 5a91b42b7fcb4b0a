//! Disk layer errors.

use std::io;

use granite_common::types::PageId;
use thiserror::Error;

/// Result type for disk operations.
pub type DiskResult<T> = Result<T, DiskError>;

/// Errors that can occur in the disk manager or scheduler.
#[derive(Debug, Error)]
pub enum DiskError {
    /// Read of a page beyond the current extent of the backing store.
    #[error("page {page_id} is out of range, store holds {num_pages} pages")]
    OutOfRange {
        /// The requested page.
        page_id: PageId,
        /// Number of pages the store currently covers.
        num_pages: u64,
    },

    /// The scheduler worker has shut down and can no longer serve requests.
    #[error("disk scheduler worker has shut down")]
    WorkerShutdown,

    /// I/O error from the backing store.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying error.
        #[from]
        source: io::Error,
    },
}
