//! Disk manager and disk scheduler.
//!
//! The disk manager reads and writes fixed-size pages at
//! `page_id * PAGE_SIZE` offsets of a single growable backing file. The
//! disk scheduler serializes all page I/O on one background worker thread
//! and hands callers a one-shot completion to block on.

mod error;
mod manager;
mod scheduler;

pub use error::{DiskError, DiskResult};
pub use manager::DiskManager;
pub use scheduler::{Completion, CompletionWaiter, DiskRequest, DiskRequestKind, DiskScheduler};
