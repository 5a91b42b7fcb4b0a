//! RAII page guards.
//!
//! A guard bundles a frame pin with the frame's reader/writer latch. While
//! a guard is alive the page cannot be evicted and its bytes are safe to
//! read (or write, for the exclusive guard). Dropping the guard releases
//! the latch first, then unpins; a frame whose pin count reaches zero is
//! handed back to the replacer as an eviction candidate.
//!
//! Guards are move-only capabilities constructed by the buffer pool alone.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use granite_common::types::{FrameId, PageId};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use super::frame::BufferFrame;
use super::pool::PoolInner;

type FrameLatchRead = ArcRwLockReadGuard<RawRwLock, Vec<u8>>;
type FrameLatchWrite = ArcRwLockWriteGuard<RawRwLock, Vec<u8>>;

/// Shared (read) access to a page in the buffer pool.
///
/// Holds the frame's reader latch for its whole lifetime and keeps the
/// frame pinned.
pub struct PageReadGuard {
    page_id: PageId,
    frame: Arc<BufferFrame>,
    pool: Arc<PoolInner>,
    latch: Option<FrameLatchRead>,
}

impl PageReadGuard {
    /// Pins are counted before construction; this acquires the latch.
    pub(crate) fn new(pool: Arc<PoolInner>, frame: Arc<BufferFrame>, page_id: PageId) -> Self {
        let latch = frame.data().read_arc();
        Self {
            page_id,
            frame,
            pool,
            latch: Some(latch),
        }
    }

    /// Returns the guarded page's ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the frame this page resides in.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame.frame_id()
    }
}

impl Deref for PageReadGuard {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.latch.as_ref().expect("latch held while guard is live")
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        // Latch must go before the pin so a flush waiting on the latch can
        // proceed without observing a zero pin count mid-release.
        self.latch.take();
        self.pool.release(&self.frame);
    }
}

impl std::fmt::Debug for PageReadGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageReadGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame.frame_id())
            .finish()
    }
}

/// Exclusive (write) access to a page in the buffer pool.
///
/// Holds the frame's writer latch for its whole lifetime and keeps the
/// frame pinned. The frame is marked dirty as soon as the guard is issued,
/// whether or not any bytes are written.
pub struct PageWriteGuard {
    page_id: PageId,
    frame: Arc<BufferFrame>,
    pool: Arc<PoolInner>,
    latch: Option<FrameLatchWrite>,
}

impl PageWriteGuard {
    /// Pins are counted and the dirty flag set before construction; this
    /// acquires the latch.
    pub(crate) fn new(pool: Arc<PoolInner>, frame: Arc<BufferFrame>, page_id: PageId) -> Self {
        let latch = frame.data().write_arc();
        Self {
            page_id,
            frame,
            pool,
            latch: Some(latch),
        }
    }

    /// Returns the guarded page's ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the frame this page resides in.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame.frame_id()
    }
}

impl Deref for PageWriteGuard {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.latch.as_ref().expect("latch held while guard is live")
    }
}

impl DerefMut for PageWriteGuard {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.latch.as_mut().expect("latch held while guard is live")
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        self.latch.take();
        self.pool.release(&self.frame);
    }
}

impl std::fmt::Debug for PageWriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWriteGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame.frame_id())
            .finish()
    }
}
