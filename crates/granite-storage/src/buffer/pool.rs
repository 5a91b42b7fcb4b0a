//! Buffer pool implementation.
//!
//! The pool owns a fixed array of frames, a page table mapping resident
//! page ids to frames, a free list, an LRU-K replacer, and a disk
//! scheduler. One mutex serializes the page table, free list, and page-id
//! allocation; per-frame latches are the guards' business, never the
//! pool's.
//!
//! On a miss the disk read happens while the pool mutex is still held.
//! That makes resident/not-resident atomic from a caller's perspective:
//! two concurrent fetches of the same missing page cannot install two
//! frames.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use granite_common::types::{FrameId, PageId};
use granite_common::PAGE_SIZE;
use parking_lot::Mutex;

use super::config::BufferPoolConfig;
use super::error::{BufferError, BufferResult};
use super::frame::BufferFrame;
use super::guard::{PageReadGuard, PageWriteGuard};
use super::replacer::LruKReplacer;
use crate::disk::{DiskManager, DiskScheduler};

/// State behind the pool mutex.
struct PoolState {
    /// Page table: maps resident page ids to frames.
    page_table: HashMap<PageId, FrameId>,
    /// Frames not holding any page.
    free_list: VecDeque<FrameId>,
    /// Monotonic page id allocator.
    next_page_id: u64,
}

/// Shared pool internals; guards hold an `Arc` of this for drop-time
/// bookkeeping.
pub(crate) struct PoolInner {
    frames: Vec<Arc<BufferFrame>>,
    state: Mutex<PoolState>,
    replacer: LruKReplacer,
    scheduler: DiskScheduler,
}

impl PoolInner {
    /// Drops one pin on `frame`; at zero the frame becomes evictable.
    ///
    /// Runs under the pool mutex so the count-reaches-zero transition and
    /// the evictable flip are atomic with respect to fetches.
    pub(crate) fn release(&self, frame: &BufferFrame) {
        let _state = self.state.lock();
        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame.frame_id(), true);
        }
    }

    /// Obtains a frame: free list first, else evict.
    ///
    /// A dirty evictee is written back through the scheduler before reuse.
    fn obtain_frame(&self, state: &mut PoolState) -> BufferResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.evict().ok_or(BufferError::OutOfMemory)?;
        let frame = &self.frames[frame_id.index()];
        let old_page_id = frame.page_id();
        tracing::debug!(%old_page_id, %frame_id, "evicting page");

        if frame.is_dirty() {
            self.scheduler.write_page(old_page_id, frame.snapshot())?;
            frame.set_dirty(false);
        }
        state.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }

    /// Resolves `page_id` to a pinned, non-evictable frame, reading from
    /// disk on a miss. For writes the dirty flag is set eagerly.
    fn fetch_frame(&self, page_id: PageId, for_write: bool) -> BufferResult<Arc<BufferFrame>> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = Arc::clone(&self.frames[frame_id.index()]);
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            if for_write {
                frame.set_dirty(true);
            }
            return Ok(frame);
        }

        let frame_id = self.obtain_frame(&mut state)?;
        let frame = Arc::clone(&self.frames[frame_id.index()]);

        // Synchronous read before the mutex is released keeps the
        // no-duplicate-resident invariant.
        match self.scheduler.read_page(page_id) {
            Ok(bytes) => frame.fill_from(&bytes),
            Err(err) => {
                state.free_list.push_back(frame_id);
                return Err(err.into());
            }
        }

        frame.set_page_id(page_id);
        frame.set_dirty(for_write);
        frame.pin();
        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        Ok(frame)
    }
}

/// The buffer pool manager.
///
/// Cheap to clone by wrapping in `Arc`; all methods take `&self`.
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates a pool with `config.num_frames` frames over `disk`.
    pub fn new(config: BufferPoolConfig, disk: Arc<DiskManager>) -> BufferResult<Self> {
        config.validate().map_err(BufferError::config)?;

        let frames: Vec<Arc<BufferFrame>> = (0..config.num_frames)
            .map(|i| Arc::new(BufferFrame::new(FrameId::new(i), PAGE_SIZE)))
            .collect();
        let free_list = (0..config.num_frames).map(FrameId::new).collect();
        let next_page_id = disk.num_pages();

        Ok(Self {
            inner: Arc::new(PoolInner {
                frames,
                state: Mutex::new(PoolState {
                    page_table: HashMap::with_capacity(config.num_frames),
                    free_list,
                    next_page_id,
                }),
                replacer: LruKReplacer::new(config.num_frames, config.replacer_k),
                scheduler: DiskScheduler::new(disk),
            }),
        })
    }

    /// Returns the number of frames in the pool.
    pub fn size(&self) -> usize {
        self.inner.frames.len()
    }

    /// Allocates a fresh zero-filled page and makes it resident.
    ///
    /// The caller is expected to acquire a write guard on the returned id
    /// immediately. Fails with [`BufferError::OutOfMemory`] when no frame
    /// can be obtained.
    pub fn new_page(&self) -> BufferResult<PageId> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let page_id = PageId::new(state.next_page_id);
        state.next_page_id += 1;
        inner.scheduler.grow_to(page_id.as_u64() + 1)?;

        let frame_id = inner.obtain_frame(&mut state)?;
        let frame = &inner.frames[frame_id.index()];
        frame.zero();
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        state.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, true);
        Ok(page_id)
    }

    /// Drops a page from the pool and the backing store's bookkeeping.
    ///
    /// Absent pages succeed (idempotent). Returns `Ok(false)` iff the page
    /// is pinned.
    pub fn delete_page(&self, page_id: PageId) -> BufferResult<bool> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &inner.frames[frame_id.index()];
        if frame.is_pinned() {
            return Ok(false);
        }

        if frame.is_dirty() {
            inner.scheduler.write_page(page_id, frame.snapshot())?;
        }
        state.page_table.remove(&page_id);
        inner.replacer.remove(frame_id);
        state.free_list.push_back(frame_id);
        frame.reset();
        inner.scheduler.delete_page(page_id);
        Ok(true)
    }

    /// Fetches a page for shared access.
    ///
    /// Returns `None` only when eviction fails (out of memory).
    ///
    /// # Panics
    ///
    /// Panics on disk I/O failure; I/O failures are fatal in this design.
    pub fn checked_read_page(&self, page_id: PageId) -> Option<PageReadGuard> {
        match self.inner.fetch_frame(page_id, false) {
            Ok(frame) => Some(PageReadGuard::new(Arc::clone(&self.inner), frame, page_id)),
            Err(BufferError::OutOfMemory) => None,
            Err(err) => panic!("fatal error fetching page {page_id}: {err}"),
        }
    }

    /// Fetches a page for exclusive access.
    ///
    /// Returns `None` only when eviction fails (out of memory).
    ///
    /// # Panics
    ///
    /// Panics on disk I/O failure; I/O failures are fatal in this design.
    pub fn checked_write_page(&self, page_id: PageId) -> Option<PageWriteGuard> {
        match self.inner.fetch_frame(page_id, true) {
            Ok(frame) => Some(PageWriteGuard::new(Arc::clone(&self.inner), frame, page_id)),
            Err(BufferError::OutOfMemory) => None,
            Err(err) => panic!("fatal error fetching page {page_id}: {err}"),
        }
    }

    /// Fetches a page for shared access.
    ///
    /// # Panics
    ///
    /// Panics when the pool is out of memory; use
    /// [`BufferPool::checked_read_page`] to handle that case.
    pub fn read_page(&self, page_id: PageId) -> PageReadGuard {
        self.checked_read_page(page_id)
            .unwrap_or_else(|| panic!("out of memory fetching page {page_id}"))
    }

    /// Fetches a page for exclusive access.
    ///
    /// # Panics
    ///
    /// Panics when the pool is out of memory; use
    /// [`BufferPool::checked_write_page`] to handle that case.
    pub fn write_page(&self, page_id: PageId) -> PageWriteGuard {
        self.checked_write_page(page_id)
            .unwrap_or_else(|| panic!("out of memory fetching page {page_id}"))
    }

    /// Writes a resident dirty page through to disk and clears its dirty
    /// flag. Returns whether the page was resident.
    ///
    /// # Panics
    ///
    /// Panics on disk I/O failure.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        let inner = &self.inner;
        let state = inner.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let frame = &inner.frames[frame_id.index()];
        if frame.is_dirty() {
            inner
                .scheduler
                .write_page(page_id, frame.snapshot())
                .expect("disk write failure is fatal");
            frame.set_dirty(false);
        }
        true
    }

    /// Flushes every dirty resident page.
    ///
    /// # Panics
    ///
    /// Panics on disk I/O failure.
    pub fn flush_all(&self) {
        let inner = &self.inner;
        let state = inner.state.lock();
        for (&page_id, &frame_id) in &state.page_table {
            let frame = &inner.frames[frame_id.index()];
            if frame.is_dirty() {
                inner
                    .scheduler
                    .write_page(page_id, frame.snapshot())
                    .expect("disk write failure is fatal");
                frame.set_dirty(false);
            }
        }
    }

    /// Returns the pin count of a resident page, `None` if not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = &self.inner;
        let state = inner.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|frame_id| inner.frames[frame_id.index()].pin_count())
    }
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("BufferPool")
            .field("num_frames", &self.inner.frames.len())
            .field("pages_resident", &state.page_table.len())
            .field("free_frames", &state.free_list.len())
            .finish()
    }
}
