//! Disk manager: page-granular access to a single backing file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use granite_common::types::PageId;
use granite_common::PAGE_SIZE;
use parking_lot::Mutex;

use super::error::{DiskError, DiskResult};

/// State behind the disk manager's mutex.
struct DiskState {
    file: File,
    /// Number of pages the file currently covers.
    num_pages: u64,
}

/// The disk manager reads and writes fixed-size pages by page id.
///
/// Pages live at offset `page_id * PAGE_SIZE`. The store grows on demand
/// in page-sized increments; it never shrinks. Deleting a page is a
/// bookkeeping no-op, space reclamation is out of scope.
pub struct DiskManager {
    state: Mutex<DiskState>,
    path: PathBuf,
    deleted_pages: AtomicU64,
}

impl DiskManager {
    /// Opens (creating if necessary) the backing file at `path`.
    pub fn open(path: impl AsRef<Path>) -> DiskResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            state: Mutex::new(DiskState {
                file,
                num_pages: len / PAGE_SIZE as u64,
            }),
            path,
            deleted_pages: AtomicU64::new(0),
        })
    }

    /// Reads the page into `buf`.
    ///
    /// Fails with [`DiskError::OutOfRange`] if the store has not been
    /// grown to cover `page_id`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is not exactly one page long.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> DiskResult<()> {
        assert_eq!(buf.len(), PAGE_SIZE, "buffer must be one page");
        let mut state = self.state.lock();
        if page_id.as_u64() >= state.num_pages {
            return Err(DiskError::OutOfRange {
                page_id,
                num_pages: state.num_pages,
            });
        }
        state
            .file
            .seek(SeekFrom::Start(page_id.as_u64() * PAGE_SIZE as u64))?;
        state.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes the page from `buf`, growing the store as needed.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is not exactly one page long.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> DiskResult<()> {
        assert_eq!(buf.len(), PAGE_SIZE, "buffer must be one page");
        let mut state = self.state.lock();
        if page_id.as_u64() >= state.num_pages {
            let target = page_id.as_u64() + 1;
            state.file.set_len(target * PAGE_SIZE as u64)?;
            state.num_pages = target;
        }
        state
            .file
            .seek(SeekFrom::Start(page_id.as_u64() * PAGE_SIZE as u64))?;
        state.file.write_all(buf)?;
        Ok(())
    }

    /// Grows the store to cover at least `num_pages` pages. Never shrinks.
    pub fn grow_to(&self, num_pages: u64) -> DiskResult<()> {
        let mut state = self.state.lock();
        if num_pages > state.num_pages {
            state.file.set_len(num_pages * PAGE_SIZE as u64)?;
            state.num_pages = num_pages;
        }
        Ok(())
    }

    /// Marks a page deleted. Space is not reclaimed.
    pub fn delete_page(&self, _page_id: PageId) {
        self.deleted_pages.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of pages the store currently covers.
    pub fn num_pages(&self) -> u64 {
        self.state.lock().num_pages
    }

    /// Number of pages deleted so far.
    pub fn deleted_pages(&self) -> u64 {
        self.deleted_pages.load(Ordering::Relaxed)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for DiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskManager")
            .field("path", &self.path)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}
