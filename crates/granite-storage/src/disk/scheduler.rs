//! Disk scheduler: serializes page I/O on a single worker thread.
//!
//! Requests are pushed onto an unbounded FIFO channel; a background worker
//! pops them in order, dispatches to the [`DiskManager`], and fulfills a
//! one-shot completion the caller blocks on. Requests submitted by one
//! thread are therefore observed by the disk in submission order.
//!
//! Shutdown is a `None` sentinel: the destructor enqueues it and joins the
//! worker, which drains nothing beyond the sentinel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use granite_common::types::PageId;
use granite_common::PAGE_SIZE;

use super::error::{DiskError, DiskResult};
use super::manager::DiskManager;

/// The kind of a disk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskRequestKind {
    /// Read a page from disk into the request buffer.
    Read,
    /// Write the request buffer to disk.
    Write,
}

/// A single page I/O request.
pub struct DiskRequest {
    /// Whether to read or write.
    pub kind: DiskRequestKind,
    /// The page to access.
    pub page_id: PageId,
    /// The page buffer. For writes these bytes are persisted; for reads the
    /// filled buffer comes back through the completion.
    pub data: Vec<u8>,
    /// Fulfilled by the worker once the request is done.
    pub completion: Completion,
}

/// The fulfilling half of a one-shot completion signal.
pub struct Completion {
    tx: Sender<DiskResult<Vec<u8>>>,
}

impl Completion {
    /// Creates a connected completion / waiter pair.
    pub fn channel() -> (Completion, CompletionWaiter) {
        let (tx, rx) = mpsc::channel();
        (Completion { tx }, CompletionWaiter { rx })
    }

    fn fulfill(self, result: DiskResult<Vec<u8>>) {
        // The waiter may have been dropped; that is not an error.
        let _ = self.tx.send(result);
    }
}

/// The waiting half of a one-shot completion signal.
pub struct CompletionWaiter {
    rx: Receiver<DiskResult<Vec<u8>>>,
}

impl CompletionWaiter {
    /// Blocks until the request completes, returning the page buffer.
    pub fn wait(self) -> DiskResult<Vec<u8>> {
        self.rx.recv().map_err(|_| DiskError::WorkerShutdown)?
    }
}

/// Serializes page I/O requests on a single background worker.
pub struct DiskScheduler {
    disk: Arc<DiskManager>,
    queue: Sender<Option<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
    scheduled: AtomicU64,
}

impl DiskScheduler {
    /// Creates a scheduler and spawns its worker thread.
    pub fn new(disk: Arc<DiskManager>) -> Self {
        let (queue, rx) = mpsc::channel::<Option<DiskRequest>>();
        let worker_disk = Arc::clone(&disk);
        let worker = thread::Builder::new()
            .name("granite-disk".to_string())
            .spawn(move || Self::worker_loop(&worker_disk, &rx))
            .expect("failed to spawn disk worker");
        Self {
            disk,
            queue,
            worker: Some(worker),
            scheduled: AtomicU64::new(0),
        }
    }

    fn worker_loop(disk: &DiskManager, rx: &Receiver<Option<DiskRequest>>) {
        while let Ok(Some(request)) = rx.recv() {
            let DiskRequest {
                kind,
                page_id,
                mut data,
                completion,
            } = request;
            let result = match kind {
                DiskRequestKind::Read => disk.read_page(page_id, &mut data).map(|()| data),
                DiskRequestKind::Write => disk.write_page(page_id, &data).map(|()| data),
            };
            if let Err(err) = &result {
                tracing::error!(%page_id, %err, "disk request failed");
            }
            completion.fulfill(result);
        }
    }

    /// Enqueues a request for the worker.
    ///
    /// The request's completion fires once the I/O is done, in submission
    /// order relative to other requests from the same thread.
    pub fn schedule(&self, request: DiskRequest) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
        if let Err(mpsc::SendError(Some(request))) = self.queue.send(Some(request)) {
            request.completion.fulfill(Err(DiskError::WorkerShutdown));
        }
    }

    /// Schedules a read and blocks until the page buffer is available.
    pub fn read_page(&self, page_id: PageId) -> DiskResult<Vec<u8>> {
        let (completion, waiter) = Completion::channel();
        self.schedule(DiskRequest {
            kind: DiskRequestKind::Read,
            page_id,
            data: vec![0u8; PAGE_SIZE],
            completion,
        });
        waiter.wait()
    }

    /// Schedules a write and blocks until it has reached the backing store.
    pub fn write_page(&self, page_id: PageId, data: Vec<u8>) -> DiskResult<()> {
        let (completion, waiter) = Completion::channel();
        self.schedule(DiskRequest {
            kind: DiskRequestKind::Write,
            page_id,
            data,
            completion,
        });
        waiter.wait().map(|_| ())
    }

    /// Grows the backing store; passes through to the disk manager.
    pub fn grow_to(&self, num_pages: u64) -> DiskResult<()> {
        self.disk.grow_to(num_pages)
    }

    /// Marks a page deleted; passes through to the disk manager.
    pub fn delete_page(&self, page_id: PageId) {
        self.disk.delete_page(page_id);
    }

    /// Number of requests scheduled so far.
    pub fn scheduled(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.queue.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for DiskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskScheduler")
            .field("scheduled", &self.scheduled())
            .finish()
    }
}
