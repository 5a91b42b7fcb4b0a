//! In-memory table heap.
//!
//! The commit path rewrites base-tuple metadata in place by record id;
//! this heap is the minimal collaborator providing that surface. Row n of
//! table t lives at `Rid(t, n)`; slots are never reused.

use granite_common::types::{PageId, Rid, TableId};
use granite_mvcc::{Tuple, TupleMeta};
use parking_lot::RwLock;

/// A table's base tuples, addressed by record id.
#[derive(Debug)]
pub struct TableHeap {
    table_id: TableId,
    rows: RwLock<Vec<(TupleMeta, Tuple)>>,
}

impl TableHeap {
    /// Creates an empty heap for `table_id`.
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            rows: RwLock::new(Vec::new()),
        }
    }

    /// The owning table.
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    fn rid_for(&self, slot: usize) -> Rid {
        Rid::new(PageId::new(self.table_id.as_u32() as u64), slot as u32)
    }

    /// Appends a tuple and returns its record id.
    pub fn insert_tuple(&self, meta: TupleMeta, tuple: Tuple) -> Rid {
        let mut rows = self.rows.write();
        rows.push((meta, tuple));
        self.rid_for(rows.len() - 1)
    }

    /// Reads a tuple and its metadata.
    pub fn tuple(&self, rid: Rid) -> Option<(TupleMeta, Tuple)> {
        self.rows.read().get(rid.slot() as usize).cloned()
    }

    /// Reads just the metadata.
    pub fn tuple_meta(&self, rid: Rid) -> Option<TupleMeta> {
        self.rows.read().get(rid.slot() as usize).map(|(m, _)| *m)
    }

    /// Rewrites a tuple's metadata in place.
    ///
    /// # Panics
    ///
    /// Panics if `rid` is out of range.
    pub fn update_tuple_meta(&self, rid: Rid, meta: TupleMeta) {
        self.rows.write()[rid.slot() as usize].0 = meta;
    }

    /// Rewrites a tuple and its metadata in place.
    ///
    /// # Panics
    ///
    /// Panics if `rid` is out of range.
    pub fn update_tuple_in_place(&self, rid: Rid, meta: TupleMeta, tuple: Tuple) {
        self.rows.write()[rid.slot() as usize] = (meta, tuple);
    }

    /// Number of slots allocated (including logically deleted tuples).
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// True when no slot has been allocated.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Snapshot of every slot, in record-id order.
    pub fn scan(&self) -> Vec<(Rid, TupleMeta, Tuple)> {
        self.rows
            .read()
            .iter()
            .enumerate()
            .map(|(slot, (meta, tuple))| (self.rid_for(slot), *meta, tuple.clone()))
            .collect()
    }
}
