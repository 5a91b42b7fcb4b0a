//! Forward cursor over B+Tree leaves.

use granite_common::types::Rid;

use super::key::IndexKey;
use super::node::LeafNode;
use crate::buffer::{BufferPool, PageReadGuard};

/// A forward iterator bound to a read-guarded leaf and a slot index.
///
/// Advancing walks the slots of the current leaf and then follows the
/// next-leaf pointer, latching the successor before releasing the current
/// leaf. An exhausted cursor holds no guard.
pub struct TreeCursor<K: IndexKey> {
    pool: BufferPool,
    leaf: Option<PageReadGuard>,
    index: u32,
    _marker: std::marker::PhantomData<K>,
}

impl<K: IndexKey> TreeCursor<K> {
    pub(crate) fn at(pool: BufferPool, leaf: PageReadGuard, index: u32) -> Self {
        Self {
            pool,
            leaf: Some(leaf),
            index,
            _marker: std::marker::PhantomData,
        }
    }

    pub(crate) fn at_end(pool: BufferPool) -> Self {
        Self {
            pool,
            leaf: None,
            index: 0,
            _marker: std::marker::PhantomData,
        }
    }

    /// Returns true once the cursor has run off the last leaf.
    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }
}

impl<K: IndexKey> Iterator for TreeCursor<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        let guard = self.leaf.as_ref()?;
        let (entry, size, next_page) = {
            let leaf = LeafNode::<_, K>::new(&guard[..]);
            let slot = self.index as usize;
            debug_assert!(slot < leaf.size());
            (
                (leaf.key_at(slot), leaf.value_at(slot)),
                leaf.size(),
                leaf.next_page_id(),
            )
        };

        self.index += 1;
        if self.index as usize >= size {
            if next_page.is_valid() {
                // Latch the successor before the current leaf is released.
                let next_guard = self.pool.read_page(next_page);
                self.leaf = Some(next_guard);
                self.index = 0;
            } else {
                self.leaf = None;
            }
        }
        Some(entry)
    }
}

impl<K: IndexKey> std::fmt::Debug for TreeCursor<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeCursor")
            .field("page_id", &self.leaf.as_ref().map(|g| g.page_id()))
            .field("index", &self.index)
            .finish()
    }
}
