//! Latch-crabbing B+Tree.
//!
//! Searches crab root-to-leaf with reader latches, releasing each ancestor
//! as soon as the child is latched. Mutations run in two phases:
//!
//! 1. **Optimistic**: reader latches down the internal levels, a writer
//!    latch only on the leaf. If the leaf can absorb the change without
//!    splitting or merging, done.
//! 2. **Pessimistic**: writer latches root-to-leaf, plus the header page
//!    while the root might change. As soon as a node on the path is safe
//!    (slack in the direction of the operation), every ancestor latch and
//!    the header latch are released.
//!
//! Splits keep the ceil-half of entries on the left; internal splits
//! promote the median key. Deletions borrow from the left sibling first,
//! then the right, then merge left (falling back to right). A root left
//! with a single child is replaced by that child.

use granite_common::types::{PageId, Rid};

use super::cursor::TreeCursor;
use super::error::{TreeError, TreeResult};
use super::key::IndexKey;
use super::node::{
    node_kind, node_max_size, node_size, HeaderNode, InternalNode, LeafNode, NodeKind,
};
use crate::buffer::{BufferError, BufferPool, PageReadGuard, PageWriteGuard};

/// Result of the optimistic mutation pass.
enum Optimistic {
    /// The leaf absorbed the change.
    Done,
    /// The key was already present (insert only).
    Duplicate,
    /// The key was absent (remove only).
    Absent,
    /// The leaf would split or underflow; retry pessimistically.
    Contended,
}

/// A B+Tree index over fixed-width keys with record-id values.
///
/// The header page id is supplied at construction and pins the root
/// pointer; all other pages are allocated from the buffer pool on demand.
pub struct BPlusTree<K: IndexKey> {
    pool: BufferPool,
    header_page_id: PageId,
    leaf_max_size: u16,
    internal_max_size: u16,
    _marker: std::marker::PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Creates a tree, initializing the header page to an empty tree.
    pub fn new(
        pool: BufferPool,
        header_page_id: PageId,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> TreeResult<Self> {
        assert!(leaf_max_size >= 2 && internal_max_size >= 3, "page capacities too small");
        {
            let mut guard = pool
                .checked_write_page(header_page_id)
                .ok_or(BufferError::OutOfMemory)?;
            HeaderNode::init(&mut guard[..]);
        }
        Ok(Self {
            pool,
            header_page_id,
            leaf_max_size,
            internal_max_size,
            _marker: std::marker::PhantomData,
        })
    }

    /// Creates a tree with capacities derived from the page size.
    pub fn with_default_capacities(pool: BufferPool, header_page_id: PageId) -> TreeResult<Self> {
        let leaf = LeafNode::<&[u8], K>::capacity_for(granite_common::PAGE_SIZE) as u16;
        let internal = InternalNode::<&[u8], K>::capacity_for(granite_common::PAGE_SIZE) as u16;
        Self::new(pool, header_page_id, leaf, internal)
    }

    /// Attaches to an already-initialized tree without touching the header.
    pub fn open(
        pool: BufferPool,
        header_page_id: PageId,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Self {
        Self {
            pool,
            header_page_id,
            leaf_max_size,
            internal_max_size,
            _marker: std::marker::PhantomData,
        }
    }

    fn read(&self, page_id: PageId) -> TreeResult<PageReadGuard> {
        self.pool
            .checked_read_page(page_id)
            .ok_or_else(|| BufferError::OutOfMemory.into())
    }

    fn write(&self, page_id: PageId) -> TreeResult<PageWriteGuard> {
        self.pool
            .checked_write_page(page_id)
            .ok_or_else(|| BufferError::OutOfMemory.into())
    }

    /// Returns the current root page id.
    pub fn root_page_id(&self) -> PageId {
        let guard = self.pool.read_page(self.header_page_id);
        HeaderNode::new(&guard[..]).root_page_id()
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        !self.root_page_id().is_valid()
    }

    /// Point lookup.
    pub fn get_value(&self, key: &K) -> Option<Rid> {
        let root = self.root_page_id();
        if !root.is_valid() {
            return None;
        }

        let mut guard = self.pool.read_page(root);
        loop {
            match node_kind(&guard[..]) {
                NodeKind::Leaf => {
                    let leaf = LeafNode::<_, K>::new(&guard[..]);
                    return leaf.lookup(key).ok().map(|slot| leaf.value_at(slot));
                }
                NodeKind::Internal => {
                    let child = {
                        let node = InternalNode::<_, K>::new(&guard[..]);
                        node.child_at(node.child_index_for(key))
                    };
                    // The parent guard drops after the child is latched.
                    guard = self.pool.read_page(child);
                }
                NodeKind::Header => unreachable!("header page inside the tree"),
            }
        }
    }

    /// Inserts a unique key.
    ///
    /// Fails with [`TreeError::DuplicateKey`] if `key` is present and with
    /// a buffer error if a split cannot obtain a page.
    pub fn insert(&self, key: K, rid: Rid) -> TreeResult<()> {
        // Empty-tree case holds the header latch across root creation.
        let mut header_guard = self.write(self.header_page_id)?;
        let root = HeaderNode::new(&header_guard[..]).root_page_id();
        if !root.is_valid() {
            let root_id = self.pool.new_page()?;
            let mut root_guard = self.write(root_id)?;
            let mut leaf = LeafNode::<_, K>::init(&mut root_guard[..], self.leaf_max_size);
            leaf.insert_at(0, &key, rid);
            HeaderNode::new(&mut header_guard[..]).set_root_page_id(root_id);
            return Ok(());
        }
        drop(header_guard);

        match self.optimistic_insert(&key, rid, root)? {
            Optimistic::Done => Ok(()),
            Optimistic::Duplicate => Err(TreeError::DuplicateKey),
            Optimistic::Contended => self.pessimistic_insert(key, rid),
            Optimistic::Absent => unreachable!(),
        }
    }

    /// Reader latches down to the leaf's parent, a writer latch on the
    /// leaf alone. Succeeds iff the leaf has room.
    fn optimistic_insert(&self, key: &K, rid: Rid, root: PageId) -> TreeResult<Optimistic> {
        let mut parent: Option<PageReadGuard> = None;
        let mut page_id = root;
        loop {
            let guard = self.read(page_id)?;
            if node_kind(&guard[..]) == NodeKind::Leaf {
                // Upgrade: drop the leaf's reader latch, take the writer
                // latch. The parent's reader latch pins the path meanwhile.
                drop(guard);
                let mut leaf_guard = self.write(page_id)?;
                drop(parent.take());

                let mut leaf = LeafNode::<_, K>::new(&mut leaf_guard[..]);
                return match leaf.lookup(key) {
                    Ok(_) => Ok(Optimistic::Duplicate),
                    Err(slot) => {
                        if leaf.size() < leaf.max_size() {
                            leaf.insert_at(slot, key, rid);
                            Ok(Optimistic::Done)
                        } else {
                            Ok(Optimistic::Contended)
                        }
                    }
                };
            }
            let child = {
                let node = InternalNode::<_, K>::new(&guard[..]);
                node.child_at(node.child_index_for(key))
            };
            parent = Some(guard);
            page_id = child;
        }
    }

    fn pessimistic_insert(&self, key: K, rid: Rid) -> TreeResult<()> {
        let mut header_guard = Some(self.write(self.header_page_id)?);
        let root = HeaderNode::new(&header_guard.as_ref().unwrap()[..]).root_page_id();
        if !root.is_valid() {
            // The tree emptied out between phases.
            let root_id = self.pool.new_page()?;
            let mut root_guard = self.write(root_id)?;
            let mut leaf = LeafNode::<_, K>::init(&mut root_guard[..], self.leaf_max_size);
            leaf.insert_at(0, &key, rid);
            let mut header_guard = header_guard.take().expect("header latched");
            HeaderNode::new(&mut header_guard[..]).set_root_page_id(root_id);
            return Ok(());
        }

        // Writer latches root-to-leaf; each safe node releases everything
        // above it.
        let mut write_set: Vec<PageWriteGuard> = Vec::new();
        let mut path_indexes: Vec<usize> = Vec::new();

        let root_guard = self.write(root)?;
        if node_size(&root_guard[..]) < node_max_size(&root_guard[..]) {
            header_guard = None;
        }
        write_set.push(root_guard);

        loop {
            let top = write_set.last().unwrap();
            if node_kind(&top[..]) == NodeKind::Leaf {
                break;
            }
            let (child_index, child_id) = {
                let node = InternalNode::<_, K>::new(&top[..]);
                let i = node.child_index_for(&key);
                (i, node.child_at(i))
            };
            let child_guard = self.write(child_id)?;
            let safe = node_size(&child_guard[..]) < node_max_size(&child_guard[..]);
            write_set.push(child_guard);
            path_indexes.push(child_index);
            if safe {
                header_guard = None;
                let kept = write_set.pop().unwrap();
                write_set.clear();
                path_indexes.clear();
                write_set.push(kept);
            }
        }

        // Mutate the leaf.
        let leaf_page_id = write_set.last().unwrap().page_id();
        let (mut sep_key, mut new_child) = {
            let leaf_guard = write_set.last_mut().unwrap();
            let mut leaf = LeafNode::<_, K>::new(&mut leaf_guard[..]);
            let slot = match leaf.lookup(&key) {
                Ok(_) => return Err(TreeError::DuplicateKey),
                Err(slot) => slot,
            };
            if leaf.size() < leaf.max_size() {
                leaf.insert_at(slot, &key, rid);
                return Ok(());
            }

            // Split: ceil-half of max_size + 1 entries stays left.
            let mut keys = leaf.keys();
            let mut values = leaf.values();
            keys.insert(slot, key.clone());
            values.insert(slot, rid);
            let left_count = (keys.len() + 1) / 2;

            let new_leaf_id = self.pool.new_page()?;
            let mut new_leaf_guard = self.write(new_leaf_id)?;
            let mut new_leaf =
                LeafNode::<_, K>::init(&mut new_leaf_guard[..], self.leaf_max_size);
            new_leaf.write_entries(&keys[left_count..], &values[left_count..]);
            new_leaf.set_next_page_id(leaf.next_page_id());

            leaf.write_entries(&keys[..left_count], &values[..left_count]);
            leaf.set_next_page_id(new_leaf_id);

            tracing::debug!(left = %leaf_page_id, right = %new_leaf_id, "leaf split");
            (keys[left_count].clone(), new_leaf_id)
        };
        let mut split_left_id = leaf_page_id;
        write_set.pop();

        // Propagate the split upward.
        while let Some(mut node_guard) = write_set.pop() {
            let insert_index = path_indexes.pop().unwrap() + 1;
            split_left_id = node_guard.page_id();
            let mut node = InternalNode::<_, K>::new(&mut node_guard[..]);

            if node.size() < node.max_size() {
                node.insert_at(insert_index, &sep_key, new_child);
                return Ok(());
            }

            // Internal split: the median key moves up, it is not kept in
            // either half.
            let mut keys = node.keys();
            let mut children = node.children();
            keys.insert(insert_index, sep_key);
            children.insert(insert_index, new_child);
            let left_count = (children.len() + 1) / 2;
            let promoted = keys[left_count].clone();

            let new_internal_id = self.pool.new_page()?;
            let mut new_guard = self.write(new_internal_id)?;
            let mut new_node =
                InternalNode::<_, K>::init(&mut new_guard[..], self.internal_max_size);

            let mut right_keys = Vec::with_capacity(children.len() - left_count);
            right_keys.push(promoted.clone()); // slot 0, unused
            right_keys.extend_from_slice(&keys[left_count + 1..]);
            new_node.write_entries(&right_keys, &children[left_count..]);

            node.write_entries(&keys[..left_count], &children[..left_count]);

            tracing::debug!(left = %split_left_id, right = %new_internal_id, "internal split");
            sep_key = promoted;
            new_child = new_internal_id;
        }

        // Every node on the path was full: grow a new root.
        let new_root_id = self.pool.new_page()?;
        let mut new_root_guard = self.write(new_root_id)?;
        let mut new_root =
            InternalNode::<_, K>::init(&mut new_root_guard[..], self.internal_max_size);
        new_root.write_entries(&[sep_key.clone(), sep_key], &[split_left_id, new_child]);

        let mut header_guard = header_guard.expect("header latch held across a root split");
        HeaderNode::new(&mut header_guard[..]).set_root_page_id(new_root_id);
        tracing::debug!(root = %new_root_id, "root split");
        Ok(())
    }

    /// Removes a key. Missing keys are a no-op.
    pub fn remove(&self, key: &K) -> TreeResult<()> {
        let root = {
            let guard = self.read(self.header_page_id)?;
            HeaderNode::new(&guard[..]).root_page_id()
        };
        if !root.is_valid() {
            return Ok(());
        }

        match self.optimistic_remove(key, root)? {
            Optimistic::Done | Optimistic::Absent => Ok(()),
            Optimistic::Contended => self.pessimistic_remove(key),
            Optimistic::Duplicate => unreachable!(),
        }
    }

    /// Like `optimistic_insert`, but the leaf must stay above the minimum
    /// after the removal.
    fn optimistic_remove(&self, key: &K, root: PageId) -> TreeResult<Optimistic> {
        let mut parent: Option<PageReadGuard> = None;
        let mut page_id = root;
        loop {
            let guard = self.read(page_id)?;
            if node_kind(&guard[..]) == NodeKind::Leaf {
                drop(guard);
                let mut leaf_guard = self.write(page_id)?;
                drop(parent.take());

                let mut leaf = LeafNode::<_, K>::new(&mut leaf_guard[..]);
                return match leaf.lookup(key) {
                    Err(_) => Ok(Optimistic::Absent),
                    Ok(slot) => {
                        if leaf.size() > leaf.min_size() {
                            leaf.remove_at(slot);
                            Ok(Optimistic::Done)
                        } else {
                            Ok(Optimistic::Contended)
                        }
                    }
                };
            }
            let child = {
                let node = InternalNode::<_, K>::new(&guard[..]);
                node.child_at(node.child_index_for(key))
            };
            parent = Some(guard);
            page_id = child;
        }
    }

    fn pessimistic_remove(&self, key: &K) -> TreeResult<()> {
        let mut header_guard = Some(self.write(self.header_page_id)?);
        let root = HeaderNode::new(&header_guard.as_ref().unwrap()[..]).root_page_id();
        if !root.is_valid() {
            return Ok(());
        }

        let mut write_set: Vec<PageWriteGuard> = Vec::new();
        let mut path_indexes: Vec<usize> = Vec::new();

        let root_guard = self.write(root)?;
        // A root with more than two entries survives any merge below it.
        if node_size(&root_guard[..]) > 2 {
            header_guard = None;
        }
        write_set.push(root_guard);

        loop {
            let top = write_set.last().unwrap();
            if node_kind(&top[..]) == NodeKind::Leaf {
                break;
            }
            let (child_index, child_id) = {
                let node = InternalNode::<_, K>::new(&top[..]);
                let i = node.child_index_for(key);
                (i, node.child_at(i))
            };
            let child_guard = self.write(child_id)?;
            let min = super::node::min_size_for(node_max_size(&child_guard[..]));
            let safe = node_size(&child_guard[..]) > min;
            write_set.push(child_guard);
            path_indexes.push(child_index);
            if safe {
                header_guard = None;
                let kept = write_set.pop().unwrap();
                write_set.clear();
                path_indexes.clear();
                write_set.push(kept);
            }
        }

        // Delete from the leaf.
        {
            let leaf_guard = write_set.last_mut().unwrap();
            let mut leaf = LeafNode::<_, K>::new(&mut leaf_guard[..]);
            match leaf.lookup(key) {
                Err(_) => return Ok(()),
                Ok(slot) => leaf.remove_at(slot),
            }
        }

        // Walk the latched path upward, borrowing or merging while nodes
        // underflow.
        while !write_set.is_empty() {
            let top_page_id = write_set.last().unwrap().page_id();

            if top_page_id == root {
                let root_guard = write_set.last_mut().unwrap();
                match node_kind(&root_guard[..]) {
                    NodeKind::Leaf => {
                        if node_size(&root_guard[..]) == 0 {
                            let mut header_guard =
                                header_guard.take().expect("header latch held for root change");
                            HeaderNode::new(&mut header_guard[..])
                                .set_root_page_id(PageId::INVALID);
                        }
                        return Ok(());
                    }
                    NodeKind::Internal => {
                        if node_size(&root_guard[..]) <= 1 {
                            // The root is down to one child: that child is
                            // the new root.
                            let new_root =
                                InternalNode::<_, K>::new(&root_guard[..]).child_at(0);
                            let old_root = write_set.pop().unwrap();
                            drop(old_root);
                            let _ = self.pool.delete_page(root)?;
                            let mut header_guard =
                                header_guard.take().expect("header latch held for root change");
                            HeaderNode::new(&mut header_guard[..]).set_root_page_id(new_root);
                            tracing::debug!(root = %new_root, "root collapsed");
                        }
                        return Ok(());
                    }
                    NodeKind::Header => unreachable!("header page inside the tree"),
                }
            }

            {
                let top = write_set.last().unwrap();
                let min = super::node::min_size_for(node_max_size(&top[..]));
                if node_size(&top[..]) >= min {
                    return Ok(());
                }
            }

            // Underflow: consult the parent for siblings.
            let depth = write_set.len();
            debug_assert!(depth >= 2, "underflowing non-root node without a parent latch");
            let child_index = *path_indexes.last().unwrap();
            let (parents, currents) = write_set.split_at_mut(depth - 1);
            let parent_guard = parents.last_mut().unwrap();
            let cur_guard = &mut currents[0];
            let (left_id, right_id) = {
                let parent = InternalNode::<_, K>::new(&parent_guard[..]);
                let left = if child_index > 0 {
                    Some(parent.child_at(child_index - 1))
                } else {
                    None
                };
                let right = if child_index + 1 < parent.size() {
                    Some(parent.child_at(child_index + 1))
                } else {
                    None
                };
                (left, right)
            };

            // Borrow from the left sibling first.
            if let Some(left_id) = left_id {
                let mut left_guard = self.write(left_id)?;
                let min = super::node::min_size_for(node_max_size(&left_guard[..]));
                if node_size(&left_guard[..]) > min {
                    borrow_from_left::<K>(
                        &mut cur_guard[..],
                        &mut left_guard[..],
                        &mut parent_guard[..],
                        child_index,
                    );
                    return Ok(());
                }
            }

            // Then the right.
            if let Some(right_id) = right_id {
                let mut right_guard = self.write(right_id)?;
                let min = super::node::min_size_for(node_max_size(&right_guard[..]));
                if node_size(&right_guard[..]) > min {
                    borrow_from_right::<K>(
                        &mut cur_guard[..],
                        &mut right_guard[..],
                        &mut parent_guard[..],
                        child_index,
                    );
                    return Ok(());
                }
            }

            // Neither sibling has slack: merge. Prefer the left sibling.
            let merged_away = if let Some(left_id) = left_id {
                let mut left_guard = self.write(left_id)?;
                merge_into_left::<K>(
                    &mut left_guard[..],
                    &mut cur_guard[..],
                    &mut parent_guard[..],
                    child_index,
                );
                cur_guard.page_id()
            } else {
                let right_id = right_id.expect("non-root node has at least one sibling");
                let mut right_guard = self.write(right_id)?;
                merge_right_into::<K>(
                    &mut cur_guard[..],
                    &mut right_guard[..],
                    &mut parent_guard[..],
                    child_index,
                );
                right_id
            };
            tracing::debug!(page = %merged_away, "merged tree page");

            // This level is settled either way: on a left merge the popped
            // guard is the absorbed page itself, on a right merge it is
            // the surviving absorber.
            path_indexes.pop();
            drop(write_set.pop());
            let _ = self.pool.delete_page(merged_away)?;
        }
        Ok(())
    }

    /// Forward cursor over the whole tree, starting at the smallest key.
    pub fn iter(&self) -> TreeCursor<K> {
        let root = self.root_page_id();
        if !root.is_valid() {
            return TreeCursor::at_end(self.pool.clone());
        }

        let mut guard = self.pool.read_page(root);
        while node_kind(&guard[..]) == NodeKind::Internal {
            let child = InternalNode::<_, K>::new(&guard[..]).child_at(0);
            guard = self.pool.read_page(child);
        }
        if LeafNode::<_, K>::new(&guard[..]).size() == 0 {
            return TreeCursor::at_end(self.pool.clone());
        }
        TreeCursor::at(self.pool.clone(), guard, 0)
    }

    /// Forward cursor positioned at the first key `>= key`.
    pub fn iter_from(&self, key: &K) -> TreeCursor<K> {
        let root = self.root_page_id();
        if !root.is_valid() {
            return TreeCursor::at_end(self.pool.clone());
        }

        let mut guard = self.pool.read_page(root);
        while node_kind(&guard[..]) == NodeKind::Internal {
            let child = {
                let node = InternalNode::<_, K>::new(&guard[..]);
                node.child_at(node.child_index_for(key))
            };
            guard = self.pool.read_page(child);
        }
        let (slot, size, next) = {
            let leaf = LeafNode::<_, K>::new(&guard[..]);
            let slot = match leaf.lookup(key) {
                Ok(slot) | Err(slot) => slot,
            };
            (slot, leaf.size(), leaf.next_page_id())
        };
        if slot < size {
            return TreeCursor::at(self.pool.clone(), guard, slot as u32);
        }
        // Past the last entry of this leaf: the successor starts the next
        // leaf.
        drop(guard);
        if !next.is_valid() {
            return TreeCursor::at_end(self.pool.clone());
        }
        let next_guard = self.pool.read_page(next);
        TreeCursor::at(self.pool.clone(), next_guard, 0)
    }
}

impl<K: IndexKey> std::fmt::Debug for BPlusTree<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("header_page_id", &self.header_page_id)
            .field("leaf_max_size", &self.leaf_max_size)
            .field("internal_max_size", &self.internal_max_size)
            .finish()
    }
}

// =============================================================================
// Rebalancing helpers
// =============================================================================

/// Moves the left sibling's last entry into the front of `cur`.
fn borrow_from_left<K: IndexKey>(cur: &mut [u8], left: &mut [u8], parent: &mut [u8], index: usize) {
    let mut parent = InternalNode::<_, K>::new(parent);
    match node_kind(cur) {
        NodeKind::Leaf => {
            let mut cur = LeafNode::<_, K>::new(cur);
            let mut left = LeafNode::<_, K>::new(left);
            let mut keys = left.keys();
            let mut values = left.values();
            let moved_key = keys.pop().unwrap();
            let moved_value = values.pop().unwrap();
            left.write_entries(&keys, &values);
            cur.insert_at(0, &moved_key, moved_value);
            parent.set_key_at(index, &moved_key);
        }
        NodeKind::Internal => {
            let mut cur = InternalNode::<_, K>::new(cur);
            let mut left = InternalNode::<_, K>::new(left);
            let mut lkeys = left.keys();
            let mut lchildren = left.children();
            let moved_key = lkeys.pop().unwrap();
            let moved_child = lchildren.pop().unwrap();
            left.write_entries(&lkeys, &lchildren);

            // The parent separator rotates down; the sibling's last key
            // rotates up.
            let mut ckeys = cur.keys();
            let mut cchildren = cur.children();
            ckeys[0] = parent.key_at(index);
            ckeys.insert(0, moved_key.clone()); // becomes the unused slot 0
            cchildren.insert(0, moved_child);
            cur.write_entries(&ckeys, &cchildren);
            parent.set_key_at(index, &moved_key);
        }
        NodeKind::Header => unreachable!("header page inside the tree"),
    }
}

/// Moves the right sibling's first entry onto the back of `cur`.
fn borrow_from_right<K: IndexKey>(
    cur: &mut [u8],
    right: &mut [u8],
    parent: &mut [u8],
    index: usize,
) {
    let mut parent = InternalNode::<_, K>::new(parent);
    match node_kind(cur) {
        NodeKind::Leaf => {
            let mut cur = LeafNode::<_, K>::new(cur);
            let mut right = LeafNode::<_, K>::new(right);
            let mut keys = right.keys();
            let mut values = right.values();
            let moved_key = keys.remove(0);
            let moved_value = values.remove(0);
            right.write_entries(&keys, &values);
            let size = cur.size();
            cur.insert_at(size, &moved_key, moved_value);
            parent.set_key_at(index + 1, &keys[0]);
        }
        NodeKind::Internal => {
            let mut cur = InternalNode::<_, K>::new(cur);
            let mut right = InternalNode::<_, K>::new(right);
            let mut rkeys = right.keys();
            let mut rchildren = right.children();
            let moved_child = rchildren.remove(0);
            rkeys.remove(0); // the unused slot 0
            let rotated_up = rkeys[0].clone();

            let mut ckeys = cur.keys();
            let mut cchildren = cur.children();
            ckeys.push(parent.key_at(index + 1));
            cchildren.push(moved_child);
            cur.write_entries(&ckeys, &cchildren);

            right.write_entries(&rkeys, &rchildren);
            parent.set_key_at(index + 1, &rotated_up);
        }
        NodeKind::Header => unreachable!("header page inside the tree"),
    }
}

/// Folds `cur` into its left sibling and drops `cur`'s slot from the
/// parent.
fn merge_into_left<K: IndexKey>(left: &mut [u8], cur: &mut [u8], parent: &mut [u8], index: usize) {
    let mut parent_node = InternalNode::<_, K>::new(&mut *parent);
    match node_kind(cur) {
        NodeKind::Leaf => {
            let cur = LeafNode::<_, K>::new(&*cur);
            let mut left = LeafNode::<_, K>::new(left);
            let mut keys = left.keys();
            let mut values = left.values();
            keys.extend(cur.keys());
            values.extend(cur.values());
            left.write_entries(&keys, &values);
            left.set_next_page_id(cur.next_page_id());
        }
        NodeKind::Internal => {
            let cur = InternalNode::<_, K>::new(&*cur);
            let mut left = InternalNode::<_, K>::new(left);
            let mut keys = left.keys();
            let mut children = left.children();
            // The separating key comes down from the parent.
            keys.push(parent_node.key_at(index));
            children.push(cur.child_at(0));
            let ckeys = cur.keys();
            keys.extend_from_slice(&ckeys[1..]);
            children.extend_from_slice(&cur.children()[1..]);
            left.write_entries(&keys, &children);
        }
        NodeKind::Header => unreachable!("header page inside the tree"),
    }
    parent_node.remove_at(index);
}

/// Folds the right sibling into `cur` and drops the sibling's slot from
/// the parent.
fn merge_right_into<K: IndexKey>(cur: &mut [u8], right: &mut [u8], parent: &mut [u8], index: usize) {
    let mut parent_node = InternalNode::<_, K>::new(&mut *parent);
    match node_kind(cur) {
        NodeKind::Leaf => {
            let right = LeafNode::<_, K>::new(&*right);
            let mut cur = LeafNode::<_, K>::new(cur);
            let mut keys = cur.keys();
            let mut values = cur.values();
            keys.extend(right.keys());
            values.extend(right.values());
            cur.write_entries(&keys, &values);
            cur.set_next_page_id(right.next_page_id());
        }
        NodeKind::Internal => {
            let right = InternalNode::<_, K>::new(&*right);
            let mut cur = InternalNode::<_, K>::new(cur);
            let mut keys = cur.keys();
            let mut children = cur.children();
            keys.push(parent_node.key_at(index + 1));
            children.push(right.child_at(0));
            let rkeys = right.keys();
            keys.extend_from_slice(&rkeys[1..]);
            children.extend_from_slice(&right.children()[1..]);
            cur.write_entries(&keys, &children);
        }
        NodeKind::Header => unreachable!("header page inside the tree"),
    }
    parent_node.remove_at(index + 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolConfig;
    use crate::disk::DiskManager;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn rid(n: u64) -> Rid {
        Rid::new(PageId::new(n), n as u32)
    }

    fn create_tree(
        dir: &tempfile::TempDir,
        frames: usize,
        leaf_max: u16,
        internal_max: u16,
    ) -> BPlusTree<u64> {
        let disk = Arc::new(DiskManager::open(dir.path().join("index.db")).unwrap());
        let pool = BufferPool::new(BufferPoolConfig::new(frames), disk).unwrap();
        let header = pool.new_page().unwrap();
        BPlusTree::new(pool, header, leaf_max, internal_max).unwrap()
    }

    #[test]
    fn test_empty_tree() {
        let dir = tempdir().unwrap();
        let tree = create_tree(&dir, 16, 3, 3);
        assert!(tree.is_empty());
        assert_eq!(tree.get_value(&1), None);
        assert_eq!(tree.iter().count(), 0);
        tree.remove(&1).unwrap();
    }

    #[test]
    fn test_single_key() {
        let dir = tempdir().unwrap();
        let tree = create_tree(&dir, 16, 3, 3);
        tree.insert(42, rid(42)).unwrap();
        assert!(!tree.is_empty());
        assert_eq!(tree.get_value(&42), Some(rid(42)));
        assert_eq!(tree.get_value(&41), None);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let dir = tempdir().unwrap();
        let tree = create_tree(&dir, 16, 3, 3);
        tree.insert(1, rid(1)).unwrap();
        assert!(matches!(
            tree.insert(1, rid(2)),
            Err(TreeError::DuplicateKey)
        ));
        // The original value survives.
        assert_eq!(tree.get_value(&1), Some(rid(1)));
    }

    #[test]
    fn test_sequential_insert_splits_leaf() {
        // Scenario S2: leaf max 3, keys 1..=5 in order.
        let dir = tempdir().unwrap();
        let tree = create_tree(&dir, 16, 3, 3);
        for key in 1..=3u64 {
            tree.insert(key, rid(key)).unwrap();
        }
        let root_before = tree.root_page_id();

        tree.insert(4, rid(4)).unwrap();
        // The leaf split: the root is now an internal page.
        let root_after = tree.root_page_id();
        assert_ne!(root_before, root_after);

        tree.insert(5, rid(5)).unwrap();
        let collected: Vec<u64> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(collected, vec![1, 2, 3, 4, 5]);
        for key in 1..=5u64 {
            assert_eq!(tree.get_value(&key), Some(rid(key)));
        }
    }

    #[test]
    fn test_delete_triggers_rebalance() {
        // Scenario S3: starting from S2's tree, delete 2.
        let dir = tempdir().unwrap();
        let tree = create_tree(&dir, 16, 3, 3);
        for key in 1..=5u64 {
            tree.insert(key, rid(key)).unwrap();
        }
        tree.remove(&2).unwrap();

        assert_eq!(tree.get_value(&2), None);
        let collected: Vec<u64> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(collected, vec![1, 3, 4, 5]);
    }

    #[test]
    fn test_remove_down_to_empty() {
        let dir = tempdir().unwrap();
        let tree = create_tree(&dir, 16, 3, 3);
        for key in 1..=7u64 {
            tree.insert(key, rid(key)).unwrap();
        }
        for key in 1..=7u64 {
            tree.remove(&key).unwrap();
            assert_eq!(tree.get_value(&key), None);
        }
        assert!(tree.is_empty());
        assert_eq!(tree.iter().count(), 0);
    }

    #[test]
    fn test_remove_missing_key_is_noop() {
        let dir = tempdir().unwrap();
        let tree = create_tree(&dir, 16, 3, 3);
        tree.insert(1, rid(1)).unwrap();
        tree.remove(&99).unwrap();
        assert_eq!(tree.get_value(&1), Some(rid(1)));
    }

    #[test]
    fn test_iter_yields_sorted_unique_keys() {
        let dir = tempdir().unwrap();
        let tree = create_tree(&dir, 64, 4, 4);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut keys: Vec<u64> = (0..200).collect();
        keys.shuffle(&mut rng);
        for &key in &keys {
            tree.insert(key, rid(key)).unwrap();
        }

        let collected: Vec<u64> = tree.iter().map(|(k, _)| k).collect();
        let expected: Vec<u64> = (0..200).collect();
        assert_eq!(collected, expected);
    }

    #[test]
    fn test_iter_from_lower_bound() {
        let dir = tempdir().unwrap();
        let tree = create_tree(&dir, 32, 3, 3);
        for key in [10u64, 20, 30, 40, 50] {
            tree.insert(key, rid(key)).unwrap();
        }

        let from_exact: Vec<u64> = tree.iter_from(&30).map(|(k, _)| k).collect();
        assert_eq!(from_exact, vec![30, 40, 50]);

        let from_between: Vec<u64> = tree.iter_from(&31).map(|(k, _)| k).collect();
        assert_eq!(from_between, vec![40, 50]);

        let past_end = tree.iter_from(&60);
        assert!(past_end.is_end());
    }

    #[test]
    fn test_random_insert_delete_roundtrip() {
        let dir = tempdir().unwrap();
        let tree = create_tree(&dir, 64, 4, 4);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1234);

        let mut keys: Vec<u64> = (0..300).collect();
        keys.shuffle(&mut rng);
        for &key in &keys {
            tree.insert(key, rid(key)).unwrap();
        }

        // Delete a random half and verify exactly the rest remains.
        let mut deleted: Vec<u64> = keys.clone();
        deleted.shuffle(&mut rng);
        let deleted: Vec<u64> = deleted.into_iter().take(150).collect();
        for &key in &deleted {
            tree.remove(&key).unwrap();
        }

        for key in 0..300u64 {
            let expected = if deleted.contains(&key) {
                None
            } else {
                Some(rid(key))
            };
            assert_eq!(tree.get_value(&key), expected, "key {key}");
        }

        let mut remaining: Vec<u64> = (0..300).filter(|k| !deleted.contains(k)).collect();
        remaining.sort_unstable();
        let collected: Vec<u64> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(collected, remaining);
    }

    #[test]
    fn test_balance_invariant_under_churn() {
        let dir = tempdir().unwrap();
        let tree = create_tree(&dir, 64, 4, 4);
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        let mut live: Vec<u64> = Vec::new();

        for _ in 0..600 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let key = rng.gen_range(0..1000);
                match tree.insert(key, rid(key)) {
                    Ok(()) => live.push(key),
                    Err(TreeError::DuplicateKey) => {}
                    Err(err) => panic!("{err}"),
                }
            } else {
                let i = rng.gen_range(0..live.len());
                let key = live.swap_remove(i);
                tree.remove(&key).unwrap();
            }
        }

        live.sort_unstable();
        live.dedup();
        let collected: Vec<u64> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(collected, live);
        verify_balance(&tree);
    }

    #[test]
    fn test_concurrent_readers_during_inserts() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("index.db")).unwrap());
        let pool = BufferPool::new(BufferPoolConfig::new(64), disk).unwrap();
        let header = pool.new_page().unwrap();
        let tree = Arc::new(BPlusTree::<u64>::new(pool, header, 4, 4).unwrap());

        for key in 0..64u64 {
            tree.insert(key, rid(key)).unwrap();
        }

        std::thread::scope(|s| {
            for t in 0..2 {
                let tree = Arc::clone(&tree);
                s.spawn(move || {
                    for key in (64 + t * 64)..(128 + t * 64) {
                        tree.insert(key, rid(key)).unwrap();
                    }
                });
            }
            for _ in 0..2 {
                let tree = Arc::clone(&tree);
                s.spawn(move || {
                    for key in 0..64u64 {
                        assert_eq!(tree.get_value(&key), Some(rid(key)));
                    }
                });
            }
        });

        let collected: Vec<u64> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(collected, (0..192).collect::<Vec<u64>>());
    }

    /// Walks the whole tree checking the min/max occupancy rule for every
    /// non-root page.
    fn verify_balance(tree: &BPlusTree<u64>) {
        let root = tree.root_page_id();
        if !root.is_valid() {
            return;
        }
        verify_node(tree, root, root);
    }

    fn verify_node(tree: &BPlusTree<u64>, page_id: PageId, root: PageId) {
        let guard = tree.pool.read_page(page_id);
        match node_kind(&guard[..]) {
            NodeKind::Leaf => {
                let leaf = LeafNode::<_, u64>::new(&guard[..]);
                if page_id != root {
                    assert!(leaf.size() >= leaf.min_size(), "leaf {page_id} underflow");
                }
                assert!(leaf.size() <= leaf.max_size());
                let keys = leaf.keys();
                assert!(keys.windows(2).all(|w| w[0] < w[1]));
            }
            NodeKind::Internal => {
                let node = InternalNode::<_, u64>::new(&guard[..]);
                if page_id != root {
                    assert!(node.size() >= node.min_size(), "node {page_id} underflow");
                }
                assert!(node.size() <= node.max_size());
                let children = node.children();
                drop(guard);
                for child in children {
                    verify_node(tree, child, root);
                }
            }
            NodeKind::Header => panic!("header page inside the tree"),
        }
    }
}
