//! LRU-K replacement policy for the buffer pool.
//!
//! LRU-K evicts the frame whose backward K-distance is largest: the gap
//! between now and its K-th most recent access. Frames with fewer than K
//! recorded accesses have infinite backward K-distance and are preferred
//! victims, tie-broken by oldest first access (classical LRU). Compared
//! to plain LRU this keeps hot pages resident across a one-off scan.

use std::collections::{HashMap, VecDeque};

use granite_common::types::FrameId;
use parking_lot::Mutex;

/// Per-frame access record.
struct LruKNode {
    /// The last up-to-K access timestamps, oldest first.
    history: VecDeque<u64>,
    /// Only evictable frames are eviction candidates.
    evictable: bool,
}

/// State behind the replacer's mutex.
struct ReplacerState {
    /// Access records, created lazily on first access.
    nodes: HashMap<FrameId, LruKNode>,
    /// Monotonic logical clock, advanced on every recorded access.
    current_ts: u64,
    /// Count of evictable records; equals `size()`.
    evictable_count: usize,
}

/// LRU-K replacer over a bounded set of frames.
///
/// All operations are atomic under one internal mutex and never block on
/// I/O.
pub struct LruKReplacer {
    state: Mutex<ReplacerState>,
    k: usize,
    capacity: usize,
}

impl LruKReplacer {
    /// Creates a replacer covering `capacity` frames with parameter `k`.
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k >= 1, "replacer K must be at least 1");
        Self {
            state: Mutex::new(ReplacerState {
                nodes: HashMap::with_capacity(capacity),
                current_ts: 0,
                evictable_count: 0,
            }),
            k,
            capacity,
        }
    }

    /// Records an access to `frame` at the current logical time.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is out of range; that is a programming error in
    /// the buffer pool.
    pub fn record_access(&self, frame: FrameId) {
        assert!(
            frame.index() < self.capacity,
            "invalid frame id {frame} in record_access"
        );
        let mut state = self.state.lock();
        let ts = state.current_ts;
        state.current_ts += 1;
        let node = state.nodes.entry(frame).or_insert_with(|| LruKNode {
            history: VecDeque::with_capacity(self.k),
            evictable: false,
        });
        node.history.push_back(ts);
        if node.history.len() > self.k {
            node.history.pop_front();
        }
    }

    /// Flags `frame` as evictable or pinned.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is out of range or has never been accessed.
    pub fn set_evictable(&self, frame: FrameId, evictable: bool) {
        assert!(
            frame.index() < self.capacity,
            "invalid frame id {frame} in set_evictable"
        );
        let mut state = self.state.lock();
        let node = state
            .nodes
            .get_mut(&frame)
            .unwrap_or_else(|| panic!("set_evictable on untracked frame {frame}"));
        let was = node.evictable;
        node.evictable = evictable;
        if !was && evictable {
            state.evictable_count += 1;
        } else if was && !evictable {
            state.evictable_count -= 1;
        }
    }

    /// Evicts the frame with the largest backward K-distance.
    ///
    /// Frames with fewer than K accesses win first (infinite distance),
    /// tie-broken by oldest first access; among full histories the oldest
    /// K-th access wins. The chosen record is removed.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.evictable_count == 0 {
            return None;
        }

        let victim = state
            .nodes
            .iter()
            .filter(|(_, node)| node.evictable)
            .min_by_key(|(_, node)| {
                // Frames with short histories sort before full ones; within
                // a class the oldest front timestamp wins.
                let has_full_history = node.history.len() >= self.k;
                (has_full_history, node.history.front().copied().unwrap_or(0))
            })
            .map(|(&frame, _)| frame)?;

        state.nodes.remove(&victim);
        state.evictable_count -= 1;
        Some(victim)
    }

    /// Forcibly drops the record for `frame`. No-op if absent.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is out of range.
    pub fn remove(&self, frame: FrameId) {
        assert!(
            frame.index() < self.capacity,
            "invalid frame id {frame} in remove"
        );
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.remove(&frame) {
            if node.evictable {
                state.evictable_count -= 1;
            }
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().evictable_count
    }
}

impl std::fmt::Debug for LruKReplacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruKReplacer")
            .field("capacity", &self.capacity)
            .field("k", &self.k)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fid(i: usize) -> FrameId {
        FrameId::new(i)
    }

    #[test]
    fn test_evict_nothing_when_empty() {
        let replacer = LruKReplacer::new(4, 2);
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_size_counts_evictable_only() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(fid(0));
        replacer.record_access(fid(1));
        assert_eq!(replacer.size(), 0);

        replacer.set_evictable(fid(0), true);
        assert_eq!(replacer.size(), 1);
        replacer.set_evictable(fid(1), true);
        assert_eq!(replacer.size(), 2);
        replacer.set_evictable(fid(0), false);
        assert_eq!(replacer.size(), 1);
    }

    #[test]
    fn test_cold_frames_evicted_first() {
        let replacer = LruKReplacer::new(4, 2);
        // Frame 0 gets two accesses (full history), frame 1 only one.
        replacer.record_access(fid(0));
        replacer.record_access(fid(0));
        replacer.record_access(fid(1));
        replacer.set_evictable(fid(0), true);
        replacer.set_evictable(fid(1), true);

        // 1 has infinite backward K-distance, so it goes first even though
        // its single access is the most recent.
        assert_eq!(replacer.evict(), Some(fid(1)));
        assert_eq!(replacer.evict(), Some(fid(0)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_cold_tie_broken_by_oldest_first_access() {
        let replacer = LruKReplacer::new(4, 3);
        replacer.record_access(fid(0)); // ts 0
        replacer.record_access(fid(1)); // ts 1
        replacer.record_access(fid(2)); // ts 2
        for i in 0..3 {
            replacer.set_evictable(fid(i), true);
        }
        assert_eq!(replacer.evict(), Some(fid(0)));
        assert_eq!(replacer.evict(), Some(fid(1)));
        assert_eq!(replacer.evict(), Some(fid(2)));
    }

    #[test]
    fn test_full_history_max_backward_distance_wins() {
        let replacer = LruKReplacer::new(4, 2);
        // 0: accesses at ts 0, 1.  1: accesses at ts 2, 3.
        replacer.record_access(fid(0));
        replacer.record_access(fid(0));
        replacer.record_access(fid(1));
        replacer.record_access(fid(1));
        replacer.set_evictable(fid(0), true);
        replacer.set_evictable(fid(1), true);

        // Frame 0's 2nd-most-recent access is older; it has the larger
        // backward K-distance.
        assert_eq!(replacer.evict(), Some(fid(0)));
    }

    #[test]
    fn test_history_truncated_to_k() {
        let replacer = LruKReplacer::new(4, 2);
        // 0: ts 0..4 (history keeps ts 3, 4).  1: ts 5, 6.
        for _ in 0..5 {
            replacer.record_access(fid(0));
        }
        replacer.record_access(fid(1));
        replacer.record_access(fid(1));
        replacer.set_evictable(fid(0), true);
        replacer.set_evictable(fid(1), true);

        // K-distance compares ts 3 vs ts 5, so frame 0 goes first.
        assert_eq!(replacer.evict(), Some(fid(0)));
    }

    #[test]
    fn test_non_evictable_is_skipped() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(fid(0));
        replacer.record_access(fid(1));
        replacer.set_evictable(fid(0), false);
        replacer.set_evictable(fid(1), true);
        assert_eq!(replacer.evict(), Some(fid(1)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_remove_is_silent_on_absent() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.remove(fid(3));
        replacer.record_access(fid(0));
        replacer.set_evictable(fid(0), true);
        replacer.remove(fid(0));
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    #[should_panic(expected = "invalid frame id")]
    fn test_record_access_out_of_range_panics() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(fid(4));
    }

    #[test]
    fn test_eviction_resets_history() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(fid(0));
        replacer.record_access(fid(0));
        replacer.set_evictable(fid(0), true);
        assert_eq!(replacer.evict(), Some(fid(0)));

        // A fresh access starts a new record with empty history.
        replacer.record_access(fid(0));
        replacer.record_access(fid(1));
        replacer.record_access(fid(1));
        replacer.set_evictable(fid(0), true);
        replacer.set_evictable(fid(1), true);
        assert_eq!(replacer.evict(), Some(fid(0)));
    }
}
