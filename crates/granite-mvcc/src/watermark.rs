//! Read-timestamp watermark.
//!
//! Tracks the multiset of read timestamps of running transactions. The
//! watermark is the minimum of that multiset, or the last commit
//! timestamp when no transaction is running; undo logs strictly older
//! than the watermark are unreachable by any present or future reader.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Multiset of active read timestamps with a cached minimum.
///
/// Removals clean the heap lazily: stale heap entries are discarded once
/// their count drops to zero and they surface at the top.
#[derive(Debug)]
pub struct Watermark {
    commit_ts: u64,
    watermark: u64,
    current_reads: HashMap<u64, usize>,
    read_heap: BinaryHeap<Reverse<u64>>,
}

impl Watermark {
    /// Creates a watermark seeded with the last commit timestamp.
    pub fn new(commit_ts: u64) -> Self {
        Self {
            commit_ts,
            watermark: commit_ts,
            current_reads: HashMap::new(),
            read_heap: BinaryHeap::new(),
        }
    }

    /// Registers a running transaction's read timestamp.
    ///
    /// # Panics
    ///
    /// Panics if `read_ts` predates the last commit timestamp; callers
    /// hand out read timestamps from the commit clock, so that is a
    /// programmer error.
    pub fn add_txn(&mut self, read_ts: u64) {
        assert!(
            read_ts >= self.commit_ts,
            "read ts {read_ts} below commit ts {}",
            self.commit_ts
        );
        let count = self.current_reads.entry(read_ts).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.read_heap.push(Reverse(read_ts));
        }
        if read_ts < self.watermark || self.current_reads.len() == 1 {
            self.watermark = read_ts;
        }
    }

    /// Removes a previously added read timestamp.
    ///
    /// # Panics
    ///
    /// Panics if `read_ts` was never added (or already fully removed).
    pub fn remove_txn(&mut self, read_ts: u64) {
        let count = self
            .current_reads
            .get_mut(&read_ts)
            .unwrap_or_else(|| panic!("read ts {read_ts} not tracked"));
        *count -= 1;
        if *count == 0 {
            self.current_reads.remove(&read_ts);
            while let Some(Reverse(top)) = self.read_heap.peek() {
                if self.current_reads.contains_key(top) {
                    break;
                }
                self.read_heap.pop();
            }
        }

        if read_ts == self.watermark {
            self.watermark = match self.read_heap.peek() {
                Some(Reverse(top)) => *top,
                None => self.commit_ts,
            };
        }
    }

    /// Records a new last commit timestamp.
    ///
    /// Callers update this before removing the committing transaction's
    /// read timestamp so an emptied watermark lands on the right value.
    pub fn update_commit_ts(&mut self, commit_ts: u64) {
        self.commit_ts = commit_ts;
    }

    /// The minimum running read timestamp, or the last commit timestamp
    /// when idle.
    pub fn watermark(&self) -> u64 {
        if self.current_reads.is_empty() {
            self.commit_ts
        } else {
            self.watermark
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_watermark_is_commit_ts() {
        let wm = Watermark::new(7);
        assert_eq!(wm.watermark(), 7);
    }

    #[test]
    fn test_minimum_of_running_reads() {
        // Scenario S6: running read timestamps {5, 7, 12}.
        let mut wm = Watermark::new(5);
        wm.add_txn(5);
        wm.add_txn(7);
        wm.add_txn(12);
        assert_eq!(wm.watermark(), 5);

        wm.remove_txn(5);
        assert_eq!(wm.watermark(), 7);
        wm.remove_txn(12);
        assert_eq!(wm.watermark(), 7);
        wm.remove_txn(7);
        assert_eq!(wm.watermark(), 5);
    }

    #[test]
    fn test_duplicate_read_ts_counted() {
        let mut wm = Watermark::new(3);
        wm.add_txn(3);
        wm.add_txn(3);
        wm.remove_txn(3);
        assert_eq!(wm.watermark(), 3);
        wm.remove_txn(3);
        assert_eq!(wm.watermark(), 3);
    }

    #[test]
    fn test_add_remove_is_idempotent_on_state() {
        let mut wm = Watermark::new(4);
        wm.add_txn(6);
        let before = wm.watermark();
        wm.add_txn(9);
        wm.remove_txn(9);
        assert_eq!(wm.watermark(), before);
    }

    #[test]
    fn test_commit_ts_advances_idle_value() {
        let mut wm = Watermark::new(1);
        wm.add_txn(1);
        wm.update_commit_ts(2);
        wm.remove_txn(1);
        assert_eq!(wm.watermark(), 2);
    }

    #[test]
    #[should_panic(expected = "below commit ts")]
    fn test_stale_read_ts_rejected() {
        let mut wm = Watermark::new(10);
        wm.add_txn(9);
    }

    #[test]
    #[should_panic(expected = "not tracked")]
    fn test_unknown_removal_rejected() {
        let mut wm = Watermark::new(0);
        wm.remove_txn(1);
    }
}
