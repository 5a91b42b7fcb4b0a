//! Undo logs and version reconstruction.
//!
//! Every first write a transaction makes to a tuple appends an undo log
//! recording the previous version: a timestamp, a deletion marker, the
//! bitmap of modified columns, and the prior values of exactly those
//! columns. Logs chain newest-first per record id with non-increasing
//! timestamps; the chain head hangs off the version map.

use granite_common::types::TxnId;

use crate::tuple::{Schema, Tuple, TupleMeta};

/// Link to an undo log: owning transaction plus index into its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UndoLink {
    /// Transaction whose buffer holds the log.
    pub txn_id: TxnId,
    /// Index into that transaction's undo-log buffer.
    pub log_idx: u32,
}

impl UndoLink {
    /// Sentinel for the end of a chain.
    pub const INVALID: Self = Self {
        txn_id: TxnId::INVALID,
        log_idx: 0,
    };

    /// Creates a link.
    pub fn new(txn_id: TxnId, log_idx: u32) -> Self {
        Self { txn_id, log_idx }
    }

    /// True when this link points at a log.
    pub fn is_valid(&self) -> bool {
        self.txn_id.is_valid()
    }
}

/// One prior version of a tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoLog {
    /// Timestamp of the version this log restores.
    pub ts: u64,
    /// True when that version was a deletion.
    pub is_deleted: bool,
    /// Which columns `tuple` carries values for.
    pub modified: Vec<bool>,
    /// The prior values of the modified columns, in column order.
    pub tuple: Tuple,
    /// The next-older log in the chain.
    pub prev: UndoLink,
}

impl UndoLog {
    /// A log recording a full prior version (all columns modified).
    pub fn full(ts: u64, tuple: Tuple, prev: UndoLink) -> Self {
        let width = tuple.len();
        Self {
            ts,
            is_deleted: false,
            modified: vec![true; width],
            tuple,
            prev,
        }
    }

    /// A log recording that the tuple did not exist at `ts`.
    pub fn deletion(ts: u64, width: usize, prev: UndoLink) -> Self {
        Self {
            ts,
            is_deleted: true,
            modified: vec![false; width],
            tuple: Tuple::nulls(0),
            prev,
        }
    }
}

/// Source of undo logs, resolved by link.
///
/// The transaction manager implements this over its transaction map; a
/// link whose transaction has been garbage-collected resolves to `None`.
pub trait UndoLogSource {
    /// Returns the log behind `link`, if its transaction still exists.
    fn undo_log(&self, link: UndoLink) -> Option<UndoLog>;
}

/// Rebuilds the tuple version described by `undo_logs` applied over the
/// base tuple.
///
/// Logs are applied front to back (newest first, so each successive log
/// rewinds one more version). A log with the deletion marker makes the
/// running version absent; a later (older) log can resurrect it. Returns
/// `None` when the reconstructed version is absent.
pub fn reconstruct_tuple(
    schema: &Schema,
    base_tuple: &Tuple,
    base_meta: &TupleMeta,
    undo_logs: &[UndoLog],
) -> Option<Tuple> {
    if base_meta.is_deleted && undo_logs.is_empty() {
        return None;
    }

    let mut tuple = base_tuple.clone();
    let mut deleted = false;
    for log in undo_logs {
        if log.is_deleted {
            deleted = true;
            continue;
        }
        deleted = false;
        debug_assert_eq!(log.modified.len(), schema.len());
        let mut partial_idx = 0;
        for (column_idx, modified) in log.modified.iter().enumerate() {
            if *modified {
                tuple.set_value(column_idx, log.tuple.value(partial_idx).clone());
                partial_idx += 1;
            }
        }
    }

    if deleted {
        None
    } else {
        Some(tuple)
    }
}

/// Collects the undo logs sufficient to reconstruct the version of a
/// tuple visible to a reader.
///
/// - Base tuple already committed at or before `read_ts`: empty list, the
///   base tuple is the visible version.
/// - Base tuple is the reader's own in-flight write: empty list.
/// - Otherwise walk the chain newest-first, collecting until a log with
///   `ts <= read_ts` appears. A chain that runs out first means the tuple
///   did not exist for this reader: `None`.
pub fn collect_undo_logs(
    base_meta: &TupleMeta,
    head: Option<UndoLink>,
    read_ts: u64,
    reader: TxnId,
    source: &impl UndoLogSource,
) -> Option<Vec<UndoLog>> {
    if base_meta.ts <= read_ts {
        return Some(Vec::new());
    }
    if reader.is_txn_ts(base_meta.ts) {
        return Some(Vec::new());
    }

    let mut link = head?;
    let mut logs = Vec::new();
    while link.is_valid() {
        let log = source.undo_log(link)?;
        let ts = log.ts;
        let prev = log.prev;
        logs.push(log);
        if ts <= read_ts {
            return Some(logs);
        }
        link = prev;
    }
    None
}

/// Convenience for tests and debugging: collect then reconstruct.
pub fn visible_tuple(
    schema: &Schema,
    base_tuple: &Tuple,
    base_meta: &TupleMeta,
    head: Option<UndoLink>,
    read_ts: u64,
    reader: TxnId,
    source: &impl UndoLogSource,
) -> Option<Tuple> {
    let logs = collect_undo_logs(base_meta, head, read_ts, reader, source)?;
    reconstruct_tuple(schema, base_tuple, base_meta, &logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::Value;
    use granite_common::TXN_START_ID;
    use std::collections::HashMap;

    struct MapSource(HashMap<UndoLink, UndoLog>);

    impl UndoLogSource for MapSource {
        fn undo_log(&self, link: UndoLink) -> Option<UndoLog> {
            self.0.get(&link).cloned()
        }
    }

    fn schema() -> Schema {
        Schema::from_names(&["a", "b", "c"])
    }

    fn tuple(a: i64, b: i64, c: i64) -> Tuple {
        Tuple::new(vec![
            Value::Integer(a),
            Value::Integer(b),
            Value::Integer(c),
        ])
    }

    #[test]
    fn test_reconstruct_with_no_logs_returns_base() {
        let base = tuple(1, 2, 3);
        let meta = TupleMeta::committed(5);
        assert_eq!(
            reconstruct_tuple(&schema(), &base, &meta, &[]),
            Some(base.clone())
        );
    }

    #[test]
    fn test_reconstruct_deleted_base_with_no_logs() {
        let base = tuple(1, 2, 3);
        let meta = TupleMeta {
            ts: 5,
            is_deleted: true,
        };
        assert_eq!(reconstruct_tuple(&schema(), &base, &meta, &[]), None);
    }

    #[test]
    fn test_reconstruct_overlays_partial_columns() {
        let base = tuple(1, 2, 3);
        let meta = TupleMeta::committed(5);
        let log = UndoLog {
            ts: 3,
            is_deleted: false,
            modified: vec![true, false, true],
            tuple: Tuple::new(vec![Value::Integer(10), Value::Integer(30)]),
            prev: UndoLink::INVALID,
        };
        assert_eq!(
            reconstruct_tuple(&schema(), &base, &meta, &[log]),
            Some(tuple(10, 2, 30))
        );
    }

    #[test]
    fn test_reconstruct_applies_logs_in_order() {
        let base = tuple(1, 2, 3);
        let meta = TupleMeta::committed(9);
        let newer = UndoLog {
            ts: 7,
            is_deleted: false,
            modified: vec![true, false, false],
            tuple: Tuple::new(vec![Value::Integer(100)]),
            prev: UndoLink::INVALID,
        };
        let older = UndoLog {
            ts: 4,
            is_deleted: false,
            modified: vec![true, true, false],
            tuple: Tuple::new(vec![Value::Integer(200), Value::Integer(201)]),
            prev: UndoLink::INVALID,
        };
        // The older log wins for every column it touches.
        assert_eq!(
            reconstruct_tuple(&schema(), &base, &meta, &[newer, older]),
            Some(tuple(200, 201, 3))
        );
    }

    #[test]
    fn test_reconstruct_delete_marker_hides_tuple() {
        let base = tuple(1, 2, 3);
        let meta = TupleMeta::committed(9);
        let del = UndoLog::deletion(4, 3, UndoLink::INVALID);
        assert_eq!(reconstruct_tuple(&schema(), &base, &meta, &[del]), None);
    }

    #[test]
    fn test_reconstruct_resurrection_after_delete_marker() {
        let base = tuple(1, 2, 3);
        let meta = TupleMeta::committed(9);
        let del = UndoLog::deletion(6, 3, UndoLink::INVALID);
        let resurrect = UndoLog::full(2, tuple(7, 8, 9), UndoLink::INVALID);
        assert_eq!(
            reconstruct_tuple(&schema(), &base, &meta, &[del, resurrect]),
            Some(tuple(7, 8, 9))
        );
    }

    #[test]
    fn test_collect_base_visible() {
        let meta = TupleMeta::committed(3);
        let source = MapSource(HashMap::new());
        let logs = collect_undo_logs(&meta, None, 5, TxnId::new(TXN_START_ID + 1), &source);
        assert_eq!(logs, Some(Vec::new()));
    }

    #[test]
    fn test_collect_own_write_visible() {
        let txn = TxnId::new(TXN_START_ID + 4);
        let meta = TupleMeta {
            ts: txn.as_u64(),
            is_deleted: false,
        };
        let source = MapSource(HashMap::new());
        let logs = collect_undo_logs(&meta, None, 2, txn, &source);
        assert_eq!(logs, Some(Vec::new()));
    }

    #[test]
    fn test_collect_walks_until_visible() {
        let writer = TxnId::new(TXN_START_ID + 1);
        let reader = TxnId::new(TXN_START_ID + 2);
        let mut map = HashMap::new();
        let l1 = UndoLink::new(writer, 1);
        let l0 = UndoLink::new(writer, 0);
        map.insert(
            l1,
            UndoLog::full(8, tuple(8, 8, 8), l0),
        );
        map.insert(
            l0,
            UndoLog::full(2, tuple(2, 2, 2), UndoLink::INVALID),
        );
        let source = MapSource(map);

        let meta = TupleMeta::committed(10);
        let logs = collect_undo_logs(&meta, Some(l1), 3, reader, &source).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].ts, 2);
    }

    #[test]
    fn test_collect_exhausted_chain_means_invisible() {
        let writer = TxnId::new(TXN_START_ID + 1);
        let reader = TxnId::new(TXN_START_ID + 2);
        let l0 = UndoLink::new(writer, 0);
        let mut map = HashMap::new();
        map.insert(
            l0,
            UndoLog::full(8, tuple(8, 8, 8), UndoLink::INVALID),
        );
        let source = MapSource(map);

        // Base written at 10, the only log restores ts 8; a reader at 3
        // predates the tuple entirely.
        let meta = TupleMeta::committed(10);
        assert_eq!(
            collect_undo_logs(&meta, Some(l0), 3, reader, &source),
            None
        );
    }

    #[test]
    fn test_collect_without_chain_is_invisible() {
        let reader = TxnId::new(TXN_START_ID + 2);
        let meta = TupleMeta::committed(10);
        let source = MapSource(HashMap::new());
        assert_eq!(collect_undo_logs(&meta, None, 3, reader, &source), None);
    }
}
