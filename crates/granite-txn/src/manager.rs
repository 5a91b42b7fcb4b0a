//! Transaction manager.
//!
//! Owns the transaction map, the version-chain map, the watermark, and
//! the commit clock. Commit timestamps are handed out under a
//! process-wide commit mutex, so they are strictly increasing in commit
//! order; transaction ids live in a disjoint high range starting at
//! `TXN_START_ID` so a tuple's metadata timestamp is unambiguous.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use granite_common::types::{Rid, TableId, Timestamp, TxnId};
use granite_common::TXN_START_ID;
use granite_mvcc::{
    collect_undo_logs, reconstruct_tuple, Schema, Tuple, TupleMeta, UndoLink, UndoLog,
    UndoLogSource, VersionMap, Watermark,
};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::heap::TableHeap;
use crate::transaction::{IsolationLevel, Transaction, TransactionState};

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TxnError {
    /// Commit or abort on a transaction in an ineligible state.
    #[error("transaction {txn_id} in state {state}, expected {expected}")]
    InvalidState {
        /// The transaction.
        txn_id: TxnId,
        /// Its current state.
        state: TransactionState,
        /// The state(s) the operation requires.
        expected: &'static str,
    },

    /// Write to a tuple currently being written by another transaction.
    #[error("write-write conflict on {rid}")]
    WriteConflict {
        /// The contested tuple.
        rid: Rid,
    },

    /// Unknown table id.
    #[error("unknown table {table_id}")]
    UnknownTable {
        /// The missing table.
        table_id: TableId,
    },

    /// Record id does not resolve to a tuple.
    #[error("tuple {rid} does not exist")]
    TupleNotFound {
        /// The missing record.
        rid: Rid,
    },
}

/// The transaction manager.
pub struct TransactionManager {
    /// All transactions, running or retired, keyed by id.
    txn_map: RwLock<HashMap<TxnId, Arc<Transaction>>>,
    /// Read timestamps of running transactions.
    running_txns: Mutex<Watermark>,
    /// Per-tuple undo-chain heads.
    version_map: VersionMap,
    /// Registered tables.
    tables: RwLock<HashMap<TableId, Arc<TableHeap>>>,
    /// Only one transaction commits at a time.
    commit_mutex: Mutex<()>,
    /// The last committed timestamp.
    last_commit_ts: AtomicU64,
    next_txn_id: AtomicU64,
    next_table_id: AtomicU32,
}

impl TransactionManager {
    /// Creates a manager with an empty history.
    pub fn new() -> Self {
        Self {
            txn_map: RwLock::new(HashMap::new()),
            running_txns: Mutex::new(Watermark::new(0)),
            version_map: VersionMap::new(),
            tables: RwLock::new(HashMap::new()),
            commit_mutex: Mutex::new(()),
            last_commit_ts: AtomicU64::new(0),
            next_txn_id: AtomicU64::new(TXN_START_ID),
            next_table_id: AtomicU32::new(0),
        }
    }

    // =========================================================================
    // Tables
    // =========================================================================

    /// Registers a new table and returns its id.
    pub fn create_table(&self) -> TableId {
        let table_id = TableId::new(self.next_table_id.fetch_add(1, Ordering::SeqCst));
        self.tables
            .write()
            .insert(table_id, Arc::new(TableHeap::new(table_id)));
        table_id
    }

    /// Looks up a table heap.
    pub fn table(&self, table_id: TableId) -> Option<Arc<TableHeap>> {
        self.tables.read().get(&table_id).cloned()
    }

    fn table_or_err(&self, table_id: TableId) -> TxnResult<Arc<TableHeap>> {
        self.table(table_id)
            .ok_or(TxnError::UnknownTable { table_id })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Begins a transaction: allocates an id, snapshots the commit clock
    /// as the read timestamp, and registers it with the watermark.
    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        let txn_id = TxnId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        // The snapshot is taken under the watermark lock so it pairs
        // atomically with the watermark's view of the commit clock.
        let read_ts = {
            let mut watermark = self.running_txns.lock();
            let read_ts = self.last_commit_ts.load(Ordering::SeqCst);
            watermark.add_txn(read_ts);
            read_ts
        };
        let txn = Arc::new(Transaction::new(txn_id, isolation, read_ts));
        self.txn_map.write().insert(txn_id, Arc::clone(&txn));
        tracing::debug!(%txn_id, read_ts, "transaction begun");
        txn
    }

    /// Commits a transaction.
    ///
    /// Returns `Ok(false)` when SERIALIZABLE verification fails (the
    /// transaction is aborted); `Err` when the transaction is not
    /// RUNNING.
    pub fn commit(&self, txn: &Arc<Transaction>) -> TxnResult<bool> {
        let commit_lock = self.commit_mutex.lock();
        let commit_ts = self.last_commit_ts.load(Ordering::SeqCst) + 1;

        if txn.state() != TransactionState::Running {
            return Err(TxnError::InvalidState {
                txn_id: txn.id(),
                state: txn.state(),
                expected: "Running",
            });
        }

        if txn.isolation() == IsolationLevel::Serializable && !self.verify_txn(txn) {
            drop(commit_lock);
            self.abort(txn)?;
            tracing::debug!(txn_id = %txn.id(), "serializable verification failed");
            return Ok(false);
        }

        // Flip every written tuple from the temporary id to the commit
        // timestamp, preserving the deletion flag.
        for (table_id, rids) in txn.write_set() {
            let heap = self.table_or_err(table_id)?;
            for rid in rids {
                let meta = heap
                    .tuple_meta(rid)
                    .ok_or(TxnError::TupleNotFound { rid })?;
                heap.update_tuple_meta(
                    rid,
                    TupleMeta {
                        ts: commit_ts,
                        is_deleted: meta.is_deleted,
                    },
                );
            }
        }

        txn.set_commit_ts(Timestamp::new(commit_ts));
        txn.set_state(TransactionState::Committed);
        {
            let mut watermark = self.running_txns.lock();
            watermark.update_commit_ts(commit_ts);
            watermark.remove_txn(txn.read_ts());
            // Published inside the watermark critical section so a
            // concurrent begin cannot pair the new clock with the old
            // watermark state.
            self.last_commit_ts.store(commit_ts, Ordering::SeqCst);
        }
        tracing::debug!(txn_id = %txn.id(), commit_ts, "transaction committed");
        Ok(true)
    }

    /// Aborts a transaction.
    ///
    /// Only RUNNING and TAINTED transactions can abort. Base-heap bytes
    /// are not rolled back; undo logs keep the aborted writes invisible.
    pub fn abort(&self, txn: &Arc<Transaction>) -> TxnResult<()> {
        let state = txn.state();
        if state != TransactionState::Running && state != TransactionState::Tainted {
            return Err(TxnError::InvalidState {
                txn_id: txn.id(),
                state,
                expected: "Running or Tainted",
            });
        }
        txn.set_state(TransactionState::Aborted);
        self.running_txns.lock().remove_txn(txn.read_ts());
        tracing::debug!(txn_id = %txn.id(), "transaction aborted");
        Ok(())
    }

    /// Commit-time verification for SERIALIZABLE transactions.
    ///
    /// First-committer-wins on the write set: verification fails when any
    /// written tuple carries a commit timestamp newer than this
    /// transaction's snapshot (someone committed to it since we began),
    /// observed either on the base tuple or in the undo log this
    /// transaction pushed over it.
    fn verify_txn(&self, txn: &Arc<Transaction>) -> bool {
        for (table_id, rids) in txn.write_set() {
            let Some(heap) = self.table(table_id) else {
                return false;
            };
            for rid in rids {
                let Some(meta) = heap.tuple_meta(rid) else {
                    return false;
                };
                if txn.id().is_txn_ts(meta.ts) {
                    // Our own write: the overwritten version's timestamp
                    // lives in the undo log we created.
                    if let Some(link) = self.version_map.undo_link(rid) {
                        if link.txn_id == txn.id() {
                            if let Some(log) = txn.undo_log(link.log_idx) {
                                if log.ts < TXN_START_ID && log.ts > txn.read_ts() {
                                    return false;
                                }
                            }
                        }
                    }
                } else if meta.ts < TXN_START_ID && meta.ts > txn.read_ts() {
                    return false;
                } else if meta.ts >= TXN_START_ID {
                    // Overwritten by another in-flight transaction.
                    return false;
                }
            }
        }
        true
    }

    // =========================================================================
    // Timestamps and version chains
    // =========================================================================

    /// The minimum read timestamp among running transactions, or the last
    /// commit timestamp when none are running.
    pub fn watermark(&self) -> u64 {
        self.running_txns.lock().watermark()
    }

    /// The last committed timestamp.
    pub fn last_commit_ts(&self) -> u64 {
        self.last_commit_ts.load(Ordering::SeqCst)
    }

    /// The undo-chain head for `rid`.
    pub fn undo_link(&self, rid: Rid) -> Option<UndoLink> {
        self.version_map.undo_link(rid)
    }

    /// Replaces the undo-chain head for `rid`.
    pub fn update_undo_link(&self, rid: Rid, link: Option<UndoLink>) {
        self.version_map.update_undo_link(rid, link);
    }

    /// Resolves an undo link, `None` when the owning transaction is gone.
    pub fn get_undo_log_optional(&self, link: UndoLink) -> Option<UndoLog> {
        let txn = self.txn_map.read().get(&link.txn_id).cloned()?;
        txn.undo_log(link.log_idx)
    }

    /// Resolves an undo link.
    ///
    /// # Panics
    ///
    /// Panics when the link does not resolve; internal chains should
    /// never dangle while their logs are reachable.
    pub fn get_undo_log(&self, link: UndoLink) -> UndoLog {
        self.get_undo_log_optional(link)
            .unwrap_or_else(|| panic!("undo link {link:?} does not resolve"))
    }

    /// A transaction by id, if still tracked.
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.read().get(&txn_id).cloned()
    }

    // =========================================================================
    // MVCC read / write path
    // =========================================================================

    /// Reads the version of a tuple visible to `txn`, reconstructing it
    /// from the undo chain when the base tuple is too new.
    pub fn read_tuple(
        &self,
        txn: &Arc<Transaction>,
        table_id: TableId,
        rid: Rid,
        schema: &Schema,
    ) -> TxnResult<Option<Tuple>> {
        let heap = self.table_or_err(table_id)?;
        let (base_meta, base_tuple) = heap
            .tuple(rid)
            .ok_or(TxnError::TupleNotFound { rid })?;
        let head = self.version_map.undo_link(rid);

        let Some(logs) = collect_undo_logs(&base_meta, head, txn.read_ts(), txn.id(), self)
        else {
            return Ok(None);
        };
        Ok(reconstruct_tuple(schema, &base_tuple, &base_meta, &logs))
    }

    /// Inserts a tuple stamped with `txn`'s temporary timestamp.
    ///
    /// No undo log is needed: with no chain head, the tuple is invisible
    /// to everyone else until commit.
    pub fn insert_tuple(
        &self,
        txn: &Arc<Transaction>,
        table_id: TableId,
        tuple: Tuple,
    ) -> TxnResult<Rid> {
        let heap = self.table_or_err(table_id)?;
        let rid = heap.insert_tuple(
            TupleMeta {
                ts: txn.temp_ts(),
                is_deleted: false,
            },
            tuple,
        );
        txn.append_write_set(table_id, rid);
        Ok(rid)
    }

    /// Updates a tuple, generating or merging the undo log for `txn`'s
    /// first write to it.
    pub fn update_tuple(
        &self,
        txn: &Arc<Transaction>,
        table_id: TableId,
        rid: Rid,
        tuple: Tuple,
    ) -> TxnResult<()> {
        self.modify_tuple(txn, table_id, rid, tuple, false)
    }

    /// Logically deletes a tuple.
    pub fn delete_tuple(
        &self,
        txn: &Arc<Transaction>,
        table_id: TableId,
        rid: Rid,
    ) -> TxnResult<()> {
        let heap = self.table_or_err(table_id)?;
        let (_, base_tuple) = heap
            .tuple(rid)
            .ok_or(TxnError::TupleNotFound { rid })?;
        self.modify_tuple(txn, table_id, rid, base_tuple, true)
    }

    fn modify_tuple(
        &self,
        txn: &Arc<Transaction>,
        table_id: TableId,
        rid: Rid,
        tuple: Tuple,
        is_deleted: bool,
    ) -> TxnResult<()> {
        let heap = self.table_or_err(table_id)?;
        let (base_meta, base_tuple) = heap
            .tuple(rid)
            .ok_or(TxnError::TupleNotFound { rid })?;

        if base_meta.is_uncommitted() && !txn.id().is_txn_ts(base_meta.ts) {
            // Another transaction's write is in flight; writers do not
            // wait, they taint and abort.
            txn.set_state(TransactionState::Tainted);
            return Err(TxnError::WriteConflict { rid });
        }

        if txn.id().is_txn_ts(base_meta.ts) {
            // A repeated write by the same transaction widens the
            // existing undo log with the base values of columns it did
            // not yet cover.
            if let Some(link) = self.version_map.undo_link(rid) {
                if link.txn_id == txn.id() {
                    let log = self.get_undo_log(link);
                    let merged = merge_undo_log(log, &base_tuple, &tuple);
                    txn.modify_undo_log(link.log_idx, merged);
                }
            }
        } else {
            let prev = self.version_map.undo_link(rid).unwrap_or(UndoLink::INVALID);
            let log = if base_meta.is_deleted {
                UndoLog::deletion(base_meta.ts, base_tuple.len(), prev)
            } else {
                diff_undo_log(base_meta.ts, &base_tuple, &tuple, prev)
            };
            let link = txn.append_undo_log(log);
            self.version_map.update_undo_link(rid, Some(link));
        }

        heap.update_tuple_in_place(
            rid,
            TupleMeta {
                ts: txn.temp_ts(),
                is_deleted,
            },
            tuple,
        );
        txn.append_write_set(table_id, rid);
        Ok(())
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// Stop-the-world garbage collection.
    ///
    /// A chain's logs stay reachable down to the first one at or below
    /// the watermark: that version is still visible to the oldest
    /// possible reader. Retired transactions none of whose logs are
    /// reachable are dropped from the transaction map.
    pub fn garbage_collection(&self) {
        let watermark = self.watermark();

        let mut needed: HashSet<(TxnId, u32)> = HashSet::new();
        for (_rid, head) in self.version_map.all_links() {
            let mut link = head;
            while link.is_valid() {
                let Some(log) = self.get_undo_log_optional(link) else {
                    break;
                };
                needed.insert((link.txn_id, link.log_idx));
                if log.ts <= watermark {
                    break;
                }
                link = log.prev;
            }
        }

        let mut txn_map = self.txn_map.write();
        let before = txn_map.len();
        txn_map.retain(|txn_id, txn| {
            if !txn.state().is_terminal() {
                return true;
            }
            (0..txn.undo_log_count()).any(|i| needed.contains(&(*txn_id, i as u32)))
        });
        tracing::debug!(
            watermark,
            reclaimed = before - txn_map.len(),
            "garbage collection"
        );
    }
}

impl UndoLogSource for TransactionManager {
    fn undo_log(&self, link: UndoLink) -> Option<UndoLog> {
        self.get_undo_log_optional(link)
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("transactions", &self.txn_map.read().len())
            .field("last_commit_ts", &self.last_commit_ts())
            .field("watermark", &self.watermark())
            .finish()
    }
}

/// Builds the undo log for a first write: the prior values of exactly the
/// columns the write changes.
fn diff_undo_log(ts: u64, base: &Tuple, target: &Tuple, prev: UndoLink) -> UndoLog {
    debug_assert_eq!(base.len(), target.len());
    let mut modified = vec![false; base.len()];
    let mut partial = Vec::new();
    for i in 0..base.len() {
        if base.value(i) != target.value(i) {
            modified[i] = true;
            partial.push(base.value(i).clone());
        }
    }
    UndoLog {
        ts,
        is_deleted: false,
        modified,
        tuple: Tuple::new(partial),
        prev,
    }
}

/// Widens an existing undo log for a repeated write: columns the log does
/// not cover yet, but this write changes, get their pre-write base value.
fn merge_undo_log(log: UndoLog, base: &Tuple, target: &Tuple) -> UndoLog {
    if log.is_deleted {
        // The restored version did not exist; nothing to widen.
        return log;
    }
    let mut modified = log.modified.clone();
    let mut partial: Vec<_> = Vec::with_capacity(base.len());
    let mut old_idx = 0;
    for i in 0..base.len() {
        if log.modified[i] {
            partial.push(log.tuple.value(old_idx).clone());
            old_idx += 1;
        } else if base.value(i) != target.value(i) {
            modified[i] = true;
            partial.push(base.value(i).clone());
        }
    }
    UndoLog {
        ts: log.ts,
        is_deleted: false,
        modified,
        tuple: Tuple::new(partial),
        prev: log.prev,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granite_mvcc::Value;

    fn tuple(v: i64) -> Tuple {
        Tuple::new(vec![Value::Integer(v)])
    }

    fn schema() -> Schema {
        Schema::from_names(&["v"])
    }

    #[test]
    fn test_lifecycle() {
        let tm = TransactionManager::new();
        let txn = tm.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(txn.state(), TransactionState::Running);
        assert_eq!(txn.read_ts(), 0);

        assert!(tm.commit(&txn).unwrap());
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(txn.commit_ts(), Some(Timestamp::new(1)));
        assert_eq!(tm.last_commit_ts(), 1);
    }

    #[test]
    fn test_double_commit_rejected() {
        let tm = TransactionManager::new();
        let txn = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.commit(&txn).unwrap();
        assert!(matches!(
            tm.commit(&txn),
            Err(TxnError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_abort_from_running_only() {
        let tm = TransactionManager::new();
        let txn = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.commit(&txn).unwrap();
        assert!(matches!(
            tm.abort(&txn),
            Err(TxnError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_commit_rewrites_write_set_timestamps() {
        let tm = TransactionManager::new();
        let table = tm.create_table();
        let txn = tm.begin(IsolationLevel::SnapshotIsolation);
        let rid = tm.insert_tuple(&txn, table, tuple(7)).unwrap();

        let heap = tm.table(table).unwrap();
        assert!(heap.tuple_meta(rid).unwrap().is_uncommitted());

        tm.commit(&txn).unwrap();
        let meta = heap.tuple_meta(rid).unwrap();
        assert_eq!(meta.ts, 1);
        assert!(!meta.is_deleted);
    }

    #[test]
    fn test_snapshot_isolation_visibility() {
        // Scenario S5: a reader that began before an insert committed
        // does not see it; a reader that began after does.
        let tm = TransactionManager::new();
        let table = tm.create_table();

        let txn_a = tm.begin(IsolationLevel::SnapshotIsolation);

        let txn_b = tm.begin(IsolationLevel::SnapshotIsolation);
        let rid = tm.insert_tuple(&txn_b, table, tuple(42)).unwrap();
        assert!(tm.commit(&txn_b).unwrap());

        // A's snapshot predates B's commit.
        assert_eq!(tm.read_tuple(&txn_a, table, rid, &schema()).unwrap(), None);

        let txn_c = tm.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(
            tm.read_tuple(&txn_c, table, rid, &schema()).unwrap(),
            Some(tuple(42))
        );
    }

    #[test]
    fn test_reader_sees_own_uncommitted_write() {
        let tm = TransactionManager::new();
        let table = tm.create_table();
        let txn = tm.begin(IsolationLevel::SnapshotIsolation);
        let rid = tm.insert_tuple(&txn, table, tuple(5)).unwrap();
        assert_eq!(
            tm.read_tuple(&txn, table, rid, &schema()).unwrap(),
            Some(tuple(5))
        );
    }

    #[test]
    fn test_old_snapshot_reconstructs_prior_version() {
        let tm = TransactionManager::new();
        let table = tm.create_table();

        let writer = tm.begin(IsolationLevel::SnapshotIsolation);
        let rid = tm.insert_tuple(&writer, table, tuple(1)).unwrap();
        tm.commit(&writer).unwrap();

        let old_reader = tm.begin(IsolationLevel::SnapshotIsolation);

        let updater = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.update_tuple(&updater, table, rid, tuple(2)).unwrap();
        tm.commit(&updater).unwrap();

        // The old reader still sees version 1 through the undo chain.
        assert_eq!(
            tm.read_tuple(&old_reader, table, rid, &schema()).unwrap(),
            Some(tuple(1))
        );
        let fresh = tm.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(
            tm.read_tuple(&fresh, table, rid, &schema()).unwrap(),
            Some(tuple(2))
        );
    }

    #[test]
    fn test_deleted_tuple_invisible_to_new_readers() {
        let tm = TransactionManager::new();
        let table = tm.create_table();

        let writer = tm.begin(IsolationLevel::SnapshotIsolation);
        let rid = tm.insert_tuple(&writer, table, tuple(1)).unwrap();
        tm.commit(&writer).unwrap();

        let old_reader = tm.begin(IsolationLevel::SnapshotIsolation);

        let deleter = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.delete_tuple(&deleter, table, rid).unwrap();
        tm.commit(&deleter).unwrap();

        assert_eq!(
            tm.read_tuple(&old_reader, table, rid, &schema()).unwrap(),
            Some(tuple(1))
        );
        let fresh = tm.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(tm.read_tuple(&fresh, table, rid, &schema()).unwrap(), None);
    }

    #[test]
    fn test_aborted_write_stays_invisible() {
        let tm = TransactionManager::new();
        let table = tm.create_table();

        let writer = tm.begin(IsolationLevel::SnapshotIsolation);
        let rid = tm.insert_tuple(&writer, table, tuple(1)).unwrap();
        tm.commit(&writer).unwrap();

        let aborter = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.update_tuple(&aborter, table, rid, tuple(99)).unwrap();
        tm.abort(&aborter).unwrap();

        // Readers recover the committed version through the undo chain.
        let reader = tm.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(
            tm.read_tuple(&reader, table, rid, &schema()).unwrap(),
            Some(tuple(1))
        );
    }

    #[test]
    fn test_write_write_conflict_taints() {
        let tm = TransactionManager::new();
        let table = tm.create_table();

        let writer = tm.begin(IsolationLevel::SnapshotIsolation);
        let rid = tm.insert_tuple(&writer, table, tuple(1)).unwrap();
        tm.commit(&writer).unwrap();

        let first = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.update_tuple(&first, table, rid, tuple(2)).unwrap();

        let second = tm.begin(IsolationLevel::SnapshotIsolation);
        let err = tm.update_tuple(&second, table, rid, tuple(3)).unwrap_err();
        assert!(matches!(err, TxnError::WriteConflict { .. }));
        assert_eq!(second.state(), TransactionState::Tainted);
        tm.abort(&second).unwrap();

        tm.commit(&first).unwrap();
        let reader = tm.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(
            tm.read_tuple(&reader, table, rid, &schema()).unwrap(),
            Some(tuple(2))
        );
    }

    #[test]
    fn test_repeated_write_keeps_single_undo_log() {
        let tm = TransactionManager::new();
        let table = tm.create_table();

        let writer = tm.begin(IsolationLevel::SnapshotIsolation);
        let rid = tm.insert_tuple(&writer, table, tuple(1)).unwrap();
        tm.commit(&writer).unwrap();

        let old_reader = tm.begin(IsolationLevel::SnapshotIsolation);

        let updater = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.update_tuple(&updater, table, rid, tuple(2)).unwrap();
        tm.update_tuple(&updater, table, rid, tuple(3)).unwrap();
        assert_eq!(updater.undo_log_count(), 1);
        tm.commit(&updater).unwrap();

        assert_eq!(
            tm.read_tuple(&old_reader, table, rid, &schema()).unwrap(),
            Some(tuple(1))
        );
    }

    #[test]
    fn test_serializable_first_committer_wins() {
        let tm = TransactionManager::new();
        let table = tm.create_table();

        let writer = tm.begin(IsolationLevel::SnapshotIsolation);
        let rid = tm.insert_tuple(&writer, table, tuple(1)).unwrap();
        tm.commit(&writer).unwrap();

        let t1 = tm.begin(IsolationLevel::Serializable);
        let t2 = tm.begin(IsolationLevel::SnapshotIsolation);

        // t2 commits an update first; t1's later write to the same tuple
        // must fail verification.
        tm.update_tuple(&t2, table, rid, tuple(2)).unwrap();
        tm.commit(&t2).unwrap();

        tm.update_tuple(&t1, table, rid, tuple(3)).unwrap();
        assert!(!tm.commit(&t1).unwrap());
        assert_eq!(t1.state(), TransactionState::Aborted);

        let reader = tm.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(
            tm.read_tuple(&reader, table, rid, &schema()).unwrap(),
            Some(tuple(2))
        );
    }

    #[test]
    fn test_commit_timestamps_strictly_increase() {
        let tm = Arc::new(TransactionManager::new());
        let table = tm.create_table();

        let commit_order = Arc::new(Mutex::new(Vec::new()));
        std::thread::scope(|s| {
            for _ in 0..8 {
                let tm = Arc::clone(&tm);
                let commit_order = Arc::clone(&commit_order);
                s.spawn(move || {
                    let txn = tm.begin(IsolationLevel::SnapshotIsolation);
                    tm.insert_tuple(&txn, table, tuple(0)).unwrap();
                    tm.commit(&txn).unwrap();
                    commit_order
                        .lock()
                        .push(txn.commit_ts().unwrap().as_u64());
                });
            }
        });

        let mut timestamps = commit_order.lock().clone();
        timestamps.sort_unstable();
        assert_eq!(timestamps, (1..=8).collect::<Vec<u64>>());
    }

    #[test]
    fn test_watermark_tracks_oldest_reader() {
        let tm = TransactionManager::new();
        let t1 = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.commit(&t1).unwrap(); // commit ts 1

        let old = tm.begin(IsolationLevel::SnapshotIsolation); // read ts 1
        let t2 = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.commit(&t2).unwrap(); // commit ts 2
        assert_eq!(tm.watermark(), 1);

        tm.commit(&old).unwrap();
        assert_eq!(tm.watermark(), 3);
    }

    #[test]
    fn test_garbage_collection_reclaims_buried_versions() {
        let tm = TransactionManager::new();
        let table = tm.create_table();

        let t1 = tm.begin(IsolationLevel::SnapshotIsolation);
        let rid = tm.insert_tuple(&t1, table, tuple(1)).unwrap();
        tm.commit(&t1).unwrap();
        let t1_id = t1.id();

        let t2 = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.update_tuple(&t2, table, rid, tuple(2)).unwrap();
        tm.commit(&t2).unwrap();
        let t2_id = t2.id();

        let t3 = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.update_tuple(&t3, table, rid, tuple(3)).unwrap();
        tm.commit(&t3).unwrap();
        let t3_id = t3.id();

        // No readers: the watermark sits at the last commit. Only the
        // newest undo log (restoring version 2) is still reachable.
        tm.garbage_collection();
        assert!(tm.get_transaction(t1_id).is_none(), "no logs, reclaimed");
        assert!(tm.get_transaction(t2_id).is_none(), "buried log, reclaimed");
        assert!(tm.get_transaction(t3_id).is_some(), "head log still needed");

        let reader = tm.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(
            tm.read_tuple(&reader, table, rid, &schema()).unwrap(),
            Some(tuple(3))
        );
    }

    #[test]
    fn test_garbage_collection_spares_versions_behind_old_reader() {
        let tm = TransactionManager::new();
        let table = tm.create_table();

        let t1 = tm.begin(IsolationLevel::SnapshotIsolation);
        let rid = tm.insert_tuple(&t1, table, tuple(1)).unwrap();
        tm.commit(&t1).unwrap();

        let old_reader = tm.begin(IsolationLevel::SnapshotIsolation);

        let t2 = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.update_tuple(&t2, table, rid, tuple(2)).unwrap();
        tm.commit(&t2).unwrap();
        let t2_id = t2.id();

        tm.garbage_collection();
        // The old reader's snapshot still needs t2's undo log.
        assert!(tm.get_transaction(t2_id).is_some());
        assert_eq!(
            tm.read_tuple(&old_reader, table, rid, &schema()).unwrap(),
            Some(tuple(1))
        );
    }
}
