//! Transaction handles.

use std::collections::{HashMap, HashSet};
use std::fmt;

use granite_common::types::{Rid, TableId, Timestamp, TxnId};
use granite_mvcc::{UndoLink, UndoLog};
use parking_lot::{Mutex, RwLock};

/// Isolation level of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Readers see the snapshot at their read timestamp.
    SnapshotIsolation,
    /// Snapshot reads plus commit-time conflict verification.
    Serializable,
}

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Running,
    /// Transaction hit a conflict and can only abort.
    Tainted,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

impl TransactionState {
    /// Returns true while the transaction can perform operations.
    pub fn is_running(self) -> bool {
        self == TransactionState::Running
    }

    /// Returns true once the transaction has ended.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Running => write!(f, "Running"),
            TransactionState::Tainted => write!(f, "Tainted"),
            TransactionState::Committed => write!(f, "Committed"),
            TransactionState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// A transaction.
///
/// Shared as `Arc<Transaction>`; the manager and the owning thread both
/// touch it, so the mutable pieces sit behind their own locks.
pub struct Transaction {
    id: TxnId,
    isolation: IsolationLevel,
    read_ts: u64,
    commit_ts: RwLock<Option<Timestamp>>,
    state: RwLock<TransactionState>,
    write_set: Mutex<HashMap<TableId, HashSet<Rid>>>,
    undo_logs: RwLock<Vec<UndoLog>>,
}

impl Transaction {
    /// Creates a running transaction.
    pub(crate) fn new(id: TxnId, isolation: IsolationLevel, read_ts: u64) -> Self {
        Self {
            id,
            isolation,
            read_ts,
            commit_ts: RwLock::new(None),
            state: RwLock::new(TransactionState::Running),
            write_set: Mutex::new(HashMap::new()),
            undo_logs: RwLock::new(Vec::new()),
        }
    }

    /// Returns the transaction ID.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// The temporary timestamp this transaction stamps its writes with.
    pub fn temp_ts(&self) -> u64 {
        self.id.as_u64()
    }

    /// Returns the isolation level.
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// The snapshot this transaction reads at.
    pub fn read_ts(&self) -> u64 {
        self.read_ts
    }

    /// The commit timestamp, set at commit.
    pub fn commit_ts(&self) -> Option<Timestamp> {
        *self.commit_ts.read()
    }

    pub(crate) fn set_commit_ts(&self, ts: Timestamp) {
        *self.commit_ts.write() = Some(ts);
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    /// Appends an undo log to this transaction's buffer, returning its
    /// link.
    pub fn append_undo_log(&self, log: UndoLog) -> UndoLink {
        let mut logs = self.undo_logs.write();
        logs.push(log);
        UndoLink::new(self.id, (logs.len() - 1) as u32)
    }

    /// Replaces an existing undo log.
    ///
    /// # Panics
    ///
    /// Panics if `log_idx` is out of range.
    pub fn modify_undo_log(&self, log_idx: u32, log: UndoLog) {
        self.undo_logs.write()[log_idx as usize] = log;
    }

    /// Returns the undo log at `log_idx`, if present.
    pub fn undo_log(&self, log_idx: u32) -> Option<UndoLog> {
        self.undo_logs.read().get(log_idx as usize).cloned()
    }

    /// Number of undo logs buffered so far.
    pub fn undo_log_count(&self) -> usize {
        self.undo_logs.read().len()
    }

    /// Records a write for commit-time timestamp rewriting.
    pub fn append_write_set(&self, table_id: TableId, rid: Rid) {
        self.write_set.lock().entry(table_id).or_default().insert(rid);
    }

    /// Snapshot of the write set.
    pub fn write_set(&self) -> HashMap<TableId, HashSet<Rid>> {
        self.write_set.lock().clone()
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("isolation", &self.isolation)
            .field("read_ts", &self.read_ts)
            .field("undo_logs", &self.undo_log_count())
            .finish()
    }
}
