//! # granite-txn
//!
//! Transaction management for Granite.
//!
//! This crate implements:
//! - Transaction lifecycle (begin, commit, abort) with snapshot reads
//! - Timestamp allocation under a single-writer commit mutex
//! - The MVCC write path (undo-log generation, version-chain updates)
//! - Stop-the-world garbage collection bounded by the watermark
//!
//! # Transaction States
//!
//! ```text
//! ┌───────┐   begin()   ┌─────────┐  write conflict  ┌─────────┐
//! │ Start │────────────▶│ Running │─────────────────▶│ Tainted │
//! └───────┘             └─────────┘                  └─────────┘
//!                            │                            │
//!                   ┌────────┴───────┐                 abort()
//!                commit()         abort()                 │
//!                   │                │                    │
//!                   ▼                ▼                    ▼
//!            ┌───────────┐     ┌─────────┐          ┌─────────┐
//!            │ Committed │     │ Aborted │          │ Aborted │
//!            └───────────┘     └─────────┘          └─────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// The in-memory table heap the commit path rewrites
pub mod heap;

/// Transaction manager
pub mod manager;

/// Transaction handles and state
pub mod transaction;

pub use heap::TableHeap;
pub use manager::{TransactionManager, TxnError, TxnResult};
pub use transaction::{IsolationLevel, Transaction, TransactionState};
