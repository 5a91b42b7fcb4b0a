//! # granite-common
//!
//! Common types and constants for Granite.
//!
//! This crate provides the foundational types used across all Granite
//! components:
//!
//! - **Types**: Core identifiers (`PageId`, `FrameId`, `TxnId`, `TableId`),
//!   record identifiers (`Rid`), and logical timestamps (`Timestamp`)
//! - **Constants**: Page geometry, buffer pool defaults, and the
//!   transaction-id partition point (`TXN_START_ID`)
//!
//! ## Example
//!
//! ```rust
//! use granite_common::types::{PageId, Rid, TxnId};
//!
//! let page = PageId::new(42);
//! let rid = Rid::new(page, 3);
//! assert_eq!(rid.page_id(), page);
//! assert!(TxnId::new(granite_common::TXN_START_ID).is_txn_ts(granite_common::TXN_START_ID));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use types::{FrameId, PageId, Rid, TableId, Timestamp, TxnId};
