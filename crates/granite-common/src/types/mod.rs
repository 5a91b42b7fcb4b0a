//! Type definitions for Granite.
//!
//! This module contains the core identifier and timestamp types used
//! across the storage and transaction layers.

mod ids;
mod timestamps;

pub use ids::{FrameId, PageId, Rid, TableId, TxnId};
pub use timestamps::Timestamp;
