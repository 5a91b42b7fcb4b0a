//! B+Tree index.
//!
//! An ordered index over fixed-width keys with record-id values, stored in
//! buffer pool pages. Lookups crab root-to-leaf with reader latches;
//! mutations try an optimistic leaf-only write pass first and fall back to
//! a pessimistic full-write-path descent when the leaf cannot absorb the
//! change.

mod cursor;
mod error;
mod key;
mod node;
mod tree;

pub use cursor::TreeCursor;
pub use error::{TreeError, TreeResult};
pub use key::IndexKey;
pub use tree::BPlusTree;
