//! # granite-mvcc
//!
//! Multi-version concurrency control primitives for Granite.
//!
//! This crate implements:
//! - The tuple model (values, schemas, metadata timestamps)
//! - Undo logs and version reconstruction
//! - The read-timestamp watermark bounding garbage collection
//! - The per-tuple version-chain map

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Tuples, values, schemas, and tuple metadata
pub mod tuple;

/// Undo logs, undo links, and tuple reconstruction
pub mod undo;

/// Minimum-read-timestamp tracking
pub mod watermark;

/// Version-chain map keyed by record id
pub mod version;

pub use tuple::{Column, Schema, Tuple, TupleMeta, Value};
pub use undo::{collect_undo_logs, reconstruct_tuple, UndoLink, UndoLog, UndoLogSource};
pub use version::VersionMap;
pub use watermark::Watermark;
