//! # granite-storage
//!
//! The page-oriented storage substrate of Granite.
//!
//! This crate implements:
//! - A disk manager and a single-worker disk scheduler
//! - A buffer pool with an LRU-K replacer and RAII page guards
//! - A latch-crabbing B+Tree index
//! - An extendible hash index

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Disk manager and scheduler
pub mod disk;

/// Buffer pool, frames, replacer, and page guards
pub mod buffer;

/// B+Tree index
pub mod btree;

/// Extendible hash index
pub mod hash;
