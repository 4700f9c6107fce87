//! RayDB - embedded graph database in a single file
//!
//! # Architecture
//!
//! RayDB uses a **Snapshot + Delta + WAL** architecture inside one file:
//!
//! - **Snapshot**: memory-mapped CSR format for fast reads
//! - **Delta**: in-memory overlay of committed-but-uncompacted changes
//! - **WAL**: circular write-ahead log embedded in the file, for
//!   durability and crash recovery
//!
//! Page 0 holds the database header (the commit point); pages
//! `[1, 1 + wal_page_count)` form the WAL ring; snapshot generations
//! occupy contiguous page runs after the WAL.

#![deny(clippy::all)]

// Core modules
pub mod constants;
pub mod error;
pub mod types;
pub mod util;

// Storage layer
pub mod core;

// Read caches
pub mod cache;

// Replication (primary -> replica log shipping)
pub mod replication;

// Metrics and health
pub mod metrics;

// Re-export commonly used items
pub use error::{RayError, Result};
pub use types::{ETypeId, LabelId, NodeId, PropKeyId, PropValue, TxId};

pub use crate::core::single_file::{
  close_single_file, open_single_file, CacheOptions, CompactOptions, OpenOptions, SingleFileDB,
};

/// Crate version string.
pub fn version() -> &'static str {
  env!("CARGO_PKG_VERSION")
}
