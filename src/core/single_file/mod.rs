//! Single-file database format (.raydb)
//!
//! Layout: [Header (1 page)] [WAL ring (N pages)] [Snapshot run(s)].
//!
//! One writable handle per file (advisory range lock); one active
//! transaction per handle. Readers merge `pending ∪ delta ∪ snapshot`
//! without blocking the writer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::cache::CacheManager;
use crate::constants::*;
use crate::core::delta::DeltaState;
use crate::core::header::DbHeaderV1;
use crate::core::pager::FilePager;
use crate::core::snapshot::reader::SnapshotData;
use crate::core::wal::buffer::WalBuffer;
use crate::core::wal::record::WalRecord;
use crate::error::{RayError, Result};
use crate::replication::primary::PrimaryReplication;
use crate::replication::replica::ReplicaReplication;
use crate::types::*;

// Submodules
mod compactor;
mod iter;
mod open;
mod read;
mod recovery;
mod replication;
mod transaction;
mod write;

pub use iter::{FullEdge, NodeIterator};
pub use open::{close_single_file, open_single_file, OpenOptions};
pub use replication::install_replica_from_snapshot_json;
pub use transaction::TxGuard;

pub use crate::cache::CacheOptions;
pub use crate::replication::types::ReplicationRole;
pub use crate::util::compression::CompressionOptions;

// ============================================================================
// Options
// ============================================================================

/// Options for `compact`.
#[derive(Debug, Clone, Default)]
pub struct CompactOptions {
  /// Compression for the new snapshot's sections.
  pub compression: Option<CompressionOptions>,
}

/// Replication configuration for an open database.
#[derive(Debug, Clone)]
pub struct ReplicationOptions {
  pub role: ReplicationRole,
  /// Sidecar directory for segment logs and cursors. Defaults to
  /// `<db path>.replication` next to the database file.
  pub sidecar_dir: Option<PathBuf>,
  /// Roll the active segment once it exceeds this many bytes.
  pub segment_roll_bytes: u64,
}

impl Default for ReplicationOptions {
  fn default() -> Self {
    Self {
      role: ReplicationRole::Disabled,
      sidecar_dir: None,
      segment_roll_bytes: 4 * 1024 * 1024,
    }
  }
}

// ============================================================================
// Transaction state
// ============================================================================

/// State of the handle's active transaction.
///
/// Mutations stage into `pending` and queue their WAL records in
/// `pending_records`; nothing touches the file until commit.
#[derive(Debug, Default)]
pub struct TxState {
  pub txid: TxId,
  pub read_only: bool,
  pub pending: DeltaState,
  pub pending_records: Vec<WalRecord>,
}

impl TxState {
  pub fn new(txid: TxId, read_only: bool) -> Self {
    Self {
      txid,
      read_only,
      pending: DeltaState::new(),
      pending_records: Vec::new(),
    }
  }
}

// ============================================================================
// Engine counters
// ============================================================================

/// Monotonic operation counters surfaced through metrics.
#[derive(Debug, Default)]
pub struct EngineCounters {
  pub commits_total: AtomicU64,
  pub compactions_total: AtomicU64,
}

// ============================================================================
// Single-file database
// ============================================================================

/// Handle to one open single-file database.
pub struct SingleFileDB {
  /// Database file path
  pub(crate) path: PathBuf,
  /// Read-only mode
  pub(crate) read_only: bool,
  /// Page-based I/O
  pub(crate) pager: Mutex<FilePager>,
  /// Database header (authoritative copy of page 0)
  pub(crate) header: RwLock<DbHeaderV1>,
  /// WAL ring mirror
  pub(crate) wal_buffer: Mutex<WalBuffer>,
  /// Memory-mapped snapshot, if one exists
  pub(crate) snapshot: RwLock<Option<SnapshotData>>,
  /// Committed mutations not yet folded into a snapshot
  pub(crate) delta: RwLock<DeltaState>,

  // ID allocators
  pub(crate) next_node_id: AtomicU64,
  pub(crate) next_label_id: AtomicU32,
  pub(crate) next_etype_id: AtomicU32,
  pub(crate) next_propkey_id: AtomicU32,
  pub(crate) next_tx_id: AtomicU64,

  /// The handle's single active transaction
  pub(crate) current_tx: Mutex<Option<TxState>>,
  /// Serializes commit and compaction I/O
  pub(crate) commit_lock: Mutex<()>,

  /// Dictionary maps (snapshot + committed delta entries)
  pub(crate) label_names: RwLock<HashMap<String, LabelId>>,
  pub(crate) label_ids: RwLock<HashMap<LabelId, String>>,
  pub(crate) etype_names: RwLock<HashMap<String, ETypeId>>,
  pub(crate) etype_ids: RwLock<HashMap<ETypeId, String>>,
  pub(crate) propkey_names: RwLock<HashMap<String, PropKeyId>>,
  pub(crate) propkey_ids: RwLock<HashMap<PropKeyId, String>>,

  /// Compact automatically after commits that cross a threshold
  pub(crate) auto_compact: bool,
  pub(crate) compact_wal_threshold: f64,
  pub(crate) compact_delta_threshold: usize,

  /// Property and traversal caches (None = disabled)
  pub(crate) cache: RwLock<Option<CacheManager>>,

  pub(crate) counters: EngineCounters,

  /// Primary-side replication runtime (role = primary)
  pub(crate) primary_replication: Option<PrimaryReplication>,
  /// Replica-side replication runtime (role = replica)
  pub(crate) replica_replication: Option<ReplicaReplication>,
}

impl SingleFileDB {
  /// Database file path
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Read-only mode
  pub fn is_read_only(&self) -> bool {
    self.read_only
  }

  // ==========================================================================
  // ID allocators
  // ==========================================================================

  pub(crate) fn alloc_node_id(&self) -> NodeId {
    self.next_node_id.fetch_add(1, Ordering::SeqCst)
  }

  /// Ensure the next node ID is greater than `node_id`.
  pub(crate) fn reserve_node_id(&self, node_id: NodeId) {
    let desired = node_id.saturating_add(1);
    self.next_node_id.fetch_max(desired, Ordering::SeqCst);
  }

  pub(crate) fn alloc_label_id(&self) -> LabelId {
    self.next_label_id.fetch_add(1, Ordering::SeqCst)
  }

  pub(crate) fn alloc_etype_id(&self) -> ETypeId {
    self.next_etype_id.fetch_add(1, Ordering::SeqCst)
  }

  pub(crate) fn alloc_propkey_id(&self) -> PropKeyId {
    self.next_propkey_id.fetch_add(1, Ordering::SeqCst)
  }

  pub(crate) fn alloc_tx_id(&self) -> TxId {
    self.next_tx_id.fetch_add(1, Ordering::SeqCst)
  }

  // ==========================================================================
  // Dictionary lookups
  // ==========================================================================

  /// Label ID by name, considering the active transaction's pending
  /// definitions first.
  pub fn label_id(&self, name: &str) -> Option<LabelId> {
    {
      let tx = self.current_tx.lock();
      if let Some(tx) = tx.as_ref() {
        if let Some((&id, _)) = tx.pending.new_labels.iter().find(|(_, n)| n.as_str() == name) {
          return Some(id);
        }
      }
    }
    self.label_names.read().get(name).copied()
  }

  pub fn label_name(&self, label_id: LabelId) -> Option<String> {
    {
      let tx = self.current_tx.lock();
      if let Some(tx) = tx.as_ref() {
        if let Some(name) = tx.pending.new_labels.get(&label_id) {
          return Some(name.clone());
        }
      }
    }
    self.label_ids.read().get(&label_id).cloned()
  }

  pub fn etype_id(&self, name: &str) -> Option<ETypeId> {
    {
      let tx = self.current_tx.lock();
      if let Some(tx) = tx.as_ref() {
        if let Some((&id, _)) = tx.pending.new_etypes.iter().find(|(_, n)| n.as_str() == name) {
          return Some(id);
        }
      }
    }
    self.etype_names.read().get(name).copied()
  }

  pub fn etype_name(&self, etype_id: ETypeId) -> Option<String> {
    {
      let tx = self.current_tx.lock();
      if let Some(tx) = tx.as_ref() {
        if let Some(name) = tx.pending.new_etypes.get(&etype_id) {
          return Some(name.clone());
        }
      }
    }
    self.etype_ids.read().get(&etype_id).cloned()
  }

  pub fn propkey_id(&self, name: &str) -> Option<PropKeyId> {
    {
      let tx = self.current_tx.lock();
      if let Some(tx) = tx.as_ref() {
        if let Some((&id, _)) = tx
          .pending
          .new_propkeys
          .iter()
          .find(|(_, n)| n.as_str() == name)
        {
          return Some(id);
        }
      }
    }
    self.propkey_names.read().get(name).copied()
  }

  pub fn propkey_name(&self, propkey_id: PropKeyId) -> Option<String> {
    {
      let tx = self.current_tx.lock();
      if let Some(tx) = tx.as_ref() {
        if let Some(name) = tx.pending.new_propkeys.get(&propkey_id) {
          return Some(name.clone());
        }
      }
    }
    self.propkey_ids.read().get(&propkey_id).cloned()
  }

  // ==========================================================================
  // Cache
  // ==========================================================================

  pub fn cache_enabled(&self) -> bool {
    self.cache.read().is_some()
  }

  pub fn cache_clear(&self) {
    if let Some(cache) = self.cache.write().as_mut() {
      cache.clear();
    }
  }

  pub fn cache_stats(&self) -> Option<crate::cache::CacheStats> {
    self.cache.read().as_ref().map(CacheManager::stats)
  }

  // ==========================================================================
  // WAL stats
  // ==========================================================================

  pub fn wal_stats(&self) -> crate::core::wal::buffer::WalBufferStats {
    self.wal_buffer.lock().stats()
  }

  /// Whether the compaction thresholds recommend running `compact`.
  pub fn should_compact(&self) -> bool {
    let wal_fraction = {
      let wal = self.wal_buffer.lock();
      wal.used_fraction()
    };
    if wal_fraction > self.compact_wal_threshold {
      return true;
    }
    self.delta.read().entry_count() > self.compact_delta_threshold
  }

  pub(crate) fn require_not_read_only(&self) -> Result<()> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }
    Ok(())
  }
}

// ============================================================================
// Path helpers
// ============================================================================

/// Whether a path uses the single-file extension.
pub fn is_single_file_path<P: AsRef<Path>>(path: P) -> bool {
  path
    .as_ref()
    .extension()
    .map(|ext| ext == "raydb")
    .unwrap_or(false)
}

/// Canonical single-file extension.
pub fn single_file_extension() -> &'static str {
  EXT_RAYDB
}
