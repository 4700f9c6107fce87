//! Database open/close for the single-file format.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::cache::{CacheManager, CacheOptions};
use crate::constants::*;
use crate::core::delta::DeltaState;
use crate::core::header::DbHeaderV1;
use crate::core::pager::{is_valid_page_size, pages_to_store, FilePager};
use crate::core::snapshot::reader::{ParseSnapshotOptions, SnapshotData};
use crate::core::wal::buffer::WalBuffer;
use crate::error::{RayError, Result};
use crate::replication::primary::PrimaryReplication;
use crate::replication::replica::ReplicaReplication;
use crate::replication::types::ReplicationRole;
use crate::types::*;
use crate::util::binary::read_u32;
use crate::util::mmap::map_file;

use super::recovery::{committed_transactions, scan_wal_records, RecoveryState};
use super::{EngineCounters, ReplicationOptions, SingleFileDB};

// ============================================================================
// Open options
// ============================================================================

/// Options for opening a single-file database.
#[derive(Debug, Clone)]
pub struct OpenOptions {
  /// Open in read-only mode
  pub read_only: bool,
  /// Create the database if it doesn't exist
  pub create_if_missing: bool,
  /// Page size for newly created databases (power of 2, 4KB-64KB)
  pub page_size: usize,
  /// WAL region size in bytes for newly created databases
  pub wal_size: usize,
  /// Compact automatically when a commit crosses a threshold
  pub auto_compact: bool,
  /// WAL usage fraction that triggers auto-compaction
  pub compact_wal_threshold: f64,
  /// Delta entry count that triggers auto-compaction
  pub compact_delta_threshold: usize,
  /// Cache options (None = disabled)
  pub cache: Option<CacheOptions>,
  /// Replication role and sidecar settings
  pub replication: ReplicationOptions,
}

impl Default for OpenOptions {
  fn default() -> Self {
    Self {
      read_only: false,
      create_if_missing: true,
      page_size: DEFAULT_PAGE_SIZE,
      wal_size: WAL_DEFAULT_SIZE,
      auto_compact: false,
      compact_wal_threshold: COMPACT_WAL_THRESHOLD,
      compact_delta_threshold: COMPACT_DELTA_THRESHOLD,
      cache: None,
      replication: ReplicationOptions::default(),
    }
  }
}

impl OpenOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn read_only(mut self, value: bool) -> Self {
    self.read_only = value;
    self
  }

  pub fn create_if_missing(mut self, value: bool) -> Self {
    self.create_if_missing = value;
    self
  }

  pub fn page_size(mut self, value: usize) -> Self {
    self.page_size = value;
    self
  }

  pub fn wal_size(mut self, value: usize) -> Self {
    self.wal_size = value;
    self
  }

  pub fn auto_compact(mut self, value: bool) -> Self {
    self.auto_compact = value;
    self
  }

  pub fn compact_wal_threshold(mut self, value: f64) -> Self {
    self.compact_wal_threshold = value.clamp(0.0, 1.0);
    self
  }

  pub fn compact_delta_threshold(mut self, value: usize) -> Self {
    self.compact_delta_threshold = value;
    self
  }

  pub fn cache(mut self, options: Option<CacheOptions>) -> Self {
    self.cache = options;
    self
  }

  pub fn enable_cache(mut self) -> Self {
    self.cache = Some(CacheOptions::default());
    self
  }

  pub fn replication_role(mut self, role: ReplicationRole) -> Self {
    self.replication.role = role;
    self
  }

  pub fn replication(mut self, options: ReplicationOptions) -> Self {
    self.replication = options;
    self
  }
}

// ============================================================================
// Open / close
// ============================================================================

/// Read the file's own page size from the header prefix so the pager
/// can be opened with the right geometry.
fn sniff_page_size(path: &Path) -> Result<usize> {
  use std::io::Read;

  let mut file = std::fs::File::open(path)?;
  let mut prefix = [0u8; 20];
  file
    .read_exact(&mut prefix)
    .map_err(|_| RayError::Corrupt("file too small for a database header".to_string()))?;

  if prefix[0..16] != MAGIC_RAYDB {
    return Err(RayError::Corrupt("bad file magic".to_string()));
  }
  let page_size = read_u32(&prefix, 16) as usize;
  if !is_valid_page_size(page_size) {
    return Err(RayError::Corrupt(format!(
      "header page_size {page_size} out of range"
    )));
  }
  Ok(page_size)
}

/// Open a single-file database.
pub fn open_single_file<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<SingleFileDB> {
  let path = path.as_ref();

  if !is_valid_page_size(options.page_size) {
    return Err(RayError::InvalidArgument(format!(
      "invalid page size {}: must be a power of two in [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}]",
      options.page_size
    )));
  }

  let file_exists = path.exists();
  if !file_exists && !options.create_if_missing {
    return Err(RayError::NotFound(format!(
      "database does not exist at {}",
      path.display()
    )));
  }
  if !file_exists && options.read_only {
    return Err(RayError::ReadOnly);
  }

  let (mut pager, header, is_new) = if file_exists {
    let page_size = sniff_page_size(path)?;
    let mut pager = FilePager::open(path, page_size, options.read_only)?;
    let header_page = pager.read_page(0)?;
    let header = DbHeaderV1::parse(&header_page)?;
    (pager, header, false)
  } else {
    let mut pager = FilePager::create(path, options.page_size)?;
    let wal_page_count = pages_to_store(options.wal_size.max(1), options.page_size) as u64;
    let header = DbHeaderV1::new(options.page_size as u32, wal_page_count);

    pager.write_page(0, &header.serialize_to_page())?;
    pager.allocate_pages(wal_page_count)?;
    pager.sync()?;
    (pager, header, true)
  };

  // A crash or external truncation can leave the file shorter than the
  // header + WAL extent; re-extend it so later flushes have pages to
  // land on. Recovery below decides which log bytes are trustworthy.
  let min_pages = 1 + header.wal_page_count;
  if !options.read_only && pager.size_pages() < min_pages {
    let missing = min_pages - pager.size_pages();
    pager.allocate_pages(missing)?;
  }

  // WAL buffer mirrors the on-disk ring.
  let mut wal_buffer = WalBuffer::from_header(&header);
  if !is_new {
    wal_buffer.load(&mut pager)?;
  }

  // ID allocators start from header state; the snapshot and WAL replay
  // below may push them further.
  let mut next_node_id = INITIAL_NODE_ID.max(header.max_node_id.saturating_add(1));
  let mut next_label_id = INITIAL_LABEL_ID;
  let mut next_etype_id = INITIAL_ETYPE_ID;
  let mut next_propkey_id = INITIAL_PROPKEY_ID;
  let mut next_tx_id = header.next_tx_id.max(INITIAL_TX_ID);

  let mut delta = DeltaState::new();

  let mut label_names: HashMap<String, LabelId> = HashMap::new();
  let mut label_ids: HashMap<LabelId, String> = HashMap::new();
  let mut etype_names: HashMap<String, ETypeId> = HashMap::new();
  let mut etype_ids: HashMap<ETypeId, String> = HashMap::new();
  let mut propkey_names: HashMap<String, PropKeyId> = HashMap::new();
  let mut propkey_ids: HashMap<PropKeyId, String> = HashMap::new();

  // Load and verify the active snapshot.
  let snapshot = if header.snapshot_page_count > 0 {
    let snapshot_offset = (header.snapshot_start_page * header.page_size as u64) as usize;
    let mmap = Arc::new(map_file(pager.file())?);
    let snap =
      SnapshotData::parse_at_offset(mmap, snapshot_offset, &ParseSnapshotOptions::default())?;

    for i in 1..=snap.header.num_labels as u32 {
      if let Some(name) = snap.label_name(i) {
        label_names.insert(name.clone(), i);
        label_ids.insert(i, name);
      }
    }
    for i in 1..=snap.header.num_etypes as u32 {
      if let Some(name) = snap.etype_name(i) {
        etype_names.insert(name.clone(), i);
        etype_ids.insert(i, name);
      }
    }
    for i in 1..=snap.header.num_propkeys as u32 {
      if let Some(name) = snap.propkey_name(i) {
        propkey_names.insert(name.clone(), i);
        propkey_ids.insert(i, name);
      }
    }

    next_node_id = next_node_id.max(snap.header.max_node_id + 1);
    next_label_id = next_label_id.max(snap.header.num_labels as u32 + 1);
    next_etype_id = next_etype_id.max(snap.header.num_etypes as u32 + 1);
    next_propkey_id = next_propkey_id.max(snap.header.num_propkeys as u32 + 1);

    Some(snap)
  } else {
    None
  };

  // Replay committed WAL transactions into the delta.
  let mut header = header;
  if !is_new && header.wal_head > header.wal_tail {
    let (records, valid_head) = scan_wal_records(&mut pager, &header)?;
    if valid_head < header.wal_head {
      wal_buffer.rewind_head(valid_head);
      header.wal_head = valid_head;
    }
    let committed = committed_transactions(&records);

    let mut state = RecoveryState {
      delta: &mut delta,
      snapshot: snapshot.as_ref(),
      next_node_id: &mut next_node_id,
      next_label_id: &mut next_label_id,
      next_etype_id: &mut next_etype_id,
      next_propkey_id: &mut next_propkey_id,
      label_names: &mut label_names,
      label_ids: &mut label_ids,
      etype_names: &mut etype_names,
      etype_ids: &mut etype_ids,
      propkey_names: &mut propkey_names,
      propkey_ids: &mut propkey_ids,
    };

    let mut replayed = 0usize;
    for (txid, records) in committed {
      for record in records {
        state.replay(record);
      }
      next_tx_id = next_tx_id.max(txid + 1);
      replayed += 1;
    }
    log::debug!("recovery replayed {replayed} committed transaction(s) from WAL");
  }

  let cache = options
    .cache
    .as_ref()
    .filter(|cache_options| cache_options.enabled)
    .map(CacheManager::new);

  // Replication runtimes are sidecar-backed and only exist for the
  // configured role.
  let sidecar_dir = options.replication.sidecar_dir.clone().unwrap_or_else(|| {
    let mut os = path.as_os_str().to_os_string();
    os.push(".replication");
    os.into()
  });
  let (primary_replication, replica_replication) = match options.replication.role {
    ReplicationRole::Disabled => (None, None),
    ReplicationRole::Primary => {
      if options.read_only {
        return Err(RayError::InvalidReplication(
          "primary role requires a writable database".to_string(),
        ));
      }
      let runtime = PrimaryReplication::open(
        &sidecar_dir,
        header.epoch,
        options.replication.segment_roll_bytes,
      )?;
      (Some(runtime), None)
    }
    ReplicationRole::Replica => {
      let runtime = ReplicaReplication::open(&sidecar_dir)?;
      (None, Some(runtime))
    }
  };

  Ok(SingleFileDB {
    path: path.to_path_buf(),
    read_only: options.read_only,
    pager: Mutex::new(pager),
    header: RwLock::new(header),
    wal_buffer: Mutex::new(wal_buffer),
    snapshot: RwLock::new(snapshot),
    delta: RwLock::new(delta),
    next_node_id: AtomicU64::new(next_node_id),
    next_label_id: AtomicU32::new(next_label_id),
    next_etype_id: AtomicU32::new(next_etype_id),
    next_propkey_id: AtomicU32::new(next_propkey_id),
    next_tx_id: AtomicU64::new(next_tx_id),
    current_tx: Mutex::new(None),
    commit_lock: Mutex::new(()),
    label_names: RwLock::new(label_names),
    label_ids: RwLock::new(label_ids),
    etype_names: RwLock::new(etype_names),
    etype_ids: RwLock::new(etype_ids),
    propkey_names: RwLock::new(propkey_names),
    propkey_ids: RwLock::new(propkey_ids),
    auto_compact: options.auto_compact,
    compact_wal_threshold: options.compact_wal_threshold,
    compact_delta_threshold: options.compact_delta_threshold,
    cache: RwLock::new(cache),
    counters: EngineCounters::default(),
    primary_replication,
    replica_replication,
  })
}

/// Close a single-file database, flushing WAL state into the header.
pub fn close_single_file(db: SingleFileDB) -> Result<()> {
  if db.read_only {
    return Ok(());
  }

  {
    let tx = db.current_tx.lock();
    if tx.is_some() {
      return Err(RayError::NestedTx);
    }
  }

  let mut pager = db.pager.lock();
  let mut wal_buffer = db.wal_buffer.lock();
  wal_buffer.flush(&mut pager)?;

  {
    let mut header = db.header.write();
    header.wal_head = wal_buffer.head();
    header.wal_tail = wal_buffer.tail();
    header.max_node_id = db.next_node_id.load(Ordering::SeqCst).saturating_sub(1);
    header.next_tx_id = db.next_tx_id.load(Ordering::SeqCst);
    pager.write_page(0, &header.serialize_to_page())?;
  }

  pager.sync()?;
  Ok(())
}
