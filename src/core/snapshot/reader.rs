//! Snapshot reader over a memory-mapped region.
//!
//! Parses the header and section table, verifies the footer CRC, and
//! serves zero-copy lookups from the mapped sections. Compressed
//! sections are decompressed once and cached.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::constants::*;
use crate::core::snapshot::sections::{parse_section_table, section_count_for_version};
use crate::error::{RayError, Result};
use crate::types::*;
use crate::util::binary::{align_up, read_i32_at, read_u32, read_u32_at, read_u64, read_u64_at};
use crate::util::compression::{decompress_with_size, CompressionType};
use crate::util::crc::crc32c;
use crate::util::hash::xxhash64_string;
use crate::util::mmap::Mmap;

// ============================================================================
// Snapshot data
// ============================================================================

/// Parsed snapshot with cached section views.
pub struct SnapshotData {
  /// Memory-mapped file containing the snapshot.
  mmap: Arc<Mmap>,
  /// Byte offset of the snapshot's first byte inside the map.
  base: usize,
  /// Parsed header.
  pub header: SnapshotHeaderV1,
  /// Section table (offsets relative to `base`).
  sections: Vec<SectionEntry>,
  /// Cache for decompressed sections.
  decompressed_cache: RwLock<HashMap<SectionId, Arc<[u8]>>>,
}

/// Borrowed or shared section bytes.
#[derive(Clone)]
pub enum SectionBytes<'a> {
  Borrowed(&'a [u8]),
  Shared(Arc<[u8]>),
}

impl AsRef<[u8]> for SectionBytes<'_> {
  fn as_ref(&self) -> &[u8] {
    match self {
      SectionBytes::Borrowed(bytes) => bytes,
      SectionBytes::Shared(bytes) => bytes.as_ref(),
    }
  }
}

/// Options for parsing a snapshot.
#[derive(Debug, Clone, Default)]
pub struct ParseSnapshotOptions {
  /// Skip CRC validation (only for data already validated this open).
  pub skip_crc_validation: bool,
}

impl SnapshotData {
  /// Parse a snapshot that starts at byte 0 of the map.
  pub fn parse(mmap: Arc<Mmap>, options: &ParseSnapshotOptions) -> Result<Self> {
    Self::parse_at_offset(mmap, 0, options)
  }

  /// Parse a snapshot embedded at `offset` (the single-file layout puts
  /// snapshots after the header page and WAL extent).
  pub fn parse_at_offset(
    mmap: Arc<Mmap>,
    offset: usize,
    options: &ParseSnapshotOptions,
  ) -> Result<Self> {
    if offset >= mmap.len() {
      return Err(RayError::Corrupt(format!(
        "snapshot offset {offset} past end of file ({} bytes)",
        mmap.len()
      )));
    }
    let buffer = &mmap[offset..];

    if buffer.len() < SNAPSHOT_HEADER_SIZE {
      return Err(RayError::Corrupt(format!(
        "snapshot too small: {} bytes",
        buffer.len()
      )));
    }

    let magic = read_u32(buffer, 0);
    if magic != MAGIC_SNAPSHOT {
      return Err(RayError::Corrupt(format!(
        "bad snapshot magic {magic:#010x}"
      )));
    }

    let version = read_u32(buffer, 4);
    let min_reader_version = read_u32(buffer, 8);
    if min_reader_version > VERSION_SNAPSHOT {
      return Err(RayError::VersionMismatch {
        required: min_reader_version,
        current: VERSION_SNAPSHOT,
      });
    }

    let header = SnapshotHeaderV1 {
      magic,
      version,
      min_reader_version,
      flags: SnapshotFlags::from_bits_truncate(read_u32(buffer, 12)),
      generation: read_u64(buffer, 16),
      created_unix_ns: read_u64(buffer, 24),
      num_nodes: read_u64(buffer, 32),
      num_edges: read_u64(buffer, 40),
      max_node_id: read_u64(buffer, 48),
      num_labels: read_u64(buffer, 56),
      num_etypes: read_u64(buffer, 64),
      num_propkeys: read_u64(buffer, 72),
      num_strings: read_u64(buffer, 80),
    };

    let section_count = section_count_for_version(version);
    let parsed = parse_section_table(buffer, section_count)?;
    let sections = parsed.sections;
    let aligned_end = align_up(parsed.max_section_end, SECTION_ALIGNMENT);
    let snapshot_size = aligned_end + 4;

    if snapshot_size > buffer.len() {
      return Err(RayError::Corrupt(format!(
        "snapshot truncated: expected {snapshot_size} bytes, found {}",
        buffer.len()
      )));
    }

    if !options.skip_crc_validation {
      let stored = read_u32(buffer, snapshot_size - 4);
      let computed = crc32c(&buffer[..snapshot_size - 4]);
      if stored != computed {
        return Err(RayError::CrcMismatch { stored, computed });
      }
    }

    Ok(Self {
      mmap,
      base: offset,
      header,
      sections,
      decompressed_cache: RwLock::new(HashMap::new()),
    })
  }

  /// Total snapshot length in bytes, footer CRC included.
  pub fn byte_len(&self) -> usize {
    let max_end = self
      .sections
      .iter()
      .filter(|s| s.length > 0)
      .map(|s| (s.offset + s.length) as usize)
      .max()
      .unwrap_or(SNAPSHOT_HEADER_SIZE + SectionId::COUNT * SECTION_ENTRY_SIZE);
    align_up(max_end, SECTION_ALIGNMENT) + 4
  }

  fn raw_section_bytes(&self, id: SectionId) -> Option<&[u8]> {
    let section = self.sections.get(id as usize)?;
    if section.length == 0 {
      return None;
    }
    let start = self.base + section.offset as usize;
    let end = start + section.length as usize;
    Some(&self.mmap[start..end])
  }

  /// Section bytes, borrowed straight from the map when uncompressed.
  pub fn section_data_shared(&self, id: SectionId) -> Option<SectionBytes<'_>> {
    let section = self.sections.get(id as usize)?;
    if section.length == 0 {
      return None;
    }

    let compression =
      CompressionType::from_u32(section.compression).unwrap_or(CompressionType::None);
    if compression == CompressionType::None {
      return self.raw_section_bytes(id).map(SectionBytes::Borrowed);
    }

    {
      let cache = self.decompressed_cache.read();
      if let Some(cached) = cache.get(&id) {
        return Some(SectionBytes::Shared(Arc::clone(cached)));
      }
    }

    let raw = self.raw_section_bytes(id)?;
    let decompressed = Arc::<[u8]>::from(
      decompress_with_size(raw, compression, section.uncompressed_size as usize).ok()?,
    );
    self
      .decompressed_cache
      .write()
      .insert(id, Arc::clone(&decompressed));
    Some(SectionBytes::Shared(decompressed))
  }

  /// Section bytes as a `Cow`.
  pub fn section_data(&self, id: SectionId) -> Option<Cow<'_, [u8]>> {
    match self.section_data_shared(id)? {
      SectionBytes::Borrowed(bytes) => Some(Cow::Borrowed(bytes)),
      SectionBytes::Shared(bytes) => Some(Cow::Owned(bytes.as_ref().to_vec())),
    }
  }

  // ==========================================================================
  // Node accessors
  // ==========================================================================

  /// NodeId for a physical index.
  #[inline]
  pub fn node_id(&self, phys: PhysNode) -> Option<NodeId> {
    let section = self.section_data_shared(SectionId::PhysToNodeId)?;
    let section = section.as_ref();
    if (phys as usize) * 8 + 8 > section.len() {
      return None;
    }
    Some(read_u64_at(section, phys as usize))
  }

  /// Physical index for a NodeId, if the node is in this snapshot.
  #[inline]
  pub fn phys_node(&self, node_id: NodeId) -> Option<PhysNode> {
    let section = self.section_data_shared(SectionId::NodeIdToPhys)?;
    let section = section.as_ref();
    let idx = node_id as usize;
    if idx * 4 + 4 > section.len() {
      return None;
    }
    let phys = read_i32_at(section, idx);
    if phys < 0 {
      None
    } else {
      Some(phys as PhysNode)
    }
  }

  #[inline]
  pub fn has_node(&self, node_id: NodeId) -> bool {
    self.phys_node(node_id).is_some()
  }

  #[inline]
  pub fn num_nodes(&self) -> u64 {
    self.header.num_nodes
  }

  #[inline]
  pub fn num_edges(&self) -> u64 {
    self.header.num_edges
  }

  #[inline]
  pub fn max_node_id(&self) -> u64 {
    self.header.max_node_id
  }

  // ==========================================================================
  // String table
  // ==========================================================================

  /// String by StringId. Id 0 is the empty string.
  pub fn string(&self, string_id: StringId) -> Option<String> {
    if string_id == 0 {
      return Some(String::new());
    }

    let offsets = self.section_data_shared(SectionId::StringOffsets)?;
    let bytes = self.section_data_shared(SectionId::StringBytes)?;
    let offsets = offsets.as_ref();
    let bytes = bytes.as_ref();

    let idx = string_id as usize;
    if idx * 4 + 8 > offsets.len() {
      return None;
    }
    let start = read_u32_at(offsets, idx) as usize;
    let end = read_u32_at(offsets, idx + 1) as usize;
    if start > end || end > bytes.len() {
      return None;
    }
    String::from_utf8(bytes[start..end].to_vec()).ok()
  }

  // ==========================================================================
  // Dictionary names
  // ==========================================================================

  fn name_from_ids(&self, section: SectionId, idx: usize) -> Option<String> {
    let ids = self.section_data_shared(section)?;
    let ids = ids.as_ref();
    if idx * 4 + 4 > ids.len() {
      return None;
    }
    let string_id = read_u32_at(ids, idx);
    if string_id == 0 {
      return None;
    }
    self.string(string_id)
  }

  pub fn label_name(&self, label_id: LabelId) -> Option<String> {
    self.name_from_ids(SectionId::LabelStringIds, label_id as usize)
  }

  pub fn etype_name(&self, etype_id: ETypeId) -> Option<String> {
    self.name_from_ids(SectionId::EtypeStringIds, etype_id as usize)
  }

  pub fn propkey_name(&self, propkey_id: PropKeyId) -> Option<String> {
    self.name_from_ids(SectionId::PropkeyStringIds, propkey_id as usize)
  }

  // ==========================================================================
  // Edges
  // ==========================================================================

  fn out_edge_range(&self, phys: PhysNode) -> Option<(usize, usize)> {
    let offsets = self.section_data_shared(SectionId::OutOffsets)?;
    let offsets = offsets.as_ref();
    let idx = phys as usize;
    if idx * 4 + 8 > offsets.len() {
      return None;
    }
    Some((
      read_u32_at(offsets, idx) as usize,
      read_u32_at(offsets, idx + 1) as usize,
    ))
  }

  pub fn out_degree(&self, phys: PhysNode) -> Option<usize> {
    let (start, end) = self.out_edge_range(phys)?;
    Some(end - start)
  }

  /// Binary search for an edge; edges are sorted by (etype, dst) per
  /// source node.
  pub fn find_edge_index(
    &self,
    src_phys: PhysNode,
    etype: ETypeId,
    dst_phys: PhysNode,
  ) -> Option<usize> {
    let (start, end) = self.out_edge_range(src_phys)?;
    let out_etype = self.section_data_shared(SectionId::OutEtype)?;
    let out_dst = self.section_data_shared(SectionId::OutDst)?;
    let out_etype = out_etype.as_ref();
    let out_dst = out_dst.as_ref();

    let mut lo = start;
    let mut hi = end;
    while lo < hi {
      let mid = (lo + hi) / 2;
      let mid_etype = read_u32_at(out_etype, mid);
      let mid_dst = read_u32_at(out_dst, mid);
      if mid_etype < etype || (mid_etype == etype && mid_dst < dst_phys) {
        lo = mid + 1;
      } else {
        hi = mid;
      }
    }

    if lo < end {
      let found_etype = read_u32_at(out_etype, lo);
      let found_dst = read_u32_at(out_dst, lo);
      if found_etype == etype && found_dst == dst_phys {
        return Some(lo);
      }
    }
    None
  }

  pub fn has_edge(&self, src_phys: PhysNode, etype: ETypeId, dst_phys: PhysNode) -> bool {
    self.find_edge_index(src_phys, etype, dst_phys).is_some()
  }

  pub fn iter_out_edges(&self, phys: PhysNode) -> OutEdgeIter<'_> {
    OutEdgeIter::new(self, phys)
  }

  fn in_edge_range(&self, phys: PhysNode) -> Option<(usize, usize)> {
    if !self.header.flags.contains(SnapshotFlags::HAS_IN_EDGES) {
      return None;
    }
    let offsets = self.section_data_shared(SectionId::InOffsets)?;
    let offsets = offsets.as_ref();
    let idx = phys as usize;
    if idx * 4 + 8 > offsets.len() {
      return None;
    }
    Some((
      read_u32_at(offsets, idx) as usize,
      read_u32_at(offsets, idx + 1) as usize,
    ))
  }

  pub fn in_degree(&self, phys: PhysNode) -> Option<usize> {
    let (start, end) = self.in_edge_range(phys)?;
    Some(end - start)
  }

  pub fn iter_in_edges(&self, phys: PhysNode) -> InEdgeIter<'_> {
    InEdgeIter::new(self, phys)
  }

  // ==========================================================================
  // Key index
  // ==========================================================================

  /// Look up a node by key.
  pub fn lookup_by_key(&self, key: &str) -> Option<NodeId> {
    let hash64 = xxhash64_string(key);

    let key_entries = self.section_data_shared(SectionId::KeyEntries)?;
    let key_entries = key_entries.as_ref();
    let num_entries = key_entries.len() / KEY_INDEX_ENTRY_SIZE;
    if num_entries == 0 {
      return None;
    }

    let (lo, hi) = if let Some(buckets) = self.section_data_shared(SectionId::KeyBuckets) {
      let buckets = buckets.as_ref();
      if buckets.len() > 4 {
        let num_buckets = buckets.len() / 4 - 1;
        let bucket = (hash64 % num_buckets as u64) as usize;
        (
          read_u32_at(buckets, bucket) as usize,
          read_u32_at(buckets, bucket + 1) as usize,
        )
      } else {
        self.binary_search_key_hash(key_entries, hash64, num_entries)
      }
    } else {
      self.binary_search_key_hash(key_entries, hash64, num_entries)
    };

    // Hash collisions are resolved by comparing the interned key.
    for i in lo..hi.min(num_entries) {
      let offset = i * KEY_INDEX_ENTRY_SIZE;
      if read_u64(key_entries, offset) != hash64 {
        continue;
      }
      let string_id = read_u32(key_entries, offset + 8);
      let node_id = read_u64(key_entries, offset + 16);
      if let Some(entry_key) = self.string(string_id) {
        if entry_key == key {
          return Some(node_id);
        }
      }
    }
    None
  }

  fn binary_search_key_hash(
    &self,
    entries: &[u8],
    hash64: u64,
    num_entries: usize,
  ) -> (usize, usize) {
    let mut lo = 0;
    let mut hi = num_entries;
    while lo < hi {
      let mid = (lo + hi) / 2;
      if read_u64(entries, mid * KEY_INDEX_ENTRY_SIZE) < hash64 {
        lo = mid + 1;
      } else {
        hi = mid;
      }
    }
    (lo, num_entries)
  }

  /// Key of a node, if it has one.
  pub fn node_key(&self, phys: PhysNode) -> Option<String> {
    let node_key_string = self.section_data_shared(SectionId::NodeKeyString)?;
    let node_key_string = node_key_string.as_ref();
    let idx = phys as usize;
    if idx * 4 + 4 > node_key_string.len() {
      return None;
    }
    let string_id = read_u32_at(node_key_string, idx);
    if string_id == 0 {
      return None;
    }
    self.string(string_id)
  }

  // ==========================================================================
  // Labels
  // ==========================================================================

  pub fn node_labels(&self, phys: PhysNode) -> Option<Vec<LabelId>> {
    if !self.header.flags.contains(SnapshotFlags::HAS_NODE_LABELS) {
      return None;
    }

    let offsets = self.section_data_shared(SectionId::NodeLabelOffsets)?;
    let labels = self.section_data_shared(SectionId::NodeLabelIds)?;
    let offsets = offsets.as_ref();
    let labels = labels.as_ref();

    let idx = phys as usize;
    if idx * 4 + 8 > offsets.len() {
      return None;
    }
    let start = read_u32_at(offsets, idx) as usize;
    let end = read_u32_at(offsets, idx + 1) as usize;

    let mut out = Vec::with_capacity(end.saturating_sub(start));
    for i in start..end {
      if i * 4 + 4 > labels.len() {
        break;
      }
      out.push(read_u32_at(labels, i) as LabelId);
    }
    Some(out)
  }

  // ==========================================================================
  // Properties
  // ==========================================================================

  pub fn node_props(&self, phys: PhysNode) -> Option<HashMap<PropKeyId, PropValue>> {
    if !self.header.flags.contains(SnapshotFlags::HAS_PROPERTIES) {
      return None;
    }

    let offsets = self.section_data_shared(SectionId::NodePropOffsets)?;
    let keys = self.section_data_shared(SectionId::NodePropKeys)?;
    let vals = self.section_data_shared(SectionId::NodePropVals)?;
    let offsets = offsets.as_ref();
    let keys = keys.as_ref();
    let vals = vals.as_ref();

    let idx = phys as usize;
    if idx * 4 + 8 > offsets.len() {
      return None;
    }
    let start = read_u32_at(offsets, idx) as usize;
    let end = read_u32_at(offsets, idx + 1) as usize;

    let mut props = HashMap::new();
    for i in start..end {
      if i * 4 + 4 > keys.len() {
        break;
      }
      let key_id = read_u32_at(keys, i);
      if let Some(value) = self.decode_prop_value(vals, i * PROP_VALUE_DISK_SIZE) {
        props.insert(key_id, value);
      }
    }
    Some(props)
  }

  pub fn node_prop(&self, phys: PhysNode, prop_key_id: PropKeyId) -> Option<PropValue> {
    if !self.header.flags.contains(SnapshotFlags::HAS_PROPERTIES) {
      return None;
    }

    let offsets = self.section_data_shared(SectionId::NodePropOffsets)?;
    let keys = self.section_data_shared(SectionId::NodePropKeys)?;
    let vals = self.section_data_shared(SectionId::NodePropVals)?;
    let offsets = offsets.as_ref();
    let keys = keys.as_ref();
    let vals = vals.as_ref();

    let idx = phys as usize;
    if idx * 4 + 8 > offsets.len() {
      return None;
    }
    let start = read_u32_at(offsets, idx) as usize;
    let end = read_u32_at(offsets, idx + 1) as usize;

    for i in start..end {
      if i * 4 + 4 > keys.len() {
        break;
      }
      if read_u32_at(keys, i) == prop_key_id {
        return self.decode_prop_value(vals, i * PROP_VALUE_DISK_SIZE);
      }
    }
    None
  }

  /// All properties for the edge at `edge_idx` (out-edge array index).
  pub fn edge_props(&self, edge_idx: usize) -> Option<HashMap<PropKeyId, PropValue>> {
    if !self.header.flags.contains(SnapshotFlags::HAS_PROPERTIES) {
      return None;
    }

    let offsets = self.section_data_shared(SectionId::EdgePropOffsets)?;
    let keys = self.section_data_shared(SectionId::EdgePropKeys)?;
    let vals = self.section_data_shared(SectionId::EdgePropVals)?;
    let offsets = offsets.as_ref();
    let keys = keys.as_ref();
    let vals = vals.as_ref();

    if edge_idx * 4 + 8 > offsets.len() {
      return None;
    }
    let start = read_u32_at(offsets, edge_idx) as usize;
    let end = read_u32_at(offsets, edge_idx + 1) as usize;

    let mut props = HashMap::new();
    for i in start..end {
      if i * 4 + 4 > keys.len() {
        break;
      }
      let key_id = read_u32_at(keys, i);
      if let Some(value) = self.decode_prop_value(vals, i * PROP_VALUE_DISK_SIZE) {
        props.insert(key_id, value);
      }
    }
    Some(props)
  }

  fn decode_prop_value(&self, vals: &[u8], offset: usize) -> Option<PropValue> {
    if offset + PROP_VALUE_DISK_SIZE > vals.len() {
      return None;
    }

    let tag = vals[offset];
    let payload = read_u64(vals, offset + 8);

    match PropValueTag::from_u8(tag)? {
      PropValueTag::Null => Some(PropValue::Null),
      PropValueTag::Bool => Some(PropValue::Bool(payload != 0)),
      PropValueTag::I64 => Some(PropValue::I64(payload as i64)),
      PropValueTag::F64 => Some(PropValue::F64(f64::from_bits(payload))),
      PropValueTag::String => Some(PropValue::String(self.string(payload as u32)?)),
      PropValueTag::VectorF32 => {
        if !self.header.flags.contains(SnapshotFlags::HAS_VECTORS) {
          return None;
        }

        let offsets = self.section_data_shared(SectionId::VectorOffsets)?;
        let data = self.section_data_shared(SectionId::VectorData)?;
        let offsets = offsets.as_ref();
        let data = data.as_ref();

        let idx = payload as usize;
        if (idx + 2) * 8 > offsets.len() {
          return None;
        }
        let start = read_u64_at(offsets, idx) as usize;
        let end = read_u64_at(offsets, idx + 1) as usize;
        if start > end || end > data.len() || (end - start) % 4 != 0 {
          return None;
        }

        let mut vec = Vec::with_capacity((end - start) / 4);
        for chunk in data[start..end].chunks_exact(4) {
          vec.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Some(PropValue::VectorF32(vec))
      }
    }
  }
}

// ============================================================================
// Edge iterators
// ============================================================================

/// Iterator over out-edges: yields `(dst_phys, etype)`.
pub struct OutEdgeIter<'a> {
  out_etype: Option<SectionBytes<'a>>,
  out_dst: Option<SectionBytes<'a>>,
  current: usize,
  end: usize,
}

impl<'a> OutEdgeIter<'a> {
  fn new(snapshot: &'a SnapshotData, phys: PhysNode) -> Self {
    let (current, end) = snapshot.out_edge_range(phys).unwrap_or((0, 0));
    Self {
      out_etype: snapshot.section_data_shared(SectionId::OutEtype),
      out_dst: snapshot.section_data_shared(SectionId::OutDst),
      current,
      end,
    }
  }
}

impl Iterator for OutEdgeIter<'_> {
  type Item = (PhysNode, ETypeId);

  fn next(&mut self) -> Option<Self::Item> {
    if self.current >= self.end {
      return None;
    }
    let out_etype = self.out_etype.as_ref()?.as_ref();
    let out_dst = self.out_dst.as_ref()?.as_ref();
    if self.current * 4 + 4 > out_etype.len() || self.current * 4 + 4 > out_dst.len() {
      return None;
    }

    let dst = read_u32_at(out_dst, self.current);
    let etype = read_u32_at(out_etype, self.current);
    self.current += 1;
    Some((dst, etype))
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.end.saturating_sub(self.current);
    (remaining, Some(remaining))
  }
}

impl ExactSizeIterator for OutEdgeIter<'_> {}

/// Iterator over in-edges: yields `(src_phys, etype, out_index)`.
pub struct InEdgeIter<'a> {
  in_etype: Option<SectionBytes<'a>>,
  in_src: Option<SectionBytes<'a>>,
  in_out_index: Option<SectionBytes<'a>>,
  current: usize,
  end: usize,
}

impl<'a> InEdgeIter<'a> {
  fn new(snapshot: &'a SnapshotData, phys: PhysNode) -> Self {
    let (current, end) = snapshot.in_edge_range(phys).unwrap_or((0, 0));
    Self {
      in_etype: snapshot.section_data_shared(SectionId::InEtype),
      in_src: snapshot.section_data_shared(SectionId::InSrc),
      in_out_index: snapshot.section_data_shared(SectionId::InOutIndex),
      current,
      end,
    }
  }
}

impl Iterator for InEdgeIter<'_> {
  type Item = (PhysNode, ETypeId, u32);

  fn next(&mut self) -> Option<Self::Item> {
    if self.current >= self.end {
      return None;
    }
    let in_etype = self.in_etype.as_ref()?.as_ref();
    let in_src = self.in_src.as_ref()?.as_ref();
    if self.current * 4 + 4 > in_etype.len() || self.current * 4 + 4 > in_src.len() {
      return None;
    }

    let src = read_u32_at(in_src, self.current);
    let etype = read_u32_at(in_etype, self.current);
    let out_index = self
      .in_out_index
      .as_ref()
      .map(|idx| {
        let idx = idx.as_ref();
        if self.current * 4 + 4 <= idx.len() {
          read_u32_at(idx, self.current)
        } else {
          0
        }
      })
      .unwrap_or(0);

    self.current += 1;
    Some((src, etype, out_index))
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.end.saturating_sub(self.current);
    (remaining, Some(remaining))
  }
}

impl ExactSizeIterator for InEdgeIter<'_> {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::snapshot::writer::{
    build_snapshot_to_memory, EdgeData, NodeData, SnapshotBuildInput,
  };
  use crate::util::compression::CompressionOptions;
  use crate::util::mmap::map_file;
  use std::io::Write;
  use tempfile::NamedTempFile;

  fn build_sample(compression: Option<CompressionOptions>) -> Vec<u8> {
    let mut props1 = HashMap::new();
    props1.insert(1, PropValue::String("Alice".to_string()));
    props1.insert(2, PropValue::I64(30));
    props1.insert(4, PropValue::VectorF32(vec![0.1, 0.2, 0.3]));

    let mut props2 = HashMap::new();
    props2.insert(1, PropValue::String("Bob".to_string()));

    let mut edge_props = HashMap::new();
    edge_props.insert(3, PropValue::F64(0.9));

    build_snapshot_to_memory(SnapshotBuildInput {
      generation: 7,
      nodes: vec![
        NodeData {
          node_id: 10,
          key: Some("user:alice".to_string()),
          labels: vec![1],
          props: props1,
        },
        NodeData {
          node_id: 20,
          key: Some("user:bob".to_string()),
          labels: vec![1, 2],
          props: props2,
        },
        NodeData {
          node_id: 30,
          key: None,
          labels: vec![],
          props: HashMap::new(),
        },
      ],
      edges: vec![
        EdgeData {
          src: 10,
          etype: 1,
          dst: 20,
          props: edge_props,
        },
        EdgeData {
          src: 20,
          etype: 1,
          dst: 10,
          props: HashMap::new(),
        },
        EdgeData {
          src: 10,
          etype: 2,
          dst: 30,
          props: HashMap::new(),
        },
      ],
      labels: HashMap::from([(1, "Person".to_string()), (2, "Admin".to_string())]),
      etypes: HashMap::from([(1, "KNOWS".to_string()), (2, "CREATED".to_string())]),
      propkeys: HashMap::from([
        (1, "name".to_string()),
        (2, "age".to_string()),
        (3, "weight".to_string()),
        (4, "embedding".to_string()),
      ]),
      compression,
    })
    .expect("build snapshot")
  }

  fn load(bytes: &[u8]) -> SnapshotData {
    let mut tmp = NamedTempFile::new().expect("temp file");
    tmp.write_all(bytes).expect("write");
    tmp.flush().expect("flush");
    let mmap = map_file(tmp.as_file()).expect("mmap");
    SnapshotData::parse(Arc::new(mmap), &ParseSnapshotOptions::default()).expect("parse")
  }

  #[test]
  fn round_trip_nodes_edges_props() {
    let bytes = build_sample(None);
    let snap = load(&bytes);

    assert_eq!(snap.header.generation, 7);
    assert_eq!(snap.num_nodes(), 3);
    assert_eq!(snap.num_edges(), 3);
    assert_eq!(snap.max_node_id(), 30);

    let alice = snap.phys_node(10).expect("alice");
    let bob = snap.phys_node(20).expect("bob");
    assert_eq!(snap.node_id(alice), Some(10));
    assert!(snap.phys_node(11).is_none());
    assert!(!snap.has_node(999));

    // Keys
    assert_eq!(snap.lookup_by_key("user:alice"), Some(10));
    assert_eq!(snap.lookup_by_key("user:bob"), Some(20));
    assert_eq!(snap.lookup_by_key("user:carol"), None);
    assert_eq!(snap.node_key(alice).as_deref(), Some("user:alice"));

    // Labels
    assert_eq!(snap.node_labels(alice), Some(vec![1]));
    assert_eq!(snap.node_labels(bob), Some(vec![1, 2]));

    // Edges
    assert!(snap.has_edge(alice, 1, bob));
    assert!(!snap.has_edge(alice, 2, bob));
    assert_eq!(snap.out_degree(alice), Some(2));
    assert_eq!(snap.in_degree(alice), Some(1));

    let out: Vec<_> = snap.iter_out_edges(alice).collect();
    assert_eq!(out.len(), 2);

    // Properties
    assert_eq!(
      snap.node_prop(alice, 1),
      Some(PropValue::String("Alice".to_string()))
    );
    assert_eq!(snap.node_prop(alice, 2), Some(PropValue::I64(30)));
    assert_eq!(snap.node_prop(alice, 99), None);
    match snap.node_prop(alice, 4) {
      Some(PropValue::VectorF32(v)) => {
        assert_eq!(v.len(), 3);
        assert!((v[0] - 0.1).abs() < 1e-6);
      }
      other => panic!("expected vector, got {other:?}"),
    }

    let edge_idx = snap.find_edge_index(alice, 1, bob).expect("edge index");
    let edge_props = snap.edge_props(edge_idx).expect("edge props");
    assert_eq!(edge_props.get(&3), Some(&PropValue::F64(0.9)));

    // Dictionary names
    assert_eq!(snap.label_name(1).as_deref(), Some("Person"));
    assert_eq!(snap.etype_name(2).as_deref(), Some("CREATED"));
    assert_eq!(snap.propkey_name(4).as_deref(), Some("embedding"));
    assert_eq!(snap.label_name(9), None);
  }

  #[test]
  fn compressed_sections_round_trip() {
    let bytes = build_sample(Some(CompressionOptions::zstd(3)));
    let snap = load(&bytes);

    assert_eq!(snap.lookup_by_key("user:alice"), Some(10));
    assert_eq!(
      snap.node_prop(snap.phys_node(20).unwrap(), 1),
      Some(PropValue::String("Bob".to_string()))
    );
  }

  #[test]
  fn corrupted_byte_fails_crc() {
    let mut bytes = build_sample(None);
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;

    let mut tmp = NamedTempFile::new().expect("temp file");
    tmp.write_all(&bytes).expect("write");
    tmp.flush().expect("flush");
    let mmap = map_file(tmp.as_file()).expect("mmap");
    let result = SnapshotData::parse(Arc::new(mmap), &ParseSnapshotOptions::default());
    assert!(result.is_err());
  }

  #[test]
  fn byte_len_matches_buffer() {
    let bytes = build_sample(None);
    let snap = load(&bytes);
    assert_eq!(snap.byte_len(), bytes.len());
  }
}
