//! Snapshot writer.
//!
//! Streams nodes, edges, dictionaries, and property columns into the
//! packed CSR layout: header, section table, 64-byte-aligned sections,
//! footer CRC32C.

use hashbrown::HashMap as FastMap;
use std::collections::HashMap;

use crate::constants::*;
use crate::error::{RayError, Result};
use crate::types::*;
use crate::util::binary::{align_up, write_i32, write_u32, write_u64};
use crate::util::compression::{maybe_compress, CompressionOptions, CompressionType};
use crate::util::crc::crc32c;
use crate::util::hash::xxhash64_string;

// ============================================================================
// Builder input types
// ============================================================================

/// Node data for snapshot building.
#[derive(Debug, Clone)]
pub struct NodeData {
  pub node_id: NodeId,
  pub key: Option<String>,
  pub labels: Vec<LabelId>,
  pub props: HashMap<PropKeyId, PropValue>,
}

/// Edge data for snapshot building.
#[derive(Debug, Clone)]
pub struct EdgeData {
  pub src: NodeId,
  pub etype: ETypeId,
  pub dst: NodeId,
  pub props: HashMap<PropKeyId, PropValue>,
}

/// Input for building a snapshot.
#[derive(Debug)]
pub struct SnapshotBuildInput {
  pub generation: u64,
  pub nodes: Vec<NodeData>,
  pub edges: Vec<EdgeData>,
  pub labels: HashMap<LabelId, String>,
  pub etypes: HashMap<ETypeId, String>,
  pub propkeys: HashMap<PropKeyId, String>,
  pub compression: Option<CompressionOptions>,
}

// ============================================================================
// String interning
// ============================================================================

struct StringTable {
  strings: Vec<String>,
  string_to_id: FastMap<String, StringId>,
}

impl StringTable {
  fn new() -> Self {
    // StringId 0 is reserved for the empty string.
    let mut table = Self {
      strings: vec![String::new()],
      string_to_id: FastMap::new(),
    };
    table.string_to_id.insert(String::new(), 0);
    table
  }

  fn intern(&mut self, s: &str) -> StringId {
    if let Some(&id) = self.string_to_id.get(s) {
      return id;
    }
    let id = self.strings.len() as StringId;
    self.strings.push(s.to_string());
    self.string_to_id.insert(s.to_string(), id);
    id
  }

  fn id_of(&self, s: &str) -> StringId {
    self.string_to_id.get(s).copied().unwrap_or(0)
  }

  fn len(&self) -> usize {
    self.strings.len()
  }
}

// ============================================================================
// CSR building
// ============================================================================

struct CsrData {
  offsets: Vec<u32>,
  /// Destination for out-edges, source for in-edges.
  other: Vec<u32>,
  etype: Vec<u32>,
  /// For in-edges: index back to the out-edge array.
  out_index: Option<Vec<u32>>,
}

fn build_out_edges_csr(
  nodes: &[NodeData],
  edges: &[EdgeData],
  node_id_to_phys: &FastMap<NodeId, PhysNode>,
) -> CsrData {
  let num_nodes = nodes.len();
  let num_edges = edges.len();

  let mut counts = vec![0u32; num_nodes];
  for edge in edges {
    if let Some(&src_phys) = node_id_to_phys.get(&edge.src) {
      counts[src_phys as usize] += 1;
    }
  }

  let mut offsets = vec![0u32; num_nodes + 1];
  for i in 0..num_nodes {
    offsets[i + 1] = offsets[i] + counts[i];
  }

  let mut dst_arr = vec![0u32; num_edges];
  let mut etype_arr = vec![0u32; num_edges];

  let mut edges_by_node: FastMap<PhysNode, Vec<(ETypeId, PhysNode)>> = FastMap::new();
  for edge in edges {
    if let (Some(&src_phys), Some(&dst_phys)) = (
      node_id_to_phys.get(&edge.src),
      node_id_to_phys.get(&edge.dst),
    ) {
      edges_by_node
        .entry(src_phys)
        .or_default()
        .push((edge.etype, dst_phys));
    }
  }

  // Edges are sorted by (etype, dst) per node so readers can binary
  // search.
  for (src_phys, mut node_edges) in edges_by_node {
    node_edges.sort_unstable();
    let mut pos = offsets[src_phys as usize] as usize;
    for (etype, dst_phys) in node_edges {
      dst_arr[pos] = dst_phys;
      etype_arr[pos] = etype;
      pos += 1;
    }
  }

  CsrData {
    offsets,
    other: dst_arr,
    etype: etype_arr,
    out_index: None,
  }
}

fn build_in_edges_csr(nodes: &[NodeData], out_csr: &CsrData) -> CsrData {
  let num_nodes = nodes.len();
  let num_edges = out_csr.other.len();

  let mut counts = vec![0u32; num_nodes];
  for &dst in &out_csr.other {
    counts[dst as usize] += 1;
  }

  let mut offsets = vec![0u32; num_nodes + 1];
  for i in 0..num_nodes {
    offsets[i + 1] = offsets[i] + counts[i];
  }

  let mut src_arr = vec![0u32; num_edges];
  let mut etype_arr = vec![0u32; num_edges];
  let mut out_index = vec![0u32; num_edges];

  let mut in_edges_by_node: FastMap<PhysNode, Vec<(ETypeId, PhysNode, u32)>> = FastMap::new();
  for src_phys in 0..num_nodes {
    let start = out_csr.offsets[src_phys] as usize;
    let end = out_csr.offsets[src_phys + 1] as usize;
    for out_idx in start..end {
      let dst_phys = out_csr.other[out_idx];
      let edge_etype = out_csr.etype[out_idx];
      in_edges_by_node.entry(dst_phys).or_default().push((
        edge_etype,
        src_phys as PhysNode,
        out_idx as u32,
      ));
    }
  }

  for (dst_phys, mut node_in_edges) in in_edges_by_node {
    node_in_edges.sort_unstable();
    let mut pos = offsets[dst_phys as usize] as usize;
    for (etype, src_phys, out_idx) in node_in_edges {
      src_arr[pos] = src_phys;
      etype_arr[pos] = etype;
      out_index[pos] = out_idx;
      pos += 1;
    }
  }

  CsrData {
    offsets,
    other: src_arr,
    etype: etype_arr,
    out_index: Some(out_index),
  }
}

// ============================================================================
// Key index
// ============================================================================

struct KeyEntry {
  hash64: u64,
  string_id: StringId,
  node_id: NodeId,
}

struct KeyIndexData {
  entries: Vec<KeyEntry>,
  buckets: Vec<u32>,
}

fn build_key_index(nodes: &[NodeData], node_key_strings: &[StringId]) -> KeyIndexData {
  let mut raw_entries: Vec<KeyEntry> = Vec::new();
  for (i, node) in nodes.iter().enumerate() {
    if let Some(ref key) = node.key {
      raw_entries.push(KeyEntry {
        hash64: xxhash64_string(key),
        string_id: node_key_strings[i],
        node_id: node.node_id,
      });
    }
  }

  // 2x entries per bucket array slot keeps chains short; minimum 16.
  let num_buckets = std::cmp::max(16, raw_entries.len() * 2);
  let mut buckets = vec![0u32; num_buckets + 1];

  if raw_entries.is_empty() {
    return KeyIndexData {
      entries: raw_entries,
      buckets,
    };
  }

  let num_buckets_u64 = num_buckets as u64;
  raw_entries.sort_by(|a, b| {
    let a_bucket = a.hash64 % num_buckets_u64;
    let b_bucket = b.hash64 % num_buckets_u64;
    a_bucket
      .cmp(&b_bucket)
      .then(a.hash64.cmp(&b.hash64))
      .then(a.string_id.cmp(&b.string_id))
      .then(a.node_id.cmp(&b.node_id))
  });

  let mut counts = vec![0u32; num_buckets];
  for entry in &raw_entries {
    counts[(entry.hash64 % num_buckets_u64) as usize] += 1;
  }
  for i in 0..num_buckets {
    buckets[i + 1] = buckets[i] + counts[i];
  }

  KeyIndexData {
    entries: raw_entries,
    buckets,
  }
}

// ============================================================================
// Property encoding
// ============================================================================

struct VectorTable {
  offsets: Vec<u64>,
  data: Vec<u8>,
}

impl VectorTable {
  fn new() -> Self {
    Self {
      offsets: vec![0],
      data: Vec::new(),
    }
  }

  fn push(&mut self, vec: &[f32]) -> u64 {
    for v in vec {
      self.data.extend_from_slice(&v.to_le_bytes());
    }
    self.offsets.push(self.data.len() as u64);
    (self.offsets.len() - 2) as u64
  }

  fn is_empty(&self) -> bool {
    self.offsets.len() <= 1
  }
}

fn encode_prop_value(
  value: &PropValue,
  string_table: &StringTable,
  vectors: &mut VectorTable,
) -> (u8, u64) {
  match value {
    PropValue::Null => (PropValueTag::Null as u8, 0),
    PropValue::Bool(b) => (PropValueTag::Bool as u8, u64::from(*b)),
    PropValue::I64(v) => (PropValueTag::I64 as u8, *v as u64),
    PropValue::F64(v) => (PropValueTag::F64 as u8, v.to_bits()),
    PropValue::String(s) => (PropValueTag::String as u8, string_table.id_of(s) as u64),
    PropValue::VectorF32(vec) => (PropValueTag::VectorF32 as u8, vectors.push(vec)),
  }
}

// ============================================================================
// Build state
// ============================================================================

struct SectionData {
  id: SectionId,
  data: Vec<u8>,
  compression: CompressionType,
  uncompressed_size: u32,
}

fn validate_edge_nodes(edges: &[EdgeData], node_id_to_phys: &FastMap<NodeId, PhysNode>) -> Result<()> {
  for edge in edges {
    if !node_id_to_phys.contains_key(&edge.src) || !node_id_to_phys.contains_key(&edge.dst) {
      return Err(RayError::Corrupt(format!(
        "edge references missing node(s): src={}, dst={}",
        edge.src, edge.dst
      )));
    }
  }
  Ok(())
}

fn intern_name_table(
  count: usize,
  names: &HashMap<u32, String>,
  string_table: &mut StringTable,
) -> Vec<StringId> {
  let mut ids: Vec<StringId> = vec![0];
  for i in 1..=count as u32 {
    ids.push(match names.get(&i) {
      Some(name) => string_table.intern(name),
      None => 0,
    });
  }
  ids
}

fn encode_u32_slice(values: &[u32]) -> Vec<u8> {
  let mut data = vec![0u8; values.len() * 4];
  for (i, &value) in values.iter().enumerate() {
    write_u32(&mut data, i * 4, value);
  }
  data
}

fn encode_u64_slice(values: &[u64]) -> Vec<u8> {
  let mut data = vec![0u8; values.len() * 8];
  for (i, &value) in values.iter().enumerate() {
    write_u64(&mut data, i * 8, value);
  }
  data
}

fn encode_prop_vals(vals: &[(u8, u64)]) -> Vec<u8> {
  let mut data = vec![0u8; vals.len() * PROP_VALUE_DISK_SIZE];
  for (i, (tag, payload)) in vals.iter().enumerate() {
    let offset = i * PROP_VALUE_DISK_SIZE;
    data[offset] = *tag;
    write_u64(&mut data, offset + 8, *payload);
  }
  data
}

// ============================================================================
// Main build
// ============================================================================

/// Build a snapshot image in memory, ready to be written to a page run.
pub fn build_snapshot_to_memory(input: SnapshotBuildInput) -> Result<Vec<u8>> {
  let SnapshotBuildInput {
    generation,
    mut nodes,
    edges,
    labels,
    etypes,
    propkeys,
    compression,
  } = input;

  // Deterministic ordering: physical index == rank by NodeId.
  nodes.sort_by_key(|n| n.node_id);

  let num_nodes = nodes.len();
  let num_edges = edges.len();

  let phys_to_node_id: Vec<NodeId> = nodes.iter().map(|n| n.node_id).collect();
  let mut node_id_to_phys: FastMap<NodeId, PhysNode> = FastMap::new();
  let mut max_node_id: NodeId = 0;
  for (i, node) in nodes.iter().enumerate() {
    node_id_to_phys.insert(node.node_id, i as PhysNode);
    max_node_id = max_node_id.max(node.node_id);
  }

  validate_edge_nodes(&edges, &node_id_to_phys)?;

  let mut string_table = StringTable::new();
  let label_string_ids = intern_name_table(labels.len(), &labels, &mut string_table);
  let etype_string_ids = intern_name_table(etypes.len(), &etypes, &mut string_table);
  let propkey_string_ids = intern_name_table(propkeys.len(), &propkeys, &mut string_table);

  let node_key_strings: Vec<StringId> = nodes
    .iter()
    .map(|node| node.key.as_deref().map_or(0, |k| string_table.intern(k)))
    .collect();

  // Intern string-valued properties before any value encoding.
  for node in &nodes {
    for value in node.props.values() {
      if let PropValue::String(s) = value {
        string_table.intern(s);
      }
    }
  }
  for edge in &edges {
    for value in edge.props.values() {
      if let PropValue::String(s) = value {
        string_table.intern(s);
      }
    }
  }

  let out_csr = build_out_edges_csr(&nodes, &edges, &node_id_to_phys);
  let in_csr = build_in_edges_csr(&nodes, &out_csr);
  let key_index = build_key_index(&nodes, &node_key_strings);

  let has_properties =
    nodes.iter().any(|n| !n.props.is_empty()) || edges.iter().any(|e| !e.props.is_empty());

  let compression_opts = compression.unwrap_or_default();
  let mut section_data: Vec<SectionData> = Vec::new();
  let mut add_section = |id: SectionId, data: Vec<u8>| {
    let uncompressed_size = data.len() as u32;
    let (stored, compression_type) = maybe_compress(&data, &compression_opts);
    section_data.push(SectionData {
      id,
      data: stored,
      compression: compression_type,
      uncompressed_size,
    });
  };

  // --- node id maps ---
  add_section(SectionId::PhysToNodeId, encode_u64_slice(&phys_to_node_id));
  {
    let size = (max_node_id + 1) as usize;
    let mut data = vec![0u8; size * 4];
    for i in 0..size {
      write_i32(&mut data, i * 4, -1);
    }
    for (&node_id, &phys) in &node_id_to_phys {
      write_i32(&mut data, (node_id as usize) * 4, phys as i32);
    }
    add_section(SectionId::NodeIdToPhys, data);
  }

  // --- adjacency ---
  add_section(SectionId::OutOffsets, encode_u32_slice(&out_csr.offsets));
  add_section(SectionId::OutDst, encode_u32_slice(&out_csr.other));
  add_section(SectionId::OutEtype, encode_u32_slice(&out_csr.etype));
  add_section(SectionId::InOffsets, encode_u32_slice(&in_csr.offsets));
  add_section(SectionId::InSrc, encode_u32_slice(&in_csr.other));
  add_section(SectionId::InEtype, encode_u32_slice(&in_csr.etype));
  {
    let mut data = vec![0u8; num_edges * 4];
    if let Some(ref out_index) = in_csr.out_index {
      for (i, &idx) in out_index.iter().enumerate() {
        write_u32(&mut data, i * 4, idx);
      }
    }
    add_section(SectionId::InOutIndex, data);
  }

  // --- string table ---
  let num_strings = string_table.len();
  {
    let total_bytes: usize = string_table.strings.iter().map(String::len).sum();
    let mut offsets_data = vec![0u8; (num_strings + 1) * 4];
    let mut bytes_data = vec![0u8; total_bytes];
    let mut byte_offset = 0usize;
    for (i, s) in string_table.strings.iter().enumerate() {
      write_u32(&mut offsets_data, i * 4, byte_offset as u32);
      bytes_data[byte_offset..byte_offset + s.len()].copy_from_slice(s.as_bytes());
      byte_offset += s.len();
    }
    write_u32(&mut offsets_data, num_strings * 4, byte_offset as u32);
    add_section(SectionId::StringOffsets, offsets_data);
    add_section(SectionId::StringBytes, bytes_data);
  }

  // --- dictionary name ids + node keys ---
  add_section(SectionId::LabelStringIds, encode_u32_slice(&label_string_ids));
  add_section(SectionId::EtypeStringIds, encode_u32_slice(&etype_string_ids));
  add_section(
    SectionId::PropkeyStringIds,
    encode_u32_slice(&propkey_string_ids),
  );
  add_section(SectionId::NodeKeyString, encode_u32_slice(&node_key_strings));

  // --- node labels ---
  {
    let mut node_label_offsets: Vec<u32> = Vec::with_capacity(num_nodes + 1);
    let mut node_label_ids: Vec<u32> = Vec::new();
    node_label_offsets.push(0);
    for node in &nodes {
      let mut labels = node.labels.clone();
      labels.sort_unstable();
      labels.dedup();
      node_label_ids.extend(labels);
      node_label_offsets.push(node_label_ids.len() as u32);
    }
    add_section(
      SectionId::NodeLabelOffsets,
      encode_u32_slice(&node_label_offsets),
    );
    add_section(SectionId::NodeLabelIds, encode_u32_slice(&node_label_ids));
  }

  // --- key index ---
  {
    let mut data = vec![0u8; key_index.entries.len() * KEY_INDEX_ENTRY_SIZE];
    for (i, entry) in key_index.entries.iter().enumerate() {
      let offset = i * KEY_INDEX_ENTRY_SIZE;
      write_u64(&mut data, offset, entry.hash64);
      write_u32(&mut data, offset + 8, entry.string_id);
      write_u32(&mut data, offset + 12, 0);
      write_u64(&mut data, offset + 16, entry.node_id);
    }
    add_section(SectionId::KeyEntries, data);
    add_section(SectionId::KeyBuckets, encode_u32_slice(&key_index.buckets));
  }

  // --- node properties ---
  let mut vector_table = VectorTable::new();
  {
    let mut node_prop_offsets = vec![0u32; num_nodes + 1];
    let mut node_prop_keys: Vec<u32> = Vec::new();
    let mut node_prop_vals: Vec<(u8, u64)> = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
      node_prop_offsets[i] = node_prop_keys.len() as u32;
      let mut sorted_props: Vec<_> = node.props.iter().collect();
      sorted_props.sort_by_key(|(k, _)| **k);
      for (&key_id, value) in sorted_props {
        node_prop_keys.push(key_id);
        node_prop_vals.push(encode_prop_value(value, &string_table, &mut vector_table));
      }
    }
    node_prop_offsets[num_nodes] = node_prop_keys.len() as u32;

    add_section(
      SectionId::NodePropOffsets,
      encode_u32_slice(&node_prop_offsets),
    );
    add_section(SectionId::NodePropKeys, encode_u32_slice(&node_prop_keys));
    add_section(SectionId::NodePropVals, encode_prop_vals(&node_prop_vals));
  }

  // --- edge properties (ordered by out-edge index) ---
  {
    let mut edge_prop_map: FastMap<(PhysNode, ETypeId, PhysNode), &HashMap<PropKeyId, PropValue>> =
      FastMap::new();
    for edge in &edges {
      if edge.props.is_empty() {
        continue;
      }
      if let (Some(&src_phys), Some(&dst_phys)) = (
        node_id_to_phys.get(&edge.src),
        node_id_to_phys.get(&edge.dst),
      ) {
        edge_prop_map.insert((src_phys, edge.etype, dst_phys), &edge.props);
      }
    }

    let mut edge_prop_offsets = vec![0u32; num_edges + 1];
    let mut edge_prop_keys: Vec<u32> = Vec::new();
    let mut edge_prop_vals: Vec<(u8, u64)> = Vec::new();

    let mut edge_idx = 0usize;
    for src_phys in 0..num_nodes {
      let start = out_csr.offsets[src_phys] as usize;
      let end = out_csr.offsets[src_phys + 1] as usize;
      for i in start..end {
        edge_prop_offsets[edge_idx] = edge_prop_keys.len() as u32;
        let dst_phys = out_csr.other[i];
        let etype = out_csr.etype[i];
        if let Some(props) = edge_prop_map.get(&(src_phys as PhysNode, etype, dst_phys)) {
          let mut sorted_props: Vec<_> = props.iter().collect();
          sorted_props.sort_by_key(|(k, _)| **k);
          for (&key_id, value) in sorted_props {
            edge_prop_keys.push(key_id);
            edge_prop_vals.push(encode_prop_value(value, &string_table, &mut vector_table));
          }
        }
        edge_idx += 1;
      }
    }
    edge_prop_offsets[num_edges] = edge_prop_keys.len() as u32;

    add_section(
      SectionId::EdgePropOffsets,
      encode_u32_slice(&edge_prop_offsets),
    );
    add_section(SectionId::EdgePropKeys, encode_u32_slice(&edge_prop_keys));
    add_section(SectionId::EdgePropVals, encode_prop_vals(&edge_prop_vals));
  }

  // --- vector columns ---
  let has_vectors = !vector_table.is_empty();
  if has_vectors {
    add_section(SectionId::VectorOffsets, encode_u64_slice(&vector_table.offsets));
    add_section(SectionId::VectorData, vector_table.data);
  }

  // --- layout ---
  let header_size = SNAPSHOT_HEADER_SIZE;
  let section_table_size = SectionId::COUNT * SECTION_ENTRY_SIZE;
  let mut data_offset = align_up(header_size + section_table_size, SECTION_ALIGNMENT);

  let mut section_offsets: FastMap<SectionId, (u64, u64, CompressionType, u32)> = FastMap::new();
  for section in &section_data {
    section_offsets.insert(
      section.id,
      (
        data_offset as u64,
        section.data.len() as u64,
        section.compression,
        section.uncompressed_size,
      ),
    );
    data_offset = align_up(data_offset + section.data.len(), SECTION_ALIGNMENT);
  }

  let total_size = data_offset + 4;
  let mut buffer = vec![0u8; total_size];

  // --- header ---
  write_u32(&mut buffer, 0, MAGIC_SNAPSHOT);
  write_u32(&mut buffer, 4, VERSION_SNAPSHOT);
  write_u32(&mut buffer, 8, MIN_READER_SNAPSHOT);

  let mut flags = SnapshotFlags::HAS_IN_EDGES | SnapshotFlags::HAS_NODE_LABELS;
  if has_properties {
    flags |= SnapshotFlags::HAS_PROPERTIES;
  }
  if key_index.buckets.len() > 1 {
    flags |= SnapshotFlags::HAS_KEY_BUCKETS;
  }
  if has_vectors {
    flags |= SnapshotFlags::HAS_VECTORS;
  }
  write_u32(&mut buffer, 12, flags.bits());

  write_u64(&mut buffer, 16, generation);
  let created_unix_ns = std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_nanos() as u64)
    .unwrap_or(0);
  write_u64(&mut buffer, 24, created_unix_ns);
  write_u64(&mut buffer, 32, num_nodes as u64);
  write_u64(&mut buffer, 40, num_edges as u64);
  write_u64(&mut buffer, 48, max_node_id);
  write_u64(&mut buffer, 56, labels.len() as u64);
  write_u64(&mut buffer, 64, etypes.len() as u64);
  write_u64(&mut buffer, 72, propkeys.len() as u64);
  write_u64(&mut buffer, 80, num_strings as u64);

  // --- section table ---
  let mut offset = header_size;
  for id_num in 0..SectionId::COUNT as u32 {
    let id = SectionId::from_u32(id_num)
      .ok_or_else(|| RayError::Corrupt("section id out of range in snapshot writer".to_string()))?;
    let (sec_offset, sec_length, compression, uncompressed_size) = section_offsets
      .get(&id)
      .copied()
      .unwrap_or((0, 0, CompressionType::None, 0));

    write_u64(&mut buffer, offset, sec_offset);
    write_u64(&mut buffer, offset + 8, sec_length);
    write_u32(&mut buffer, offset + 16, compression as u32);
    write_u32(&mut buffer, offset + 20, uncompressed_size);
    offset += SECTION_ENTRY_SIZE;
  }

  // --- section payloads ---
  for section in &section_data {
    let (sec_offset, _, _, _) = section_offsets[&section.id];
    buffer[sec_offset as usize..sec_offset as usize + section.data.len()]
      .copy_from_slice(&section.data);
  }

  // --- footer CRC ---
  let footer_crc = crc32c(&buffer[..total_size - 4]);
  write_u32(&mut buffer, total_size - 4, footer_crc);

  Ok(buffer)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::binary::{read_u32, read_u64};

  fn create_test_input() -> SnapshotBuildInput {
    let nodes = vec![
      NodeData {
        node_id: 1,
        key: Some("user:alice".to_string()),
        labels: vec![1],
        props: {
          let mut props = HashMap::new();
          props.insert(1, PropValue::String("Alice".to_string()));
          props.insert(2, PropValue::I64(30));
          props.insert(4, PropValue::VectorF32(vec![0.1, 0.2, 0.3]));
          props
        },
      },
      NodeData {
        node_id: 2,
        key: Some("user:bob".to_string()),
        labels: vec![1],
        props: {
          let mut props = HashMap::new();
          props.insert(1, PropValue::String("Bob".to_string()));
          props.insert(2, PropValue::I64(25));
          props
        },
      },
      NodeData {
        node_id: 3,
        key: None,
        labels: vec![2],
        props: HashMap::new(),
      },
    ];

    let edges = vec![
      EdgeData {
        src: 1,
        etype: 1,
        dst: 2,
        props: {
          let mut props = HashMap::new();
          props.insert(3, PropValue::F64(0.9));
          props
        },
      },
      EdgeData {
        src: 2,
        etype: 1,
        dst: 1,
        props: HashMap::new(),
      },
      EdgeData {
        src: 1,
        etype: 2,
        dst: 3,
        props: HashMap::new(),
      },
    ];

    let mut labels = HashMap::new();
    labels.insert(1, "Person".to_string());
    labels.insert(2, "Document".to_string());

    let mut etypes = HashMap::new();
    etypes.insert(1, "KNOWS".to_string());
    etypes.insert(2, "CREATED".to_string());

    let mut propkeys = HashMap::new();
    propkeys.insert(1, "name".to_string());
    propkeys.insert(2, "age".to_string());
    propkeys.insert(3, "weight".to_string());
    propkeys.insert(4, "embedding".to_string());

    SnapshotBuildInput {
      generation: 1,
      nodes,
      edges,
      labels,
      etypes,
      propkeys,
      compression: None,
    }
  }

  #[test]
  fn build_writes_header_counts_and_crc() {
    let buffer = build_snapshot_to_memory(create_test_input()).expect("build");

    assert!(buffer.len() > SNAPSHOT_HEADER_SIZE);
    assert_eq!(read_u32(&buffer, 0), MAGIC_SNAPSHOT);
    assert_eq!(read_u32(&buffer, 4), VERSION_SNAPSHOT);
    assert_eq!(read_u32(&buffer, 8), MIN_READER_SNAPSHOT);
    assert_eq!(read_u64(&buffer, 16), 1); // generation
    assert_eq!(read_u64(&buffer, 32), 3); // num_nodes
    assert_eq!(read_u64(&buffer, 40), 3); // num_edges
    assert_eq!(read_u64(&buffer, 48), 3); // max_node_id

    let crc_offset = buffer.len() - 4;
    assert_eq!(read_u32(&buffer, crc_offset), crc32c(&buffer[..crc_offset]));
  }

  #[test]
  fn build_empty_snapshot() {
    let buffer = build_snapshot_to_memory(SnapshotBuildInput {
      generation: 1,
      nodes: vec![],
      edges: vec![],
      labels: HashMap::new(),
      etypes: HashMap::new(),
      propkeys: HashMap::new(),
      compression: None,
    })
    .expect("build");

    assert_eq!(read_u32(&buffer, 0), MAGIC_SNAPSHOT);
    assert_eq!(read_u64(&buffer, 32), 0);
    assert_eq!(read_u64(&buffer, 40), 0);
  }

  #[test]
  fn edge_to_missing_node_is_rejected() {
    let mut etypes = HashMap::new();
    etypes.insert(1, "REL".to_string());

    let result = build_snapshot_to_memory(SnapshotBuildInput {
      generation: 1,
      nodes: vec![],
      edges: vec![EdgeData {
        src: 1,
        etype: 1,
        dst: 2,
        props: HashMap::new(),
      }],
      labels: HashMap::new(),
      etypes,
      propkeys: HashMap::new(),
      compression: None,
    });
    assert!(result.is_err());
  }

  #[test]
  fn string_table_interning() {
    let mut table = StringTable::new();
    assert_eq!(table.len(), 1); // empty string pre-populated

    assert_eq!(table.intern("hello"), 1);
    assert_eq!(table.intern("world"), 2);
    assert_eq!(table.intern("hello"), 1);
    assert_eq!(table.len(), 3);
  }

  #[test]
  fn csr_offsets() {
    let nodes: Vec<NodeData> = (1..=3)
      .map(|node_id| NodeData {
        node_id,
        key: None,
        labels: vec![],
        props: HashMap::new(),
      })
      .collect();
    let edges = vec![
      EdgeData {
        src: 1,
        etype: 1,
        dst: 2,
        props: HashMap::new(),
      },
      EdgeData {
        src: 1,
        etype: 1,
        dst: 3,
        props: HashMap::new(),
      },
      EdgeData {
        src: 2,
        etype: 2,
        dst: 1,
        props: HashMap::new(),
      },
    ];

    let mut node_id_to_phys = FastMap::new();
    node_id_to_phys.insert(1, 0);
    node_id_to_phys.insert(2, 1);
    node_id_to_phys.insert(3, 2);

    let out_csr = build_out_edges_csr(&nodes, &edges, &node_id_to_phys);
    assert_eq!(out_csr.offsets, vec![0, 2, 3, 3]);
    assert_eq!(out_csr.other.len(), 3);

    let in_csr = build_in_edges_csr(&nodes, &out_csr);
    assert_eq!(in_csr.offsets, vec![0, 1, 2, 3]);
  }
}
