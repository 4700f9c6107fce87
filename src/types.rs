//! Core ID types, property values, WAL record types, and snapshot
//! format types shared across the engine.

use bitflags::bitflags;

// ============================================================================
// ID types
// ============================================================================

/// Node identifier. Strictly monotonic per database, never reused.
pub type NodeId = u64;
/// Transaction identifier. Strictly monotonic per database.
pub type TxId = u64;
/// Label dictionary identifier.
pub type LabelId = u32;
/// Edge type dictionary identifier.
pub type ETypeId = u32;
/// Property key dictionary identifier.
pub type PropKeyId = u32;

/// Physical node index inside a snapshot (dense, 0-based).
pub type PhysNode = u32;
/// Interned string identifier inside a snapshot. 0 is the empty string.
pub type StringId = u32;

// ============================================================================
// Property values
// ============================================================================

/// Dynamic property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
  Null,
  Bool(bool),
  I64(i64),
  F64(f64),
  String(String),
  VectorF32(Vec<f32>),
}

impl PropValue {
  pub fn tag(&self) -> PropValueTag {
    match self {
      PropValue::Null => PropValueTag::Null,
      PropValue::Bool(_) => PropValueTag::Bool,
      PropValue::I64(_) => PropValueTag::I64,
      PropValue::F64(_) => PropValueTag::F64,
      PropValue::String(_) => PropValueTag::String,
      PropValue::VectorF32(_) => PropValueTag::VectorF32,
    }
  }
}

/// On-disk tag byte for a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PropValueTag {
  Null = 0,
  Bool = 1,
  I64 = 2,
  F64 = 3,
  String = 4,
  VectorF32 = 5,
}

impl PropValueTag {
  pub fn from_u8(value: u8) -> Option<Self> {
    match value {
      0 => Some(PropValueTag::Null),
      1 => Some(PropValueTag::Bool),
      2 => Some(PropValueTag::I64),
      3 => Some(PropValueTag::F64),
      4 => Some(PropValueTag::String),
      5 => Some(PropValueTag::VectorF32),
      _ => None,
    }
  }
}

// ============================================================================
// WAL record types
// ============================================================================

/// WAL record type discriminant (wire value, little-endian u32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum WalRecordType {
  Begin = 1,
  Commit = 2,
  Abort = 3,
  CreateNode = 4,
  DeleteNode = 5,
  AddEdge = 6,
  DeleteEdge = 7,
  DefineLabel = 8,
  DefineEtype = 9,
  DefinePropkey = 10,
  SetNodeProp = 11,
  DelNodeProp = 12,
  SetEdgeProp = 13,
  DelEdgeProp = 14,
  SetNodeVector = 15,
  DelNodeVector = 16,
  BatchVectors = 17,
  SealFragment = 18,
  CompactFragments = 19,
  AddNodeLabel = 20,
  RemoveNodeLabel = 21,
}

impl WalRecordType {
  pub fn from_u32(value: u32) -> Option<Self> {
    match value {
      1 => Some(WalRecordType::Begin),
      2 => Some(WalRecordType::Commit),
      3 => Some(WalRecordType::Abort),
      4 => Some(WalRecordType::CreateNode),
      5 => Some(WalRecordType::DeleteNode),
      6 => Some(WalRecordType::AddEdge),
      7 => Some(WalRecordType::DeleteEdge),
      8 => Some(WalRecordType::DefineLabel),
      9 => Some(WalRecordType::DefineEtype),
      10 => Some(WalRecordType::DefinePropkey),
      11 => Some(WalRecordType::SetNodeProp),
      12 => Some(WalRecordType::DelNodeProp),
      13 => Some(WalRecordType::SetEdgeProp),
      14 => Some(WalRecordType::DelEdgeProp),
      15 => Some(WalRecordType::SetNodeVector),
      16 => Some(WalRecordType::DelNodeVector),
      17 => Some(WalRecordType::BatchVectors),
      18 => Some(WalRecordType::SealFragment),
      19 => Some(WalRecordType::CompactFragments),
      20 => Some(WalRecordType::AddNodeLabel),
      21 => Some(WalRecordType::RemoveNodeLabel),
      _ => None,
    }
  }
}

// ============================================================================
// Snapshot format types
// ============================================================================

bitflags! {
  /// Feature flags stored in the snapshot header.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct SnapshotFlags: u32 {
    const HAS_IN_EDGES = 1 << 0;
    const HAS_NODE_LABELS = 1 << 1;
    const HAS_PROPERTIES = 1 << 2;
    const HAS_KEY_BUCKETS = 1 << 3;
    const HAS_VECTORS = 1 << 4;
  }
}

/// Parsed snapshot header.
#[derive(Debug, Clone)]
pub struct SnapshotHeaderV1 {
  pub magic: u32,
  pub version: u32,
  pub min_reader_version: u32,
  pub flags: SnapshotFlags,
  pub generation: u64,
  pub created_unix_ns: u64,
  pub num_nodes: u64,
  pub num_edges: u64,
  pub max_node_id: u64,
  pub num_labels: u64,
  pub num_etypes: u64,
  pub num_propkeys: u64,
  pub num_strings: u64,
}

/// Snapshot sections, in section-table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SectionId {
  PhysToNodeId = 0,
  NodeIdToPhys = 1,
  OutOffsets = 2,
  OutDst = 3,
  OutEtype = 4,
  InOffsets = 5,
  InSrc = 6,
  InEtype = 7,
  InOutIndex = 8,
  StringOffsets = 9,
  StringBytes = 10,
  LabelStringIds = 11,
  EtypeStringIds = 12,
  PropkeyStringIds = 13,
  NodeKeyString = 14,
  NodeLabelOffsets = 15,
  NodeLabelIds = 16,
  KeyEntries = 17,
  KeyBuckets = 18,
  NodePropOffsets = 19,
  NodePropKeys = 20,
  NodePropVals = 21,
  EdgePropOffsets = 22,
  EdgePropKeys = 23,
  EdgePropVals = 24,
  VectorOffsets = 25,
  VectorData = 26,
}

impl SectionId {
  pub const COUNT: usize = 27;

  pub fn from_u32(value: u32) -> Option<Self> {
    match value {
      0 => Some(SectionId::PhysToNodeId),
      1 => Some(SectionId::NodeIdToPhys),
      2 => Some(SectionId::OutOffsets),
      3 => Some(SectionId::OutDst),
      4 => Some(SectionId::OutEtype),
      5 => Some(SectionId::InOffsets),
      6 => Some(SectionId::InSrc),
      7 => Some(SectionId::InEtype),
      8 => Some(SectionId::InOutIndex),
      9 => Some(SectionId::StringOffsets),
      10 => Some(SectionId::StringBytes),
      11 => Some(SectionId::LabelStringIds),
      12 => Some(SectionId::EtypeStringIds),
      13 => Some(SectionId::PropkeyStringIds),
      14 => Some(SectionId::NodeKeyString),
      15 => Some(SectionId::NodeLabelOffsets),
      16 => Some(SectionId::NodeLabelIds),
      17 => Some(SectionId::KeyEntries),
      18 => Some(SectionId::KeyBuckets),
      19 => Some(SectionId::NodePropOffsets),
      20 => Some(SectionId::NodePropKeys),
      21 => Some(SectionId::NodePropVals),
      22 => Some(SectionId::EdgePropOffsets),
      23 => Some(SectionId::EdgePropKeys),
      24 => Some(SectionId::EdgePropVals),
      25 => Some(SectionId::VectorOffsets),
      26 => Some(SectionId::VectorData),
      _ => None,
    }
  }
}

/// One section-table entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionEntry {
  pub offset: u64,
  pub length: u64,
  pub compression: u32,
  pub uncompressed_size: u32,
}

// ============================================================================
// Statistics
// ============================================================================

/// Database statistics merged from header, snapshot, and delta.
#[derive(Debug, Clone, Default)]
pub struct DbStats {
  pub snapshot_gen: u64,
  pub snapshot_nodes: u64,
  pub snapshot_edges: u64,
  pub snapshot_max_node_id: u64,
  pub delta_nodes_created: usize,
  pub delta_nodes_deleted: usize,
  pub delta_edges_added: usize,
  pub delta_edges_deleted: usize,
  pub wal_bytes: u64,
  pub wal_capacity: u64,
  pub recommend_compact: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prop_value_tag_round_trip() {
    for tag in [
      PropValueTag::Null,
      PropValueTag::Bool,
      PropValueTag::I64,
      PropValueTag::F64,
      PropValueTag::String,
      PropValueTag::VectorF32,
    ] {
      assert_eq!(PropValueTag::from_u8(tag as u8), Some(tag));
    }
    assert_eq!(PropValueTag::from_u8(200), None);
  }

  #[test]
  fn wal_record_type_wire_values_are_stable() {
    assert_eq!(WalRecordType::Begin as u32, 1);
    assert_eq!(WalRecordType::Commit as u32, 2);
    assert_eq!(WalRecordType::Abort as u32, 3);
    assert_eq!(WalRecordType::CompactFragments as u32, 19);
    assert_eq!(
      WalRecordType::from_u32(WalRecordType::RemoveNodeLabel as u32),
      Some(WalRecordType::RemoveNodeLabel)
    );
    assert_eq!(WalRecordType::from_u32(0), None);
    assert_eq!(WalRecordType::from_u32(99), None);
  }

  #[test]
  fn section_id_table_is_dense() {
    for i in 0..SectionId::COUNT as u32 {
      let id = SectionId::from_u32(i).expect("dense section table");
      assert_eq!(id as u32, i);
    }
    assert_eq!(SectionId::from_u32(SectionId::COUNT as u32), None);
  }
}
