//! WAL record wire format.
//!
//! Every record is laid out little-endian as
//!
//! ```text
//! [type u32][txid u64][payload_len u32][payload][zero pad to 8 B][crc32c u32][4 zero bytes]
//! ```
//!
//! The CRC covers `type ‖ txid ‖ payload_len ‖ payload ‖ padding`. The
//! four trailing bytes keep every record start 8-aligned; they are
//! reserved, zero on write, ignored on read.

use crate::constants::WAL_RECORD_ALIGNMENT;
use crate::types::{ETypeId, LabelId, NodeId, PropKeyId, PropValue, PropValueTag, TxId, WalRecordType};
use crate::util::binary::{align_up, read_u32, read_u64, write_u32, write_u64};
use crate::util::crc::crc32c;

/// Fixed record header: type u32 + txid u64 + payload_len u32.
pub const WAL_RECORD_HEADER_SIZE: usize = 16;

/// Trailer: crc u32 + 4 reserved zero bytes.
pub const WAL_RECORD_TRAILER_SIZE: usize = 8;

/// Sentinel key length meaning "no key".
const NO_KEY: u32 = u32::MAX;

// ============================================================================
// Record
// ============================================================================

/// An un-encoded WAL record.
#[derive(Debug, Clone)]
pub struct WalRecord {
  pub record_type: WalRecordType,
  pub txid: TxId,
  pub payload: Vec<u8>,
}

impl WalRecord {
  pub fn new(record_type: WalRecordType, txid: TxId, payload: Vec<u8>) -> Self {
    Self {
      record_type,
      txid,
      payload,
    }
  }

  /// Total encoded size, including padding and trailer.
  pub fn encoded_len(&self) -> usize {
    encoded_record_len(self.payload.len())
  }

  /// Encode to the on-disk representation.
  pub fn encode(&self) -> Vec<u8> {
    let padded = align_up(
      WAL_RECORD_HEADER_SIZE + self.payload.len(),
      WAL_RECORD_ALIGNMENT,
    );
    let total = padded + WAL_RECORD_TRAILER_SIZE;
    let mut buf = vec![0u8; total];

    write_u32(&mut buf, 0, self.record_type as u32);
    write_u64(&mut buf, 4, self.txid);
    write_u32(&mut buf, 12, self.payload.len() as u32);
    buf[WAL_RECORD_HEADER_SIZE..WAL_RECORD_HEADER_SIZE + self.payload.len()]
      .copy_from_slice(&self.payload);

    let crc = crc32c(&buf[..padded]);
    write_u32(&mut buf, padded, crc);
    buf
  }
}

/// Encoded size of a record with the given payload length.
pub fn encoded_record_len(payload_len: usize) -> usize {
  align_up(WAL_RECORD_HEADER_SIZE + payload_len, WAL_RECORD_ALIGNMENT) + WAL_RECORD_TRAILER_SIZE
}

/// A record decoded from the log.
#[derive(Debug, Clone)]
pub struct ParsedWalRecord {
  pub record_type: WalRecordType,
  pub txid: TxId,
  pub payload: Vec<u8>,
  /// Byte offset just past this record (relative to the same base as
  /// the parse offset).
  pub record_end: usize,
}

/// Parse one record at `offset`. Returns `None` on truncation, an
/// unknown type, or a CRC mismatch; scanning stops at the first `None`.
pub fn parse_wal_record(buf: &[u8], offset: usize) -> Option<ParsedWalRecord> {
  if offset + WAL_RECORD_HEADER_SIZE > buf.len() {
    return None;
  }

  let record_type = WalRecordType::from_u32(read_u32(buf, offset))?;
  let txid = read_u64(buf, offset + 4);
  let payload_len = read_u32(buf, offset + 12) as usize;

  let padded = align_up(WAL_RECORD_HEADER_SIZE + payload_len, WAL_RECORD_ALIGNMENT);
  let total = padded + WAL_RECORD_TRAILER_SIZE;
  if offset + total > buf.len() {
    return None;
  }

  let stored_crc = read_u32(buf, offset + padded);
  let computed_crc = crc32c(&buf[offset..offset + padded]);
  if stored_crc != computed_crc {
    return None;
  }

  let payload =
    buf[offset + WAL_RECORD_HEADER_SIZE..offset + WAL_RECORD_HEADER_SIZE + payload_len].to_vec();

  Some(ParsedWalRecord {
    record_type,
    txid,
    payload,
    record_end: offset + total,
  })
}

// ============================================================================
// Property value encoding (WAL payloads)
// ============================================================================

fn encode_prop_value(buf: &mut Vec<u8>, value: &PropValue) {
  buf.push(value.tag() as u8);
  match value {
    PropValue::Null => {}
    PropValue::Bool(b) => buf.push(u8::from(*b)),
    PropValue::I64(v) => buf.extend_from_slice(&v.to_le_bytes()),
    PropValue::F64(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
    PropValue::String(s) => {
      buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
      buf.extend_from_slice(s.as_bytes());
    }
    PropValue::VectorF32(vec) => {
      buf.extend_from_slice(&(vec.len() as u32).to_le_bytes());
      for v in vec {
        buf.extend_from_slice(&v.to_le_bytes());
      }
    }
  }
}

fn decode_prop_value(buf: &[u8], offset: usize) -> Option<(PropValue, usize)> {
  let tag = PropValueTag::from_u8(*buf.get(offset)?)?;
  let mut pos = offset + 1;
  let value = match tag {
    PropValueTag::Null => PropValue::Null,
    PropValueTag::Bool => {
      let b = *buf.get(pos)?;
      pos += 1;
      PropValue::Bool(b != 0)
    }
    PropValueTag::I64 => {
      if pos + 8 > buf.len() {
        return None;
      }
      let v = read_u64(buf, pos) as i64;
      pos += 8;
      PropValue::I64(v)
    }
    PropValueTag::F64 => {
      if pos + 8 > buf.len() {
        return None;
      }
      let v = f64::from_bits(read_u64(buf, pos));
      pos += 8;
      PropValue::F64(v)
    }
    PropValueTag::String => {
      if pos + 4 > buf.len() {
        return None;
      }
      let len = read_u32(buf, pos) as usize;
      pos += 4;
      if pos + len > buf.len() {
        return None;
      }
      let s = String::from_utf8(buf[pos..pos + len].to_vec()).ok()?;
      pos += len;
      PropValue::String(s)
    }
    PropValueTag::VectorF32 => {
      if pos + 4 > buf.len() {
        return None;
      }
      let dim = read_u32(buf, pos) as usize;
      pos += 4;
      if pos + dim * 4 > buf.len() {
        return None;
      }
      let mut vec = Vec::with_capacity(dim);
      for i in 0..dim {
        let raw = read_u32(buf, pos + i * 4);
        vec.push(f32::from_bits(raw));
      }
      pos += dim * 4;
      PropValue::VectorF32(vec)
    }
  };
  Some((value, pos))
}

// ============================================================================
// Payload builders
// ============================================================================

pub fn build_begin_payload() -> Vec<u8> {
  Vec::new()
}

pub fn build_commit_payload() -> Vec<u8> {
  Vec::new()
}

pub fn build_abort_payload() -> Vec<u8> {
  Vec::new()
}

pub fn build_create_node_payload(node_id: NodeId, key: Option<&str>) -> Vec<u8> {
  let mut buf = Vec::with_capacity(12 + key.map_or(0, str::len));
  buf.extend_from_slice(&node_id.to_le_bytes());
  match key {
    Some(key) => {
      buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
      buf.extend_from_slice(key.as_bytes());
    }
    None => buf.extend_from_slice(&NO_KEY.to_le_bytes()),
  }
  buf
}

pub fn build_delete_node_payload(node_id: NodeId) -> Vec<u8> {
  node_id.to_le_bytes().to_vec()
}

pub fn build_add_edge_payload(src: NodeId, etype: ETypeId, dst: NodeId) -> Vec<u8> {
  let mut buf = Vec::with_capacity(20);
  buf.extend_from_slice(&src.to_le_bytes());
  buf.extend_from_slice(&etype.to_le_bytes());
  buf.extend_from_slice(&dst.to_le_bytes());
  buf
}

pub fn build_delete_edge_payload(src: NodeId, etype: ETypeId, dst: NodeId) -> Vec<u8> {
  build_add_edge_payload(src, etype, dst)
}

fn build_define_payload(id: u32, name: &str) -> Vec<u8> {
  let mut buf = Vec::with_capacity(8 + name.len());
  buf.extend_from_slice(&id.to_le_bytes());
  buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
  buf.extend_from_slice(name.as_bytes());
  buf
}

pub fn build_define_label_payload(label_id: LabelId, name: &str) -> Vec<u8> {
  build_define_payload(label_id, name)
}

pub fn build_define_etype_payload(etype_id: ETypeId, name: &str) -> Vec<u8> {
  build_define_payload(etype_id, name)
}

pub fn build_define_propkey_payload(propkey_id: PropKeyId, name: &str) -> Vec<u8> {
  build_define_payload(propkey_id, name)
}

pub fn build_set_node_prop_payload(node_id: NodeId, key_id: PropKeyId, value: &PropValue) -> Vec<u8> {
  let mut buf = Vec::with_capacity(16);
  buf.extend_from_slice(&node_id.to_le_bytes());
  buf.extend_from_slice(&key_id.to_le_bytes());
  encode_prop_value(&mut buf, value);
  buf
}

pub fn build_del_node_prop_payload(node_id: NodeId, key_id: PropKeyId) -> Vec<u8> {
  let mut buf = Vec::with_capacity(12);
  buf.extend_from_slice(&node_id.to_le_bytes());
  buf.extend_from_slice(&key_id.to_le_bytes());
  buf
}

pub fn build_set_edge_prop_payload(
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
  key_id: PropKeyId,
  value: &PropValue,
) -> Vec<u8> {
  let mut buf = Vec::with_capacity(28);
  buf.extend_from_slice(&src.to_le_bytes());
  buf.extend_from_slice(&etype.to_le_bytes());
  buf.extend_from_slice(&dst.to_le_bytes());
  buf.extend_from_slice(&key_id.to_le_bytes());
  encode_prop_value(&mut buf, value);
  buf
}

pub fn build_del_edge_prop_payload(
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
  key_id: PropKeyId,
) -> Vec<u8> {
  let mut buf = Vec::with_capacity(24);
  buf.extend_from_slice(&src.to_le_bytes());
  buf.extend_from_slice(&etype.to_le_bytes());
  buf.extend_from_slice(&dst.to_le_bytes());
  buf.extend_from_slice(&key_id.to_le_bytes());
  buf
}

pub fn build_add_node_label_payload(node_id: NodeId, label_id: LabelId) -> Vec<u8> {
  let mut buf = Vec::with_capacity(12);
  buf.extend_from_slice(&node_id.to_le_bytes());
  buf.extend_from_slice(&label_id.to_le_bytes());
  buf
}

pub fn build_remove_node_label_payload(node_id: NodeId, label_id: LabelId) -> Vec<u8> {
  build_add_node_label_payload(node_id, label_id)
}

pub fn build_set_node_vector_payload(
  node_id: NodeId,
  key_id: PropKeyId,
  vector: &[f32],
) -> Vec<u8> {
  let mut buf = Vec::with_capacity(16 + vector.len() * 4);
  buf.extend_from_slice(&node_id.to_le_bytes());
  buf.extend_from_slice(&key_id.to_le_bytes());
  buf.extend_from_slice(&(vector.len() as u32).to_le_bytes());
  for v in vector {
    buf.extend_from_slice(&v.to_le_bytes());
  }
  buf
}

pub fn build_del_node_vector_payload(node_id: NodeId, key_id: PropKeyId) -> Vec<u8> {
  build_del_node_prop_payload(node_id, key_id)
}

pub fn build_batch_vectors_payload(key_id: PropKeyId, entries: &[(NodeId, Vec<f32>)]) -> Vec<u8> {
  let mut buf = Vec::new();
  buf.extend_from_slice(&key_id.to_le_bytes());
  buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
  for (node_id, vector) in entries {
    buf.extend_from_slice(&node_id.to_le_bytes());
    buf.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    for v in vector {
      buf.extend_from_slice(&v.to_le_bytes());
    }
  }
  buf
}

// ============================================================================
// Payload parsers
// ============================================================================

#[derive(Debug, Clone)]
pub struct CreateNodeData {
  pub node_id: NodeId,
  pub key: Option<String>,
}

pub fn parse_create_node_payload(payload: &[u8]) -> Option<CreateNodeData> {
  if payload.len() < 12 {
    return None;
  }
  let node_id = read_u64(payload, 0);
  let key_len = read_u32(payload, 8);
  let key = if key_len == NO_KEY {
    None
  } else {
    let key_len = key_len as usize;
    if 12 + key_len > payload.len() {
      return None;
    }
    Some(String::from_utf8(payload[12..12 + key_len].to_vec()).ok()?)
  };
  Some(CreateNodeData { node_id, key })
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteNodeData {
  pub node_id: NodeId,
}

pub fn parse_delete_node_payload(payload: &[u8]) -> Option<DeleteNodeData> {
  if payload.len() < 8 {
    return None;
  }
  Some(DeleteNodeData {
    node_id: read_u64(payload, 0),
  })
}

#[derive(Debug, Clone, Copy)]
pub struct EdgeData {
  pub src: NodeId,
  pub etype: ETypeId,
  pub dst: NodeId,
}

pub fn parse_add_edge_payload(payload: &[u8]) -> Option<EdgeData> {
  if payload.len() < 20 {
    return None;
  }
  Some(EdgeData {
    src: read_u64(payload, 0),
    etype: read_u32(payload, 8),
    dst: read_u64(payload, 12),
  })
}

pub fn parse_delete_edge_payload(payload: &[u8]) -> Option<EdgeData> {
  parse_add_edge_payload(payload)
}

#[derive(Debug, Clone)]
pub struct DefineData {
  pub id: u32,
  pub name: String,
}

pub fn parse_define_payload(payload: &[u8]) -> Option<DefineData> {
  if payload.len() < 8 {
    return None;
  }
  let id = read_u32(payload, 0);
  let name_len = read_u32(payload, 4) as usize;
  if 8 + name_len > payload.len() {
    return None;
  }
  let name = String::from_utf8(payload[8..8 + name_len].to_vec()).ok()?;
  Some(DefineData { id, name })
}

#[derive(Debug, Clone)]
pub struct SetNodePropData {
  pub node_id: NodeId,
  pub key_id: PropKeyId,
  pub value: PropValue,
}

pub fn parse_set_node_prop_payload(payload: &[u8]) -> Option<SetNodePropData> {
  if payload.len() < 12 {
    return None;
  }
  let node_id = read_u64(payload, 0);
  let key_id = read_u32(payload, 8);
  let (value, _) = decode_prop_value(payload, 12)?;
  Some(SetNodePropData {
    node_id,
    key_id,
    value,
  })
}

#[derive(Debug, Clone, Copy)]
pub struct DelNodePropData {
  pub node_id: NodeId,
  pub key_id: PropKeyId,
}

pub fn parse_del_node_prop_payload(payload: &[u8]) -> Option<DelNodePropData> {
  if payload.len() < 12 {
    return None;
  }
  Some(DelNodePropData {
    node_id: read_u64(payload, 0),
    key_id: read_u32(payload, 8),
  })
}

#[derive(Debug, Clone)]
pub struct SetEdgePropData {
  pub src: NodeId,
  pub etype: ETypeId,
  pub dst: NodeId,
  pub key_id: PropKeyId,
  pub value: PropValue,
}

pub fn parse_set_edge_prop_payload(payload: &[u8]) -> Option<SetEdgePropData> {
  if payload.len() < 24 {
    return None;
  }
  let src = read_u64(payload, 0);
  let etype = read_u32(payload, 8);
  let dst = read_u64(payload, 12);
  let key_id = read_u32(payload, 20);
  let (value, _) = decode_prop_value(payload, 24)?;
  Some(SetEdgePropData {
    src,
    etype,
    dst,
    key_id,
    value,
  })
}

#[derive(Debug, Clone, Copy)]
pub struct DelEdgePropData {
  pub src: NodeId,
  pub etype: ETypeId,
  pub dst: NodeId,
  pub key_id: PropKeyId,
}

pub fn parse_del_edge_prop_payload(payload: &[u8]) -> Option<DelEdgePropData> {
  if payload.len() < 24 {
    return None;
  }
  Some(DelEdgePropData {
    src: read_u64(payload, 0),
    etype: read_u32(payload, 8),
    dst: read_u64(payload, 12),
    key_id: read_u32(payload, 20),
  })
}

#[derive(Debug, Clone, Copy)]
pub struct NodeLabelData {
  pub node_id: NodeId,
  pub label_id: LabelId,
}

pub fn parse_node_label_payload(payload: &[u8]) -> Option<NodeLabelData> {
  if payload.len() < 12 {
    return None;
  }
  Some(NodeLabelData {
    node_id: read_u64(payload, 0),
    label_id: read_u32(payload, 8),
  })
}

#[derive(Debug, Clone)]
pub struct SetNodeVectorData {
  pub node_id: NodeId,
  pub key_id: PropKeyId,
  pub vector: Vec<f32>,
}

pub fn parse_set_node_vector_payload(payload: &[u8]) -> Option<SetNodeVectorData> {
  if payload.len() < 16 {
    return None;
  }
  let node_id = read_u64(payload, 0);
  let key_id = read_u32(payload, 8);
  let dim = read_u32(payload, 12) as usize;
  if 16 + dim * 4 > payload.len() {
    return None;
  }
  let mut vector = Vec::with_capacity(dim);
  for i in 0..dim {
    vector.push(f32::from_bits(read_u32(payload, 16 + i * 4)));
  }
  Some(SetNodeVectorData {
    node_id,
    key_id,
    vector,
  })
}

pub fn parse_del_node_vector_payload(payload: &[u8]) -> Option<DelNodePropData> {
  parse_del_node_prop_payload(payload)
}

#[derive(Debug, Clone)]
pub struct BatchVectorsData {
  pub key_id: PropKeyId,
  pub entries: Vec<(NodeId, Vec<f32>)>,
}

pub fn parse_batch_vectors_payload(payload: &[u8]) -> Option<BatchVectorsData> {
  if payload.len() < 8 {
    return None;
  }
  let key_id = read_u32(payload, 0);
  let count = read_u32(payload, 4) as usize;
  let mut entries = Vec::with_capacity(count);
  let mut pos = 8;
  for _ in 0..count {
    if pos + 12 > payload.len() {
      return None;
    }
    let node_id = read_u64(payload, pos);
    let dim = read_u32(payload, pos + 8) as usize;
    pos += 12;
    if pos + dim * 4 > payload.len() {
      return None;
    }
    let mut vector = Vec::with_capacity(dim);
    for i in 0..dim {
      vector.push(f32::from_bits(read_u32(payload, pos + i * 4)));
    }
    pos += dim * 4;
    entries.push((node_id, vector));
  }
  Some(BatchVectorsData { key_id, entries })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn record_encode_parse_round_trip() {
    let record = WalRecord::new(
      WalRecordType::CreateNode,
      7,
      build_create_node_payload(42, Some("alice")),
    );
    let bytes = record.encode();
    assert_eq!(bytes.len(), record.encoded_len());
    assert_eq!(bytes.len() % 8, 0);

    let parsed = parse_wal_record(&bytes, 0).expect("parse");
    assert_eq!(parsed.record_type, WalRecordType::CreateNode);
    assert_eq!(parsed.txid, 7);
    assert_eq!(parsed.record_end, bytes.len());

    let data = parse_create_node_payload(&parsed.payload).expect("payload");
    assert_eq!(data.node_id, 42);
    assert_eq!(data.key.as_deref(), Some("alice"));
  }

  #[test]
  fn create_node_without_key() {
    let payload = build_create_node_payload(9, None);
    let data = parse_create_node_payload(&payload).unwrap();
    assert_eq!(data.node_id, 9);
    assert_eq!(data.key, None);
  }

  #[test]
  fn single_byte_flip_is_detected() {
    let record = WalRecord::new(
      WalRecordType::SetNodeProp,
      3,
      build_set_node_prop_payload(1, 2, &PropValue::String("value".to_string())),
    );
    let clean = record.encode();
    let padded = clean.len() - WAL_RECORD_TRAILER_SIZE;

    // Every byte covered by the CRC must invalidate the record.
    for i in 0..padded {
      let mut corrupted = clean.clone();
      corrupted[i] ^= 0x40;
      assert!(
        parse_wal_record(&corrupted, 0).is_none(),
        "flip at byte {i} went undetected"
      );
    }
  }

  #[test]
  fn truncated_record_is_rejected() {
    let record = WalRecord::new(WalRecordType::Commit, 11, build_commit_payload());
    let bytes = record.encode();
    for cut in 1..bytes.len() {
      assert!(parse_wal_record(&bytes[..bytes.len() - cut], 0).is_none());
    }
  }

  #[test]
  fn zeroed_space_is_end_of_log() {
    let buf = vec![0u8; 64];
    assert!(parse_wal_record(&buf, 0).is_none());
  }

  #[test]
  fn prop_value_wal_round_trip() {
    let values = vec![
      PropValue::Null,
      PropValue::Bool(true),
      PropValue::I64(-123456789),
      PropValue::F64(3.5),
      PropValue::String("héllo".to_string()),
      PropValue::VectorF32(vec![0.25, -1.5, 7.0]),
    ];
    for value in values {
      let payload = build_set_node_prop_payload(5, 6, &value);
      let data = parse_set_node_prop_payload(&payload).unwrap();
      assert_eq!(data.node_id, 5);
      assert_eq!(data.key_id, 6);
      assert_eq!(data.value, value);
    }
  }

  #[test]
  fn edge_prop_payload_round_trip() {
    let payload = build_set_edge_prop_payload(1, 2, 3, 4, &PropValue::I64(7));
    let data = parse_set_edge_prop_payload(&payload).unwrap();
    assert_eq!((data.src, data.etype, data.dst, data.key_id), (1, 2, 3, 4));
    assert_eq!(data.value, PropValue::I64(7));
  }

  #[test]
  fn batch_vectors_round_trip() {
    let entries = vec![(1u64, vec![1.0f32, 2.0]), (2, vec![3.0, 4.0])];
    let payload = build_batch_vectors_payload(9, &entries);
    let data = parse_batch_vectors_payload(&payload).unwrap();
    assert_eq!(data.key_id, 9);
    assert_eq!(data.entries, entries);
  }
}
