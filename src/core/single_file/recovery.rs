//! Crash recovery: WAL scanning and replay into the delta.
//!
//! On open, the byte range `[wal_tail, wal_head)` is decoded into
//! records. Transactions are grouped by txid; only those terminated by
//! a `COMMIT` are replayed, in ascending txid order. A CRC failure or
//! truncation stops the scan: everything after that point is dropped.
//! Replay is idempotent because it rebuilds a fresh delta each time.

use std::collections::HashMap;

use crate::core::delta::DeltaState;
use crate::core::header::DbHeaderV1;
use crate::core::pager::FilePager;
use crate::core::snapshot::reader::SnapshotData;
use crate::core::wal::record::{
  parse_batch_vectors_payload, parse_create_node_payload, parse_define_payload,
  parse_del_edge_prop_payload, parse_del_node_prop_payload, parse_del_node_vector_payload,
  parse_delete_edge_payload, parse_delete_node_payload, parse_add_edge_payload,
  parse_node_label_payload, parse_set_edge_prop_payload, parse_set_node_prop_payload,
  parse_set_node_vector_payload, parse_wal_record, ParsedWalRecord,
};
use crate::error::Result;
use crate::types::*;

/// Read and decode all live WAL records.
///
/// Pages past a truncated end-of-file read as zeros; the per-record CRC
/// decides where the trustworthy prefix ends. Returns the records and
/// the logical offset one past the last valid record: when the scan
/// stops early the caller rewinds `wal_head` there so later commits
/// keep the log contiguous.
pub fn scan_wal_records(
  pager: &mut FilePager,
  header: &DbHeaderV1,
) -> Result<(Vec<ParsedWalRecord>, u64)> {
  let capacity = header.wal_bytes();
  if capacity == 0 || header.wal_head == header.wal_tail {
    return Ok((Vec::new(), header.wal_head));
  }

  // Pull the whole ring into memory, then linearize [tail, head).
  let mut ring = vec![0u8; capacity as usize];
  for p in 0..header.wal_page_count {
    let data = pager.read_page_or_zero(header.wal_start_page + p)?;
    let offset = (p * header.page_size as u64) as usize;
    ring[offset..offset + header.page_size as usize].copy_from_slice(&data);
  }

  let live = (header.wal_head - header.wal_tail) as usize;
  let phys_start = (header.wal_tail % capacity) as usize;
  let mut stream = Vec::with_capacity(live);
  let first = live.min(capacity as usize - phys_start);
  stream.extend_from_slice(&ring[phys_start..phys_start + first]);
  if first < live {
    stream.extend_from_slice(&ring[..live - first]);
  }

  let mut records = Vec::new();
  let mut offset = 0usize;
  while offset < stream.len() {
    match parse_wal_record(&stream, offset) {
      Some(record) => {
        offset = record.record_end;
        records.push(record);
      }
      None => {
        log::warn!(
          "WAL scan stopped at byte {} of {}: torn or corrupt record, discarding suffix",
          offset,
          stream.len()
        );
        break;
      }
    }
  }

  Ok((records, header.wal_tail + offset as u64))
}

/// Group scanned records by transaction and keep only committed ones,
/// ordered by ascending txid.
pub fn committed_transactions(records: &[ParsedWalRecord]) -> Vec<(TxId, Vec<&ParsedWalRecord>)> {
  let mut by_tx: HashMap<TxId, (bool, Vec<&ParsedWalRecord>)> = HashMap::new();

  for record in records {
    let entry = by_tx.entry(record.txid).or_default();
    match record.record_type {
      WalRecordType::Commit => entry.0 = true,
      WalRecordType::Abort => {
        entry.0 = false;
        entry.1.clear();
      }
      WalRecordType::Begin => {}
      _ => entry.1.push(record),
    }
  }

  let mut committed: Vec<(TxId, Vec<&ParsedWalRecord>)> = by_tx
    .into_iter()
    .filter(|(_, (has_commit, _))| *has_commit)
    .map(|(txid, (_, records))| (txid, records))
    .collect();
  committed.sort_by_key(|(txid, _)| *txid);
  committed
}

/// Mutable state recovery replays into.
pub struct RecoveryState<'a> {
  pub delta: &'a mut DeltaState,
  pub snapshot: Option<&'a SnapshotData>,
  pub next_node_id: &'a mut NodeId,
  pub next_label_id: &'a mut LabelId,
  pub next_etype_id: &'a mut ETypeId,
  pub next_propkey_id: &'a mut PropKeyId,
  pub label_names: &'a mut HashMap<String, LabelId>,
  pub label_ids: &'a mut HashMap<LabelId, String>,
  pub etype_names: &'a mut HashMap<String, ETypeId>,
  pub etype_ids: &'a mut HashMap<ETypeId, String>,
  pub propkey_names: &'a mut HashMap<String, PropKeyId>,
  pub propkey_ids: &'a mut HashMap<PropKeyId, String>,
}

impl RecoveryState<'_> {
  fn node_key_for_delete(&self, node_id: NodeId) -> Option<String> {
    if let Some(node_delta) = self.delta.created_nodes.get(&node_id) {
      return node_delta.key.clone();
    }
    let snapshot = self.snapshot?;
    let phys = snapshot.phys_node(node_id)?;
    snapshot.node_key(phys)
  }

  /// Apply one committed record. Unparseable payloads are skipped with
  /// a warning; the record already passed its CRC, so this only guards
  /// against logic bugs, not bit rot.
  pub fn replay(&mut self, record: &ParsedWalRecord) {
    match record.record_type {
      WalRecordType::Begin | WalRecordType::Commit | WalRecordType::Abort => {}

      WalRecordType::CreateNode => {
        if let Some(data) = parse_create_node_payload(&record.payload) {
          self.delta.create_node(data.node_id, data.key.as_deref());
          let next = data.node_id.saturating_add(1);
          if *self.next_node_id < next {
            *self.next_node_id = next;
          }
        }
      }
      WalRecordType::DeleteNode => {
        if let Some(data) = parse_delete_node_payload(&record.payload) {
          let key = self.node_key_for_delete(data.node_id);
          self.delta.delete_node(data.node_id, key.as_deref());
        }
      }

      WalRecordType::AddEdge => {
        if let Some(data) = parse_add_edge_payload(&record.payload) {
          self.delta.add_edge(data.src, data.etype, data.dst);
        }
      }
      WalRecordType::DeleteEdge => {
        if let Some(data) = parse_delete_edge_payload(&record.payload) {
          self.delta.delete_edge(data.src, data.etype, data.dst);
        }
      }

      WalRecordType::DefineLabel => {
        if let Some(data) = parse_define_payload(&record.payload) {
          self.delta.define_label(data.id, &data.name);
          self.label_names.insert(data.name.clone(), data.id);
          self.label_ids.insert(data.id, data.name);
          let next = data.id.saturating_add(1);
          if *self.next_label_id < next {
            *self.next_label_id = next;
          }
        }
      }
      WalRecordType::DefineEtype => {
        if let Some(data) = parse_define_payload(&record.payload) {
          self.delta.define_etype(data.id, &data.name);
          self.etype_names.insert(data.name.clone(), data.id);
          self.etype_ids.insert(data.id, data.name);
          let next = data.id.saturating_add(1);
          if *self.next_etype_id < next {
            *self.next_etype_id = next;
          }
        }
      }
      WalRecordType::DefinePropkey => {
        if let Some(data) = parse_define_payload(&record.payload) {
          self.delta.define_propkey(data.id, &data.name);
          self.propkey_names.insert(data.name.clone(), data.id);
          self.propkey_ids.insert(data.id, data.name);
          let next = data.id.saturating_add(1);
          if *self.next_propkey_id < next {
            *self.next_propkey_id = next;
          }
        }
      }

      WalRecordType::SetNodeProp => {
        if let Some(data) = parse_set_node_prop_payload(&record.payload) {
          self.delta.set_node_prop(data.node_id, data.key_id, data.value);
        }
      }
      WalRecordType::DelNodeProp => {
        if let Some(data) = parse_del_node_prop_payload(&record.payload) {
          self.delta.delete_node_prop(data.node_id, data.key_id);
        }
      }
      WalRecordType::SetEdgeProp => {
        if let Some(data) = parse_set_edge_prop_payload(&record.payload) {
          self
            .delta
            .set_edge_prop(data.src, data.etype, data.dst, data.key_id, data.value);
        }
      }
      WalRecordType::DelEdgeProp => {
        if let Some(data) = parse_del_edge_prop_payload(&record.payload) {
          self
            .delta
            .delete_edge_prop(data.src, data.etype, data.dst, data.key_id);
        }
      }

      WalRecordType::AddNodeLabel => {
        if let Some(data) = parse_node_label_payload(&record.payload) {
          self.delta.add_node_label(data.node_id, data.label_id);
        }
      }
      WalRecordType::RemoveNodeLabel => {
        if let Some(data) = parse_node_label_payload(&record.payload) {
          self.delta.remove_node_label(data.node_id, data.label_id);
        }
      }

      WalRecordType::SetNodeVector => {
        if let Some(data) = parse_set_node_vector_payload(&record.payload) {
          self
            .delta
            .set_node_prop(data.node_id, data.key_id, PropValue::VectorF32(data.vector));
        }
      }
      WalRecordType::DelNodeVector => {
        if let Some(data) = parse_del_node_vector_payload(&record.payload) {
          self.delta.delete_node_prop(data.node_id, data.key_id);
        }
      }
      WalRecordType::BatchVectors => {
        if let Some(data) = parse_batch_vectors_payload(&record.payload) {
          for (node_id, vector) in data.entries {
            self
              .delta
              .set_node_prop(node_id, data.key_id, PropValue::VectorF32(vector));
          }
        }
      }

      // Vector-index maintenance markers; no logical graph state.
      WalRecordType::SealFragment | WalRecordType::CompactFragments => {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::wal::record::{
    build_begin_payload, build_commit_payload, build_create_node_payload, WalRecord,
  };

  fn encode_stream(records: &[WalRecord]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for record in records {
      bytes.extend_from_slice(&record.encode());
    }
    bytes
  }

  fn parse_stream(bytes: &[u8]) -> Vec<ParsedWalRecord> {
    let mut records = Vec::new();
    let mut offset = 0;
    while let Some(record) = parse_wal_record(bytes, offset) {
      offset = record.record_end;
      records.push(record);
    }
    records
  }

  #[test]
  fn uncommitted_transactions_are_dropped() {
    let stream = encode_stream(&[
      WalRecord::new(WalRecordType::Begin, 1, build_begin_payload()),
      WalRecord::new(
        WalRecordType::CreateNode,
        1,
        build_create_node_payload(1, Some("a")),
      ),
      WalRecord::new(WalRecordType::Commit, 1, build_commit_payload()),
      WalRecord::new(WalRecordType::Begin, 2, build_begin_payload()),
      WalRecord::new(
        WalRecordType::CreateNode,
        2,
        build_create_node_payload(2, Some("b")),
      ),
      // no COMMIT for tx 2
    ]);

    let records = parse_stream(&stream);
    let committed = committed_transactions(&records);
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].0, 1);
    assert_eq!(committed[0].1.len(), 1);
  }

  #[test]
  fn aborted_transactions_are_dropped() {
    let stream = encode_stream(&[
      WalRecord::new(WalRecordType::Begin, 3, build_begin_payload()),
      WalRecord::new(
        WalRecordType::CreateNode,
        3,
        build_create_node_payload(5, None),
      ),
      WalRecord::new(WalRecordType::Abort, 3, Vec::new()),
    ]);

    let records = parse_stream(&stream);
    assert!(committed_transactions(&records).is_empty());
  }

  #[test]
  fn committed_transactions_sorted_by_txid() {
    let stream = encode_stream(&[
      WalRecord::new(WalRecordType::Begin, 9, build_begin_payload()),
      WalRecord::new(
        WalRecordType::CreateNode,
        9,
        build_create_node_payload(9, None),
      ),
      WalRecord::new(WalRecordType::Commit, 9, build_commit_payload()),
      WalRecord::new(WalRecordType::Begin, 4, build_begin_payload()),
      WalRecord::new(
        WalRecordType::CreateNode,
        4,
        build_create_node_payload(4, None),
      ),
      WalRecord::new(WalRecordType::Commit, 4, build_commit_payload()),
    ]);

    let records = parse_stream(&stream);
    let committed = committed_transactions(&records);
    assert_eq!(committed.len(), 2);
    assert_eq!(committed[0].0, 4);
    assert_eq!(committed[1].0, 9);
  }

  #[test]
  fn replay_advances_id_counters() {
    let mut delta = DeltaState::new();
    let mut next_node_id = 1u64;
    let mut next_label_id = 1u32;
    let mut next_etype_id = 1u32;
    let mut next_propkey_id = 1u32;
    let mut label_names = HashMap::new();
    let mut label_ids = HashMap::new();
    let mut etype_names = HashMap::new();
    let mut etype_ids = HashMap::new();
    let mut propkey_names = HashMap::new();
    let mut propkey_ids = HashMap::new();

    let mut state = RecoveryState {
      delta: &mut delta,
      snapshot: None,
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

    let stream = encode_stream(&[WalRecord::new(
      WalRecordType::CreateNode,
      1,
      build_create_node_payload(41, Some("n41")),
    )]);
    for record in parse_stream(&stream) {
      state.replay(&record);
    }

    assert_eq!(next_node_id, 42);
    assert!(delta.is_node_created(41));
    assert_eq!(delta.key_index.get("n41"), Some(&41));
  }
}
