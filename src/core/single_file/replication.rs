//! Replication transport surface: snapshot blob and log frame export
//! on the primary, idempotent frame apply on the replica.
//!
//! Both directions speak JSON so admin endpoints can relay payloads
//! without understanding the binary formats.

use std::path::Path;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use crate::core::wal::record::{
  parse_add_edge_payload, parse_batch_vectors_payload, parse_create_node_payload,
  parse_define_payload, parse_del_edge_prop_payload, parse_del_node_prop_payload,
  parse_del_node_vector_payload, parse_delete_edge_payload, parse_delete_node_payload,
  parse_node_label_payload, parse_set_edge_prop_payload, parse_set_node_prop_payload,
  parse_set_node_vector_payload, parse_wal_record, ParsedWalRecord,
};
use crate::error::{RayError, Result};
use crate::replication::primary::{PrimaryReplicationStatus, PrimaryRetentionOutcome};
use crate::replication::replica::ReplicaReplicationStatus;
use crate::replication::transport::decode_commit_frame_payload;
use crate::replication::types::ReplicationCursor;
use crate::types::{PropValue, WalRecordType};
use crate::util::crc::crc32c;

use super::SingleFileDB;

const SNAPSHOT_TRANSPORT_FORMAT: &str = "raydb-file-copy-v1";

impl SingleFileDB {
  fn require_primary(&self) -> Result<&crate::replication::primary::PrimaryReplication> {
    self.primary_replication.as_ref().ok_or_else(|| {
      RayError::InvalidReplication("database is not opened in primary role".to_string())
    })
  }

  fn require_replica(&self) -> Result<&crate::replication::replica::ReplicaReplication> {
    self.replica_replication.as_ref().ok_or_else(|| {
      RayError::InvalidReplication("database is not opened in replica role".to_string())
    })
  }

  /// Primary replication status, if this handle is a primary.
  pub fn primary_replication_status(&self) -> Option<PrimaryReplicationStatus> {
    self.primary_replication.as_ref().map(|p| p.status())
  }

  /// Replica replication status, if this handle is a replica.
  pub fn replica_replication_status(&self) -> Option<ReplicaReplicationStatus> {
    self.replica_replication.as_ref().map(|r| r.status())
  }

  /// Bump the replication epoch. Durable in the header before the
  /// sidecar adopts it; every replica cursor becomes invalid.
  pub fn primary_promote_to_next_epoch(&self) -> Result<u64> {
    let primary = self.require_primary()?;
    self.require_not_read_only()?;

    let _commit_guard = self.commit_lock.lock();
    let new_epoch = {
      let mut pager = self.pager.lock();
      let mut header = self.header.write();
      header.epoch += 1;
      header.change_counter += 1;
      pager.write_page(0, &header.serialize_to_page())?;
      pager.sync()?;
      header.epoch
    };

    primary.adopt_epoch(new_epoch)?;
    Ok(new_epoch)
  }

  /// Record a replica's applied position for retention decisions.
  pub fn primary_report_replica_progress(
    &self,
    replica_id: &str,
    epoch: u64,
    applied_log_index: u64,
  ) -> Result<()> {
    self
      .require_primary()?
      .report_replica_progress(replica_id, epoch, applied_log_index)
  }

  /// Prune sidecar segments every replica has applied.
  pub fn primary_run_retention(&self) -> Result<PrimaryRetentionOutcome> {
    self.require_primary()?.run_retention()
  }

  /// Export snapshot metadata (and optionally the raw database bytes)
  /// for seeding a replica.
  pub fn primary_snapshot_transport_json(&self, include_data: bool) -> Result<String> {
    let status = self
      .primary_replication_status()
      .ok_or_else(|| RayError::InvalidReplication("database is not opened in primary role".to_string()))?;

    // Hold the commit lock so the copied bytes are one durable image.
    let _commit_guard = self.commit_lock.lock();
    let bytes = std::fs::read(&self.path)?;
    let checksum = crc32c(&bytes);

    let generated_at_ms = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .map(|d| d.as_millis() as u64)
      .unwrap_or(0);

    let payload = json!({
      "format": SNAPSHOT_TRANSPORT_FORMAT,
      "byte_length": bytes.len() as u64,
      "checksum_crc32c": format!("{checksum:08x}"),
      "generated_at_ms": generated_at_ms,
      "epoch": status.epoch,
      "head_log_index": status.head_log_index,
      "retained_floor": status.retained_floor,
      "start_cursor": ReplicationCursor::new(status.epoch, status.head_log_index, 0, 0).to_string(),
      "data_base64": include_data.then(|| BASE64_STANDARD.encode(&bytes)),
    });

    serde_json::to_string(&payload)
      .map_err(|e| RayError::Serialization(format!("encode snapshot transport: {e}")))
  }

  /// Export log frames after `cursor` as transport JSON.
  pub fn primary_log_transport_json(
    &self,
    cursor: Option<&str>,
    max_frames: usize,
    max_bytes: usize,
    include_payload: bool,
  ) -> Result<String> {
    let primary = self.require_primary()?;

    let parsed_cursor = match cursor {
      Some(raw) if !raw.trim().is_empty() => Some(ReplicationCursor::from_str(raw)?),
      _ => None,
    };

    let (frames, next_cursor, eof) = primary.read_frames(parsed_cursor, max_frames, max_bytes)?;
    let status = primary.status();

    let mut total_bytes = 0u64;
    let frame_values: Vec<Value> = frames
      .iter()
      .map(|(position, frame)| {
        let frame_len = frame.frame_len();
        total_bytes += frame_len;
        json!({
          "epoch": frame.epoch,
          "log_index": frame.log_index,
          "segment_id": position.segment_id,
          "segment_offset": position.segment_offset - frame_len,
          "bytes": frame_len,
          "payload_base64": include_payload.then(|| BASE64_STANDARD.encode(&frame.payload)),
        })
      })
      .collect();

    let payload = json!({
      "epoch": status.epoch,
      "head_log_index": status.head_log_index,
      "retained_floor": status.retained_floor,
      "cursor": parsed_cursor.map(|c| c.to_string()),
      "next_cursor": next_cursor.map(|c| c.to_string()),
      "eof": eof,
      "frame_count": frame_values.len(),
      "total_bytes": total_bytes,
      "frames": frame_values,
    });

    serde_json::to_string(&payload)
      .map_err(|e| RayError::Serialization(format!("encode log transport: {e}")))
  }

  /// Anchor this replica's cursor at the position a snapshot blob was
  /// taken at. Call once after installing the blob.
  pub fn replica_anchor_from_snapshot_json(&self, transport_json: &str) -> Result<()> {
    let replica = self.require_replica()?;
    let value: Value = serde_json::from_str(transport_json)
      .map_err(|e| RayError::Serialization(format!("decode snapshot transport: {e}")))?;

    let format = value["format"].as_str().unwrap_or_default();
    if format != SNAPSHOT_TRANSPORT_FORMAT {
      return Err(RayError::InvalidReplication(format!(
        "unsupported snapshot transport format {format:?}"
      )));
    }
    let epoch = value["epoch"]
      .as_u64()
      .ok_or_else(|| RayError::InvalidReplication("snapshot transport missing epoch".to_string()))?;
    let head_log_index = value["head_log_index"].as_u64().ok_or_else(|| {
      RayError::InvalidReplication("snapshot transport missing head_log_index".to_string())
    })?;

    replica.anchor(epoch, head_log_index)
  }

  /// Apply a page of exported log frames. Frames at or below the
  /// applied cursor replay as no-ops; an epoch change forces a reseed.
  /// Returns the number of frames applied.
  pub fn replica_apply_log_transport_json(&self, transport_json: &str) -> Result<usize> {
    let replica = self.require_replica()?;
    self.require_not_read_only()?;

    let value: Value = serde_json::from_str(transport_json)
      .map_err(|e| RayError::Serialization(format!("decode log transport: {e}")))?;
    let frames = value["frames"]
      .as_array()
      .ok_or_else(|| RayError::InvalidReplication("log transport missing frames".to_string()))?;

    let mut applied = 0usize;
    for frame in frames {
      let epoch = frame["epoch"]
        .as_u64()
        .ok_or_else(|| RayError::InvalidReplication("frame missing epoch".to_string()))?;
      let log_index = frame["log_index"]
        .as_u64()
        .ok_or_else(|| RayError::InvalidReplication("frame missing log_index".to_string()))?;

      let (applied_epoch, applied_log_index) = replica.applied_position();
      if (epoch, log_index) <= (applied_epoch, applied_log_index) {
        continue;
      }
      if epoch != applied_epoch {
        let message = format!(
          "frame epoch {epoch} does not match applied epoch {applied_epoch}; reseed required"
        );
        replica.mark_error(message.clone(), true)?;
        return Err(RayError::InvalidReplication(message));
      }

      let payload_base64 = frame["payload_base64"].as_str().ok_or_else(|| {
        RayError::InvalidReplication("frame payload_base64 missing; export with include_payload".to_string())
      })?;
      let payload = BASE64_STANDARD
        .decode(payload_base64)
        .map_err(|e| RayError::InvalidReplication(format!("frame payload base64: {e}")))?;

      let decoded = decode_commit_frame_payload(&payload)?;
      let records = parse_frame_wal_records(&decoded.wal_bytes)?;

      let guard = self.begin_guard(false)?;
      for record in &records {
        if let Err(error) = apply_wal_record_idempotent(self, record) {
          drop(guard);
          let message = format!("replica apply failed at {epoch}:{log_index}: {error}");
          replica.mark_error(message.clone(), false)?;
          return Err(RayError::InvalidReplication(message));
        }
      }
      guard.commit()?;

      replica.mark_applied(epoch, log_index)?;
      applied += 1;
    }

    Ok(applied)
  }
}

/// Write the raw database bytes from a snapshot transport blob.
/// Verifies the embedded checksum before touching the target path.
pub fn install_replica_from_snapshot_json(
  path: impl AsRef<Path>,
  transport_json: &str,
) -> Result<()> {
  let value: Value = serde_json::from_str(transport_json)
    .map_err(|e| RayError::Serialization(format!("decode snapshot transport: {e}")))?;

  let format = value["format"].as_str().unwrap_or_default();
  if format != SNAPSHOT_TRANSPORT_FORMAT {
    return Err(RayError::InvalidReplication(format!(
      "unsupported snapshot transport format {format:?}"
    )));
  }

  let data_base64 = value["data_base64"].as_str().ok_or_else(|| {
    RayError::InvalidReplication("snapshot transport has no data; export with include_data".to_string())
  })?;
  let bytes = BASE64_STANDARD
    .decode(data_base64)
    .map_err(|e| RayError::InvalidReplication(format!("snapshot base64: {e}")))?;

  if let Some(declared) = value["byte_length"].as_u64() {
    if declared != bytes.len() as u64 {
      return Err(RayError::InvalidReplication(format!(
        "snapshot length mismatch: declared {declared}, got {}",
        bytes.len()
      )));
    }
  }
  if let Some(expected) = value["checksum_crc32c"].as_str() {
    let computed = format!("{:08x}", crc32c(&bytes));
    if expected != computed {
      return Err(RayError::InvalidReplication(format!(
        "snapshot checksum mismatch: declared {expected}, computed {computed}"
      )));
    }
  }

  std::fs::write(path.as_ref(), &bytes)?;
  Ok(())
}

fn parse_frame_wal_records(wal_bytes: &[u8]) -> Result<Vec<ParsedWalRecord>> {
  let mut records = Vec::new();
  let mut offset = 0usize;
  while offset < wal_bytes.len() {
    let record = parse_wal_record(wal_bytes, offset).ok_or_else(|| {
      RayError::InvalidReplication(format!(
        "invalid WAL payload in replication frame at offset {offset}"
      ))
    })?;
    if record.record_end <= offset {
      return Err(RayError::InvalidReplication(
        "non-progressing WAL record parse in replication payload".to_string(),
      ));
    }
    offset = record.record_end;
    records.push(record);
  }
  Ok(records)
}

/// Apply one WAL record so that replaying an already-applied frame is a
/// no-op.
fn apply_wal_record_idempotent(db: &SingleFileDB, record: &ParsedWalRecord) -> Result<()> {
  match record.record_type {
    WalRecordType::Begin | WalRecordType::Commit | WalRecordType::Abort => Ok(()),

    WalRecordType::CreateNode => {
      let data = parse_create_node_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid CreateNode replication payload".to_string())
      })?;
      if db.node_exists(data.node_id) {
        if db.node_key(data.node_id) == data.key {
          return Ok(());
        }
        return Err(RayError::InvalidReplication(format!(
          "create-node replay key mismatch for node {}",
          data.node_id
        )));
      }
      db.create_node_with_id(data.node_id, data.key.as_deref())?;
      Ok(())
    }
    WalRecordType::DeleteNode => {
      let data = parse_delete_node_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid DeleteNode replication payload".to_string())
      })?;
      if db.node_exists(data.node_id) {
        db.delete_node(data.node_id)?;
      }
      Ok(())
    }

    WalRecordType::AddEdge => {
      let data = parse_add_edge_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid AddEdge replication payload".to_string())
      })?;
      if !db.edge_exists(data.src, data.etype, data.dst) {
        db.add_edge(data.src, data.etype, data.dst)?;
      }
      Ok(())
    }
    WalRecordType::DeleteEdge => {
      let data = parse_delete_edge_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid DeleteEdge replication payload".to_string())
      })?;
      if db.edge_exists(data.src, data.etype, data.dst) {
        db.delete_edge(data.src, data.etype, data.dst)?;
      }
      Ok(())
    }

    WalRecordType::DefineLabel => {
      let data = parse_define_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid DefineLabel replication payload".to_string())
      })?;
      db.define_label_with_id(data.id, &data.name)
    }
    WalRecordType::DefineEtype => {
      let data = parse_define_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid DefineEtype replication payload".to_string())
      })?;
      db.define_etype_with_id(data.id, &data.name)
    }
    WalRecordType::DefinePropkey => {
      let data = parse_define_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid DefinePropkey replication payload".to_string())
      })?;
      db.define_propkey_with_id(data.id, &data.name)
    }

    WalRecordType::SetNodeProp => {
      let data = parse_set_node_prop_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid SetNodeProp replication payload".to_string())
      })?;
      if db.node_prop(data.node_id, data.key_id).as_ref() != Some(&data.value) {
        db.set_node_prop(data.node_id, data.key_id, data.value)?;
      }
      Ok(())
    }
    WalRecordType::DelNodeProp => {
      let data = parse_del_node_prop_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid DelNodeProp replication payload".to_string())
      })?;
      if db.node_prop(data.node_id, data.key_id).is_some() {
        db.delete_node_prop(data.node_id, data.key_id)?;
      }
      Ok(())
    }
    WalRecordType::SetEdgeProp => {
      let data = parse_set_edge_prop_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid SetEdgeProp replication payload".to_string())
      })?;
      if db.edge_prop(data.src, data.etype, data.dst, data.key_id).as_ref() != Some(&data.value) {
        db.set_edge_prop(data.src, data.etype, data.dst, data.key_id, data.value)?;
      }
      Ok(())
    }
    WalRecordType::DelEdgeProp => {
      let data = parse_del_edge_prop_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid DelEdgeProp replication payload".to_string())
      })?;
      if db
        .edge_prop(data.src, data.etype, data.dst, data.key_id)
        .is_some()
      {
        db.delete_edge_prop(data.src, data.etype, data.dst, data.key_id)?;
      }
      Ok(())
    }

    WalRecordType::AddNodeLabel => {
      let data = parse_node_label_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid AddNodeLabel replication payload".to_string())
      })?;
      if !db.node_has_label(data.node_id, data.label_id) {
        db.add_node_label(data.node_id, data.label_id)?;
      }
      Ok(())
    }
    WalRecordType::RemoveNodeLabel => {
      let data = parse_node_label_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid RemoveNodeLabel replication payload".to_string())
      })?;
      if db.node_has_label(data.node_id, data.label_id) {
        db.remove_node_label(data.node_id, data.label_id)?;
      }
      Ok(())
    }

    WalRecordType::SetNodeVector => {
      let data = parse_set_node_vector_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid SetNodeVector replication payload".to_string())
      })?;
      if db.node_vector(data.node_id, data.key_id).as_deref() != Some(data.vector.as_slice()) {
        db.set_node_vector(data.node_id, data.key_id, &data.vector)?;
      }
      Ok(())
    }
    WalRecordType::DelNodeVector => {
      let data = parse_del_node_vector_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid DelNodeVector replication payload".to_string())
      })?;
      if db.node_vector(data.node_id, data.key_id).is_some() {
        db.delete_node_vector(data.node_id, data.key_id)?;
      }
      Ok(())
    }
    WalRecordType::BatchVectors => {
      let data = parse_batch_vectors_payload(&record.payload).ok_or_else(|| {
        RayError::InvalidReplication("invalid BatchVectors replication payload".to_string())
      })?;
      for (node_id, vector) in data.entries {
        if db.node_vector(node_id, data.key_id).as_deref() != Some(vector.as_slice()) {
          db.set_node_prop(node_id, data.key_id, PropValue::VectorF32(vector))?;
        }
      }
      Ok(())
    }

    // Index maintenance markers carry no logical graph state; replica
    // correctness is defined by the mutation records alone.
    WalRecordType::SealFragment | WalRecordType::CompactFragments => Ok(()),
  }
}
