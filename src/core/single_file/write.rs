//! Write operations: create/delete nodes, add/delete edges, property
//! and label mutations, dictionary definitions, vector values.
//!
//! Every operation requires an active write transaction. The mutation
//! is staged into the transaction's pending delta and its WAL record is
//! queued; nothing reaches the file before commit.

use crate::core::wal::record::{
  build_add_edge_payload, build_add_node_label_payload, build_batch_vectors_payload,
  build_create_node_payload, build_define_etype_payload, build_define_label_payload,
  build_define_propkey_payload, build_del_edge_prop_payload, build_del_node_prop_payload,
  build_del_node_vector_payload, build_delete_edge_payload, build_delete_node_payload,
  build_remove_node_label_payload, build_set_edge_prop_payload, build_set_node_prop_payload,
  build_set_node_vector_payload, WalRecord,
};
use crate::error::{RayError, Result};
use crate::types::*;

use super::SingleFileDB;

impl SingleFileDB {
  // ==========================================================================
  // Node operations
  // ==========================================================================

  /// Create a node, optionally with a unique external key.
  pub fn create_node(&self, key: Option<&str>) -> Result<NodeId> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if let Some(key) = key {
      if key.is_empty() {
        return Err(RayError::InvalidArgument("node key must be non-empty".to_string()));
      }
      if self.node_by_key_inner(Some(&tx.pending), key).is_some() {
        return Err(RayError::AlreadyExists(format!("node key {key:?}")));
      }
    }

    let node_id = self.alloc_node_id();
    tx.pending_records.push(WalRecord::new(
      WalRecordType::CreateNode,
      tx.txid,
      build_create_node_payload(node_id, key),
    ));
    tx.pending.create_node(node_id, key);
    Ok(node_id)
  }

  /// Create a node with a caller-chosen ID (replication apply path).
  pub fn create_node_with_id(&self, node_id: NodeId, key: Option<&str>) -> Result<NodeId> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if self.node_exists_inner(Some(&tx.pending), node_id) {
      return Err(RayError::AlreadyExists(format!("node {node_id}")));
    }
    if let Some(key) = key {
      if self.node_by_key_inner(Some(&tx.pending), key).is_some() {
        return Err(RayError::AlreadyExists(format!("node key {key:?}")));
      }
    }

    self.reserve_node_id(node_id);
    tx.pending_records.push(WalRecord::new(
      WalRecordType::CreateNode,
      tx.txid,
      build_create_node_payload(node_id, key),
    ));
    tx.pending.create_node(node_id, key);
    Ok(node_id)
  }

  /// Delete a node. Its edges disappear with it under the merged view.
  pub fn delete_node(&self, node_id: NodeId) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if !self.node_exists_inner(Some(&tx.pending), node_id) {
      return Err(RayError::NotFound(format!("node {node_id}")));
    }
    let key = self.node_key_inner(Some(&tx.pending), node_id);

    tx.pending_records.push(WalRecord::new(
      WalRecordType::DeleteNode,
      tx.txid,
      build_delete_node_payload(node_id),
    ));
    tx.pending.delete_node(node_id, key.as_deref());
    Ok(())
  }

  // ==========================================================================
  // Edge operations
  // ==========================================================================

  /// Add a directed edge. Both endpoints must be live; duplicate edges
  /// collapse (the triple is a set member, not a multi-edge).
  pub fn add_edge(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if !self.node_exists_inner(Some(&tx.pending), src) {
      return Err(RayError::NotFound(format!("edge source node {src}")));
    }
    if !self.node_exists_inner(Some(&tx.pending), dst) {
      return Err(RayError::NotFound(format!("edge destination node {dst}")));
    }
    if self.edge_exists_inner(Some(&tx.pending), src, etype, dst) {
      return Ok(());
    }

    tx.pending_records.push(WalRecord::new(
      WalRecordType::AddEdge,
      tx.txid,
      build_add_edge_payload(src, etype, dst),
    ));
    tx.pending.add_edge(src, etype, dst);
    Ok(())
  }

  /// Add an edge by type name, defining the type if needed.
  pub fn add_edge_by_name(&self, src: NodeId, etype_name: &str, dst: NodeId) -> Result<()> {
    let etype = self.define_etype(etype_name)?;
    self.add_edge(src, etype, dst)
  }

  /// Delete an edge.
  pub fn delete_edge(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if !self.edge_exists_inner(Some(&tx.pending), src, etype, dst) {
      return Err(RayError::NotFound(format!("edge ({src})-[{etype}]->({dst})")));
    }

    tx.pending_records.push(WalRecord::new(
      WalRecordType::DeleteEdge,
      tx.txid,
      build_delete_edge_payload(src, etype, dst),
    ));
    tx.pending.delete_edge(src, etype, dst);
    Ok(())
  }

  // ==========================================================================
  // Node properties
  // ==========================================================================

  /// Set a node property.
  pub fn set_node_prop(&self, node_id: NodeId, key_id: PropKeyId, value: PropValue) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if !self.node_exists_inner(Some(&tx.pending), node_id) {
      return Err(RayError::NotFound(format!("node {node_id}")));
    }

    tx.pending_records.push(WalRecord::new(
      WalRecordType::SetNodeProp,
      tx.txid,
      build_set_node_prop_payload(node_id, key_id, &value),
    ));
    tx.pending.set_node_prop(node_id, key_id, value);
    Ok(())
  }

  /// Set a node property by key name, defining the key if needed.
  pub fn set_node_prop_by_name(
    &self,
    node_id: NodeId,
    key_name: &str,
    value: PropValue,
  ) -> Result<()> {
    let key_id = self.define_propkey(key_name)?;
    self.set_node_prop(node_id, key_id, value)
  }

  /// Clear a node property. Clearing an absent property is a no-op.
  pub fn delete_node_prop(&self, node_id: NodeId, key_id: PropKeyId) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if !self.node_exists_inner(Some(&tx.pending), node_id) {
      return Err(RayError::NotFound(format!("node {node_id}")));
    }

    tx.pending_records.push(WalRecord::new(
      WalRecordType::DelNodeProp,
      tx.txid,
      build_del_node_prop_payload(node_id, key_id),
    ));
    tx.pending.delete_node_prop(node_id, key_id);
    Ok(())
  }

  // ==========================================================================
  // Edge properties
  // ==========================================================================

  /// Set an edge property.
  pub fn set_edge_prop(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
    value: PropValue,
  ) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if !self.edge_exists_inner(Some(&tx.pending), src, etype, dst) {
      return Err(RayError::NotFound(format!("edge ({src})-[{etype}]->({dst})")));
    }

    tx.pending_records.push(WalRecord::new(
      WalRecordType::SetEdgeProp,
      tx.txid,
      build_set_edge_prop_payload(src, etype, dst, key_id, &value),
    ));
    tx.pending.set_edge_prop(src, etype, dst, key_id, value);
    Ok(())
  }

  /// Clear an edge property.
  pub fn delete_edge_prop(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
  ) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if !self.edge_exists_inner(Some(&tx.pending), src, etype, dst) {
      return Err(RayError::NotFound(format!("edge ({src})-[{etype}]->({dst})")));
    }

    tx.pending_records.push(WalRecord::new(
      WalRecordType::DelEdgeProp,
      tx.txid,
      build_del_edge_prop_payload(src, etype, dst, key_id),
    ));
    tx.pending.delete_edge_prop(src, etype, dst, key_id);
    Ok(())
  }

  // ==========================================================================
  // Node labels
  // ==========================================================================

  /// Attach a label to a node.
  pub fn add_node_label(&self, node_id: NodeId, label_id: LabelId) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if !self.node_exists_inner(Some(&tx.pending), node_id) {
      return Err(RayError::NotFound(format!("node {node_id}")));
    }

    tx.pending_records.push(WalRecord::new(
      WalRecordType::AddNodeLabel,
      tx.txid,
      build_add_node_label_payload(node_id, label_id),
    ));
    tx.pending.add_node_label(node_id, label_id);
    Ok(())
  }

  pub fn add_node_label_by_name(&self, node_id: NodeId, label_name: &str) -> Result<()> {
    let label_id = self.define_label(label_name)?;
    self.add_node_label(node_id, label_id)
  }

  /// Detach a label from a node.
  pub fn remove_node_label(&self, node_id: NodeId, label_id: LabelId) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if !self.node_exists_inner(Some(&tx.pending), node_id) {
      return Err(RayError::NotFound(format!("node {node_id}")));
    }

    tx.pending_records.push(WalRecord::new(
      WalRecordType::RemoveNodeLabel,
      tx.txid,
      build_remove_node_label_payload(node_id, label_id),
    ));
    tx.pending.remove_node_label(node_id, label_id);
    Ok(())
  }

  pub fn remove_node_label_by_name(&self, node_id: NodeId, label_name: &str) -> Result<()> {
    match self.label_id(label_name) {
      Some(label_id) => self.remove_node_label(node_id, label_id),
      None => Ok(()),
    }
  }

  // ==========================================================================
  // Vector values
  // ==========================================================================

  /// Store a float32 vector as a node property value.
  pub fn set_node_vector(&self, node_id: NodeId, key_id: PropKeyId, vector: &[f32]) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if !self.node_exists_inner(Some(&tx.pending), node_id) {
      return Err(RayError::NotFound(format!("node {node_id}")));
    }

    tx.pending_records.push(WalRecord::new(
      WalRecordType::SetNodeVector,
      tx.txid,
      build_set_node_vector_payload(node_id, key_id, vector),
    ));
    tx.pending
      .set_node_prop(node_id, key_id, PropValue::VectorF32(vector.to_vec()));
    Ok(())
  }

  /// Remove a vector property value.
  pub fn delete_node_vector(&self, node_id: NodeId, key_id: PropKeyId) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if !self.node_exists_inner(Some(&tx.pending), node_id) {
      return Err(RayError::NotFound(format!("node {node_id}")));
    }

    tx.pending_records.push(WalRecord::new(
      WalRecordType::DelNodeVector,
      tx.txid,
      build_del_node_vector_payload(node_id, key_id),
    ));
    tx.pending.delete_node_prop(node_id, key_id);
    Ok(())
  }

  /// Store many vectors under one property key in a single WAL record.
  pub fn set_node_vectors_batch(
    &self,
    key_id: PropKeyId,
    entries: &[(NodeId, Vec<f32>)],
  ) -> Result<()> {
    if entries.is_empty() {
      return Ok(());
    }

    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    for (node_id, _) in entries {
      if !self.node_exists_inner(Some(&tx.pending), *node_id) {
        return Err(RayError::NotFound(format!("node {node_id}")));
      }
    }

    tx.pending_records.push(WalRecord::new(
      WalRecordType::BatchVectors,
      tx.txid,
      build_batch_vectors_payload(key_id, entries),
    ));
    for (node_id, vector) in entries {
      tx.pending
        .set_node_prop(*node_id, key_id, PropValue::VectorF32(vector.clone()));
    }
    Ok(())
  }

  // ==========================================================================
  // Dictionary definitions
  // ==========================================================================

  /// Define a label, returning the existing ID when the name is known.
  pub fn define_label(&self, name: &str) -> Result<LabelId> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if let Some((&id, _)) = tx.pending.new_labels.iter().find(|(_, n)| n.as_str() == name) {
      return Ok(id);
    }
    if let Some(&id) = self.label_names.read().get(name) {
      return Ok(id);
    }

    let label_id = self.alloc_label_id();
    tx.pending_records.push(WalRecord::new(
      WalRecordType::DefineLabel,
      tx.txid,
      build_define_label_payload(label_id, name),
    ));
    tx.pending.define_label(label_id, name);
    Ok(label_id)
  }

  /// Define an edge type, returning the existing ID when known.
  pub fn define_etype(&self, name: &str) -> Result<ETypeId> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if let Some((&id, _)) = tx.pending.new_etypes.iter().find(|(_, n)| n.as_str() == name) {
      return Ok(id);
    }
    if let Some(&id) = self.etype_names.read().get(name) {
      return Ok(id);
    }

    let etype_id = self.alloc_etype_id();
    tx.pending_records.push(WalRecord::new(
      WalRecordType::DefineEtype,
      tx.txid,
      build_define_etype_payload(etype_id, name),
    ));
    tx.pending.define_etype(etype_id, name);
    Ok(etype_id)
  }

  /// Define a property key, returning the existing ID when known.
  pub fn define_propkey(&self, name: &str) -> Result<PropKeyId> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    if let Some((&id, _)) = tx
      .pending
      .new_propkeys
      .iter()
      .find(|(_, n)| n.as_str() == name)
    {
      return Ok(id);
    }
    if let Some(&id) = self.propkey_names.read().get(name) {
      return Ok(id);
    }

    let propkey_id = self.alloc_propkey_id();
    tx.pending_records.push(WalRecord::new(
      WalRecordType::DefinePropkey,
      tx.txid,
      build_define_propkey_payload(propkey_id, name),
    ));
    tx.pending.define_propkey(propkey_id, name);
    Ok(propkey_id)
  }

  // Replication apply needs to mirror the primary's dictionary IDs
  // exactly, so these variants take the ID instead of allocating one.

  pub fn define_label_with_id(&self, label_id: LabelId, name: &str) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    let existing = tx
      .pending
      .new_labels
      .get(&label_id)
      .cloned()
      .or_else(|| self.label_ids.read().get(&label_id).cloned());
    if let Some(existing) = existing {
      if existing == name {
        return Ok(());
      }
      return Err(RayError::AlreadyExists(format!(
        "label {label_id} already named {existing:?}"
      )));
    }

    self.next_label_id.fetch_max(label_id + 1, std::sync::atomic::Ordering::SeqCst);
    tx.pending_records.push(WalRecord::new(
      WalRecordType::DefineLabel,
      tx.txid,
      build_define_label_payload(label_id, name),
    ));
    tx.pending.define_label(label_id, name);
    Ok(())
  }

  pub fn define_etype_with_id(&self, etype_id: ETypeId, name: &str) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    let existing = tx
      .pending
      .new_etypes
      .get(&etype_id)
      .cloned()
      .or_else(|| self.etype_ids.read().get(&etype_id).cloned());
    if let Some(existing) = existing {
      if existing == name {
        return Ok(());
      }
      return Err(RayError::AlreadyExists(format!(
        "edge type {etype_id} already named {existing:?}"
      )));
    }

    self.next_etype_id.fetch_max(etype_id + 1, std::sync::atomic::Ordering::SeqCst);
    tx.pending_records.push(WalRecord::new(
      WalRecordType::DefineEtype,
      tx.txid,
      build_define_etype_payload(etype_id, name),
    ));
    tx.pending.define_etype(etype_id, name);
    Ok(())
  }

  pub fn define_propkey_with_id(&self, propkey_id: PropKeyId, name: &str) -> Result<()> {
    let mut current = self.current_tx.lock();
    let tx = current.as_mut().ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }

    let existing = tx
      .pending
      .new_propkeys
      .get(&propkey_id)
      .cloned()
      .or_else(|| self.propkey_ids.read().get(&propkey_id).cloned());
    if let Some(existing) = existing {
      if existing == name {
        return Ok(());
      }
      return Err(RayError::AlreadyExists(format!(
        "property key {propkey_id} already named {existing:?}"
      )));
    }

    self.next_propkey_id.fetch_max(propkey_id + 1, std::sync::atomic::Ordering::SeqCst);
    tx.pending_records.push(WalRecord::new(
      WalRecordType::DefinePropkey,
      tx.txid,
      build_define_propkey_payload(propkey_id, name),
    ));
    tx.pending.define_propkey(propkey_id, name);
    Ok(())
  }
}
