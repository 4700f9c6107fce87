//! In-memory mutation overlay.
//!
//! The delta carries every committed mutation that the active snapshot
//! generation does not contain; a transaction stages its own private
//! `DeltaState` and folds it into the process-wide one at commit.
//!
//! Visibility for any read: a tombstone in the delta hides the entity
//! regardless of snapshot contents; otherwise a delta value wins;
//! otherwise the snapshot answers.

use hashbrown::{HashMap, HashSet};

use crate::types::{ETypeId, LabelId, NodeId, PropKeyId, PropValue};

/// One directed half-edge patch: `etype` plus the other endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgePatch {
  pub etype: ETypeId,
  pub other: NodeId,
}

/// Per-node delta: key, label changes, property changes.
///
/// `props` values of `None` are tombstones shadowing the snapshot.
#[derive(Debug, Clone, Default)]
pub struct NodeDelta {
  pub key: Option<String>,
  pub labels: HashSet<LabelId>,
  pub labels_removed: HashSet<LabelId>,
  pub props: HashMap<PropKeyId, Option<PropValue>>,
}

/// The full overlay. See module docs for visibility rules.
#[derive(Debug, Clone, Default)]
pub struct DeltaState {
  /// Nodes created since the snapshot.
  pub created_nodes: HashMap<NodeId, NodeDelta>,
  /// Label/property changes to nodes that live in the snapshot.
  pub modified_nodes: HashMap<NodeId, NodeDelta>,
  /// Tombstones shadowing snapshot nodes (and delta-created ones).
  pub deleted_nodes: HashSet<NodeId>,

  /// Added out-edges by source, mirrored in `in_add` by destination.
  pub out_add: HashMap<NodeId, HashSet<EdgePatch>>,
  pub out_del: HashMap<NodeId, HashSet<EdgePatch>>,
  pub in_add: HashMap<NodeId, HashSet<EdgePatch>>,
  pub in_del: HashMap<NodeId, HashSet<EdgePatch>>,

  /// Edge property changes; `None` tombstones a snapshot value.
  pub edge_props: HashMap<(NodeId, ETypeId, NodeId), HashMap<PropKeyId, Option<PropValue>>>,

  /// Dictionary additions since the snapshot.
  pub new_labels: HashMap<LabelId, String>,
  pub new_etypes: HashMap<ETypeId, String>,
  pub new_propkeys: HashMap<PropKeyId, String>,

  /// Key lookups: live keys added since the snapshot, and tombstoned
  /// keys. A key is never in both.
  pub key_index: HashMap<String, NodeId>,
  pub key_index_deleted: HashSet<String>,
}

impl DeltaState {
  pub fn new() -> Self {
    Self::default()
  }

  // ==========================================================================
  // Nodes
  // ==========================================================================

  pub fn create_node(&mut self, node_id: NodeId, key: Option<&str>) {
    self.deleted_nodes.remove(&node_id);
    let entry = self.created_nodes.entry(node_id).or_default();
    if let Some(key) = key {
      entry.key = Some(key.to_string());
      self.key_index_deleted.remove(key);
      self.key_index.insert(key.to_string(), node_id);
    }
  }

  /// Tombstone a node. `key` is the node's key under the current view,
  /// if it has one; the caller resolves it so the key index stays
  /// consistent for snapshot-resident nodes too.
  pub fn delete_node(&mut self, node_id: NodeId, key: Option<&str>) {
    self.created_nodes.remove(&node_id);
    self.modified_nodes.remove(&node_id);
    self.deleted_nodes.insert(node_id);
    if let Some(key) = key {
      self.key_index.remove(key);
      self.key_index_deleted.insert(key.to_string());
    }
  }

  pub fn is_node_created(&self, node_id: NodeId) -> bool {
    self.created_nodes.contains_key(&node_id)
  }

  pub fn is_node_deleted(&self, node_id: NodeId) -> bool {
    self.deleted_nodes.contains(&node_id)
  }

  /// Delta info for a node, whether created here or modified over the
  /// snapshot.
  pub fn node_delta(&self, node_id: NodeId) -> Option<&NodeDelta> {
    self
      .created_nodes
      .get(&node_id)
      .or_else(|| self.modified_nodes.get(&node_id))
  }

  fn node_delta_mut(&mut self, node_id: NodeId) -> &mut NodeDelta {
    if self.created_nodes.contains_key(&node_id) {
      self.created_nodes.get_mut(&node_id).unwrap()
    } else {
      self.modified_nodes.entry(node_id).or_default()
    }
  }

  // ==========================================================================
  // Edges
  // ==========================================================================

  pub fn add_edge(&mut self, src: NodeId, etype: ETypeId, dst: NodeId) {
    let out_patch = EdgePatch { etype, other: dst };
    let in_patch = EdgePatch { etype, other: src };

    if let Some(set) = self.out_del.get_mut(&src) {
      set.remove(&out_patch);
    }
    if let Some(set) = self.in_del.get_mut(&dst) {
      set.remove(&in_patch);
    }
    self.out_add.entry(src).or_default().insert(out_patch);
    self.in_add.entry(dst).or_default().insert(in_patch);
  }

  pub fn delete_edge(&mut self, src: NodeId, etype: ETypeId, dst: NodeId) {
    let out_patch = EdgePatch { etype, other: dst };
    let in_patch = EdgePatch { etype, other: src };

    if let Some(set) = self.out_add.get_mut(&src) {
      set.remove(&out_patch);
    }
    if let Some(set) = self.in_add.get_mut(&dst) {
      set.remove(&in_patch);
    }
    self.out_del.entry(src).or_default().insert(out_patch);
    self.in_del.entry(dst).or_default().insert(in_patch);
    self.edge_props.remove(&(src, etype, dst));
  }

  pub fn is_edge_added(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    self
      .out_add
      .get(&src)
      .is_some_and(|set| set.contains(&EdgePatch { etype, other: dst }))
  }

  pub fn is_edge_deleted(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    self
      .out_del
      .get(&src)
      .is_some_and(|set| set.contains(&EdgePatch { etype, other: dst }))
  }

  // ==========================================================================
  // Labels
  // ==========================================================================

  pub fn add_node_label(&mut self, node_id: NodeId, label_id: LabelId) {
    let delta = self.node_delta_mut(node_id);
    delta.labels_removed.remove(&label_id);
    delta.labels.insert(label_id);
  }

  pub fn remove_node_label(&mut self, node_id: NodeId, label_id: LabelId) {
    let delta = self.node_delta_mut(node_id);
    delta.labels.remove(&label_id);
    delta.labels_removed.insert(label_id);
  }

  pub fn is_label_added(&self, node_id: NodeId, label_id: LabelId) -> bool {
    self
      .node_delta(node_id)
      .is_some_and(|d| d.labels.contains(&label_id))
  }

  pub fn is_label_removed(&self, node_id: NodeId, label_id: LabelId) -> bool {
    self
      .node_delta(node_id)
      .is_some_and(|d| d.labels_removed.contains(&label_id))
  }

  // ==========================================================================
  // Properties
  // ==========================================================================

  pub fn set_node_prop(&mut self, node_id: NodeId, key_id: PropKeyId, value: PropValue) {
    self
      .node_delta_mut(node_id)
      .props
      .insert(key_id, Some(value));
  }

  pub fn delete_node_prop(&mut self, node_id: NodeId, key_id: PropKeyId) {
    self.node_delta_mut(node_id).props.insert(key_id, None);
  }

  /// Delta knowledge about a node property: `None` = nothing staged,
  /// `Some(None)` = tombstoned, `Some(Some(v))` = set.
  pub fn node_prop(&self, node_id: NodeId, key_id: PropKeyId) -> Option<Option<&PropValue>> {
    self
      .node_delta(node_id)
      .and_then(|d| d.props.get(&key_id))
      .map(Option::as_ref)
  }

  pub fn set_edge_prop(
    &mut self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
    value: PropValue,
  ) {
    self
      .edge_props
      .entry((src, etype, dst))
      .or_default()
      .insert(key_id, Some(value));
  }

  pub fn delete_edge_prop(&mut self, src: NodeId, etype: ETypeId, dst: NodeId, key_id: PropKeyId) {
    self
      .edge_props
      .entry((src, etype, dst))
      .or_default()
      .insert(key_id, None);
  }

  pub fn edge_prop(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
  ) -> Option<Option<&PropValue>> {
    self
      .edge_props
      .get(&(src, etype, dst))
      .and_then(|props| props.get(&key_id))
      .map(Option::as_ref)
  }

  pub fn edge_props_delta(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
  ) -> Option<&HashMap<PropKeyId, Option<PropValue>>> {
    self.edge_props.get(&(src, etype, dst))
  }

  // ==========================================================================
  // Dictionaries
  // ==========================================================================

  pub fn define_label(&mut self, label_id: LabelId, name: &str) {
    self.new_labels.insert(label_id, name.to_string());
  }

  pub fn define_etype(&mut self, etype_id: ETypeId, name: &str) {
    self.new_etypes.insert(etype_id, name.to_string());
  }

  pub fn define_propkey(&mut self, propkey_id: PropKeyId, name: &str) {
    self.new_propkeys.insert(propkey_id, name.to_string());
  }

  // ==========================================================================
  // Bookkeeping
  // ==========================================================================

  pub fn total_edges_added(&self) -> usize {
    self.out_add.values().map(HashSet::len).sum()
  }

  pub fn total_edges_deleted(&self) -> usize {
    self.out_del.values().map(HashSet::len).sum()
  }

  /// Rough mutation count used by the compaction trigger.
  pub fn entry_count(&self) -> usize {
    self.created_nodes.len()
      + self.modified_nodes.len()
      + self.deleted_nodes.len()
      + self.total_edges_added()
      + self.total_edges_deleted()
      + self.edge_props.len()
      + self.new_labels.len()
      + self.new_etypes.len()
      + self.new_propkeys.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entry_count() == 0 && self.key_index.is_empty() && self.key_index_deleted.is_empty()
  }

  pub fn clear(&mut self) {
    *self = DeltaState::default();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn create_then_delete_node() {
    let mut delta = DeltaState::new();
    delta.create_node(1, Some("alice"));
    assert!(delta.is_node_created(1));
    assert_eq!(delta.key_index.get("alice"), Some(&1));

    delta.delete_node(1, Some("alice"));
    assert!(!delta.is_node_created(1));
    assert!(delta.is_node_deleted(1));
    assert!(delta.key_index.get("alice").is_none());
    assert!(delta.key_index_deleted.contains("alice"));

    // A new node can reclaim the key.
    delta.create_node(2, Some("alice"));
    assert!(!delta.key_index_deleted.contains("alice"));
    assert_eq!(delta.key_index.get("alice"), Some(&2));
  }

  #[test]
  fn edge_add_delete_re_add() {
    let mut delta = DeltaState::new();
    delta.add_edge(1, 10, 2);
    assert!(delta.is_edge_added(1, 10, 2));
    assert!(!delta.is_edge_deleted(1, 10, 2));

    delta.delete_edge(1, 10, 2);
    assert!(!delta.is_edge_added(1, 10, 2));
    assert!(delta.is_edge_deleted(1, 10, 2));

    delta.add_edge(1, 10, 2);
    assert!(delta.is_edge_added(1, 10, 2));
    assert!(!delta.is_edge_deleted(1, 10, 2));

    // The in-mirror tracks the same patches.
    assert!(delta.in_add[&2].contains(&EdgePatch { etype: 10, other: 1 }));
  }

  #[test]
  fn prop_tombstones_shadow_values() {
    let mut delta = DeltaState::new();
    delta.create_node(5, None);
    delta.set_node_prop(5, 1, PropValue::I64(9));
    assert_eq!(delta.node_prop(5, 1), Some(Some(&PropValue::I64(9))));

    delta.delete_node_prop(5, 1);
    assert_eq!(delta.node_prop(5, 1), Some(None));
    assert_eq!(delta.node_prop(5, 2), None);
  }

  #[test]
  fn labels_on_snapshot_nodes_use_modified_set() {
    let mut delta = DeltaState::new();
    // Node 7 lives in the snapshot; only its label delta is recorded.
    delta.add_node_label(7, 3);
    assert!(delta.is_label_added(7, 3));
    assert!(!delta.is_node_created(7));
    assert!(delta.modified_nodes.contains_key(&7));

    delta.remove_node_label(7, 3);
    assert!(!delta.is_label_added(7, 3));
    assert!(delta.is_label_removed(7, 3));
  }

  #[test]
  fn entry_count_tracks_mutations() {
    let mut delta = DeltaState::new();
    assert!(delta.is_empty());
    delta.create_node(1, None);
    delta.add_edge(1, 1, 1);
    delta.define_label(1, "L");
    assert_eq!(delta.entry_count(), 3);
    delta.clear();
    assert!(delta.is_empty());
  }
}
