//! Read operations over the merged `pending ∪ delta ∪ snapshot` view.
//!
//! Tombstones win over values, delta values win over snapshot values.
//! The property and traversal caches serve only the committed view, so
//! they are bypassed while this handle has a transaction open.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::delta::DeltaState;
use crate::types::*;

use super::SingleFileDB;

impl SingleFileDB {
  // ==========================================================================
  // Existence
  // ==========================================================================

  pub(crate) fn node_exists_inner(&self, pending: Option<&DeltaState>, node_id: NodeId) -> bool {
    if let Some(p) = pending {
      if p.is_node_deleted(node_id) {
        return false;
      }
      if p.is_node_created(node_id) {
        return true;
      }
    }

    let delta = self.delta.read();
    if delta.is_node_deleted(node_id) {
      return false;
    }
    if delta.is_node_created(node_id) {
      return true;
    }
    drop(delta);

    self
      .snapshot
      .read()
      .as_ref()
      .is_some_and(|snap| snap.has_node(node_id))
  }

  /// Check if a node exists.
  pub fn node_exists(&self, node_id: NodeId) -> bool {
    let tx = self.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    self.node_exists_inner(pending, node_id)
  }

  pub(crate) fn edge_exists_inner(
    &self,
    pending: Option<&DeltaState>,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
  ) -> bool {
    if let Some(p) = pending {
      if p.is_node_deleted(src) || p.is_node_deleted(dst) {
        return false;
      }
      if p.is_edge_deleted(src, etype, dst) {
        return false;
      }
      if p.is_edge_added(src, etype, dst) {
        return true;
      }
    }

    let delta = self.delta.read();
    if delta.is_node_deleted(src) || delta.is_node_deleted(dst) {
      return false;
    }
    if delta.is_edge_deleted(src, etype, dst) {
      return false;
    }
    if delta.is_edge_added(src, etype, dst) {
      return true;
    }
    drop(delta);

    let snapshot = self.snapshot.read();
    if let Some(ref snap) = *snapshot {
      if let (Some(src_phys), Some(dst_phys)) = (snap.phys_node(src), snap.phys_node(dst)) {
        return snap.has_edge(src_phys, etype, dst_phys);
      }
    }
    false
  }

  /// Check if an edge exists.
  pub fn edge_exists(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    let tx = self.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    self.edge_exists_inner(pending, src, etype, dst)
  }

  // ==========================================================================
  // Key lookups
  // ==========================================================================

  pub(crate) fn node_by_key_inner(
    &self,
    pending: Option<&DeltaState>,
    key: &str,
  ) -> Option<NodeId> {
    let delta = self.delta.read();

    if let Some(p) = pending {
      if p.key_index_deleted.contains(key) {
        return None;
      }
      if let Some(&node_id) = p.key_index.get(key) {
        if p.is_node_deleted(node_id) || delta.is_node_deleted(node_id) {
          return None;
        }
        return Some(node_id);
      }
    }

    if delta.key_index_deleted.contains(key) {
      return None;
    }
    if let Some(&node_id) = delta.key_index.get(key) {
      if pending.is_some_and(|p| p.is_node_deleted(node_id)) || delta.is_node_deleted(node_id) {
        return None;
      }
      return Some(node_id);
    }
    drop(delta);

    let snapshot = self.snapshot.read();
    if let Some(ref snap) = *snapshot {
      if let Some(node_id) = snap.lookup_by_key(key) {
        if pending.is_some_and(|p| p.is_node_deleted(node_id))
          || self.delta.read().is_node_deleted(node_id)
        {
          return None;
        }
        return Some(node_id);
      }
    }
    None
  }

  /// Look up a node by its key.
  pub fn node_by_key(&self, key: &str) -> Option<NodeId> {
    let tx = self.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    self.node_by_key_inner(pending, key)
  }

  pub(crate) fn node_key_inner(
    &self,
    pending: Option<&DeltaState>,
    node_id: NodeId,
  ) -> Option<String> {
    if let Some(p) = pending {
      if p.is_node_deleted(node_id) {
        return None;
      }
      if let Some(node_delta) = p.created_nodes.get(&node_id) {
        return node_delta.key.clone();
      }
    }

    let delta = self.delta.read();
    if delta.is_node_deleted(node_id) {
      return None;
    }
    if let Some(node_delta) = delta.created_nodes.get(&node_id) {
      return node_delta.key.clone();
    }
    drop(delta);

    let snapshot = self.snapshot.read();
    let snap = snapshot.as_ref()?;
    let phys = snap.phys_node(node_id)?;
    snap.node_key(phys)
  }

  /// The key of a node, if it has one.
  pub fn node_key(&self, node_id: NodeId) -> Option<String> {
    let tx = self.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    self.node_key_inner(pending, node_id)
  }

  // ==========================================================================
  // Node properties
  // ==========================================================================

  fn node_prop_uncached(&self, pending: Option<&DeltaState>, node_id: NodeId, key_id: PropKeyId) -> Option<PropValue> {
    if let Some(p) = pending {
      if p.is_node_deleted(node_id) {
        return None;
      }
      if let Some(staged) = p.node_prop(node_id, key_id) {
        return staged.cloned();
      }
      if p.is_node_created(node_id) {
        return None;
      }
    }

    let delta = self.delta.read();
    if delta.is_node_deleted(node_id) {
      return None;
    }
    if let Some(staged) = delta.node_prop(node_id, key_id) {
      return staged.cloned();
    }
    if delta.is_node_created(node_id) {
      return None;
    }
    drop(delta);

    let snapshot = self.snapshot.read();
    let snap = snapshot.as_ref()?;
    let phys = snap.phys_node(node_id)?;
    snap.node_prop(phys, key_id)
  }

  /// Get one node property under the merged view.
  pub fn node_prop(&self, node_id: NodeId, key_id: PropKeyId) -> Option<PropValue> {
    let tx = self.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);

    if pending.is_none() {
      // The cache lock is held across compute-and-fill so a concurrent
      // commit's invalidation cannot be lost.
      let mut cache_guard = self.cache.write();
      if let Some(cache) = cache_guard.as_mut() {
        if let Some(cached) = cache.get_node_prop(node_id, key_id) {
          return cached;
        }
        let value = self.node_prop_uncached(None, node_id, key_id);
        cache.put_node_prop(node_id, key_id, value.clone());
        return value;
      }
      drop(cache_guard);
      return self.node_prop_uncached(None, node_id, key_id);
    }

    self.node_prop_uncached(pending, node_id, key_id)
  }

  /// Get a node property by key name.
  pub fn node_prop_by_name(&self, node_id: NodeId, key_name: &str) -> Option<PropValue> {
    let key_id = self.propkey_id(key_name)?;
    self.node_prop(node_id, key_id)
  }

  /// All properties of a node. Returns `None` when the node does not
  /// exist under the merged view.
  pub fn node_props(&self, node_id: NodeId) -> Option<HashMap<PropKeyId, PropValue>> {
    let tx = self.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);

    if !self.node_exists_inner(pending, node_id) {
      return None;
    }

    let mut props = HashMap::new();

    // Snapshot base
    {
      let snapshot = self.snapshot.read();
      if let Some(ref snap) = *snapshot {
        if let Some(phys) = snap.phys_node(node_id) {
          if let Some(snapshot_props) = snap.node_props(phys) {
            props = snapshot_props;
          }
        }
      }
    }

    // Committed delta overlay
    {
      let delta = self.delta.read();
      if let Some(node_delta) = delta.node_delta(node_id) {
        for (&key_id, value) in &node_delta.props {
          match value {
            Some(v) => {
              props.insert(key_id, v.clone());
            }
            None => {
              props.remove(&key_id);
            }
          }
        }
      }
    }

    // Staged overlay
    if let Some(p) = pending {
      if let Some(node_delta) = p.node_delta(node_id) {
        for (&key_id, value) in &node_delta.props {
          match value {
            Some(v) => {
              props.insert(key_id, v.clone());
            }
            None => {
              props.remove(&key_id);
            }
          }
        }
      }
    }

    Some(props)
  }

  /// Vector property accessor.
  pub fn node_vector(&self, node_id: NodeId, key_id: PropKeyId) -> Option<Vec<f32>> {
    match self.node_prop(node_id, key_id) {
      Some(PropValue::VectorF32(v)) => Some(v),
      _ => None,
    }
  }

  // ==========================================================================
  // Edge properties
  // ==========================================================================

  fn edge_prop_uncached(
    &self,
    pending: Option<&DeltaState>,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
  ) -> Option<PropValue> {
    if !self.edge_exists_inner(pending, src, etype, dst) {
      return None;
    }

    if let Some(p) = pending {
      if let Some(staged) = p.edge_prop(src, etype, dst, key_id) {
        return staged.cloned();
      }
    }

    let delta = self.delta.read();
    if let Some(staged) = delta.edge_prop(src, etype, dst, key_id) {
      return staged.cloned();
    }
    if delta.is_edge_added(src, etype, dst) {
      return None;
    }
    drop(delta);

    let snapshot = self.snapshot.read();
    let snap = snapshot.as_ref()?;
    let src_phys = snap.phys_node(src)?;
    let dst_phys = snap.phys_node(dst)?;
    let edge_idx = snap.find_edge_index(src_phys, etype, dst_phys)?;
    snap.edge_props(edge_idx)?.remove(&key_id)
  }

  /// Get one edge property under the merged view.
  pub fn edge_prop(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
  ) -> Option<PropValue> {
    let tx = self.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    self.edge_prop_uncached(pending, src, etype, dst, key_id)
  }

  /// All properties of an edge, or `None` when the edge is not visible.
  pub fn edge_props(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
  ) -> Option<HashMap<PropKeyId, PropValue>> {
    let tx = self.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);

    if !self.edge_exists_inner(pending, src, etype, dst) {
      return None;
    }

    let mut props = HashMap::new();

    {
      let snapshot = self.snapshot.read();
      if let Some(ref snap) = *snapshot {
        if let (Some(src_phys), Some(dst_phys)) = (snap.phys_node(src), snap.phys_node(dst)) {
          if let Some(edge_idx) = snap.find_edge_index(src_phys, etype, dst_phys) {
            if let Some(snapshot_props) = snap.edge_props(edge_idx) {
              props = snapshot_props;
            }
          }
        }
      }
    }

    {
      let delta = self.delta.read();
      if let Some(delta_props) = delta.edge_props_delta(src, etype, dst) {
        for (&key_id, value) in delta_props {
          match value {
            Some(v) => {
              props.insert(key_id, v.clone());
            }
            None => {
              props.remove(&key_id);
            }
          }
        }
      }
    }

    if let Some(p) = pending {
      if let Some(delta_props) = p.edge_props_delta(src, etype, dst) {
        for (&key_id, value) in delta_props {
          match value {
            Some(v) => {
              props.insert(key_id, v.clone());
            }
            None => {
              props.remove(&key_id);
            }
          }
        }
      }
    }

    Some(props)
  }

  // ==========================================================================
  // Traversal
  // ==========================================================================

  fn out_edges_uncached(
    &self,
    pending: Option<&DeltaState>,
    node_id: NodeId,
  ) -> Vec<(ETypeId, NodeId)> {
    if pending.is_some_and(|p| p.is_node_deleted(node_id)) {
      return Vec::new();
    }

    let delta = self.delta.read();
    if delta.is_node_deleted(node_id) {
      return Vec::new();
    }

    let snapshot = self.snapshot.read();
    let mut edges: Vec<(ETypeId, NodeId)> = Vec::new();

    if let Some(ref snap) = *snapshot {
      if let Some(phys) = snap.phys_node(node_id) {
        for (dst_phys, etype) in snap.iter_out_edges(phys) {
          let Some(dst) = snap.node_id(dst_phys) else {
            continue;
          };
          if pending.is_some_and(|p| p.is_node_deleted(dst)) || delta.is_node_deleted(dst) {
            continue;
          }
          if pending.is_some_and(|p| p.is_edge_deleted(node_id, etype, dst))
            || delta.is_edge_deleted(node_id, etype, dst)
          {
            continue;
          }
          edges.push((etype, dst));
        }
      }
    }

    if let Some(added) = delta.out_add.get(&node_id) {
      for patch in added {
        if pending.is_some_and(|p| p.is_node_deleted(patch.other))
          || delta.is_node_deleted(patch.other)
        {
          continue;
        }
        if pending.is_some_and(|p| p.is_edge_deleted(node_id, patch.etype, patch.other)) {
          continue;
        }
        edges.push((patch.etype, patch.other));
      }
    }

    if let Some(p) = pending {
      if let Some(added) = p.out_add.get(&node_id) {
        for patch in added {
          if p.is_node_deleted(patch.other) || delta.is_node_deleted(patch.other) {
            continue;
          }
          edges.push((patch.etype, patch.other));
        }
      }
    }

    edges.sort_unstable();
    edges.dedup();
    edges
  }

  /// Outgoing edges as `(etype, dst)` pairs, sorted.
  pub fn out_edges(&self, node_id: NodeId) -> Vec<(ETypeId, NodeId)> {
    let tx = self.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);

    if pending.is_none() {
      let mut cache_guard = self.cache.write();
      if let Some(cache) = cache_guard.as_mut() {
        if let Some(cached) = cache.get_out_edges(node_id) {
          return cached.as_ref().clone();
        }
        let edges = self.out_edges_uncached(None, node_id);
        cache.put_out_edges(node_id, Arc::new(edges.clone()));
        return edges;
      }
      drop(cache_guard);
      return self.out_edges_uncached(None, node_id);
    }

    self.out_edges_uncached(pending, node_id)
  }

  fn in_edges_uncached(
    &self,
    pending: Option<&DeltaState>,
    node_id: NodeId,
  ) -> Vec<(ETypeId, NodeId)> {
    if pending.is_some_and(|p| p.is_node_deleted(node_id)) {
      return Vec::new();
    }

    let delta = self.delta.read();
    if delta.is_node_deleted(node_id) {
      return Vec::new();
    }

    let snapshot = self.snapshot.read();
    let mut edges: Vec<(ETypeId, NodeId)> = Vec::new();

    if let Some(ref snap) = *snapshot {
      if let Some(phys) = snap.phys_node(node_id) {
        for (src_phys, etype, _out_index) in snap.iter_in_edges(phys) {
          let Some(src) = snap.node_id(src_phys) else {
            continue;
          };
          if pending.is_some_and(|p| p.is_node_deleted(src)) || delta.is_node_deleted(src) {
            continue;
          }
          if pending.is_some_and(|p| p.is_edge_deleted(src, etype, node_id))
            || delta.is_edge_deleted(src, etype, node_id)
          {
            continue;
          }
          edges.push((etype, src));
        }
      }
    }

    if let Some(added) = delta.in_add.get(&node_id) {
      for patch in added {
        if pending.is_some_and(|p| p.is_node_deleted(patch.other))
          || delta.is_node_deleted(patch.other)
        {
          continue;
        }
        if pending.is_some_and(|p| p.is_edge_deleted(patch.other, patch.etype, node_id)) {
          continue;
        }
        edges.push((patch.etype, patch.other));
      }
    }

    if let Some(p) = pending {
      if let Some(added) = p.in_add.get(&node_id) {
        for patch in added {
          if p.is_node_deleted(patch.other) || delta.is_node_deleted(patch.other) {
            continue;
          }
          edges.push((patch.etype, patch.other));
        }
      }
    }

    edges.sort_unstable();
    edges.dedup();
    edges
  }

  /// Incoming edges as `(etype, src)` pairs, sorted.
  pub fn in_edges(&self, node_id: NodeId) -> Vec<(ETypeId, NodeId)> {
    let tx = self.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);

    if pending.is_none() {
      let mut cache_guard = self.cache.write();
      if let Some(cache) = cache_guard.as_mut() {
        if let Some(cached) = cache.get_in_edges(node_id) {
          return cached.as_ref().clone();
        }
        let edges = self.in_edges_uncached(None, node_id);
        cache.put_in_edges(node_id, Arc::new(edges.clone()));
        return edges;
      }
      drop(cache_guard);
      return self.in_edges_uncached(None, node_id);
    }

    self.in_edges_uncached(pending, node_id)
  }

  /// Destination nodes of out-edges with the given type.
  pub fn out_neighbors(&self, node_id: NodeId, etype: ETypeId) -> Vec<NodeId> {
    self
      .out_edges(node_id)
      .into_iter()
      .filter(|(e, _)| *e == etype)
      .map(|(_, dst)| dst)
      .collect()
  }

  /// Source nodes of in-edges with the given type.
  pub fn in_neighbors(&self, node_id: NodeId, etype: ETypeId) -> Vec<NodeId> {
    self
      .in_edges(node_id)
      .into_iter()
      .filter(|(e, _)| *e == etype)
      .map(|(_, src)| src)
      .collect()
  }

  pub fn out_degree(&self, node_id: NodeId) -> usize {
    self.out_edges(node_id).len()
  }

  pub fn in_degree(&self, node_id: NodeId) -> usize {
    self.in_edges(node_id).len()
  }

  // ==========================================================================
  // Labels
  // ==========================================================================

  /// All labels of a node, sorted.
  pub fn node_labels(&self, node_id: NodeId) -> Vec<LabelId> {
    let tx = self.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);

    if pending.is_some_and(|p| p.is_node_deleted(node_id)) {
      return Vec::new();
    }

    let delta = self.delta.read();
    if delta.is_node_deleted(node_id) {
      return Vec::new();
    }

    let mut labels = std::collections::HashSet::new();

    {
      let snapshot = self.snapshot.read();
      if let Some(ref snap) = *snapshot {
        if let Some(phys) = snap.phys_node(node_id) {
          if let Some(snapshot_labels) = snap.node_labels(phys) {
            labels.extend(snapshot_labels);
          }
        }
      }
    }

    if let Some(node_delta) = delta.node_delta(node_id) {
      labels.extend(node_delta.labels.iter().copied());
      for label_id in &node_delta.labels_removed {
        labels.remove(label_id);
      }
    }

    if let Some(p) = pending {
      if let Some(node_delta) = p.node_delta(node_id) {
        labels.extend(node_delta.labels.iter().copied());
        for label_id in &node_delta.labels_removed {
          labels.remove(label_id);
        }
      }
    }

    let mut result: Vec<_> = labels.into_iter().collect();
    result.sort_unstable();
    result
  }

  /// Whether a node carries a label.
  pub fn node_has_label(&self, node_id: NodeId, label_id: LabelId) -> bool {
    let tx = self.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);

    if let Some(p) = pending {
      if p.is_node_deleted(node_id) {
        return false;
      }
      if p.is_label_removed(node_id, label_id) {
        return false;
      }
      if p.is_label_added(node_id, label_id) {
        return true;
      }
    }

    let delta = self.delta.read();
    if delta.is_node_deleted(node_id) {
      return false;
    }
    if delta.is_label_removed(node_id, label_id) {
      return false;
    }
    if delta.is_label_added(node_id, label_id) {
      return true;
    }
    drop(delta);

    let snapshot = self.snapshot.read();
    if let Some(ref snap) = *snapshot {
      if let Some(phys) = snap.phys_node(node_id) {
        if let Some(labels) = snap.node_labels(phys) {
          return labels.contains(&label_id);
        }
      }
    }
    false
  }
}
