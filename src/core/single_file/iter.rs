//! Node/edge iteration and database statistics.

use crate::types::*;

use super::SingleFileDB;

// ============================================================================
// Edge types
// ============================================================================

/// Full edge triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullEdge {
  pub src: NodeId,
  pub etype: ETypeId,
  pub dst: NodeId,
}

// ============================================================================
// Node iterator
// ============================================================================

/// Iterator over all live nodes.
///
/// Node IDs are collected up front so no engine locks are held during
/// iteration.
pub struct NodeIterator {
  nodes: Vec<NodeId>,
  index: usize,
}

impl NodeIterator {
  pub(crate) fn new(db: &SingleFileDB) -> Self {
    let tx = db.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    let delta = db.delta.read();
    let snapshot = db.snapshot.read();

    let mut nodes = Vec::new();

    if let Some(ref snap) = *snapshot {
      for phys in 0..snap.header.num_nodes as u32 {
        if let Some(node_id) = snap.node_id(phys) {
          if pending.is_some_and(|p| p.is_node_deleted(node_id)) || delta.is_node_deleted(node_id)
          {
            continue;
          }
          nodes.push(node_id);
        }
      }
    }

    for &node_id in delta.created_nodes.keys() {
      if pending.is_some_and(|p| p.is_node_deleted(node_id)) || delta.is_node_deleted(node_id) {
        continue;
      }
      nodes.push(node_id);
    }

    if let Some(p) = pending {
      for &node_id in p.created_nodes.keys() {
        if !p.is_node_deleted(node_id) {
          nodes.push(node_id);
        }
      }
    }

    nodes.sort_unstable();
    nodes.dedup();

    Self { nodes, index: 0 }
  }
}

impl Iterator for NodeIterator {
  type Item = NodeId;

  fn next(&mut self) -> Option<Self::Item> {
    if self.index < self.nodes.len() {
      let node_id = self.nodes[self.index];
      self.index += 1;
      Some(node_id)
    } else {
      None
    }
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.nodes.len() - self.index;
    (remaining, Some(remaining))
  }
}

impl ExactSizeIterator for NodeIterator {}

// ============================================================================
// Iteration and stats
// ============================================================================

impl SingleFileDB {
  /// Iterate all live node IDs.
  pub fn iter_nodes(&self) -> NodeIterator {
    NodeIterator::new(self)
  }

  /// Collect all live node IDs.
  pub fn list_nodes(&self) -> Vec<NodeId> {
    self.iter_nodes().collect()
  }

  /// Count live nodes.
  pub fn count_nodes(&self) -> usize {
    self.iter_nodes().len()
  }

  /// List all live edges, optionally restricted to one type.
  pub fn list_edges(&self, etype_filter: Option<ETypeId>) -> Vec<FullEdge> {
    let mut edges = Vec::new();
    for src in self.list_nodes() {
      for (etype, dst) in self.out_edges(src) {
        if etype_filter.is_some_and(|filter| etype != filter) {
          continue;
        }
        edges.push(FullEdge { src, etype, dst });
      }
    }
    edges
  }

  /// Count live edges.
  pub fn count_edges(&self) -> usize {
    self.list_edges(None).len()
  }

  /// Database statistics.
  pub fn stats(&self) -> DbStats {
    // Lock order matches the commit path: WAL before header.
    let delta = self.delta.read();
    let snapshot = self.snapshot.read();
    let wal = self.wal_buffer.lock();
    let header = self.header.read();

    let (snapshot_nodes, snapshot_edges, snapshot_max_node_id) = match *snapshot {
      Some(ref snap) => (
        snap.header.num_nodes,
        snap.header.num_edges,
        snap.header.max_node_id,
      ),
      None => (0, 0, 0),
    };

    let wal_fraction = wal.used_fraction();

    DbStats {
      snapshot_gen: header.active_snapshot_gen,
      snapshot_nodes,
      snapshot_edges,
      snapshot_max_node_id,
      delta_nodes_created: delta.created_nodes.len(),
      delta_nodes_deleted: delta.deleted_nodes.len(),
      delta_edges_added: delta.total_edges_added(),
      delta_edges_deleted: delta.total_edges_deleted(),
      wal_bytes: wal.used(),
      wal_capacity: wal.capacity(),
      recommend_compact: wal_fraction > self.compact_wal_threshold
        || delta.entry_count() > self.compact_delta_threshold,
    }
  }
}
