//! Read caches for the committed `delta ∪ snapshot` view.
//!
//! Two sub-caches: node properties keyed by `(NodeId, PropKeyId)` and
//! traversal lists keyed by `NodeId` (out and in separately). Both may
//! hold negative results. Invalidation is write-through on commit:
//! precise for property sets and edge changes, coarse (full sub-cache
//! clear) for node deletion, which is easy to prove correct.

pub mod lru;

use std::sync::Arc;

use crate::core::delta::DeltaState;
use crate::types::{ETypeId, NodeId, PropKeyId, PropValue};
use lru::LruCache;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheOptions {
  pub enabled: bool,
  pub property_capacity: usize,
  pub traversal_capacity: usize,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      property_capacity: 16 * 1024,
      traversal_capacity: 4 * 1024,
    }
  }
}

/// Hit/miss counters and sizes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub property_entries: usize,
  pub traversal_entries: usize,
}

/// A cached traversal list: `(etype, neighbor)` pairs sorted the way
/// the read path produces them.
pub type EdgeList = Arc<Vec<(ETypeId, NodeId)>>;

/// Property and traversal caches for one database handle.
pub struct CacheManager {
  property: LruCache<(NodeId, PropKeyId), Option<PropValue>>,
  out_edges: LruCache<NodeId, EdgeList>,
  in_edges: LruCache<NodeId, EdgeList>,
  hits: u64,
  misses: u64,
}

impl CacheManager {
  pub fn new(options: &CacheOptions) -> Self {
    Self {
      property: LruCache::new(options.property_capacity),
      out_edges: LruCache::new(options.traversal_capacity),
      in_edges: LruCache::new(options.traversal_capacity),
      hits: 0,
      misses: 0,
    }
  }

  // ==========================================================================
  // Property cache
  // ==========================================================================

  pub fn get_node_prop(&mut self, node_id: NodeId, key_id: PropKeyId) -> Option<Option<PropValue>> {
    match self.property.get(&(node_id, key_id)) {
      Some(value) => {
        self.hits += 1;
        Some(value.clone())
      }
      None => {
        self.misses += 1;
        None
      }
    }
  }

  pub fn put_node_prop(&mut self, node_id: NodeId, key_id: PropKeyId, value: Option<PropValue>) {
    self.property.insert((node_id, key_id), value);
  }

  // ==========================================================================
  // Traversal cache
  // ==========================================================================

  pub fn get_out_edges(&mut self, node_id: NodeId) -> Option<EdgeList> {
    match self.out_edges.get(&node_id) {
      Some(list) => {
        self.hits += 1;
        Some(Arc::clone(list))
      }
      None => {
        self.misses += 1;
        None
      }
    }
  }

  pub fn put_out_edges(&mut self, node_id: NodeId, list: EdgeList) {
    self.out_edges.insert(node_id, list);
  }

  pub fn get_in_edges(&mut self, node_id: NodeId) -> Option<EdgeList> {
    match self.in_edges.get(&node_id) {
      Some(list) => {
        self.hits += 1;
        Some(Arc::clone(list))
      }
      None => {
        self.misses += 1;
        None
      }
    }
  }

  pub fn put_in_edges(&mut self, node_id: NodeId, list: EdgeList) {
    self.in_edges.insert(node_id, list);
  }

  // ==========================================================================
  // Invalidation
  // ==========================================================================

  /// Precise invalidation of one node property.
  pub fn invalidate_node_prop(&mut self, node_id: NodeId, key_id: PropKeyId) {
    self.property.remove(&(node_id, key_id));
  }

  /// A node vanished: any property entry for it and any traversal list
  /// mentioning it may be stale. Clears both sub-caches.
  pub fn invalidate_node(&mut self, _node_id: NodeId) {
    self.property.clear();
    self.out_edges.clear();
    self.in_edges.clear();
  }

  /// An edge changed: the source's out-list and the destination's
  /// in-list are stale.
  pub fn invalidate_edge(&mut self, src: NodeId, _etype: ETypeId, dst: NodeId) {
    self.out_edges.remove(&src);
    self.in_edges.remove(&dst);
  }

  /// Invalidate everything a just-committed transaction touched.
  pub fn invalidate_pending(&mut self, pending: &DeltaState) {
    if !pending.deleted_nodes.is_empty() {
      // Coarse path: node deletion can stale any traversal list.
      self.property.clear();
      self.out_edges.clear();
      self.in_edges.clear();
      return;
    }

    for (&node_id, delta) in pending.created_nodes.iter().chain(&pending.modified_nodes) {
      for &key_id in delta.props.keys() {
        self.invalidate_node_prop(node_id, key_id);
      }
    }
    for (&src, patches) in &pending.out_add {
      for patch in patches {
        self.invalidate_edge(src, patch.etype, patch.other);
      }
    }
    for (&src, patches) in &pending.out_del {
      for patch in patches {
        self.invalidate_edge(src, patch.etype, patch.other);
      }
    }
  }

  pub fn clear(&mut self) {
    self.property.clear();
    self.out_edges.clear();
    self.in_edges.clear();
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      hits: self.hits,
      misses: self.misses,
      property_entries: self.property.len(),
      traversal_entries: self.out_edges.len() + self.in_edges.len(),
    }
  }

  pub fn reset_stats(&mut self) {
    self.hits = 0;
    self.misses = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn property_hits_and_misses_are_counted() {
    let mut cache = CacheManager::new(&CacheOptions::default());
    assert_eq!(cache.get_node_prop(1, 1), None);
    cache.put_node_prop(1, 1, Some(PropValue::I64(5)));
    assert_eq!(cache.get_node_prop(1, 1), Some(Some(PropValue::I64(5))));

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
  }

  #[test]
  fn negative_results_are_cached() {
    let mut cache = CacheManager::new(&CacheOptions::default());
    cache.put_node_prop(2, 9, None);
    assert_eq!(cache.get_node_prop(2, 9), Some(None));
  }

  #[test]
  fn edge_invalidation_is_per_endpoint() {
    let mut cache = CacheManager::new(&CacheOptions::default());
    cache.put_out_edges(1, Arc::new(vec![(1, 2)]));
    cache.put_in_edges(2, Arc::new(vec![(1, 1)]));
    cache.put_out_edges(3, Arc::new(vec![]));

    cache.invalidate_edge(1, 1, 2);
    assert!(cache.get_out_edges(1).is_none());
    assert!(cache.get_in_edges(2).is_none());
    assert!(cache.get_out_edges(3).is_some());
  }

  #[test]
  fn deletion_clears_all_sub_caches() {
    let mut cache = CacheManager::new(&CacheOptions::default());
    cache.put_node_prop(1, 1, Some(PropValue::Bool(true)));
    cache.put_out_edges(2, Arc::new(vec![(1, 1)]));

    let mut pending = DeltaState::new();
    pending.delete_node(9, None);
    cache.invalidate_pending(&pending);

    assert_eq!(cache.get_node_prop(1, 1), None);
    assert!(cache.get_out_edges(2).is_none());
  }
}
