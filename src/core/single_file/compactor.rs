//! Compaction: fold `snapshot ∪ delta` into a new snapshot generation
//! and empty the WAL. Also the offline WAL resize that rides on it.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use hashbrown::HashSet;

use crate::constants::MIN_WAL_PAGES;
use crate::core::pager::pages_to_store;
use crate::core::snapshot::reader::{ParseSnapshotOptions, SnapshotData};
use crate::core::snapshot::writer::{build_snapshot_to_memory, EdgeData, NodeData, SnapshotBuildInput};
use crate::core::wal::buffer::WalBuffer;
use crate::error::{RayError, Result};
use crate::types::*;
use crate::util::mmap::map_file;

use super::{CompactOptions, SingleFileDB};

impl SingleFileDB {
  /// Merge the snapshot and delta into a new snapshot generation,
  /// rewrite the header to point at it, and reset the WAL to empty.
  ///
  /// The new page run goes into the gap left by the previous generation
  /// when it fits there, otherwise past the current end of file; the
  /// superseded generation's pages become the next gap. Safe to abort
  /// before the header write: the old header stays authoritative.
  pub fn compact(&self, options: Option<CompactOptions>) -> Result<()> {
    self.require_not_read_only()?;
    if self.has_transaction() {
      return Err(RayError::NestedTx);
    }

    let _commit_guard = self.commit_lock.lock();

    let (nodes, edges, labels, etypes, propkeys) = self.collect_graph_data();

    let old_header = self.header.read().clone();
    let new_gen = old_header.active_snapshot_gen + 1;
    let compression = options.and_then(|o| o.compression);

    let buffer = build_snapshot_to_memory(SnapshotBuildInput {
      generation: new_gen,
      nodes,
      edges,
      labels,
      etypes,
      propkeys,
      compression,
    })?;

    let page_size = old_header.page_size as usize;
    let needed_pages = pages_to_store(buffer.len(), page_size) as u64;
    let wal_end = old_header.wal_start_page + old_header.wal_page_count;

    {
      let mut pager = self.pager.lock();

      let new_start = if old_header.snapshot_page_count == 0 {
        wal_end
      } else if old_header.snapshot_start_page >= wal_end + needed_pages {
        // The previous generation sits above a gap large enough for us.
        wal_end
      } else {
        pager.size_pages().max(wal_end)
      };

      let required = new_start + needed_pages;
      if required > pager.size_pages() {
        let missing = required - pager.size_pages();
        pager.allocate_pages(missing)?;
      }

      for i in 0..needed_pages {
        let mut page = vec![0u8; page_size];
        let offset = (i as usize) * page_size;
        let end = buffer.len().min(offset + page_size);
        if offset < buffer.len() {
          page[..end - offset].copy_from_slice(&buffer[offset..end]);
        }
        pager.write_page(new_start + i, &page)?;
      }
      // The snapshot must be durable before the header references it.
      pager.sync()?;

      let mut wal = self.wal_buffer.lock();
      let mut header = self.header.write();
      header.prev_snapshot_gen = header.active_snapshot_gen;
      header.active_snapshot_gen = new_gen;
      header.snapshot_start_page = new_start;
      header.snapshot_page_count = needed_pages;
      header.db_size_pages = pager.size_pages();
      header.wal_head = 0;
      header.wal_tail = 0;
      header.max_node_id = self.next_node_id.load(Ordering::SeqCst).saturating_sub(1);
      header.next_tx_id = self.next_tx_id.load(Ordering::SeqCst);
      header.change_counter += 1;
      wal.reset();

      pager.write_page(0, &header.serialize_to_page())?;
      pager.sync()?;
    }

    // Swap in the new generation before emptying the delta so every
    // interleaved reader sees an equivalent view.
    self.reload_snapshot()?;
    {
      let mut cache_guard = self.cache.write();
      let mut delta = self.delta.write();
      delta.clear();
      if let Some(cache) = cache_guard.as_mut() {
        cache.clear();
      }
    }

    self
      .counters
      .compactions_total
      .fetch_add(1, Ordering::Relaxed);
    log::debug!("compaction wrote generation {new_gen} ({needed_pages} pages)");
    Ok(())
  }

  /// Collect the merged graph for the snapshot builder.
  #[allow(clippy::type_complexity)]
  fn collect_graph_data(
    &self,
  ) -> (
    Vec<NodeData>,
    Vec<EdgeData>,
    HashMap<LabelId, String>,
    HashMap<ETypeId, String>,
    HashMap<PropKeyId, String>,
  ) {
    let delta = self.delta.read();
    let snapshot = self.snapshot.read();

    let mut nodes: Vec<NodeData> = Vec::new();
    let mut edges: Vec<EdgeData> = Vec::new();
    let mut snapshot_edges: HashSet<(NodeId, ETypeId, NodeId)> = HashSet::new();

    if let Some(ref snap) = *snapshot {
      for phys in 0..snap.header.num_nodes as u32 {
        let Some(node_id) = snap.node_id(phys) else {
          continue;
        };
        if delta.is_node_deleted(node_id) {
          continue;
        }

        let mut labels: Vec<LabelId> = snap.node_labels(phys).unwrap_or_default();
        let mut props = snap.node_props(phys).unwrap_or_default();
        if let Some(node_delta) = delta.node_delta(node_id) {
          labels.retain(|l| !node_delta.labels_removed.contains(l));
          labels.extend(node_delta.labels.iter().copied());
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

        nodes.push(NodeData {
          node_id,
          key: snap.node_key(phys),
          labels,
          props,
        });

        for (dst_phys, etype) in snap.iter_out_edges(phys) {
          let Some(dst) = snap.node_id(dst_phys) else {
            continue;
          };
          if delta.is_node_deleted(dst) || delta.is_edge_deleted(node_id, etype, dst) {
            continue;
          }

          let mut props = snap
            .find_edge_index(phys, etype, dst_phys)
            .and_then(|idx| snap.edge_props(idx))
            .unwrap_or_default();
          if let Some(delta_props) = delta.edge_props_delta(node_id, etype, dst) {
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

          snapshot_edges.insert((node_id, etype, dst));
          edges.push(EdgeData {
            src: node_id,
            etype,
            dst,
            props,
          });
        }
      }
    }

    for (&node_id, node_delta) in &delta.created_nodes {
      if delta.is_node_deleted(node_id) {
        continue;
      }
      let mut labels: Vec<LabelId> = node_delta
        .labels
        .iter()
        .copied()
        .filter(|l| !node_delta.labels_removed.contains(l))
        .collect();
      labels.sort_unstable();

      let props = node_delta
        .props
        .iter()
        .filter_map(|(&key_id, value)| value.clone().map(|v| (key_id, v)))
        .collect();

      nodes.push(NodeData {
        node_id,
        key: node_delta.key.clone(),
        labels,
        props,
      });
    }

    for (&src, patches) in &delta.out_add {
      if delta.is_node_deleted(src) {
        continue;
      }
      for patch in patches {
        if delta.is_node_deleted(patch.other) {
          continue;
        }
        if snapshot_edges.contains(&(src, patch.etype, patch.other)) {
          continue;
        }
        let props = delta
          .edge_props_delta(src, patch.etype, patch.other)
          .map(|delta_props| {
            delta_props
              .iter()
              .filter_map(|(&key_id, value)| value.clone().map(|v| (key_id, v)))
              .collect()
          })
          .unwrap_or_default();
        edges.push(EdgeData {
          src,
          etype: patch.etype,
          dst: patch.other,
          props,
        });
      }
    }

    let labels = self.label_ids.read().clone();
    let etypes = self.etype_ids.read().clone();
    let propkeys = self.propkey_ids.read().clone();

    (nodes, edges, labels, etypes, propkeys)
  }

  /// Re-map the active snapshot after the file changed underneath.
  pub(crate) fn reload_snapshot(&self) -> Result<()> {
    let header = self.header.read().clone();
    let mut snapshot_guard = self.snapshot.write();

    if header.snapshot_page_count == 0 {
      *snapshot_guard = None;
      return Ok(());
    }

    let pager = self.pager.lock();
    let mmap = Arc::new(map_file(pager.file())?);
    drop(pager);
    let offset = (header.snapshot_start_page * header.page_size as u64) as usize;
    let snap = SnapshotData::parse_at_offset(mmap, offset, &ParseSnapshotOptions::default())?;
    *snapshot_guard = Some(snap);
    Ok(())
  }

  /// Resize the WAL region. Offline operation: compacts first so the
  /// WAL is empty, then relocates the snapshot after the new extent.
  pub fn resize_wal(&self, wal_size_bytes: usize) -> Result<()> {
    self.require_not_read_only()?;
    if self.has_transaction() {
      return Err(RayError::NestedTx);
    }
    if wal_size_bytes == 0 {
      return Err(RayError::InvalidArgument("WAL size must be > 0".to_string()));
    }

    self.compact(None)?;

    let _commit_guard = self.commit_lock.lock();
    let old_header = self.header.read().clone();
    let page_size = old_header.page_size as usize;
    let new_wal_pages = (pages_to_store(wal_size_bytes, page_size) as u64).max(MIN_WAL_PAGES);
    if new_wal_pages == old_header.wal_page_count {
      return Ok(());
    }
    let new_wal_end = old_header.wal_start_page + new_wal_pages;

    // Drop the mmap before the file shrinks or pages move.
    *self.snapshot.write() = None;

    let mut pager = self.pager.lock();

    let snapshot_bytes = if old_header.snapshot_page_count > 0 {
      let mut bytes =
        Vec::with_capacity((old_header.snapshot_page_count as usize) * page_size);
      for p in 0..old_header.snapshot_page_count {
        bytes.extend_from_slice(&pager.read_page(old_header.snapshot_start_page + p)?);
      }
      Some(bytes)
    } else {
      None
    };

    let mut new_header = old_header.clone();
    new_header.wal_page_count = new_wal_pages;
    new_header.wal_head = 0;
    new_header.wal_tail = 0;

    if let Some(bytes) = snapshot_bytes {
      let count = old_header.snapshot_page_count;
      let old_start = old_header.snapshot_start_page;

      // Never overwrite the live snapshot while the old header still
      // points at it; fall back to fresh pages past the file end.
      let overlaps = new_wal_end < old_start + count && old_start < new_wal_end + count;
      let new_start = if overlaps {
        pager.size_pages().max(new_wal_end)
      } else {
        new_wal_end
      };

      let required = new_start + count;
      if required > pager.size_pages() {
        let missing = required - pager.size_pages();
        pager.allocate_pages(missing)?;
      }
      for i in 0..count {
        let offset = (i as usize) * page_size;
        pager.write_page(new_start + i, &bytes[offset..offset + page_size])?;
      }
      pager.sync()?;

      new_header.snapshot_start_page = new_start;
      new_header.db_size_pages = new_start + count;
    } else {
      let required = new_wal_end;
      if required > pager.size_pages() {
        let missing = required - pager.size_pages();
        pager.allocate_pages(missing)?;
      }
      new_header.db_size_pages = new_wal_end;
    }
    new_header.change_counter += 1;

    pager.write_page(0, &new_header.serialize_to_page())?;
    pager.sync()?;

    if new_header.db_size_pages < pager.size_pages() {
      pager.truncate_pages(new_header.db_size_pages)?;
    }

    *self.header.write() = new_header.clone();
    *self.wal_buffer.lock() = WalBuffer::from_header(&new_header);
    drop(pager);

    self.reload_snapshot()?;
    Ok(())
  }
}
