//! Transaction lifecycle: begin, commit, rollback.
//!
//! Mutations stage into the transaction's private buffers; commit
//! serializes them as WAL records, makes them durable, then folds the
//! staged delta into the process-wide one. Rollback discards the
//! buffers without touching the file.

use std::sync::atomic::Ordering;

use crate::core::delta::DeltaState;
use crate::core::wal::record::{build_begin_payload, build_commit_payload, WalRecord};
use crate::error::{RayError, Result};
use crate::types::*;

use super::{SingleFileDB, TxState};

impl SingleFileDB {
  /// Begin a transaction. One per handle; a second `begin` before
  /// commit/rollback fails with `NestedTx`.
  pub fn begin(&self, read_only: bool) -> Result<TxId> {
    if self.read_only && !read_only {
      return Err(RayError::ReadOnly);
    }

    let mut current = self.current_tx.lock();
    if current.is_some() {
      return Err(RayError::NestedTx);
    }

    let txid = self.alloc_tx_id();
    *current = Some(TxState::new(txid, read_only));
    Ok(txid)
  }

  /// Begin and wrap in a guard that rolls back on drop.
  pub fn begin_guard(&self, read_only: bool) -> Result<TxGuard<'_>> {
    self.begin(read_only)?;
    Ok(TxGuard {
      db: self,
      finished: false,
    })
  }

  /// Whether a transaction is active on this handle.
  pub fn has_transaction(&self) -> bool {
    self.current_tx.lock().is_some()
  }

  /// Active transaction ID, if any.
  pub fn current_txid(&self) -> Option<TxId> {
    self.current_tx.lock().as_ref().map(|tx| tx.txid)
  }

  /// Commit the active transaction.
  ///
  /// Durability sequence: WAL records (BEGIN, one per mutation, COMMIT)
  /// are flushed into the ring pages and fsynced, then the updated
  /// header is written and fsynced. The header write is the commit
  /// point. `WalBufferFull` aborts the transaction; after `compact` the
  /// caller may retry it as a whole.
  pub fn commit(&self) -> Result<()> {
    let tx = self
      .current_tx
      .lock()
      .take()
      .ok_or(RayError::NoTransaction)?;

    if tx.read_only {
      return Ok(());
    }

    let TxState {
      txid,
      pending,
      pending_records,
      ..
    } = tx;

    if pending_records.is_empty() {
      // Nothing staged; nothing to make durable.
      return Ok(());
    }

    let schema_grew = !pending.new_labels.is_empty()
      || !pending.new_etypes.is_empty()
      || !pending.new_propkeys.is_empty();

    // Serialize the full record batch up front so the space check is
    // exact before any ring bytes move.
    let mut batch: Vec<u8> = Vec::new();
    batch.extend_from_slice(
      &WalRecord::new(WalRecordType::Begin, txid, build_begin_payload()).encode(),
    );
    for record in &pending_records {
      batch.extend_from_slice(&record.encode());
    }
    batch.extend_from_slice(
      &WalRecord::new(WalRecordType::Commit, txid, build_commit_payload()).encode(),
    );

    let epoch = {
      let _commit_guard = self.commit_lock.lock();
      let mut pager = self.pager.lock();
      let mut wal = self.wal_buffer.lock();

      if !wal.can_write(batch.len() as u64) {
        // The transaction is gone; the caller must compact before
        // retrying it.
        return Err(RayError::WalBufferFull {
          needed: batch.len() as u64,
          available: wal.capacity() - wal.used(),
        });
      }

      wal.write_bytes(&batch)?;
      wal.flush(&mut pager)?;
      pager.sync()?;

      // Commit point: header referencing the flushed log bytes.
      let mut header = self.header.write();
      header.wal_head = wal.head();
      header.wal_tail = wal.tail();
      header.max_node_id = self.next_node_id.load(Ordering::SeqCst).saturating_sub(1);
      header.next_tx_id = self.next_tx_id.load(Ordering::SeqCst);
      header.last_commit_ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
      if schema_grew {
        header.schema_cookie += 1;
      }
      header.change_counter += 1;

      pager.write_page(0, &header.serialize_to_page())?;
      pager.sync()?;
      header.epoch
    };

    // The transaction is durable; ship it to the replication log.
    if let Some(primary) = self.primary_replication.as_ref() {
      if let Err(error) = primary.append_commit(epoch, txid, &batch) {
        log::warn!("replication append failed for tx {txid}: {error}");
      }
    }

    // Fold into the shared delta and drop stale cache entries. Lock
    // order is cache before delta, matching the read path.
    self.publish_dictionaries(&pending);
    {
      let mut cache_guard = self.cache.write();
      let mut delta = self.delta.write();
      if let Some(cache) = cache_guard.as_mut() {
        cache.invalidate_pending(&pending);
      }
      merge_pending_delta(&mut delta, pending);
    }

    self.counters.commits_total.fetch_add(1, Ordering::Relaxed);

    if self.auto_compact && self.should_compact() {
      if let Err(error) = self.compact(None) {
        log::warn!("auto-compaction failed: {error}");
      }
    }

    Ok(())
  }

  /// Roll back the active transaction, discarding staged buffers. No
  /// WAL bytes were reserved, so nothing on disk changes.
  pub fn rollback(&self) -> Result<()> {
    self
      .current_tx
      .lock()
      .take()
      .ok_or(RayError::NoTransaction)?;
    Ok(())
  }

  /// Copy newly committed dictionary entries into the shared name maps.
  fn publish_dictionaries(&self, delta: &DeltaState) {
    if !delta.new_labels.is_empty() {
      let mut names = self.label_names.write();
      let mut ids = self.label_ids.write();
      for (&id, name) in &delta.new_labels {
        names.insert(name.clone(), id);
        ids.insert(id, name.clone());
      }
    }
    if !delta.new_etypes.is_empty() {
      let mut names = self.etype_names.write();
      let mut ids = self.etype_ids.write();
      for (&id, name) in &delta.new_etypes {
        names.insert(name.clone(), id);
        ids.insert(id, name.clone());
      }
    }
    if !delta.new_propkeys.is_empty() {
      let mut names = self.propkey_names.write();
      let mut ids = self.propkey_ids.write();
      for (&id, name) in &delta.new_propkeys {
        names.insert(name.clone(), id);
        ids.insert(id, name.clone());
      }
    }
  }

}

/// Fold a transaction's staged delta into the process-wide one.
pub(crate) fn merge_pending_delta(target: &mut DeltaState, mut pending: DeltaState) {
  target.new_labels.extend(pending.new_labels.drain());
  target.new_etypes.extend(pending.new_etypes.drain());
  target.new_propkeys.extend(pending.new_propkeys.drain());

  for (node_id, mut node_delta) in pending.created_nodes.drain() {
    target.create_node(node_id, node_delta.key.as_deref());
    for label_id in node_delta.labels.drain() {
      target.add_node_label(node_id, label_id);
    }
    for label_id in node_delta.labels_removed.drain() {
      target.remove_node_label(node_id, label_id);
    }
    for (key_id, value) in node_delta.props.drain() {
      match value {
        Some(value) => target.set_node_prop(node_id, key_id, value),
        None => target.delete_node_prop(node_id, key_id),
      }
    }
  }

  for (node_id, mut node_delta) in pending.modified_nodes.drain() {
    for label_id in node_delta.labels.drain() {
      target.add_node_label(node_id, label_id);
    }
    for label_id in node_delta.labels_removed.drain() {
      target.remove_node_label(node_id, label_id);
    }
    for (key_id, value) in node_delta.props.drain() {
      match value {
        Some(value) => target.set_node_prop(node_id, key_id, value),
        None => target.delete_node_prop(node_id, key_id),
      }
    }
  }

  for node_id in pending.deleted_nodes.drain() {
    target.delete_node(node_id, None);
  }

  for (src, patches) in pending.out_add.drain() {
    for patch in patches {
      target.add_edge(src, patch.etype, patch.other);
    }
  }
  for (src, patches) in pending.out_del.drain() {
    for patch in patches {
      target.delete_edge(src, patch.etype, patch.other);
    }
  }

  for ((src, etype, dst), props) in pending.edge_props.drain() {
    for (key_id, value) in props {
      match value {
        Some(value) => target.set_edge_prop(src, etype, dst, key_id, value),
        None => target.delete_edge_prop(src, etype, dst, key_id),
      }
    }
  }

  // Key state last: pending tombstones and live keys both carry over.
  for key in pending.key_index_deleted.drain() {
    target.key_index.remove(&key);
    target.key_index_deleted.insert(key);
  }
  for (key, node_id) in pending.key_index.drain() {
    target.key_index_deleted.remove(&key);
    target.key_index.insert(key, node_id);
  }
}

// ============================================================================
// Transaction guard
// ============================================================================

/// RAII transaction handle: rolls back on drop unless committed.
pub struct TxGuard<'a> {
  db: &'a SingleFileDB,
  finished: bool,
}

impl TxGuard<'_> {
  pub fn commit(mut self) -> Result<()> {
    self.finished = true;
    self.db.commit()
  }

  pub fn rollback(mut self) -> Result<()> {
    self.finished = true;
    self.db.rollback()
  }
}

impl Drop for TxGuard<'_> {
  fn drop(&mut self) {
    if !self.finished {
      let _ = self.db.rollback();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::single_file::{close_single_file, open_single_file, OpenOptions};
  use tempfile::tempdir;

  #[test]
  fn nested_begin_is_rejected() {
    let dir = tempdir().unwrap();
    let db = open_single_file(dir.path().join("nested.raydb"), OpenOptions::new()).unwrap();

    db.begin(false).unwrap();
    assert!(matches!(db.begin(false), Err(RayError::NestedTx)));
    db.rollback().unwrap();
    db.begin(false).unwrap();
    db.rollback().unwrap();

    close_single_file(db).unwrap();
  }

  #[test]
  fn commit_without_transaction_fails() {
    let dir = tempdir().unwrap();
    let db = open_single_file(dir.path().join("no-tx.raydb"), OpenOptions::new()).unwrap();
    assert!(matches!(db.commit(), Err(RayError::NoTransaction)));
    assert!(matches!(db.rollback(), Err(RayError::NoTransaction)));
    close_single_file(db).unwrap();
  }

  #[test]
  fn empty_commit_is_a_no_op() {
    let dir = tempdir().unwrap();
    let db = open_single_file(dir.path().join("empty.raydb"), OpenOptions::new()).unwrap();

    let before = db.header.read().change_counter;
    db.begin(false).unwrap();
    db.commit().unwrap();
    assert_eq!(db.header.read().change_counter, before);

    close_single_file(db).unwrap();
  }

  #[test]
  fn guard_rolls_back_on_drop() {
    let dir = tempdir().unwrap();
    let db = open_single_file(dir.path().join("guard.raydb"), OpenOptions::new()).unwrap();

    {
      let _guard = db.begin_guard(false).unwrap();
      db.create_node(Some("ghost")).unwrap();
    }
    assert!(!db.has_transaction());
    assert_eq!(db.node_by_key("ghost"), None);

    close_single_file(db).unwrap();
  }

  #[test]
  fn rollback_discards_staged_mutations() {
    let dir = tempdir().unwrap();
    let db = open_single_file(dir.path().join("rollback.raydb"), OpenOptions::new()).unwrap();

    db.begin(false).unwrap();
    db.create_node(Some("temp")).unwrap();
    assert_eq!(db.node_by_key("temp"), Some(1));
    db.rollback().unwrap();

    assert_eq!(db.node_by_key("temp"), None);
    assert!(db.delta.read().is_empty());

    close_single_file(db).unwrap();
  }
}
