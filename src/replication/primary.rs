//! Primary-side replication runtime.
//!
//! Each committed transaction is appended as one frame to the sidecar
//! segment log. Replica progress reports drive retention; an epoch bump
//! starts a fresh segment and invalidates every replica cursor.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{RayError, Result};
use crate::replication::log_store::{ReplicationFrame, SegmentLogStore};
use crate::replication::manifest::{ManifestStore, ReplicationManifest, SegmentMeta};
use crate::replication::transport::encode_commit_frame_payload;
use crate::replication::types::{CommitToken, ReplicationCursor};
use crate::types::TxId;

const MANIFEST_FILE: &str = "manifest.json";

fn segment_file_name(id: u64) -> String {
  format!("segment-{id:020}.rlog")
}

/// Snapshot of primary replication state.
#[derive(Debug, Clone)]
pub struct PrimaryReplicationStatus {
  pub epoch: u64,
  pub head_log_index: u64,
  pub retained_floor: u64,
  pub replica_count: usize,
  pub min_replica_applied: Option<u64>,
  pub sidecar_path: PathBuf,
  pub last_token: Option<CommitToken>,
}

/// Outcome of a retention pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryRetentionOutcome {
  pub segments_removed: usize,
  pub retained_floor: u64,
}

struct PrimaryInner {
  manifest: ReplicationManifest,
  store: SegmentLogStore,
  active_segment_id: u64,
  /// replica id -> (epoch, applied log index)
  replicas: HashMap<String, (u64, u64)>,
  last_token: Option<CommitToken>,
}

/// Primary replication runtime over a sidecar directory.
pub struct PrimaryReplication {
  sidecar_dir: PathBuf,
  manifest_store: ManifestStore,
  segment_roll_bytes: u64,
  inner: Mutex<PrimaryInner>,
}

impl PrimaryReplication {
  /// Open (or initialize) the sidecar next to a primary database.
  /// `header_epoch` is authoritative: a sidecar left behind by an older
  /// epoch is fast-forwarded.
  pub fn open(
    sidecar_dir: impl AsRef<Path>,
    header_epoch: u64,
    segment_roll_bytes: u64,
  ) -> Result<Self> {
    let sidecar_dir = sidecar_dir.as_ref().to_path_buf();
    fs::create_dir_all(&sidecar_dir)?;

    let manifest_store = ManifestStore::new(sidecar_dir.join(MANIFEST_FILE));
    let mut manifest = manifest_store.read()?;

    if manifest.epoch > header_epoch {
      return Err(RayError::InvalidReplication(format!(
        "sidecar epoch {} is ahead of database epoch {header_epoch}",
        manifest.epoch
      )));
    }
    let mut dirty = false;
    if manifest.epoch < header_epoch {
      log::warn!(
        "sidecar epoch {} behind database epoch {header_epoch}; fast-forwarding",
        manifest.epoch
      );
      manifest.epoch = header_epoch;
      dirty = true;
    }

    let last_segment_id = manifest.segments.last().map(|meta| meta.id);
    let active_segment_id = match last_segment_id {
      Some(id) => id,
      None => {
        manifest.segments.push(SegmentMeta {
          id: 1,
          first_log_index: manifest.head_log_index + 1,
          last_log_index: manifest.head_log_index,
        });
        dirty = true;
        1
      }
    };

    if dirty {
      manifest_store.write(&manifest)?;
    }

    let store =
      SegmentLogStore::open_or_create_append(sidecar_dir.join(segment_file_name(active_segment_id)))?;

    Ok(Self {
      sidecar_dir,
      manifest_store,
      segment_roll_bytes,
      inner: Mutex::new(PrimaryInner {
        manifest,
        store,
        active_segment_id,
        replicas: HashMap::new(),
        last_token: None,
      }),
    })
  }

  pub fn sidecar_dir(&self) -> &Path {
    &self.sidecar_dir
  }

  /// Append one committed transaction's WAL bytes as a frame.
  pub fn append_commit(&self, epoch: u64, txid: TxId, wal_bytes: &[u8]) -> Result<CommitToken> {
    let mut inner = self.inner.lock();

    if epoch != inner.manifest.epoch {
      return Err(RayError::InvalidReplication(format!(
        "commit epoch {epoch} does not match replication epoch {}",
        inner.manifest.epoch
      )));
    }

    // Roll before appending once the active segment is large enough.
    if inner.store.file_len()? >= self.segment_roll_bytes {
      self.roll_segment(&mut inner)?;
    }

    let log_index = inner.manifest.head_log_index + 1;
    let frame = ReplicationFrame::new(epoch, log_index, encode_commit_frame_payload(txid, wal_bytes));
    inner.store.append(&frame)?;
    inner.store.sync()?;

    inner.manifest.head_log_index = log_index;
    let active_id = inner.active_segment_id;
    if let Some(meta) = inner
      .manifest
      .segments
      .iter_mut()
      .find(|meta| meta.id == active_id)
    {
      if meta.last_log_index < meta.first_log_index {
        meta.first_log_index = log_index;
      }
      meta.last_log_index = log_index;
    }
    self.manifest_store.write(&inner.manifest)?;

    let token = CommitToken::new(epoch, log_index);
    inner.last_token = Some(token);
    Ok(token)
  }

  fn roll_segment(&self, inner: &mut PrimaryInner) -> Result<()> {
    let next_id = inner.active_segment_id + 1;
    let next_first = inner.manifest.head_log_index + 1;
    inner.manifest.segments.push(SegmentMeta {
      id: next_id,
      first_log_index: next_first,
      last_log_index: next_first - 1,
    });
    inner.store = SegmentLogStore::open_or_create_append(
      self.sidecar_dir.join(segment_file_name(next_id)),
    )?;
    inner.active_segment_id = next_id;
    self.manifest_store.write(&inner.manifest)?;
    Ok(())
  }

  /// Adopt a new epoch after the database header was durably bumped.
  /// Rolls to a fresh segment so old-epoch frames stay self-contained.
  pub fn adopt_epoch(&self, epoch: u64) -> Result<()> {
    let mut inner = self.inner.lock();
    if epoch <= inner.manifest.epoch {
      return Err(RayError::InvalidReplication(format!(
        "epoch must advance: {} -> {epoch}",
        inner.manifest.epoch
      )));
    }
    inner.manifest.epoch = epoch;
    self.roll_segment(&mut inner)
  }

  /// Record a replica's applied position.
  pub fn report_replica_progress(
    &self,
    replica_id: &str,
    epoch: u64,
    applied_log_index: u64,
  ) -> Result<()> {
    let mut inner = self.inner.lock();
    inner
      .replicas
      .insert(replica_id.to_string(), (epoch, applied_log_index));
    Ok(())
  }

  /// Prune segments every reporting replica has fully applied.
  pub fn run_retention(&self) -> Result<PrimaryRetentionOutcome> {
    let mut inner = self.inner.lock();
    let epoch = inner.manifest.epoch;

    let floor = inner
      .replicas
      .values()
      .map(|&(replica_epoch, applied)| if replica_epoch == epoch { applied } else { 0 })
      .min();
    let Some(floor) = floor else {
      return Ok(PrimaryRetentionOutcome {
        segments_removed: 0,
        retained_floor: inner.manifest.retained_floor,
      });
    };

    let active_id = inner.active_segment_id;
    let removable: Vec<SegmentMeta> = inner
      .manifest
      .segments
      .iter()
      .filter(|meta| meta.id != active_id && meta.last_log_index <= floor)
      .cloned()
      .collect();

    for meta in &removable {
      let path = self.sidecar_dir.join(segment_file_name(meta.id));
      if path.exists() {
        fs::remove_file(&path)?;
      }
    }

    let removed_ids: Vec<u64> = removable.iter().map(|meta| meta.id).collect();
    inner
      .manifest
      .segments
      .retain(|meta| !removed_ids.contains(&meta.id));
    inner.manifest.retained_floor = inner.manifest.retained_floor.max(floor);
    self.manifest_store.write(&inner.manifest)?;

    Ok(PrimaryRetentionOutcome {
      segments_removed: removed_ids.len(),
      retained_floor: inner.manifest.retained_floor,
    })
  }

  pub fn status(&self) -> PrimaryReplicationStatus {
    let inner = self.inner.lock();
    let epoch = inner.manifest.epoch;
    PrimaryReplicationStatus {
      epoch,
      head_log_index: inner.manifest.head_log_index,
      retained_floor: inner.manifest.retained_floor,
      replica_count: inner.replicas.len(),
      min_replica_applied: inner
        .replicas
        .values()
        .map(|&(replica_epoch, applied)| if replica_epoch == epoch { applied } else { 0 })
        .min(),
      sidecar_path: self.sidecar_dir.clone(),
      last_token: inner.last_token,
    }
  }

  /// Read frames after `cursor`, bounded by `max_frames` and
  /// `max_bytes`. Returns the frames with their positions, the cursor
  /// to resume from, and whether the log end was reached.
  #[allow(clippy::type_complexity)]
  pub fn read_frames(
    &self,
    cursor: Option<ReplicationCursor>,
    max_frames: usize,
    max_bytes: usize,
  ) -> Result<(Vec<(ReplicationCursor, ReplicationFrame)>, Option<ReplicationCursor>, bool)> {
    if max_frames == 0 {
      return Err(RayError::InvalidArgument("max_frames must be > 0".to_string()));
    }
    if max_bytes == 0 {
      return Err(RayError::InvalidArgument("max_bytes must be > 0".to_string()));
    }

    let segments: Vec<SegmentMeta> = {
      let inner = self.inner.lock();
      inner.manifest.segments.clone()
    };

    let mut frames: Vec<(ReplicationCursor, ReplicationFrame)> = Vec::new();
    let mut total_bytes = 0usize;
    let mut next_cursor = cursor;
    let mut limited = false;

    'segments: for meta in segments {
      if cursor.is_some_and(|c| meta.id < c.segment_id) {
        continue;
      }
      let path = self.sidecar_dir.join(segment_file_name(meta.id));
      if !path.exists() {
        continue;
      }

      let start_offset = match cursor {
        Some(c) if c.segment_id == meta.id => c.segment_offset,
        _ => 0,
      };

      let store = SegmentLogStore::open(&path)?;
      let (segment_frames, _end) = store.read_from_offset(start_offset, |_| true, 0)?;

      for (frame_start, frame) in segment_frames {
        if let Some(c) = cursor {
          if (frame.epoch, frame.log_index) <= (c.epoch, c.log_index) {
            continue;
          }
        }

        let frame_bytes = frame.frame_len() as usize;
        if frames.len() >= max_frames || total_bytes.saturating_add(frame_bytes) > max_bytes {
          limited = true;
          break 'segments;
        }

        let position = ReplicationCursor::new(
          frame.epoch,
          frame.log_index,
          meta.id,
          frame_start + frame.frame_len(),
        );
        next_cursor = Some(position);
        total_bytes += frame_bytes;
        frames.push((position, frame));
      }
    }

    Ok((frames, next_cursor, !limited))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn append_and_read_back() {
    let dir = tempdir().unwrap();
    let primary = PrimaryReplication::open(dir.path().join("sidecar"), 0, 1 << 20).unwrap();

    let t1 = primary.append_commit(0, 1, b"tx-1").unwrap();
    let t2 = primary.append_commit(0, 2, b"tx-2").unwrap();
    assert!(t2 > t1);

    let status = primary.status();
    assert_eq!(status.epoch, 0);
    assert_eq!(status.head_log_index, 2);

    let (frames, next, eof) = primary.read_frames(None, 10, 1 << 20).unwrap();
    assert_eq!(frames.len(), 2);
    assert!(eof);
    let next = next.unwrap();
    assert_eq!(next.log_index, 2);

    // Resuming from the cursor yields nothing new.
    let (more, _, eof) = primary.read_frames(Some(next), 10, 1 << 20).unwrap();
    assert!(more.is_empty());
    assert!(eof);
  }

  #[test]
  fn segment_roll_and_retention() {
    let dir = tempdir().unwrap();
    // Tiny roll threshold: every append after the first rolls.
    let primary = PrimaryReplication::open(dir.path().join("sidecar"), 0, 1).unwrap();

    for txid in 1..=4u64 {
      primary.append_commit(0, txid, b"payload").unwrap();
    }
    assert!(primary.status().head_log_index == 4);

    primary.report_replica_progress("r1", 0, 3).unwrap();
    let outcome = primary.run_retention().unwrap();
    assert!(outcome.segments_removed > 0);
    assert_eq!(outcome.retained_floor, 3);

    // Frames past the floor are still readable.
    let (frames, _, _) = primary.read_frames(None, 100, 1 << 20).unwrap();
    assert!(frames.iter().any(|(_, f)| f.log_index == 4));
  }

  #[test]
  fn epoch_mismatch_on_append_is_rejected() {
    let dir = tempdir().unwrap();
    let primary = PrimaryReplication::open(dir.path().join("sidecar"), 2, 1 << 20).unwrap();
    assert!(primary.append_commit(1, 1, b"old").is_err());
    primary.append_commit(2, 1, b"ok").unwrap();
  }

  #[test]
  fn adopt_epoch_rolls_segment() {
    let dir = tempdir().unwrap();
    let primary = PrimaryReplication::open(dir.path().join("sidecar"), 0, 1 << 20).unwrap();
    primary.append_commit(0, 1, b"a").unwrap();
    primary.adopt_epoch(1).unwrap();
    assert!(primary.append_commit(0, 2, b"late").is_err());
    primary.append_commit(1, 2, b"b").unwrap();
    assert_eq!(primary.status().epoch, 1);
  }
}
