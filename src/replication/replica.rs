//! Replica-side replication runtime: applied cursor persistence and
//! reseed bookkeeping.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{RayError, Result};
use crate::replication::types::CommitToken;

const STATE_FILE: &str = "replica-state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ReplicaState {
  applied_epoch: u64,
  applied_log_index: u64,
  needs_reseed: bool,
  last_error: Option<String>,
}

/// Snapshot of replica replication state.
#[derive(Debug, Clone)]
pub struct ReplicaReplicationStatus {
  pub applied_epoch: u64,
  pub applied_log_index: u64,
  pub needs_reseed: bool,
  pub last_error: Option<String>,
}

/// Replica runtime over a sidecar directory.
pub struct ReplicaReplication {
  state_path: PathBuf,
  inner: Mutex<ReplicaState>,
}

impl ReplicaReplication {
  pub fn open(sidecar_dir: impl AsRef<Path>) -> Result<Self> {
    let sidecar_dir = sidecar_dir.as_ref();
    fs::create_dir_all(sidecar_dir)?;
    let state_path = sidecar_dir.join(STATE_FILE);

    let state = match fs::read(&state_path) {
      Ok(bytes) => serde_json::from_slice(&bytes)
        .map_err(|e| RayError::Serialization(format!("decode replica state: {e}")))?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => ReplicaState::default(),
      Err(e) => return Err(RayError::Io(e)),
    };

    Ok(Self {
      state_path,
      inner: Mutex::new(state),
    })
  }

  fn persist(&self, state: &ReplicaState) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(state)
      .map_err(|e| RayError::Serialization(format!("encode replica state: {e}")))?;
    let tmp = self.state_path.with_extension("json.tmp");
    {
      use std::io::Write;
      let mut file = fs::File::create(&tmp)?;
      file.write_all(&bytes)?;
      file.sync_all()?;
    }
    fs::rename(&tmp, &self.state_path)?;
    Ok(())
  }

  /// Applied `(epoch, log_index)` position.
  pub fn applied_position(&self) -> (u64, u64) {
    let state = self.inner.lock();
    (state.applied_epoch, state.applied_log_index)
  }

  pub fn applied_token(&self) -> CommitToken {
    let (epoch, log_index) = self.applied_position();
    CommitToken::new(epoch, log_index)
  }

  /// Advance and persist the applied cursor.
  pub fn mark_applied(&self, epoch: u64, log_index: u64) -> Result<()> {
    let mut state = self.inner.lock();
    state.applied_epoch = epoch;
    state.applied_log_index = log_index;
    state.needs_reseed = false;
    state.last_error = None;
    self.persist(&state)
  }

  /// Anchor the cursor after a snapshot install.
  pub fn anchor(&self, epoch: u64, log_index: u64) -> Result<()> {
    self.mark_applied(epoch, log_index)
  }

  pub fn mark_error(&self, message: String, needs_reseed: bool) -> Result<()> {
    let mut state = self.inner.lock();
    state.last_error = Some(message);
    state.needs_reseed = state.needs_reseed || needs_reseed;
    self.persist(&state)
  }

  pub fn clear_error(&self) -> Result<()> {
    let mut state = self.inner.lock();
    if state.last_error.is_none() {
      return Ok(());
    }
    state.last_error = None;
    self.persist(&state)
  }

  pub fn status(&self) -> ReplicaReplicationStatus {
    let state = self.inner.lock();
    ReplicaReplicationStatus {
      applied_epoch: state.applied_epoch,
      applied_log_index: state.applied_log_index,
      needs_reseed: state.needs_reseed,
      last_error: state.last_error.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn cursor_survives_reopen() {
    let dir = tempdir().unwrap();
    let sidecar = dir.path().join("sidecar");

    let replica = ReplicaReplication::open(&sidecar).unwrap();
    replica.mark_applied(1, 42).unwrap();
    drop(replica);

    let reopened = ReplicaReplication::open(&sidecar).unwrap();
    assert_eq!(reopened.applied_position(), (1, 42));
  }

  #[test]
  fn error_state_round_trip() {
    let dir = tempdir().unwrap();
    let replica = ReplicaReplication::open(dir.path().join("sidecar")).unwrap();

    replica.mark_error("epoch moved".to_string(), true).unwrap();
    let status = replica.status();
    assert!(status.needs_reseed);
    assert_eq!(status.last_error.as_deref(), Some("epoch moved"));

    // Applying clears both flags.
    replica.mark_applied(2, 1).unwrap();
    let status = replica.status();
    assert!(!status.needs_reseed);
    assert!(status.last_error.is_none());
  }
}
