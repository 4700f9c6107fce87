//! Sidecar manifest: epoch, head index, retention floor, and the
//! segment roster. Stored as JSON, replaced atomically.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RayError, Result};

/// One segment file's metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentMeta {
  pub id: u64,
  pub first_log_index: u64,
  pub last_log_index: u64,
}

/// Replication log manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationManifest {
  pub epoch: u64,
  pub head_log_index: u64,
  pub retained_floor: u64,
  pub segments: Vec<SegmentMeta>,
}

/// Reads and atomically rewrites the manifest file.
#[derive(Debug)]
pub struct ManifestStore {
  path: PathBuf,
}

impl ManifestStore {
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }

  /// Load the manifest; a missing file is an empty manifest.
  pub fn read(&self) -> Result<ReplicationManifest> {
    match fs::read(&self.path) {
      Ok(bytes) => serde_json::from_slice(&bytes)
        .map_err(|e| RayError::Serialization(format!("decode replication manifest: {e}"))),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ReplicationManifest::default()),
      Err(e) => Err(RayError::Io(e)),
    }
  }

  /// Write via tmp file + rename so readers never see a torn manifest.
  pub fn write(&self, manifest: &ReplicationManifest) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(manifest)
      .map_err(|e| RayError::Serialization(format!("encode replication manifest: {e}")))?;

    let tmp_path = self.path.with_extension("json.tmp");
    {
      use std::io::Write;
      let mut file = fs::File::create(&tmp_path)?;
      file.write_all(&bytes)?;
      file.sync_all()?;
    }
    fs::rename(&tmp_path, &self.path)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn missing_manifest_is_empty() {
    let dir = tempdir().unwrap();
    let store = ManifestStore::new(dir.path().join("manifest.json"));
    let manifest = store.read().unwrap();
    assert_eq!(manifest.epoch, 0);
    assert!(manifest.segments.is_empty());
  }

  #[test]
  fn write_read_round_trip() {
    let dir = tempdir().unwrap();
    let store = ManifestStore::new(dir.path().join("manifest.json"));

    let manifest = ReplicationManifest {
      epoch: 2,
      head_log_index: 41,
      retained_floor: 7,
      segments: vec![SegmentMeta {
        id: 1,
        first_log_index: 8,
        last_log_index: 41,
      }],
    };
    store.write(&manifest).unwrap();

    let loaded = store.read().unwrap();
    assert_eq!(loaded.epoch, 2);
    assert_eq!(loaded.head_log_index, 41);
    assert_eq!(loaded.retained_floor, 7);
    assert_eq!(loaded.segments, manifest.segments);
  }

  #[test]
  fn corrupt_manifest_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    std::fs::write(&path, b"{ not json").unwrap();
    let store = ManifestStore::new(&path);
    assert!(store.read().is_err());
  }
}
