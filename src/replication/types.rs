//! Replication roles, cursors, and commit tokens.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RayError;

/// Role of an open database in replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationRole {
  #[default]
  Disabled,
  Primary,
  Replica,
}

/// Opaque position in the primary's replication log.
///
/// Serialized as `epoch:log_index:segment_id:segment_offset` (decimal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationCursor {
  pub epoch: u64,
  pub log_index: u64,
  pub segment_id: u64,
  pub segment_offset: u64,
}

impl ReplicationCursor {
  pub fn new(epoch: u64, log_index: u64, segment_id: u64, segment_offset: u64) -> Self {
    Self {
      epoch,
      log_index,
      segment_id,
      segment_offset,
    }
  }
}

impl fmt::Display for ReplicationCursor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}:{}:{}:{}",
      self.epoch, self.log_index, self.segment_id, self.segment_offset
    )
  }
}

impl FromStr for ReplicationCursor {
  type Err = RayError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 4 {
      return Err(RayError::InvalidReplication(format!(
        "cursor must have 4 fields, got {:?}",
        s
      )));
    }
    let mut fields = [0u64; 4];
    for (i, part) in parts.iter().enumerate() {
      fields[i] = part.parse::<u64>().map_err(|_| {
        RayError::InvalidReplication(format!("invalid cursor field {:?} in {:?}", part, s))
      })?;
    }
    Ok(Self {
      epoch: fields[0],
      log_index: fields[1],
      segment_id: fields[2],
      segment_offset: fields[3],
    })
  }
}

/// Durable position a commit reached on the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CommitToken {
  pub epoch: u64,
  pub log_index: u64,
}

impl CommitToken {
  pub fn new(epoch: u64, log_index: u64) -> Self {
    Self { epoch, log_index }
  }
}

impl fmt::Display for CommitToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.epoch, self.log_index)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cursor_round_trip() {
    let cursor = ReplicationCursor::new(3, 17, 2, 4096);
    let text = cursor.to_string();
    assert_eq!(text, "3:17:2:4096");
    assert_eq!(text.parse::<ReplicationCursor>().unwrap(), cursor);
  }

  #[test]
  fn malformed_cursor_is_rejected() {
    assert!("1:2:3".parse::<ReplicationCursor>().is_err());
    assert!("a:b:c:d".parse::<ReplicationCursor>().is_err());
    assert!("".parse::<ReplicationCursor>().is_err());
  }

  #[test]
  fn token_ordering_prefers_epoch() {
    assert!(CommitToken::new(2, 1) > CommitToken::new(1, 99));
    assert!(CommitToken::new(1, 5) > CommitToken::new(1, 4));
  }
}
