//! Error types for RayDB.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RayError>;

/// All errors surfaced by the engine.
///
/// Low-level errors bubble up to the transaction boundary; `commit` is
/// the only operation that may be retried as a whole (after
/// `WalBufferFull` + compaction). `Corrupt` from a read path is not
/// recoverable within the current open.
#[derive(Debug, Error)]
pub enum RayError {
  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error("corrupt database: {0}")]
  Corrupt(String),

  #[error("crc mismatch: stored {stored:#010x}, computed {computed:#010x}")]
  CrcMismatch { stored: u32, computed: u32 },

  #[error("version mismatch: file requires reader version {required}, this build supports {current}")]
  VersionMismatch { required: u32, current: u32 },

  #[error("WAL buffer full: record needs {needed} bytes, {available} available (compact to free space)")]
  WalBufferFull { needed: u64, available: u64 },

  #[error("database is read-only")]
  ReadOnly,

  #[error("another writer holds the database lock")]
  LockBusy,

  #[error("not found: {0}")]
  NotFound(String),

  #[error("already exists: {0}")]
  AlreadyExists(String),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("transaction aborted")]
  Aborted,

  #[error("no active transaction")]
  NoTransaction,

  #[error("a transaction is already active on this handle")]
  NestedTx,

  #[error("replication error: {0}")]
  InvalidReplication(String),

  #[error("serialization error: {0}")]
  Serialization(String),
}

impl RayError {
  /// Whether this error poisons the current open (requires close +
  /// operator intervention).
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      RayError::Corrupt(_) | RayError::CrcMismatch { .. } | RayError::VersionMismatch { .. }
    )
  }
}
