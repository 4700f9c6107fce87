//! Commit frame payload encoding.
//!
//! A frame payload wraps the exact WAL record bytes of one committed
//! transaction: `[magic u32][flags u32][txid u64][wal_len u32][wal bytes]`.

use crate::error::{RayError, Result};
use crate::types::TxId;
use crate::util::binary::{read_u32, read_u64};

const COMMIT_FRAME_MAGIC: u32 = 0x3146_4352; // "RCF1"
const COMMIT_FRAME_HEADER_SIZE: usize = 20;

/// Decoded commit frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFramePayload {
  pub txid: TxId,
  pub wal_bytes: Vec<u8>,
}

/// Encode a transaction's WAL record bytes for shipping.
pub fn encode_commit_frame_payload(txid: TxId, wal_bytes: &[u8]) -> Vec<u8> {
  let mut buf = Vec::with_capacity(COMMIT_FRAME_HEADER_SIZE + wal_bytes.len());
  buf.extend_from_slice(&COMMIT_FRAME_MAGIC.to_le_bytes());
  buf.extend_from_slice(&0u32.to_le_bytes());
  buf.extend_from_slice(&txid.to_le_bytes());
  buf.extend_from_slice(&(wal_bytes.len() as u32).to_le_bytes());
  buf.extend_from_slice(wal_bytes);
  buf
}

/// Decode a commit frame payload.
pub fn decode_commit_frame_payload(payload: &[u8]) -> Result<CommitFramePayload> {
  if payload.len() < COMMIT_FRAME_HEADER_SIZE {
    return Err(RayError::InvalidReplication(format!(
      "commit frame payload too short: {} bytes",
      payload.len()
    )));
  }

  let magic = read_u32(payload, 0);
  if magic != COMMIT_FRAME_MAGIC {
    return Err(RayError::InvalidReplication(format!(
      "bad commit frame magic {magic:#010x}"
    )));
  }

  let flags = read_u32(payload, 4);
  if flags != 0 {
    return Err(RayError::InvalidReplication(format!(
      "unsupported commit frame flags {flags:#010x}"
    )));
  }

  let txid = read_u64(payload, 8);
  let wal_len = read_u32(payload, 16) as usize;
  if COMMIT_FRAME_HEADER_SIZE + wal_len != payload.len() {
    return Err(RayError::InvalidReplication(format!(
      "commit frame length mismatch: declared {wal_len}, payload {}",
      payload.len() - COMMIT_FRAME_HEADER_SIZE
    )));
  }

  Ok(CommitFramePayload {
    txid,
    wal_bytes: payload[COMMIT_FRAME_HEADER_SIZE..].to_vec(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip() {
    let payload = encode_commit_frame_payload(42, b"wal-bytes");
    let decoded = decode_commit_frame_payload(&payload).unwrap();
    assert_eq!(decoded.txid, 42);
    assert_eq!(decoded.wal_bytes, b"wal-bytes");
  }

  #[test]
  fn length_mismatch_is_rejected() {
    let mut payload = encode_commit_frame_payload(1, b"abc");
    payload.push(0);
    assert!(decode_commit_frame_payload(&payload).is_err());
  }

  #[test]
  fn bad_magic_is_rejected() {
    let mut payload = encode_commit_frame_payload(1, b"abc");
    payload[0] ^= 0xFF;
    assert!(decode_commit_frame_payload(&payload).is_err());
  }
}
