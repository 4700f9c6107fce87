//! Database header (page 0).
//!
//! The header is the commit point: a durable page-0 write whose CRC
//! verifies is the single source of truth for what the database
//! contains. The engine writes it only after every page it references
//! has been flushed.

use crate::constants::*;
use crate::error::{RayError, Result};
use crate::util::binary::{read_u32, read_u64, write_u32, write_u64};
use crate::util::crc::crc32c;

/// Parsed page-0 header.
///
/// Fixed little-endian layout:
///
/// | offset | width | field |
/// |--------|-------|-------|
/// | 0      | 16    | magic "RayDB format 1\0\0" |
/// | 16     | 4     | page_size |
/// | 20     | 4     | version |
/// | 24     | 4     | min_reader_version |
/// | 28     | 4     | flags |
/// | 32     | 8     | change_counter |
/// | 40     | 8     | active_snapshot_gen |
/// | 48     | 8     | prev_snapshot_gen |
/// | 56     | 8     | snapshot_start_page |
/// | 64     | 8     | snapshot_page_count |
/// | 72     | 8     | wal_start_page |
/// | 80     | 8     | wal_page_count |
/// | 88     | 8     | wal_head |
/// | 96     | 8     | wal_tail |
/// | 104    | 8     | db_size_pages |
/// | 112    | 8     | max_node_id |
/// | 120    | 8     | next_tx_id |
/// | 128    | 8     | schema_cookie |
/// | 136    | 8     | last_commit_ts |
/// | 144    | 8     | epoch |
///
/// Bytes [152, page_size - 4) are reserved (zero on write, ignored on
/// read); the trailing 4 bytes hold the CRC32C of everything before
/// them.
#[derive(Debug, Clone)]
pub struct DbHeaderV1 {
  pub page_size: u32,
  pub version: u32,
  pub min_reader_version: u32,
  pub flags: u32,
  pub change_counter: u64,
  pub active_snapshot_gen: u64,
  pub prev_snapshot_gen: u64,
  pub snapshot_start_page: u64,
  pub snapshot_page_count: u64,
  pub wal_start_page: u64,
  pub wal_page_count: u64,
  /// Logical byte offset of the first unused byte past the log end.
  pub wal_head: u64,
  /// Logical byte offset of the oldest live record.
  pub wal_tail: u64,
  pub db_size_pages: u64,
  pub max_node_id: u64,
  pub next_tx_id: u64,
  pub schema_cookie: u64,
  /// Wall-clock ms of the most recent commit (advisory).
  pub last_commit_ts: u64,
  /// Replication epoch.
  pub epoch: u64,
}

impl DbHeaderV1 {
  /// Header for a freshly created database: empty WAL right after page
  /// 0, no snapshot yet.
  pub fn new(page_size: u32, wal_page_count: u64) -> Self {
    Self {
      page_size,
      version: VERSION_SINGLE_FILE,
      min_reader_version: MIN_READER_SINGLE_FILE,
      flags: 0,
      change_counter: 0,
      active_snapshot_gen: 0,
      prev_snapshot_gen: 0,
      snapshot_start_page: 0,
      snapshot_page_count: 0,
      wal_start_page: 1,
      wal_page_count,
      wal_head: 0,
      wal_tail: 0,
      db_size_pages: 1 + wal_page_count,
      max_node_id: 0,
      next_tx_id: INITIAL_TX_ID,
      schema_cookie: 0,
      last_commit_ts: 0,
      epoch: 0,
    }
  }

  /// Parse and validate a page-0 buffer.
  pub fn parse(buf: &[u8]) -> Result<Self> {
    if buf.len() < MIN_PAGE_SIZE {
      return Err(RayError::Corrupt(format!(
        "header page too small: {} bytes",
        buf.len()
      )));
    }

    if buf[0..16] != MAGIC_RAYDB {
      return Err(RayError::Corrupt("bad file magic".to_string()));
    }

    let page_size = read_u32(buf, 16);
    if !crate::core::pager::is_valid_page_size(page_size as usize) {
      return Err(RayError::Corrupt(format!(
        "header page_size {page_size} out of range"
      )));
    }
    if buf.len() < page_size as usize {
      return Err(RayError::Corrupt(format!(
        "header buffer shorter than page_size: {} < {page_size}",
        buf.len()
      )));
    }

    let crc_offset = page_size as usize - 4;
    let stored = read_u32(buf, crc_offset);
    let computed = crc32c(&buf[..crc_offset]);
    if stored != computed {
      return Err(RayError::CrcMismatch { stored, computed });
    }

    let version = read_u32(buf, 20);
    let min_reader_version = read_u32(buf, 24);
    if min_reader_version > VERSION_SINGLE_FILE {
      return Err(RayError::VersionMismatch {
        required: min_reader_version,
        current: VERSION_SINGLE_FILE,
      });
    }

    Ok(Self {
      page_size,
      version,
      min_reader_version,
      flags: read_u32(buf, 28),
      change_counter: read_u64(buf, 32),
      active_snapshot_gen: read_u64(buf, 40),
      prev_snapshot_gen: read_u64(buf, 48),
      snapshot_start_page: read_u64(buf, 56),
      snapshot_page_count: read_u64(buf, 64),
      wal_start_page: read_u64(buf, 72),
      wal_page_count: read_u64(buf, 80),
      wal_head: read_u64(buf, 88),
      wal_tail: read_u64(buf, 96),
      db_size_pages: read_u64(buf, 104),
      max_node_id: read_u64(buf, 112),
      next_tx_id: read_u64(buf, 120),
      schema_cookie: read_u64(buf, 128),
      last_commit_ts: read_u64(buf, 136),
      epoch: read_u64(buf, 144),
    })
  }

  /// Serialize to a full page, including the trailing CRC.
  pub fn serialize_to_page(&self) -> Vec<u8> {
    let page_size = self.page_size as usize;
    let mut buf = vec![0u8; page_size];

    buf[0..16].copy_from_slice(&MAGIC_RAYDB);
    write_u32(&mut buf, 16, self.page_size);
    write_u32(&mut buf, 20, self.version);
    write_u32(&mut buf, 24, self.min_reader_version);
    write_u32(&mut buf, 28, self.flags);
    write_u64(&mut buf, 32, self.change_counter);
    write_u64(&mut buf, 40, self.active_snapshot_gen);
    write_u64(&mut buf, 48, self.prev_snapshot_gen);
    write_u64(&mut buf, 56, self.snapshot_start_page);
    write_u64(&mut buf, 64, self.snapshot_page_count);
    write_u64(&mut buf, 72, self.wal_start_page);
    write_u64(&mut buf, 80, self.wal_page_count);
    write_u64(&mut buf, 88, self.wal_head);
    write_u64(&mut buf, 96, self.wal_tail);
    write_u64(&mut buf, 104, self.db_size_pages);
    write_u64(&mut buf, 112, self.max_node_id);
    write_u64(&mut buf, 120, self.next_tx_id);
    write_u64(&mut buf, 128, self.schema_cookie);
    write_u64(&mut buf, 136, self.last_commit_ts);
    write_u64(&mut buf, 144, self.epoch);

    let crc_offset = page_size - 4;
    let crc = crc32c(&buf[..crc_offset]);
    write_u32(&mut buf, crc_offset, crc);
    buf
  }

  /// WAL capacity in bytes.
  pub fn wal_bytes(&self) -> u64 {
    self.wal_page_count * self.page_size as u64
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip() {
    let mut header = DbHeaderV1::new(4096, 256);
    header.change_counter = 7;
    header.active_snapshot_gen = 3;
    header.snapshot_start_page = 257;
    header.snapshot_page_count = 12;
    header.wal_head = 88;
    header.wal_tail = 16;
    header.max_node_id = 42;
    header.next_tx_id = 99;
    header.schema_cookie = 5;
    header.epoch = 2;

    let page = header.serialize_to_page();
    assert_eq!(page.len(), 4096);

    let parsed = DbHeaderV1::parse(&page).unwrap();
    assert_eq!(parsed.page_size, 4096);
    assert_eq!(parsed.change_counter, 7);
    assert_eq!(parsed.active_snapshot_gen, 3);
    assert_eq!(parsed.snapshot_start_page, 257);
    assert_eq!(parsed.snapshot_page_count, 12);
    assert_eq!(parsed.wal_head, 88);
    assert_eq!(parsed.wal_tail, 16);
    assert_eq!(parsed.max_node_id, 42);
    assert_eq!(parsed.next_tx_id, 99);
    assert_eq!(parsed.schema_cookie, 5);
    assert_eq!(parsed.epoch, 2);
  }

  #[test]
  fn bad_magic_is_rejected() {
    let header = DbHeaderV1::new(4096, 16);
    let mut page = header.serialize_to_page();
    page[0] ^= 0xFF;
    assert!(matches!(DbHeaderV1::parse(&page), Err(RayError::Corrupt(_))));
  }

  #[test]
  fn flipped_body_byte_fails_crc() {
    let header = DbHeaderV1::new(4096, 16);
    let mut page = header.serialize_to_page();
    page[100] ^= 0x01;
    assert!(matches!(
      DbHeaderV1::parse(&page),
      Err(RayError::CrcMismatch { .. })
    ));
  }

  #[test]
  fn future_min_reader_is_rejected() {
    let mut header = DbHeaderV1::new(4096, 16);
    header.min_reader_version = VERSION_SINGLE_FILE + 1;
    let page = header.serialize_to_page();
    assert!(matches!(
      DbHeaderV1::parse(&page),
      Err(RayError::VersionMismatch { .. })
    ));
  }
}
