//! Circular WAL buffer embedded in the database file.
//!
//! The WAL occupies a fixed page extent. Records form a logical byte
//! stream addressed by monotonically increasing offsets; the physical
//! position of offset `o` is `o % capacity`, so records may wrap the
//! ring boundary. `head`/`tail` from the header bound the live range.
//!
//! Appends go into an in-memory mirror of the ring; `flush` writes the
//! dirty pages through the pager. The header is updated by the caller
//! only after the flush has been fsynced, which keeps every durable
//! header pointing at fully durable log bytes.

use crate::core::header::DbHeaderV1;
use crate::core::pager::FilePager;
use crate::core::wal::record::WalRecord;
use crate::error::{RayError, Result};

/// WAL buffer statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalBufferStats {
  pub used: u64,
  pub capacity: u64,
  pub head: u64,
  pub tail: u64,
  pub bytes_written: u64,
  pub flushes: u64,
}

/// In-memory mirror of the on-disk WAL ring.
pub struct WalBuffer {
  /// First page of the WAL extent.
  start_page: u64,
  /// Ring capacity in bytes.
  capacity: u64,
  page_size: usize,
  /// Full ring contents. Authoritative between flushes.
  mirror: Vec<u8>,
  /// Logical offset one past the newest record.
  head: u64,
  /// Logical offset of the oldest live record.
  tail: u64,
  /// Logical offset up to which the mirror matches the file.
  flushed_head: u64,
  bytes_written: u64,
  flushes: u64,
}

impl WalBuffer {
  /// Build an empty mirror from header geometry. Call `load` afterwards
  /// when the file may already contain live records.
  pub fn from_header(header: &DbHeaderV1) -> Self {
    let capacity = header.wal_bytes();
    Self {
      start_page: header.wal_start_page,
      capacity,
      page_size: header.page_size as usize,
      mirror: vec![0u8; capacity as usize],
      head: header.wal_head,
      tail: header.wal_tail,
      flushed_head: header.wal_head,
      bytes_written: 0,
      flushes: 0,
    }
  }

  /// Populate the mirror from the file. Pages past a truncated end read
  /// as zeros; record CRCs decide what is trustworthy.
  pub fn load(&mut self, pager: &mut FilePager) -> Result<()> {
    let page_count = self.capacity / self.page_size as u64;
    for p in 0..page_count {
      let data = pager.read_page_or_zero(self.start_page + p)?;
      let offset = (p as usize) * self.page_size;
      self.mirror[offset..offset + self.page_size].copy_from_slice(&data);
    }
    Ok(())
  }

  pub fn head(&self) -> u64 {
    self.head
  }

  pub fn tail(&self) -> u64 {
    self.tail
  }

  pub fn capacity(&self) -> u64 {
    self.capacity
  }

  /// Live bytes in the ring.
  pub fn used(&self) -> u64 {
    self.head - self.tail
  }

  pub fn used_fraction(&self) -> f64 {
    if self.capacity == 0 {
      return 0.0;
    }
    self.used() as f64 / self.capacity as f64
  }

  /// Whether `n` more bytes fit without overwriting live records.
  pub fn can_write(&self, n: u64) -> bool {
    self.used() + n <= self.capacity
  }

  /// Append an encoded record to the mirror.
  pub fn write_record(&mut self, record: &WalRecord) -> Result<()> {
    let bytes = record.encode();
    self.write_bytes(&bytes)
  }

  /// Append pre-encoded record bytes to the mirror.
  pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
    let n = bytes.len() as u64;
    if !self.can_write(n) {
      return Err(RayError::WalBufferFull {
        needed: n,
        available: self.capacity - self.used(),
      });
    }

    let phys = (self.head % self.capacity) as usize;
    let first = bytes.len().min(self.capacity as usize - phys);
    self.mirror[phys..phys + first].copy_from_slice(&bytes[..first]);
    if first < bytes.len() {
      // Wrap around the ring boundary.
      self.mirror[..bytes.len() - first].copy_from_slice(&bytes[first..]);
    }

    self.head += n;
    self.bytes_written += n;
    Ok(())
  }

  /// Write every page touched since the last flush through the pager.
  /// Does not fsync; the caller sequences `pager.sync()` before the
  /// header update.
  pub fn flush(&mut self, pager: &mut FilePager) -> Result<()> {
    if self.flushed_head == self.head {
      return Ok(());
    }

    let len = self.head - self.flushed_head;
    let phys_start = self.flushed_head % self.capacity;

    let mut ranges: Vec<(u64, u64)> = Vec::with_capacity(2);
    if phys_start + len <= self.capacity {
      ranges.push((phys_start, phys_start + len));
    } else {
      ranges.push((phys_start, self.capacity));
      ranges.push((0, (phys_start + len) % self.capacity));
    }

    for (begin, end) in ranges {
      let first_page = begin / self.page_size as u64;
      let last_page = (end - 1) / self.page_size as u64;
      for p in first_page..=last_page {
        let offset = (p as usize) * self.page_size;
        let data = &self.mirror[offset..offset + self.page_size];
        pager.write_page(self.start_page + p, data)?;
      }
    }

    self.flushed_head = self.head;
    self.flushes += 1;
    Ok(())
  }

  /// Rewind the head after recovery discarded a torn suffix. New
  /// appends overwrite the discarded bytes.
  pub fn rewind_head(&mut self, head: u64) {
    debug_assert!(head >= self.tail && head <= self.head);
    self.head = head;
    self.flushed_head = head;
  }

  /// Empty the ring after compaction folded everything into a snapshot.
  pub fn reset(&mut self) {
    self.head = 0;
    self.tail = 0;
    self.flushed_head = 0;
    self.mirror.fill(0);
  }

  pub fn stats(&self) -> WalBufferStats {
    WalBufferStats {
      used: self.used(),
      capacity: self.capacity,
      head: self.head,
      tail: self.tail,
      bytes_written: self.bytes_written,
      flushes: self.flushes,
    }
  }
}
