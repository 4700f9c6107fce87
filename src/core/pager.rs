//! Page-based file I/O for the single-file format.
//!
//! The pager owns the file handle, buffers page writes in memory until
//! `sync`, and takes the advisory range lock that enforces the
//! single-writer rule. Page 0 is the database header; the pager itself
//! is layout-agnostic.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use hashbrown::HashMap;

use crate::constants::{LOCK_BYTE_OFFSET, LOCK_BYTE_RANGE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::error::{RayError, Result};

/// Check page size constraints: power of two in [4096, 65536].
pub fn is_valid_page_size(page_size: usize) -> bool {
  page_size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size)
}

/// Number of pages needed to store `bytes`.
pub fn pages_to_store(bytes: usize, page_size: usize) -> usize {
  bytes.div_ceil(page_size)
}

/// Pager over a single database file.
pub struct FilePager {
  file: File,
  page_size: usize,
  size_pages: u64,
  /// Buffered page writes, applied to the file on `sync`.
  dirty: HashMap<u64, Vec<u8>>,
  read_only: bool,
  locked: bool,
}

impl FilePager {
  /// Create a new database file. Fails if the file already exists.
  /// The file starts with a single zeroed header page.
  pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
    if !is_valid_page_size(page_size) {
      return Err(RayError::InvalidArgument(format!(
        "invalid page size {page_size}: must be a power of two in [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}]"
      )));
    }

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create_new(true)
      .open(path.as_ref())?;

    lock_range(&file, true)?;
    file.set_len(page_size as u64)?;

    Ok(Self {
      file,
      page_size,
      size_pages: 1,
      dirty: HashMap::new(),
      read_only: false,
      locked: true,
    })
  }

  /// Open an existing database file.
  pub fn open<P: AsRef<Path>>(path: P, page_size: usize, read_only: bool) -> Result<Self> {
    if !is_valid_page_size(page_size) {
      return Err(RayError::InvalidArgument(format!(
        "invalid page size {page_size}: must be a power of two in [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}]"
      )));
    }

    let file = OpenOptions::new()
      .read(true)
      .write(!read_only)
      .open(path.as_ref())?;

    lock_range(&file, !read_only)?;

    let len = file.metadata()?.len();
    let size_pages = len / page_size as u64;
    if size_pages == 0 {
      unlock_range(&file);
      return Err(RayError::Corrupt(format!(
        "file too small for page size {page_size}: {len} bytes"
      )));
    }

    Ok(Self {
      file,
      page_size,
      size_pages,
      dirty: HashMap::new(),
      read_only,
      locked: true,
    })
  }

  pub fn page_size(&self) -> usize {
    self.page_size
  }

  /// Current file length in pages (buffered allocations included).
  pub fn size_pages(&self) -> u64 {
    self.size_pages
  }

  pub fn file(&self) -> &File {
    &self.file
  }

  /// Read one page. Buffered writes win over file contents.
  pub fn read_page(&mut self, page_no: u64) -> Result<Vec<u8>> {
    if let Some(buffered) = self.dirty.get(&page_no) {
      return Ok(buffered.clone());
    }

    let offset = page_no
      .checked_mul(self.page_size as u64)
      .ok_or_else(|| RayError::Corrupt(format!("page offset overflow for page {page_no}")))?;
    let end = offset + self.page_size as u64;
    let file_len = self.file.metadata()?.len();
    if end > file_len {
      return Err(RayError::Corrupt(format!(
        "page {page_no} past end of file ({file_len} bytes, need {end})"
      )));
    }

    let mut buf = vec![0u8; self.page_size];
    self.file.seek(SeekFrom::Start(offset))?;
    self.file.read_exact(&mut buf)?;
    Ok(buf)
  }

  /// Read one page, substituting zeros for a page wholly or partly past
  /// the end of the file. Used by WAL scanning to treat a truncated
  /// tail as unwritten space.
  pub fn read_page_or_zero(&mut self, page_no: u64) -> Result<Vec<u8>> {
    if let Some(buffered) = self.dirty.get(&page_no) {
      return Ok(buffered.clone());
    }

    let offset = page_no.saturating_mul(self.page_size as u64);
    let file_len = self.file.metadata()?.len();
    let mut buf = vec![0u8; self.page_size];
    if offset >= file_len {
      return Ok(buf);
    }

    let available = ((file_len - offset) as usize).min(self.page_size);
    self.file.seek(SeekFrom::Start(offset))?;
    self.file.read_exact(&mut buf[..available])?;
    Ok(buf)
  }

  /// Buffer a page write. Durable only after `sync`.
  pub fn write_page(&mut self, page_no: u64, data: &[u8]) -> Result<()> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }
    if data.len() != self.page_size {
      return Err(RayError::InvalidArgument(format!(
        "write_page expects {} bytes, got {}",
        self.page_size,
        data.len()
      )));
    }
    if page_no >= self.size_pages {
      return Err(RayError::InvalidArgument(format!(
        "write to unallocated page {page_no} (file has {} pages)",
        self.size_pages
      )));
    }

    self.dirty.insert(page_no, data.to_vec());
    Ok(())
  }

  /// Extend the file by `count` zero-filled pages. Returns the first
  /// new page's index.
  pub fn allocate_pages(&mut self, count: u64) -> Result<u64> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }
    let first = self.size_pages;
    let new_size = self
      .size_pages
      .checked_add(count)
      .ok_or_else(|| RayError::InvalidArgument(format!("allocation overflow: {count} pages")))?;
    self
      .file
      .set_len(new_size.saturating_mul(self.page_size as u64))?;
    self.size_pages = new_size;
    Ok(first)
  }

  /// Shrink the file to `pages` pages. Buffered writes past the new end
  /// are dropped. Offline use only (resize/vacuum).
  pub fn truncate_pages(&mut self, pages: u64) -> Result<()> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }
    self.dirty.retain(|&page_no, _| page_no < pages);
    self.file.set_len(pages.saturating_mul(self.page_size as u64))?;
    self.size_pages = pages;
    Ok(())
  }

  /// Flush all buffered page writes and fsync.
  pub fn sync(&mut self) -> Result<()> {
    if self.read_only {
      return Ok(());
    }

    if !self.dirty.is_empty() {
      let mut pages: Vec<u64> = self.dirty.keys().copied().collect();
      pages.sort_unstable();
      for page_no in pages {
        let data = &self.dirty[&page_no];
        let offset = page_no * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
      }
      self.dirty.clear();
    }

    self.file.sync_all()?;
    Ok(())
  }
}

impl Drop for FilePager {
  fn drop(&mut self) {
    if self.locked {
      unlock_range(&self.file);
    }
  }
}

// ============================================================================
// Advisory locking
// ============================================================================
//
// Two layers: an fs2 whole-file lock (per file description, so two
// handles in one process conflict too), and the documented POSIX
// byte-range lock at offset 2^30 for 512 bytes that other processes and
// implementations of the format honor. fcntl range locks alone cannot
// exclude a second handle inside the same process.

fn lock_range(file: &File, exclusive: bool) -> Result<()> {
  use fs2::FileExt;

  let result = if exclusive {
    FileExt::try_lock_exclusive(file)
  } else {
    FileExt::try_lock_shared(file)
  };
  result.map_err(|err| {
    if err.kind() == std::io::ErrorKind::WouldBlock {
      RayError::LockBusy
    } else {
      RayError::Io(err)
    }
  })?;

  if let Err(err) = fcntl_range_lock(file, exclusive) {
    let _ = FileExt::unlock(file);
    return Err(err);
  }
  Ok(())
}

fn unlock_range(file: &File) {
  use fs2::FileExt;
  fcntl_range_unlock(file);
  let _ = FileExt::unlock(file);
}

#[cfg(unix)]
fn fcntl_range_lock(file: &File, exclusive: bool) -> Result<()> {
  use std::os::unix::io::AsRawFd;

  let lock = libc::flock {
    l_type: if exclusive {
      libc::F_WRLCK as libc::c_short
    } else {
      libc::F_RDLCK as libc::c_short
    },
    l_whence: libc::SEEK_SET as libc::c_short,
    l_start: LOCK_BYTE_OFFSET as libc::off_t,
    l_len: LOCK_BYTE_RANGE as libc::off_t,
    l_pid: 0,
  };

  let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &lock) };
  if rc == -1 {
    let err = std::io::Error::last_os_error();
    return match err.raw_os_error() {
      Some(code) if code == libc::EACCES || code == libc::EAGAIN => Err(RayError::LockBusy),
      _ => Err(RayError::Io(err)),
    };
  }
  Ok(())
}

#[cfg(unix)]
fn fcntl_range_unlock(file: &File) {
  use std::os::unix::io::AsRawFd;

  let lock = libc::flock {
    l_type: libc::F_UNLCK as libc::c_short,
    l_whence: libc::SEEK_SET as libc::c_short,
    l_start: LOCK_BYTE_OFFSET as libc::off_t,
    l_len: LOCK_BYTE_RANGE as libc::off_t,
    l_pid: 0,
  };
  unsafe {
    libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &lock);
  }
}

#[cfg(not(unix))]
fn fcntl_range_lock(_file: &File, _exclusive: bool) -> Result<()> {
  Ok(())
}

#[cfg(not(unix))]
fn fcntl_range_unlock(_file: &File) {}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn page_size_validation() {
    assert!(is_valid_page_size(4096));
    assert!(is_valid_page_size(65536));
    assert!(!is_valid_page_size(2048));
    assert!(!is_valid_page_size(5000));
    assert!(!is_valid_page_size(131072));
  }

  #[test]
  fn pages_to_store_rounds_up() {
    assert_eq!(pages_to_store(0, 4096), 0);
    assert_eq!(pages_to_store(1, 4096), 1);
    assert_eq!(pages_to_store(4096, 4096), 1);
    assert_eq!(pages_to_store(4097, 4096), 2);
  }

  #[test]
  fn write_is_buffered_until_sync() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffered.raydb");

    let mut pager = FilePager::create(&path, 4096).unwrap();
    pager.allocate_pages(1).unwrap();

    let mut page = vec![0u8; 4096];
    page[0] = 0xAB;
    pager.write_page(1, &page).unwrap();

    // The buffered write is visible through the pager.
    assert_eq!(pager.read_page(1).unwrap()[0], 0xAB);
    // But not yet on disk.
    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(on_disk[4096], 0);

    pager.sync().unwrap();
    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(on_disk[4096], 0xAB);
  }

  #[test]
  fn allocate_extends_zero_filled() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("alloc.raydb");

    let mut pager = FilePager::create(&path, 4096).unwrap();
    assert_eq!(pager.size_pages(), 1);
    let first = pager.allocate_pages(3).unwrap();
    assert_eq!(first, 1);
    assert_eq!(pager.size_pages(), 4);
    assert!(pager.read_page(3).unwrap().iter().all(|&b| b == 0));
  }

  #[test]
  fn read_past_end_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short.raydb");

    let mut pager = FilePager::create(&path, 4096).unwrap();
    assert!(matches!(pager.read_page(5), Err(RayError::Corrupt(_))));
    assert!(pager.read_page_or_zero(5).unwrap().iter().all(|&b| b == 0));
  }

  #[test]
  fn second_writer_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("locked.raydb");

    let pager = FilePager::create(&path, 4096).unwrap();
    let second = FilePager::open(&path, 4096, false);
    assert!(matches!(second, Err(RayError::LockBusy)));
    drop(pager);

    // Lock is released on drop.
    let reopened = FilePager::open(&path, 4096, false);
    assert!(reopened.is_ok());
  }
}
