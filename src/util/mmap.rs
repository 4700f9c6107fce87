//! Read-only memory mapping of the database file.

use std::fs::File;

use crate::error::Result;

pub use memmap2::Mmap;

/// Map a file read-only.
///
/// Safety: callers must not truncate the file below the mapped length
/// while the map is alive. The engine only ever extends the file while
/// snapshots are mapped; shrinking happens in offline operations that
/// drop the map first.
pub fn map_file(file: &File) -> Result<Mmap> {
  let mmap = unsafe { Mmap::map(file)? };
  Ok(mmap)
}
