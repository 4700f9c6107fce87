//! Snapshot section table parsing.

use crate::constants::{SECTION_ENTRY_SIZE, SNAPSHOT_HEADER_SIZE};
use crate::error::{RayError, Result};
use crate::types::{SectionEntry, SectionId};
use crate::util::binary::{read_u32, read_u64};

/// Section count for a given snapshot format version.
pub fn section_count_for_version(_version: u32) -> usize {
  SectionId::COUNT
}

/// Parsed section table.
pub struct ParsedSectionTable {
  /// Entries indexed by `SectionId`, offsets relative to the snapshot
  /// start.
  pub sections: Vec<SectionEntry>,
  /// Snapshot-relative end of the furthest section.
  pub max_section_end: usize,
}

/// Parse the section table that follows the snapshot header. `buf` must
/// start at the snapshot's first byte.
pub fn parse_section_table(buf: &[u8], section_count: usize) -> Result<ParsedSectionTable> {
  let table_end = SNAPSHOT_HEADER_SIZE + section_count * SECTION_ENTRY_SIZE;
  if buf.len() < table_end {
    return Err(RayError::Corrupt(format!(
      "snapshot section table truncated: need {table_end} bytes, have {}",
      buf.len()
    )));
  }

  let mut sections = Vec::with_capacity(section_count);
  let mut max_section_end = table_end;

  for i in 0..section_count {
    let entry_offset = SNAPSHOT_HEADER_SIZE + i * SECTION_ENTRY_SIZE;
    let entry = SectionEntry {
      offset: read_u64(buf, entry_offset),
      length: read_u64(buf, entry_offset + 8),
      compression: read_u32(buf, entry_offset + 16),
      uncompressed_size: read_u32(buf, entry_offset + 20),
    };

    if entry.length > 0 {
      let end = entry
        .offset
        .checked_add(entry.length)
        .ok_or_else(|| RayError::Corrupt("snapshot section extent overflow".to_string()))?;
      if end as usize > buf.len() {
        return Err(RayError::Corrupt(format!(
          "snapshot section {i} extends past buffer: end {end}, len {}",
          buf.len()
        )));
      }
      max_section_end = max_section_end.max(end as usize);
    }

    sections.push(entry);
  }

  Ok(ParsedSectionTable {
    sections,
    max_section_end,
  })
}
