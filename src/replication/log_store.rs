//! Replication segment log storage.
//!
//! Frames are appended to segment files; each frame is
//! `[magic u32][version u16][flags u16][epoch u64][log_index u64]`
//! `[payload_len u32][payload_crc32c u32][payload]`, little-endian.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{RayError, Result};
use crate::util::crc::crc32c;

const FRAME_MAGIC: u32 = 0x474F_4C52; // "RLOG"
const FRAME_VERSION: u16 = 1;
pub const FRAME_HEADER_SIZE: usize = 32;
const MAX_FRAME_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

/// One replication log frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationFrame {
  pub epoch: u64,
  pub log_index: u64,
  pub payload: Vec<u8>,
}

impl ReplicationFrame {
  pub fn new(epoch: u64, log_index: u64, payload: Vec<u8>) -> Self {
    Self {
      epoch,
      log_index,
      payload,
    }
  }

  /// On-disk frame size, header included.
  pub fn frame_len(&self) -> u64 {
    (FRAME_HEADER_SIZE + self.payload.len()) as u64
  }
}

/// Append-oriented store over one segment file.
#[derive(Debug)]
pub struct SegmentLogStore {
  path: PathBuf,
  file: File,
  writable: bool,
}

impl SegmentLogStore {
  pub fn create(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
      .create(true)
      .truncate(true)
      .read(true)
      .write(true)
      .open(&path)?;
    Ok(Self {
      path,
      file,
      writable: true,
    })
  }

  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let file = OpenOptions::new().read(true).open(&path)?;
    Ok(Self {
      path,
      file,
      writable: false,
    })
  }

  pub fn open_or_create_append(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
      .create(true)
      .read(true)
      .append(true)
      .open(&path)?;
    Ok(Self {
      path,
      file,
      writable: true,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn file_len(&self) -> Result<u64> {
    Ok(self.file.metadata()?.len())
  }

  /// Append one frame. Returns its byte length.
  pub fn append(&mut self, frame: &ReplicationFrame) -> Result<u64> {
    if !self.writable {
      return Err(RayError::InvalidReplication(
        "cannot append to read-only segment log store".to_string(),
      ));
    }
    if frame.payload.len() > MAX_FRAME_PAYLOAD_BYTES {
      return Err(RayError::InvalidReplication(format!(
        "frame payload too large: {} bytes",
        frame.payload.len()
      )));
    }

    let mut header = [0u8; FRAME_HEADER_SIZE];
    header[0..4].copy_from_slice(&FRAME_MAGIC.to_le_bytes());
    header[4..6].copy_from_slice(&FRAME_VERSION.to_le_bytes());
    header[6..8].copy_from_slice(&0u16.to_le_bytes());
    header[8..16].copy_from_slice(&frame.epoch.to_le_bytes());
    header[16..24].copy_from_slice(&frame.log_index.to_le_bytes());
    header[24..28].copy_from_slice(&(frame.payload.len() as u32).to_le_bytes());
    header[28..32].copy_from_slice(&crc32c(&frame.payload).to_le_bytes());

    self.file.write_all(&header)?;
    self.file.write_all(&frame.payload)?;
    Ok(frame.frame_len())
  }

  pub fn sync(&mut self) -> Result<()> {
    if self.writable {
      self.file.sync_all()?;
    }
    Ok(())
  }

  /// Read every frame in the segment.
  pub fn read_all(&self) -> Result<Vec<ReplicationFrame>> {
    let file = OpenOptions::new().read(true).open(&self.path)?;
    let mut reader = BufReader::new(file);
    let mut frames = Vec::new();
    while let Some(frame) = read_frame(&mut reader)? {
      frames.push(frame);
    }
    Ok(frames)
  }

  /// Read frames starting at a byte offset, keeping those `include`
  /// accepts, up to `max_frames` (0 = unlimited). Returns the frames,
  /// each paired with its start offset, and the offset scanning ended
  /// at.
  pub fn read_from_offset(
    &self,
    start_offset: u64,
    mut include: impl FnMut(&ReplicationFrame) -> bool,
    max_frames: usize,
  ) -> Result<(Vec<(u64, ReplicationFrame)>, u64)> {
    let mut file = OpenOptions::new().read(true).open(&self.path)?;
    let file_len = file.metadata()?.len();
    let clamped = start_offset.min(file_len);
    file.seek(SeekFrom::Start(clamped))?;
    let mut reader = BufReader::new(file);

    let mut frames = Vec::new();
    let mut offset = clamped;
    while let Some(frame) = read_frame(&mut reader)? {
      let frame_start = offset;
      offset += frame.frame_len();
      if include(&frame) {
        frames.push((frame_start, frame));
        if max_frames > 0 && frames.len() >= max_frames {
          break;
        }
      }
    }
    Ok((frames, offset))
  }
}

fn read_frame(reader: &mut impl Read) -> Result<Option<ReplicationFrame>> {
  let magic = match reader.read_u32::<LittleEndian>() {
    Ok(value) => value,
    Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
    Err(error) => return Err(RayError::Io(error)),
  };

  if magic != FRAME_MAGIC {
    return Err(RayError::InvalidReplication(format!(
      "invalid replication frame magic: {magic:#010x}"
    )));
  }

  let version = read_u16_checked(reader, "version")?;
  let flags = read_u16_checked(reader, "flags")?;
  let epoch = read_u64_checked(reader, "epoch")?;
  let log_index = read_u64_checked(reader, "log_index")?;
  let payload_len = read_u32_checked(reader, "payload_len")? as usize;
  let stored_crc = read_u32_checked(reader, "payload_crc32c")?;

  if version != FRAME_VERSION {
    return Err(RayError::VersionMismatch {
      required: version as u32,
      current: FRAME_VERSION as u32,
    });
  }
  if flags != 0 {
    return Err(RayError::InvalidReplication(format!(
      "unsupported replication frame flags: {flags:#06x}"
    )));
  }
  if payload_len > MAX_FRAME_PAYLOAD_BYTES {
    return Err(RayError::InvalidReplication(format!(
      "frame payload exceeds limit: {payload_len}"
    )));
  }

  let mut payload = vec![0u8; payload_len];
  reader
    .read_exact(&mut payload)
    .map_err(|error| map_unexpected_eof(error, "payload"))?;

  let computed_crc = crc32c(&payload);
  if computed_crc != stored_crc {
    return Err(RayError::CrcMismatch {
      stored: stored_crc,
      computed: computed_crc,
    });
  }

  Ok(Some(ReplicationFrame::new(epoch, log_index, payload)))
}

fn read_u16_checked(reader: &mut impl Read, field: &'static str) -> Result<u16> {
  reader
    .read_u16::<LittleEndian>()
    .map_err(|error| map_unexpected_eof(error, field))
}

fn read_u32_checked(reader: &mut impl Read, field: &'static str) -> Result<u32> {
  reader
    .read_u32::<LittleEndian>()
    .map_err(|error| map_unexpected_eof(error, field))
}

fn read_u64_checked(reader: &mut impl Read, field: &'static str) -> Result<u64> {
  reader
    .read_u64::<LittleEndian>()
    .map_err(|error| map_unexpected_eof(error, field))
}

fn map_unexpected_eof(error: io::Error, field: &'static str) -> RayError {
  if error.kind() == io::ErrorKind::UnexpectedEof {
    RayError::InvalidReplication(format!(
      "truncated replication segment while reading {field}"
    ))
  } else {
    RayError::Io(error)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn append_then_scan_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("segment.rlog");

    let mut store = SegmentLogStore::create(&path).unwrap();
    store
      .append(&ReplicationFrame::new(1, 1, b"hello".to_vec()))
      .unwrap();
    store
      .append(&ReplicationFrame::new(1, 2, b"world".to_vec()))
      .unwrap();
    store.sync().unwrap();

    let reader = SegmentLogStore::open(&path).unwrap();
    let frames = reader.read_all().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].payload, b"hello");
    assert_eq!(frames[1].log_index, 2);
  }

  #[test]
  fn truncated_frame_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("segment.rlog");

    let mut store = SegmentLogStore::create(&path).unwrap();
    store
      .append(&ReplicationFrame::new(1, 1, b"abc".to_vec()))
      .unwrap();
    store.sync().unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    bytes.truncate(FRAME_HEADER_SIZE + 1);
    std::fs::write(&path, bytes).unwrap();

    let reader = SegmentLogStore::open(&path).unwrap();
    assert!(reader.read_all().is_err());
  }

  #[test]
  fn corrupted_payload_fails_crc() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("segment.rlog");

    let mut store = SegmentLogStore::create(&path).unwrap();
    store
      .append(&ReplicationFrame::new(1, 1, b"payload".to_vec()))
      .unwrap();
    store.sync().unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    let reader = SegmentLogStore::open(&path).unwrap();
    assert!(matches!(
      reader.read_all(),
      Err(RayError::CrcMismatch { .. })
    ));
  }

  #[test]
  fn read_from_offset_skips_earlier_frames() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("segment.rlog");

    let mut store = SegmentLogStore::create(&path).unwrap();
    let first_len = store
      .append(&ReplicationFrame::new(1, 1, b"first".to_vec()))
      .unwrap();
    store
      .append(&ReplicationFrame::new(1, 2, b"second".to_vec()))
      .unwrap();
    store.sync().unwrap();

    let reader = SegmentLogStore::open(&path).unwrap();
    let (frames, end) = reader.read_from_offset(first_len, |_| true, 0).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, first_len);
    assert_eq!(frames[0].1.log_index, 2);
    assert_eq!(end, reader.file_len().unwrap());
  }
}
