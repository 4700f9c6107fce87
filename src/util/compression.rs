//! Optional per-section compression for snapshot regions.
//!
//! Each snapshot section records its compression type and uncompressed
//! size in the section table; `None` sections are readable zero-copy
//! from the mmap.

use std::io::{Read, Write};

use crate::constants::COMPRESSION_MIN_SIZE;
use crate::error::{RayError, Result};

/// Compression codec identifier stored in the section table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CompressionType {
  None = 0,
  Deflate = 1,
  Zstd = 2,
}

impl CompressionType {
  pub fn from_u32(value: u32) -> Option<Self> {
    match value {
      0 => Some(CompressionType::None),
      1 => Some(CompressionType::Deflate),
      2 => Some(CompressionType::Zstd),
      _ => None,
    }
  }
}

/// Compression options for snapshot builds.
#[derive(Debug, Clone)]
pub struct CompressionOptions {
  pub enabled: bool,
  pub compression_type: CompressionType,
  /// Sections smaller than this stay uncompressed.
  pub min_size: usize,
  pub level: i32,
}

impl Default for CompressionOptions {
  fn default() -> Self {
    Self {
      enabled: false,
      compression_type: CompressionType::None,
      min_size: COMPRESSION_MIN_SIZE,
      level: 3,
    }
  }
}

impl CompressionOptions {
  pub fn zstd(level: i32) -> Self {
    Self {
      enabled: true,
      compression_type: CompressionType::Zstd,
      min_size: COMPRESSION_MIN_SIZE,
      level,
    }
  }

  pub fn deflate() -> Self {
    Self {
      enabled: true,
      compression_type: CompressionType::Deflate,
      min_size: COMPRESSION_MIN_SIZE,
      level: 6,
    }
  }
}

/// Compress `data` when the options call for it and it pays off.
/// Returns the bytes to store and the codec actually used.
pub fn maybe_compress(data: &[u8], options: &CompressionOptions) -> (Vec<u8>, CompressionType) {
  if !options.enabled
    || options.compression_type == CompressionType::None
    || data.len() < options.min_size
  {
    return (data.to_vec(), CompressionType::None);
  }

  let compressed = match options.compression_type {
    CompressionType::None => return (data.to_vec(), CompressionType::None),
    CompressionType::Deflate => {
      let mut encoder = flate2::write::DeflateEncoder::new(
        Vec::with_capacity(data.len() / 2),
        flate2::Compression::new(options.level.clamp(0, 9) as u32),
      );
      match encoder.write_all(data).and_then(|_| encoder.finish()) {
        Ok(out) => out,
        Err(_) => return (data.to_vec(), CompressionType::None),
      }
    }
    CompressionType::Zstd => match zstd::bulk::compress(data, options.level) {
      Ok(out) => out,
      Err(_) => return (data.to_vec(), CompressionType::None),
    },
  };

  if compressed.len() >= data.len() {
    return (data.to_vec(), CompressionType::None);
  }
  (compressed, options.compression_type)
}

/// Decompress a section back to its recorded uncompressed size.
pub fn decompress_with_size(
  data: &[u8],
  compression: CompressionType,
  uncompressed_size: usize,
) -> Result<Vec<u8>> {
  match compression {
    CompressionType::None => Ok(data.to_vec()),
    CompressionType::Deflate => {
      let mut decoder = flate2::read::DeflateDecoder::new(data);
      let mut out = Vec::with_capacity(uncompressed_size);
      decoder
        .read_to_end(&mut out)
        .map_err(|e| RayError::Corrupt(format!("deflate section decode failed: {e}")))?;
      if out.len() != uncompressed_size {
        return Err(RayError::Corrupt(format!(
          "deflate section size mismatch: expected {uncompressed_size}, got {}",
          out.len()
        )));
      }
      Ok(out)
    }
    CompressionType::Zstd => {
      let out = zstd::bulk::decompress(data, uncompressed_size)
        .map_err(|e| RayError::Corrupt(format!("zstd section decode failed: {e}")))?;
      if out.len() != uncompressed_size {
        return Err(RayError::Corrupt(format!(
          "zstd section size mismatch: expected {uncompressed_size}, got {}",
          out.len()
        )));
      }
      Ok(out)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Vec<u8> {
    b"abcdefgh".repeat(512)
  }

  #[test]
  fn disabled_passes_through() {
    let data = sample();
    let (stored, codec) = maybe_compress(&data, &CompressionOptions::default());
    assert_eq!(codec, CompressionType::None);
    assert_eq!(stored, data);
  }

  #[test]
  fn zstd_round_trip() {
    let data = sample();
    let (stored, codec) = maybe_compress(&data, &CompressionOptions::zstd(3));
    assert_eq!(codec, CompressionType::Zstd);
    assert!(stored.len() < data.len());
    let restored = decompress_with_size(&stored, codec, data.len()).unwrap();
    assert_eq!(restored, data);
  }

  #[test]
  fn deflate_round_trip() {
    let data = sample();
    let (stored, codec) = maybe_compress(&data, &CompressionOptions::deflate());
    assert_eq!(codec, CompressionType::Deflate);
    let restored = decompress_with_size(&stored, codec, data.len()).unwrap();
    assert_eq!(restored, data);
  }

  #[test]
  fn small_sections_stay_raw() {
    let data = b"tiny".to_vec();
    let (stored, codec) = maybe_compress(&data, &CompressionOptions::zstd(3));
    assert_eq!(codec, CompressionType::None);
    assert_eq!(stored, data);
  }
}
