//! Magic numbers and format constants for RayDB.

use crate::types::NodeId;

// ============================================================================
// Magic bytes
// ============================================================================

/// Magic bytes for the single-file format: "RayDB format 1\0\0" (16 bytes)
pub const MAGIC_RAYDB: [u8; 16] = [
  0x52, 0x61, 0x79, 0x44, 0x42, 0x20, 0x66, 0x6f, // "RayDB fo"
  0x72, 0x6d, 0x61, 0x74, 0x20, 0x31, 0x00, 0x00, // "rmat 1\0\0"
];

/// Snapshot magic: "RSN1" (little-endian u32)
pub const MAGIC_SNAPSHOT: u32 = 0x314E_5352;

// ============================================================================
// Versions
// ============================================================================

/// Single-file format version
pub const VERSION_SINGLE_FILE: u32 = 1;
pub const MIN_READER_SINGLE_FILE: u32 = 1;

pub const VERSION_SNAPSHOT: u32 = 1;
pub const MIN_READER_SNAPSHOT: u32 = 1;

// ============================================================================
// Alignment requirements
// ============================================================================

/// 64-byte alignment for snapshot sections (mmap friendliness)
pub const SECTION_ALIGNMENT: usize = 64;
/// 8-byte alignment for WAL records
pub const WAL_RECORD_ALIGNMENT: usize = 8;

// ============================================================================
// Single-file format constants
// ============================================================================

/// Single-file extension
pub const EXT_RAYDB: &str = ".raydb";

/// Default page size (4KB - matches OS page size and SSD blocks)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Minimum page size (4KB)
pub const MIN_PAGE_SIZE: usize = 4096;

/// Maximum page size (64KB)
pub const MAX_PAGE_SIZE: usize = 65536;

/// Default WAL region size (1MB)
pub const WAL_DEFAULT_SIZE: usize = 1024 * 1024;

/// Minimum WAL pages to keep when resizing
pub const MIN_WAL_PAGES: u64 = 16;

/// SQLite-style lock byte offset (2^30 = 1GB)
pub const LOCK_BYTE_OFFSET: u64 = 0x4000_0000;

/// Lock byte range size
pub const LOCK_BYTE_RANGE: u64 = 512;

// ============================================================================
// Header layout (page 0)
// ============================================================================

/// Bytes of header body actually populated; the rest of page 0 is
/// reserved, must be zero on write, ignored on read.
pub const DB_HEADER_BODY_SIZE: usize = 152;

// ============================================================================
// Snapshot layout
// ============================================================================

pub const SNAPSHOT_HEADER_SIZE: usize = 96;

/// Section table entry: offset u64, length u64, compression u32,
/// uncompressed_size u32.
pub const SECTION_ENTRY_SIZE: usize = 24;

/// Key index entry: hash64 u64, string_id u32, reserved u32, node_id u64.
pub const KEY_INDEX_ENTRY_SIZE: usize = 24;

/// On-disk property value: tag byte, 7 reserved bytes, payload u64.
pub const PROP_VALUE_DISK_SIZE: usize = 16;

// ============================================================================
// Compaction thresholds
// ============================================================================

/// WAL usage fraction that recommends compaction
pub const COMPACT_WAL_THRESHOLD: f64 = 0.8;
/// Delta entry count that recommends compaction
pub const COMPACT_DELTA_THRESHOLD: usize = 100_000;

// ============================================================================
// Compression settings
// ============================================================================

/// Minimum section size eligible for compression (bytes)
pub const COMPRESSION_MIN_SIZE: usize = 64;

// ============================================================================
// Initial IDs (start from 1, 0 is reserved/null)
// ============================================================================

pub const INITIAL_NODE_ID: NodeId = 1;
pub const INITIAL_LABEL_ID: u32 = 1;
pub const INITIAL_ETYPE_ID: u32 = 1;
pub const INITIAL_PROPKEY_ID: u32 = 1;
pub const INITIAL_TX_ID: u64 = 1;
