//! Magic numbers, sizes and defaults for the on-disk formats.

use crate::types::NodeId;

// ============================================================================
// Magic bytes (little-endian u32)
// ============================================================================

/// Snapshot magic: "GDS1"
pub const MAGIC_SNAPSHOT: u32 = 0x3153_4447;
/// WAL segment magic: "GDW1"
pub const MAGIC_WAL: u32 = 0x3157_4447;
/// Multi-file manifest magic: "GDBM"
pub const MAGIC_MANIFEST: u32 = 0x4D42_4447;

// ============================================================================
// Current / minimum-reader versions
// ============================================================================

pub const VERSION_SNAPSHOT: u32 = 1;
pub const MIN_READER_SNAPSHOT: u32 = 1;
pub const VERSION_WAL: u32 = 1;
pub const VERSION_MANIFEST: u32 = 1;

// ============================================================================
// Fixed struct sizes (bytes)
// ============================================================================

pub const SNAPSHOT_HEADER_SIZE: usize = 88;
pub const SECTION_ENTRY_SIZE: usize = 24;
pub const KEY_INDEX_ENTRY_SIZE: usize = 24;
pub const PROP_VALUE_DISK_SIZE: usize = 16;
pub const MANIFEST_SIZE: usize = 76;
pub const WAL_HEADER_SIZE: usize = 96;
pub const WAL_RECORD_HEADER_SIZE: usize = 20;
pub const WAL_FOOTER_SIZE: usize = 4;
pub const SNAPSHOT_FOOTER_SIZE: usize = 4;

// ============================================================================
// Alignment requirements
// ============================================================================

/// 64-byte alignment for mmap friendliness
pub const SECTION_ALIGNMENT: usize = 64;
/// 8-byte alignment for WAL records
pub const WAL_RECORD_ALIGNMENT: usize = 8;

/// Sections smaller than this are never worth compressing: the zstd frame
/// overhead alone dominates over such small payloads.
pub const SNAPSHOT_COMPRESSION_THRESHOLD: usize = 4096;

// ============================================================================
// Single-file format constants
// ============================================================================

/// Magic bytes for single-file format: "RayDB format 1\0" (16 bytes)
pub const MAGIC_RAYDB: [u8; 16] = [
  0x52, 0x61, 0x79, 0x44, 0x42, 0x20, 0x66, 0x6f, // "RayDB fo"
  0x72, 0x6d, 0x61, 0x74, 0x20, 0x31, 0x00, 0x00, // "rmat 1\0\0"
];

/// Single-file format version
pub const VERSION_SINGLE_FILE: u32 = 1;
pub const MIN_READER_SINGLE_FILE: u32 = 1;

/// Single-file extension
pub const EXT_RAYDB: &str = ".raydb";

/// Default page size (4KB - matches OS page size and SSD blocks)
pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const MIN_PAGE_SIZE: usize = 4096;
pub const MAX_PAGE_SIZE: usize = 65536;
pub const OS_PAGE_SIZE: usize = 4096;

// ============================================================================
// Multi-file container layout
// ============================================================================

/// Snapshot files live under `<db dir>/snapshots/`.
pub const SNAPSHOTS_DIR: &str = "snapshots";
/// WAL segment files live under `<db dir>/wal/`.
pub const WAL_DIR: &str = "wal";

pub fn snapshot_filename(generation: u64) -> String {
  format!("snap-{generation:020}.gds")
}

pub fn wal_filename(segment: u64) -> String {
  format!("seg-{segment:020}.gdw")
}

/// Database header size (first page)
pub const DB_HEADER_SIZE: usize = 4096;
/// Bytes of the header page covered by the footer checksum.
pub const DB_HEADER_CHECKSUM_SIZE: usize = 4088;

/// Default size of *each* WAL region in the single-file dual-region layout.
pub const WAL_REGION_DEFAULT_SIZE: usize = 64 * 1024 * 1024;
/// Kept for API parity with multi-file WAL segment sizing.
pub const WAL_DEFAULT_SIZE: usize = WAL_REGION_DEFAULT_SIZE;

/// Minimum WAL to snapshot ratio before a checkpoint becomes mandatory.
pub const WAL_MIN_SNAPSHOT_RATIO: f64 = 0.1;
/// Default fraction of WAL capacity consumed before an auto-checkpoint fires.
pub const DEFAULT_CHECKPOINT_THRESHOLD: f64 = 0.8;

// ============================================================================
// Database header flags
// ============================================================================

pub const DB_FLAG_WAL_MODE: u32 = 1 << 0;
pub const DB_FLAG_COMPRESSION: u32 = 1 << 1;
pub const DB_FLAG_CHECKPOINT_IN_PROGRESS: u32 = 1 << 2;

// ============================================================================
// Thresholds for compact recommendation
// ============================================================================

pub const COMPACT_EDGE_RATIO: f64 = 0.1;
pub const COMPACT_NODE_RATIO: f64 = 0.1;
pub const COMPACT_WAL_SIZE: usize = 64 * 1024 * 1024;

// ============================================================================
// Delta set upgrade threshold
// ============================================================================

pub const DELTA_SET_UPGRADE_THRESHOLD: usize = 64;

// ============================================================================
// Compression settings
// ============================================================================

pub const COMPRESSION_MIN_SIZE: usize = 64;

// ============================================================================
// Initial IDs (start from 1, 0 is reserved/null)
// ============================================================================

pub const INITIAL_NODE_ID: NodeId = 1;
pub const INITIAL_LABEL_ID: u32 = 1;
pub const INITIAL_ETYPE_ID: u32 = 1;
pub const INITIAL_PROPKEY_ID: u32 = 1;
pub const INITIAL_TX_ID: u64 = 1;

/// Snapshot generation starts at 1 (0 means no snapshot yet).
pub const INITIAL_SNAPSHOT_GEN: u64 = 0;

// ============================================================================
// MVCC defaults
// ============================================================================

pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 10;
pub const DEFAULT_GC_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_RETENTION_MS: u64 = 60_000;
