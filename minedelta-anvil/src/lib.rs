//! Minecraft Anvil region file format (.mca).
//!
//! Region files contain 32x32 chunk slots in a specific binary format:
//! - Bytes 0-4095: Location table (1024 entries × 4 bytes)
//! - Bytes 4096-8191: Timestamp table (1024 entries × 4 bytes)
//! - Bytes 8192+: Chunk payloads in 4 KiB sectors, each `[Length: 4][Type: 1][Data...]`
//!
//! Payloads are handled as opaque compressed bytes. Nothing here needs to
//! decompress a chunk to read, compare or rewrite it.

pub mod compression;
pub mod error;
pub mod header;
pub mod region;

use std::fmt;
use std::path::Path;

pub use compression::{ChunkPayload, Codec};
pub use error::{AnvilError, Result};
pub use header::{Header, Location};
pub use region::{ChunkSlot, IntoSlots, RegionFile, SlotState, Slots};

pub const SECTOR_BYTES: u64 = 4096; // minecraft uses 4096 bytes per sector
pub const HEADER_BYTES: u64 = 8192; // header is 8192 bytes (2 sectors 8kb)

/// Number of chunks per region dimension.
pub const REGION_SIZE: u8 = 32;

/// Number of chunk slots in a region.
pub const SLOT_COUNT: usize = 1024;

/// Chunk coordinates local to a region (0-31 on each axis).
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: u8,
    pub z: u8,
}

impl ChunkPos {
    /// Wraps world chunk coordinates into the region.
    pub fn new(x: i32, z: i32) -> Self {
        Self {
            x: (x & 31) as u8,
            z: (z & 31) as u8,
        }
    }

    /// Slot index (0-1023). Formula: x + z * 32
    #[inline]
    pub fn index(self) -> usize {
        self.x as usize + self.z as usize * REGION_SIZE as usize
    }

    #[inline]
    pub fn from_index(index: usize) -> Self {
        debug_assert!(index < SLOT_COUNT);
        Self {
            x: (index % REGION_SIZE as usize) as u8,
            z: (index / REGION_SIZE as usize) as u8,
        }
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.z)
    }
}

/// Region file coordinates (parsed from filename like "r.0.-1.mca").
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Parse region position from filename (e.g., "r.0.-1.mca").
    pub fn from_filename(name: &str) -> Option<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() == 4 && parts[0] == "r" && parts[3] == "mca" {
            let x = parts[1].parse().ok()?;
            let z = parts[2].parse().ok()?;
            Some(Self { x, z })
        } else {
            None
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_filename(path.file_name()?.to_str()?)
    }

    pub fn filename(&self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }

    /// Convert local chunk coordinates to world chunk coordinates.
    pub fn local_to_world(&self, pos: ChunkPos) -> (i32, i32) {
        (
            self.x * REGION_SIZE as i32 + pos.x as i32,
            self.z * REGION_SIZE as i32 + pos.z as i32,
        )
    }
}

impl fmt::Display for RegionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.z)
    }
}

/// Open a region and iterate its slots.
pub fn read_slots(path: impl AsRef<Path>) -> Result<IntoSlots> {
    Ok(RegionFile::open_read(path)?.into_slots())
}

/// Replace a single slot of an existing region in place.
pub fn write_slot(
    path: impl AsRef<Path>,
    pos: ChunkPos,
    payload: &ChunkPayload,
    timestamp: u32,
) -> Result<()> {
    RegionFile::open(path)?.write_slot(pos, payload, timestamp)
}
