//! Region file header.
//!
//! The header consists of two tables of 1024 big-endian entries each:
//! - Location table: where each chunk is stored (`sector offset:3 | sector count:1`)
//! - Timestamp table: when each chunk was last saved (seconds since epoch)

use crate::{HEADER_BYTES, SECTOR_BYTES, SLOT_COUNT};

/// One packed entry of the location table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location(u32);

impl Location {
    /// Chunk was never generated.
    pub const EMPTY: Location = Location(0);

    /// Patch files only: the slot did not change, keep whatever the target holds.
    /// Vanilla never writes offset 1 since it points into the header.
    pub const UNCHANGED: Location = Location(1 << 8);

    pub fn new(sector_offset: u32, sector_count: u8) -> Self {
        Self((sector_offset << 8) | sector_count as u32)
    }

    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    #[inline]
    pub fn sector_offset(self) -> u32 {
        self.0 >> 8
    }

    #[inline]
    pub fn sector_count(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub fn is_empty(self) -> bool {
        self == Self::EMPTY
    }

    pub fn is_unchanged(self) -> bool {
        self == Self::UNCHANGED
    }

    /// Whether the entry points at payload sectors.
    pub fn is_present(self) -> bool {
        !self.is_empty() && !self.is_unchanged()
    }

    /// File offset of the first payload byte (the length prefix).
    #[inline]
    pub fn byte_offset(self) -> u64 {
        self.sector_offset() as u64 * SECTOR_BYTES
    }

    /// Sector right after this payload.
    #[inline]
    pub fn end_sector(self) -> u32 {
        self.sector_offset() + self.sector_count() as u32
    }
}

/// Parsed 8 KiB header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub locations: Vec<Location>,
    pub timestamps: Vec<u32>,
}

impl Header {
    pub fn empty() -> Self {
        Self {
            locations: vec![Location::EMPTY; SLOT_COUNT],
            timestamps: vec![0; SLOT_COUNT],
        }
    }

    pub fn parse(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= HEADER_BYTES as usize);
        let entry = |offset: usize| -> [u8; 4] {
            [
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]
        };
        let table = SECTOR_BYTES as usize;
        Self {
            locations: (0..SLOT_COUNT)
                .map(|i| Location::from_be_bytes(entry(i * 4)))
                .collect(),
            timestamps: (0..SLOT_COUNT)
                .map(|i| u32::from_be_bytes(entry(table + i * 4)))
                .collect(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_BYTES as usize];
        let table = SECTOR_BYTES as usize;
        for index in 0..SLOT_COUNT {
            let entry_offset = index * 4;
            header[entry_offset..entry_offset + 4]
                .copy_from_slice(&self.locations[index].to_be_bytes());
            header[table + entry_offset..table + entry_offset + 4]
                .copy_from_slice(&self.timestamps[index].to_be_bytes());
        }
        header
    }

    /// File offset of the location entry for a slot.
    #[inline]
    pub fn location_offset(index: usize) -> u64 {
        index as u64 * 4
    }

    /// File offset of the timestamp entry for a slot.
    #[inline]
    pub fn timestamp_offset(index: usize) -> u64 {
        SECTOR_BYTES + index as u64 * 4
    }
}
