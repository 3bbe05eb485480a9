//! Reading and rewriting single slots of a region container on disk.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::compression::{ChunkPayload, Codec, EXTERNAL_FLAG};
use crate::error::{AnvilError, Result};
use crate::header::{Header, Location};
use crate::{ChunkPos, HEADER_BYTES, SECTOR_BYTES, SLOT_COUNT};

/// Length prefix plus compression type byte.
const PAYLOAD_HEADING: u64 = 5;

/// What a slot holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// Chunk was never generated (or was deleted).
    Absent,
    /// Only found in patch files: leave the target slot as it is.
    Unchanged,
    Present(ChunkPayload),
}

impl SlotState {
    pub fn payload(&self) -> Option<&ChunkPayload> {
        match self {
            SlotState::Present(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn into_payload(self) -> Option<ChunkPayload> {
        match self {
            SlotState::Present(payload) => Some(payload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSlot {
    pub pos: ChunkPos,
    pub timestamp: u32,
    pub state: SlotState,
}

/// An open region file.
///
/// The header is parsed and validated on open. Payloads are read on demand and
/// every mutation writes the touched header entries straight back to disk.
pub struct RegionFile {
    path: PathBuf,
    file: File,
    header: Header,
    len: u64,
}

impl RegionFile {
    /// Open an existing region for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), true)
    }

    /// Open an existing region for reading only (stored snapshots).
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), false)
    }

    fn open_with(path: &Path, writable: bool) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(AnvilError::io(path))?;
        let len = file.metadata().map_err(AnvilError::io(path))?.len();
        if len < HEADER_BYTES {
            return Err(AnvilError::corrupt(
                path,
                format!("header truncated ({len} of {HEADER_BYTES} bytes)"),
            ));
        }

        let mut bytes = vec![0u8; HEADER_BYTES as usize];
        file.read_exact(&mut bytes).map_err(AnvilError::io(path))?;
        let header = Header::parse(&bytes);

        for (index, location) in header.locations.iter().enumerate() {
            if !location.is_present() {
                continue;
            }
            if location.sector_offset() < 2 {
                return Err(AnvilError::corrupt(
                    path,
                    format!("slot {index} points into the header"),
                ));
            }
            if location.byte_offset() + PAYLOAD_HEADING > len {
                return Err(AnvilError::corrupt(
                    path,
                    format!("slot {index} starts beyond the end of the file"),
                ));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            len,
        })
    }

    /// Create an empty region (zeroed header), replacing any existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with(path.as_ref(), Header::empty())
    }

    /// Create a patch region: every slot starts out as unchanged and only the
    /// slots written afterwards replace what the target holds.
    pub fn create_patch(path: impl AsRef<Path>) -> Result<Self> {
        let mut header = Header::empty();
        header.locations.fill(Location::UNCHANGED);
        Self::create_with(path.as_ref(), header)
    }

    fn create_with(path: &Path, header: Header) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(AnvilError::io(path))?;
        file.write_all(&header.to_bytes())
            .map_err(AnvilError::io(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            len: HEADER_BYTES,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.header.locations.iter().all(|l| l.is_empty())
    }

    pub fn location(&self, pos: ChunkPos) -> Location {
        self.header.locations[pos.index()]
    }

    pub fn timestamps(&self) -> &[u32] {
        &self.header.timestamps
    }

    /// Read one slot.
    pub fn read_slot(&mut self, pos: ChunkPos) -> Result<ChunkSlot> {
        let index = pos.index();
        let location = self.header.locations[index];
        let timestamp = self.header.timestamps[index];
        let state = if location.is_empty() {
            SlotState::Absent
        } else if location.is_unchanged() {
            SlotState::Unchanged
        } else {
            SlotState::Present(self.read_payload(index, location)?)
        };
        Ok(ChunkSlot {
            pos,
            timestamp,
            state,
        })
    }

    fn read_payload(&mut self, index: usize, location: Location) -> Result<ChunkPayload> {
        let start = location.byte_offset();
        let mut heading = [0u8; PAYLOAD_HEADING as usize];
        self.file
            .seek(SeekFrom::Start(start))
            .and_then(|_| self.file.read_exact(&mut heading))
            .map_err(AnvilError::io(&self.path))?;

        // Length counts the type byte
        let length = u32::from_be_bytes([heading[0], heading[1], heading[2], heading[3]]) as u64;
        if length == 0 {
            return Err(AnvilError::corrupt(
                &self.path,
                format!("slot {index} has an empty payload"),
            ));
        }
        if start + 4 + length > self.len {
            return Err(AnvilError::corrupt(
                &self.path,
                format!(
                    "slot {index} declares {length} payload bytes, exceeding the file size of {}",
                    self.len
                ),
            ));
        }

        let tag = heading[4];
        let codec = Codec::from_id(tag & !EXTERNAL_FLAG)
            .filter(|codec| codec.is_available())
            .ok_or_else(|| AnvilError::UnsupportedCodec {
                id: tag,
                path: Some(self.path.clone()),
            })?;

        let mut data = vec![0u8; (length - 1) as usize];
        self.file
            .read_exact(&mut data)
            .map_err(AnvilError::io(&self.path))?;

        Ok(ChunkPayload {
            codec,
            external: tag & EXTERNAL_FLAG != 0,
            data,
        })
    }

    /// Iterate all 1024 slots in index order.
    pub fn slots(&mut self) -> Slots<'_> {
        Slots {
            region: self,
            next: 0,
        }
    }

    pub fn into_slots(self) -> IntoSlots {
        IntoSlots {
            region: self,
            next: 0,
        }
    }

    /// Replace a slot's payload.
    ///
    /// The payload reuses the slot's sectors when it fits, otherwise it is
    /// appended after the last sector and the file grows. Freed sectors stay
    /// behind as gaps until [`RegionFile::compact`].
    pub fn write_slot(
        &mut self,
        pos: ChunkPos,
        payload: &ChunkPayload,
        timestamp: u32,
    ) -> Result<()> {
        if !payload.codec.is_available() {
            return Err(AnvilError::UnsupportedCodec {
                id: payload.tag(),
                path: Some(self.path.clone()),
            });
        }
        let size = PAYLOAD_HEADING + payload.data.len() as u64;
        let sectors = size.div_ceil(SECTOR_BYTES) as usize;
        if sectors > u8::MAX as usize {
            return Err(AnvilError::PayloadTooLarge { sectors });
        }

        let index = pos.index();
        let current = self.header.locations[index];
        let sector_offset = if current.is_present() && current.sector_count() as usize >= sectors {
            current.sector_offset()
        } else {
            self.append_sector()
        };

        let mut blob = Vec::with_capacity(sectors * SECTOR_BYTES as usize);
        blob.extend_from_slice(&((payload.data.len() + 1) as u32).to_be_bytes());
        blob.push(payload.tag());
        blob.extend_from_slice(&payload.data);
        // pad to a whole number of sectors
        blob.resize(sectors * SECTOR_BYTES as usize, 0);

        let start = sector_offset as u64 * SECTOR_BYTES;
        self.file
            .seek(SeekFrom::Start(start))
            .and_then(|_| self.file.write_all(&blob))
            .map_err(AnvilError::io(&self.path))?;
        self.len = self.len.max(start + blob.len() as u64);

        self.set_entry(index, Location::new(sector_offset, sectors as u8), timestamp)
    }

    /// First sector past both the file end and every reserved payload. The last
    /// payload is not always padded, so its reservation may reach beyond the file.
    fn append_sector(&self) -> u32 {
        let reserved = self
            .header
            .locations
            .iter()
            .filter(|l| l.is_present())
            .map(|l| l.end_sector())
            .max()
            .unwrap_or(2);
        reserved.max(self.len.div_ceil(SECTOR_BYTES) as u32)
    }

    /// Mark a slot as not generated. Its sectors become a gap.
    pub fn remove_slot(&mut self, pos: ChunkPos, timestamp: u32) -> Result<()> {
        self.set_entry(pos.index(), Location::EMPTY, timestamp)
    }

    /// Mark a slot as unchanged (patch files only).
    pub fn mark_unchanged(&mut self, pos: ChunkPos) -> Result<()> {
        let index = pos.index();
        let timestamp = self.header.timestamps[index];
        self.set_entry(index, Location::UNCHANGED, timestamp)
    }

    /// Overwrite the whole timestamp table.
    pub fn set_timestamps(&mut self, timestamps: &[u32]) -> Result<()> {
        if timestamps.len() != SLOT_COUNT {
            return Err(AnvilError::corrupt(
                &self.path,
                format!("timestamp table has {} entries", timestamps.len()),
            ));
        }
        self.header.timestamps.copy_from_slice(timestamps);
        let mut table = Vec::with_capacity(SECTOR_BYTES as usize);
        for timestamp in timestamps {
            table.extend_from_slice(&timestamp.to_be_bytes());
        }
        self.file
            .seek(SeekFrom::Start(Header::timestamp_offset(0)))
            .and_then(|_| self.file.write_all(&table))
            .map_err(AnvilError::io(&self.path))
    }

    fn set_entry(&mut self, index: usize, location: Location, timestamp: u32) -> Result<()> {
        self.header.locations[index] = location;
        self.header.timestamps[index] = timestamp;
        let path = &self.path;
        let file = &mut self.file;
        file.seek(SeekFrom::Start(Header::location_offset(index)))
            .and_then(|_| file.write_all(&location.to_be_bytes()))
            .and_then(|_| file.seek(SeekFrom::Start(Header::timestamp_offset(index))))
            .and_then(|_| file.write_all(&timestamp.to_be_bytes()))
            .map_err(AnvilError::io(path))
    }

    /// Move payloads down to close gaps and truncate the file.
    ///
    /// Fails with `CorruptContainer` when two payloads overlap.
    pub fn compact(&mut self) -> Result<()> {
        let mut order: Vec<usize> = (0..SLOT_COUNT)
            .filter(|&i| self.header.locations[i].is_present())
            .collect();
        order.sort_by_key(|&i| self.header.locations[i].sector_offset());

        let mut prev_end: u32 = 2;
        let mut moved = 0usize;
        for index in order {
            let location = self.header.locations[index];
            if location.sector_offset() < prev_end {
                return Err(AnvilError::corrupt(
                    &self.path,
                    format!("slot {index} overlaps the previous payload"),
                ));
            }
            if location.sector_offset() > prev_end {
                self.move_sectors(location, prev_end)?;
                let timestamp = self.header.timestamps[index];
                self.set_entry(index, Location::new(prev_end, location.sector_count()), timestamp)?;
                moved += 1;
            }
            prev_end += location.sector_count() as u32;
        }

        let new_len = prev_end as u64 * SECTOR_BYTES;
        if new_len != self.len || moved > 0 {
            log::debug!(
                "compacted {}: moved {} payloads, {} -> {} bytes",
                self.path.display(),
                moved,
                self.len,
                new_len
            );
        }
        self.file
            .set_len(new_len)
            .map_err(AnvilError::io(&self.path))?;
        self.len = new_len;
        Ok(())
    }

    fn move_sectors(&mut self, location: Location, to_sector: u32) -> Result<()> {
        let start = location.byte_offset();
        let size = location.sector_count() as u64 * SECTOR_BYTES;
        // the last payload may not be padded to a full sector
        let available = size.min(self.len.saturating_sub(start));
        let mut buf = vec![0u8; size as usize];
        let path = &self.path;
        let file = &mut self.file;
        file.seek(SeekFrom::Start(start))
            .and_then(|_| file.read_exact(&mut buf[..available as usize]))
            .and_then(|_| file.seek(SeekFrom::Start(to_sector as u64 * SECTOR_BYTES)))
            .and_then(|_| file.write_all(&buf))
            .map_err(AnvilError::io(path))
    }

    /// Ratio of used sectors to file size. Mainly useful for debugging.
    pub fn density(&self) -> f64 {
        let used: u64 = self
            .header
            .locations
            .iter()
            .filter(|l| l.is_present())
            .map(|l| l.sector_count() as u64)
            .sum();
        (used + 2) as f64 * SECTOR_BYTES as f64 / self.len as f64
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all().map_err(AnvilError::io(&self.path))
    }
}

/// Lazy slot iterator over a borrowed region.
pub struct Slots<'a> {
    region: &'a mut RegionFile,
    next: usize,
}

impl Iterator for Slots<'_> {
    type Item = Result<ChunkSlot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= SLOT_COUNT {
            return None;
        }
        let pos = ChunkPos::from_index(self.next);
        self.next += 1;
        Some(self.region.read_slot(pos))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = SLOT_COUNT - self.next;
        (left, Some(left))
    }
}

/// Lazy slot iterator owning its region.
pub struct IntoSlots {
    region: RegionFile,
    next: usize,
}

impl Iterator for IntoSlots {
    type Item = Result<ChunkSlot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= SLOT_COUNT {
            return None;
        }
        let pos = ChunkPos::from_index(self.next);
        self.next += 1;
        Some(self.region.read_slot(pos))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = SLOT_COUNT - self.next;
        (left, Some(left))
    }
}
