//! Differences between two world states.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use minedelta_anvil::{ChunkPayload, ChunkPos, RegionFile, RegionPos};

use crate::error::Result;
use crate::world;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Deleted,
    Modified,
}

fn kind_of<T>(old: &Option<T>, new: &Option<T>) -> ChangeKind {
    match (old, new) {
        (None, _) => ChangeKind::Created,
        (_, None) => ChangeKind::Deleted,
        _ => ChangeKind::Modified,
    }
}

/// One chunk slot whose stored bytes differ. At least one side is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkChange {
    pub pos: ChunkPos,
    pub old: Option<ChunkPayload>,
    pub new: Option<ChunkPayload>,
}

impl ChunkChange {
    pub fn kind(&self) -> ChangeKind {
        kind_of(&self.old, &self.new)
    }
}

/// Changes of one region file.
///
/// A side's timestamp table is `None` when the region does not exist on that
/// side; every chunk of an existing side is then a one-sided record. Timestamps
/// never produce records on their own but are restored with the region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionChange {
    /// Relative to the world root, e.g. `DIM-1/region/r.0.-1.mca`.
    pub path: PathBuf,
    pub pos: RegionPos,
    pub chunks: Vec<ChunkChange>,
    pub old_timestamps: Option<Vec<u32>>,
    pub new_timestamps: Option<Vec<u32>>,
}

impl RegionChange {
    pub fn kind(&self) -> ChangeKind {
        kind_of(&self.old_timestamps, &self.new_timestamps)
    }
}

/// Whole-file change of anything that is not a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub old: Option<Vec<u8>>,
    pub new: Option<Vec<u8>>,
}

impl FileChange {
    pub fn kind(&self) -> ChangeKind {
        kind_of(&self.old, &self.new)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    /// (target side, source side)
    fn pick<'a, T>(self, old: &'a T, new: &'a T) -> (&'a T, &'a T) {
        match self {
            Direction::Forward => (new, old),
            Direction::Reverse => (old, new),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub regions: BTreeMap<PathBuf, RegionChange>,
    pub files: BTreeMap<PathBuf, FileChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty() && self.files.is_empty()
    }

    pub fn region(&self, path: impl AsRef<Path>) -> Option<&RegionChange> {
        self.regions.get(path.as_ref())
    }

    /// All region changes for a region coordinate, across dimensions and
    /// region kinds (`region`, `entities`, `poi`).
    pub fn regions_at(&self, pos: RegionPos) -> impl Iterator<Item = &RegionChange> {
        self.regions.values().filter(move |change| change.pos == pos)
    }

    pub fn chunk_count(&self) -> usize {
        self.regions.values().map(|region| region.chunks.len()).sum()
    }

    /// Turn the old world into the new one.
    pub fn apply_forward(&self, world: &Path) -> Result<()> {
        self.apply(world, Direction::Forward)
    }

    /// Turn the new world back into the old one.
    pub fn apply_reverse(&self, world: &Path) -> Result<()> {
        self.apply(world, Direction::Reverse)
    }

    fn apply(&self, world: &Path, direction: Direction) -> Result<()> {
        for region in self.regions.values() {
            let path = world.join(&region.path);
            let (target, source) = direction.pick(&region.old_timestamps, &region.new_timestamps);
            let Some(timestamps) = target else {
                world::remove_file_pruned(&path, world)?;
                continue;
            };

            let mut file = if source.is_none() {
                world::create_parent(&path)?;
                RegionFile::create(&path)?
            } else {
                RegionFile::open(&path)?
            };
            for chunk in &region.chunks {
                let timestamp = timestamps[chunk.pos.index()];
                match direction.pick(&chunk.old, &chunk.new).0 {
                    Some(payload) => file.write_slot(chunk.pos, payload, timestamp)?,
                    None => file.remove_slot(chunk.pos, timestamp)?,
                }
            }
            file.set_timestamps(timestamps)?;
            file.compact()?;
        }

        for change in self.files.values() {
            let path = world.join(&change.path);
            match direction.pick(&change.old, &change.new).0 {
                Some(contents) => world::write_file(&path, contents)?,
                None => world::remove_file_pruned(&path, world)?,
            }
        }
        Ok(())
    }
}
