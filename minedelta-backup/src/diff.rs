//! Chunk level comparison of two world directories.
//!
//! Slots are compared by their stored bytes: the compression type first, then
//! the payload. Nothing is decompressed, so a chunk re-saved with a different
//! codec counts as changed even if its NBT is identical.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use minedelta_anvil::{
    AnvilError, ChunkPayload, ChunkPos, RegionFile, RegionPos, SLOT_COUNT, SlotState,
};

use crate::change_set::{ChangeSet, ChunkChange, FileChange, RegionChange};
use crate::error::{BackupError, Result};
use crate::pool::WorkerPool;
use crate::progress::Progress;
use crate::stats::DiffStats;
use crate::world::{self, FileKind, Ignore};

/// What a diff runs with.
pub struct DiffContext<'a> {
    pub pool: &'a WorkerPool,
    pub ignore: &'a Ignore,
    pub progress: &'a dyn Progress,
}

struct RegionItem {
    path: PathBuf,
    pos: RegionPos,
    in_old: bool,
    in_new: bool,
}

/// Compute the changes turning `old_world` into `new_world`.
pub fn diff(old_world: &Path, new_world: &Path, ctx: &DiffContext<'_>) -> Result<ChangeSet> {
    let (regions, files) = diff_each(old_world, new_world, ctx, Ok)?;
    let regions = regions
        .into_iter()
        .map(|change| (change.path.clone(), change))
        .collect();
    Ok(ChangeSet { regions, files })
}

/// Like [`diff`], but every changed region goes to `sink` inside the worker job
/// that found it. Only the sink's results are kept, so a sink that writes the
/// region out bounds memory to one region per worker. Changed non-region
/// files are returned whole.
pub fn diff_each<R, F>(
    old_world: &Path,
    new_world: &Path,
    ctx: &DiffContext<'_>,
    sink: F,
) -> Result<(Vec<R>, BTreeMap<PathBuf, FileChange>)>
where
    R: Send,
    F: Fn(RegionChange) -> Result<R> + Sync,
{
    let old_files = world::scan(old_world, ctx.ignore)?;
    let new_files = world::scan(new_world, ctx.ignore)?;
    let stats = DiffStats::new();

    let mut files = BTreeMap::new();
    let mut regions = Vec::new();
    let paths: BTreeSet<&PathBuf> = old_files.keys().chain(new_files.keys()).collect();
    for path in paths {
        let old = old_files.get(path).map(|file| file.kind);
        let new = new_files.get(path).map(|file| file.kind);
        // a path is diffed chunk-wise only if it is a real region wherever it exists
        let region = match (old, new) {
            (Some(FileKind::Region(pos)), None | Some(FileKind::Region(_))) => Some(pos),
            (None, Some(FileKind::Region(pos))) => Some(pos),
            _ => None,
        };
        match region {
            Some(pos) => regions.push(RegionItem {
                path: path.clone(),
                pos,
                in_old: old.is_some(),
                in_new: new.is_some(),
            }),
            None => {
                let change = diff_file(old_world, new_world, path, old.is_some(), new.is_some())?;
                if let Some(change) = change {
                    stats.record_file();
                    files.insert(path.clone(), change);
                }
            }
        }
    }

    ctx.progress.report(&format!(
        "comparing {} region files on {} workers",
        regions.len(),
        ctx.pool.workers()
    ));
    let sunk = ctx.pool.run(
        "diffing",
        regions,
        |item| item.path.display().to_string(),
        |item| match diff_region(old_world, new_world, item, &stats)? {
            Some(change) => sink(change).map(Some),
            None => Ok(None),
        },
        ctx.progress,
    )?;

    stats.log_report();
    ctx.progress.report(&stats.summary());
    Ok((sunk.into_iter().flatten().collect(), files))
}

fn diff_file(
    old_world: &Path,
    new_world: &Path,
    path: &Path,
    in_old: bool,
    in_new: bool,
) -> Result<Option<FileChange>> {
    let read = |root: &Path, present: bool| -> Result<Option<Vec<u8>>> {
        if !present {
            return Ok(None);
        }
        let full = root.join(path);
        fs::read(&full).map(Some).map_err(BackupError::io(&full))
    };
    let old = read(old_world, in_old)?;
    let new = read(new_world, in_new)?;
    if old == new {
        return Ok(None);
    }
    Ok(Some(FileChange {
        path: path.to_path_buf(),
        old,
        new,
    }))
}

fn diff_region(
    old_world: &Path,
    new_world: &Path,
    item: RegionItem,
    stats: &DiffStats,
) -> Result<Option<RegionChange>> {
    let start = Instant::now();
    let open = |root: &Path, present: bool| -> Result<Option<RegionFile>> {
        if !present {
            return Ok(None);
        }
        Ok(Some(RegionFile::open_read(root.join(&item.path))?))
    };
    let mut old = open(old_world, item.in_old)?;
    let mut new = open(new_world, item.in_new)?;

    let mut chunks = Vec::new();
    let mut bytes_read = 0u64;
    for index in 0..SLOT_COUNT {
        let pos = ChunkPos::from_index(index);
        let old_payload = read_world_slot(old.as_mut(), pos)?;
        let new_payload = read_world_slot(new.as_mut(), pos)?;
        bytes_read += [&old_payload, &new_payload]
            .iter()
            .filter_map(|payload| payload.as_ref())
            .map(|payload| payload.data.len() as u64)
            .sum::<u64>();
        if old_payload != new_payload {
            chunks.push(ChunkChange {
                pos,
                old: old_payload,
                new: new_payload,
            });
        }
    }

    let old_timestamps = old.as_ref().map(|region| region.timestamps().to_vec());
    let new_timestamps = new.as_ref().map(|region| region.timestamps().to_vec());
    let change = if chunks.is_empty() && old_timestamps == new_timestamps {
        None
    } else {
        Some(RegionChange {
            path: item.path,
            pos: item.pos,
            chunks,
            old_timestamps,
            new_timestamps,
        })
    };
    stats.record_region(change.as_ref(), bytes_read, start.elapsed());
    Ok(change)
}

fn read_world_slot(
    region: Option<&mut RegionFile>,
    pos: ChunkPos,
) -> Result<Option<ChunkPayload>> {
    let Some(region) = region else {
        return Ok(None);
    };
    match region.read_slot(pos)?.state {
        SlotState::Absent => Ok(None),
        SlotState::Present(payload) => Ok(Some(payload)),
        SlotState::Unchanged => Err(AnvilError::CorruptContainer {
            path: region.path().to_path_buf(),
            reason: format!("slot {} holds a patch marker", pos.index()),
        }
        .into()),
    }
}
