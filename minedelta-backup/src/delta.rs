//! On-disk form of a DELTA entry.
//!
//! A delta stores only the older side of a change set: patch regions holding the
//! entry's payloads for changed slots, whole copies of regions and files that no
//! longer exist in the newer state, and the list of paths the newer state added.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use minedelta_anvil::{RegionFile, SlotState};
use serde::{Deserialize, Serialize};

use crate::change_set::{ChangeSet, FileChange, RegionChange};
use crate::diff::{self, DiffContext};
use crate::error::{BackupError, Result};
use crate::pool::WorkerPool;
use crate::progress::Progress;
use crate::world::{self, Ignore};

pub const MANIFEST: &str = "delta.json";
pub const WORLD_DIR: &str = "world";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaManifest {
    /// Region files under `world/` that are patches rather than whole copies.
    pub patched: BTreeSet<PathBuf>,
    /// Paths that did not exist at this entry.
    pub removed: BTreeSet<PathBuf>,
}

impl DeltaManifest {
    pub fn load(entry_dir: &Path) -> Result<Self> {
        let path = entry_dir.join(MANIFEST);
        let bytes = fs::read(&path).map_err(BackupError::io(&path))?;
        serde_json::from_slice(&bytes).map_err(|source| BackupError::Metadata { path, source })
    }

    pub fn save(&self, entry_dir: &Path) -> Result<()> {
        let path = entry_dir.join(MANIFEST);
        let bytes = serde_json::to_vec_pretty(self).map_err(|source| BackupError::Metadata {
            path: path.clone(),
            source,
        })?;
        world::write_file(&path, &bytes)
    }

    fn record(&mut self, path: PathBuf, kept: StoredRegion) {
        match kept {
            StoredRegion::Patched => {
                self.patched.insert(path);
            }
            StoredRegion::Removed => {
                self.removed.insert(path);
            }
            StoredRegion::Whole => {}
        }
    }
}

/// How a changed region is kept in a delta.
enum StoredRegion {
    Patched,
    Whole,
    Removed,
}

/// Persist the old side of `changes` into `entry_dir`.
pub fn write_reverse(changes: &ChangeSet, entry_dir: &Path) -> Result<DeltaManifest> {
    let stored = create_stored(entry_dir)?;
    let mut manifest = DeltaManifest::default();
    for region in changes.regions.values() {
        let kept = write_reverse_region(region, &stored)?;
        manifest.record(region.path.clone(), kept);
    }
    finish(entry_dir, manifest, changes.files.values())
}

/// Diff `old_world` against `new_world` and store the reverse delta in
/// `entry_dir`. Regions are written by the worker that diffed them and dropped
/// right after, so only the regions in flight are held in memory.
pub fn store_reverse(
    old_world: &Path,
    new_world: &Path,
    ctx: &DiffContext<'_>,
    entry_dir: &Path,
) -> Result<DeltaManifest> {
    let stored = create_stored(entry_dir)?;
    let (regions, files) = diff::diff_each(old_world, new_world, ctx, |region| {
        let kept = write_reverse_region(&region, &stored)?;
        Ok((region.path, kept))
    })?;
    let mut manifest = DeltaManifest::default();
    for (path, kept) in regions {
        manifest.record(path, kept);
    }
    finish(entry_dir, manifest, files.values())
}

fn create_stored(entry_dir: &Path) -> Result<PathBuf> {
    let stored = entry_dir.join(WORLD_DIR);
    fs::create_dir_all(&stored).map_err(BackupError::io(&stored))?;
    Ok(stored)
}

fn write_reverse_region(region: &RegionChange, stored: &Path) -> Result<StoredRegion> {
    let Some(timestamps) = &region.old_timestamps else {
        return Ok(StoredRegion::Removed);
    };
    let path = stored.join(&region.path);
    world::create_parent(&path)?;
    let patch = region.new_timestamps.is_some();
    let mut file = if patch {
        RegionFile::create_patch(&path)?
    } else {
        RegionFile::create(&path)?
    };
    for chunk in &region.chunks {
        let timestamp = timestamps[chunk.pos.index()];
        match &chunk.old {
            Some(payload) => file.write_slot(chunk.pos, payload, timestamp)?,
            None => file.remove_slot(chunk.pos, timestamp)?,
        }
    }
    file.set_timestamps(timestamps)?;
    // the entry is renamed into the chain right after
    file.sync()?;
    Ok(if patch {
        StoredRegion::Patched
    } else {
        StoredRegion::Whole
    })
}

fn finish<'a>(
    entry_dir: &Path,
    mut manifest: DeltaManifest,
    files: impl Iterator<Item = &'a FileChange>,
) -> Result<DeltaManifest> {
    let stored = entry_dir.join(WORLD_DIR);
    for change in files {
        match &change.old {
            Some(contents) => world::write_file(&stored.join(&change.path), contents)?,
            None => {
                manifest.removed.insert(change.path.clone());
            }
        }
    }

    manifest.save(entry_dir)?;
    log::debug!(
        "stored delta in {}: {} patched, {} removed",
        entry_dir.display(),
        manifest.patched.len(),
        manifest.removed.len()
    );
    Ok(manifest)
}

/// Turn `world`, holding the state of the newer neighbor, into the state of the
/// delta stored at `entry_dir`.
pub fn apply(
    entry_dir: &Path,
    world: &Path,
    pool: &WorkerPool,
    progress: &dyn Progress,
) -> Result<()> {
    let manifest = DeltaManifest::load(entry_dir)?;
    let stored = entry_dir.join(WORLD_DIR);

    for path in &manifest.removed {
        world::remove_file_pruned(&world.join(path), world)?;
    }

    let files = world::scan(&stored, &Ignore::none())?;
    for path in &manifest.patched {
        if !files.contains_key(path) {
            return Err(BackupError::chain_corrupt(
                entry_dir,
                format!("patched region {} is missing", path.display()),
            ));
        }
    }
    let mut copied = 0;
    for path in files.keys().filter(|path| !manifest.patched.contains(*path)) {
        world::copy_file(&stored.join(path), &world.join(path))?;
        copied += 1;
    }

    let patches: Vec<PathBuf> = manifest.patched.into_iter().collect();
    pool.run(
        "patching",
        patches,
        |path| path.display().to_string(),
        |path| apply_patch(&stored.join(&path), &world.join(&path)),
        progress,
    )?;
    log::debug!("applied {} with {copied} copied files", entry_dir.display());
    Ok(())
}

fn apply_patch(patch: &Path, target: &Path) -> Result<()> {
    if !target.is_file() {
        return Err(BackupError::chain_corrupt(target, "region to patch does not exist"));
    }
    let mut patch = RegionFile::open_read(patch)?;
    let mut region = RegionFile::open(target)?;
    let timestamps = patch.timestamps().to_vec();
    for slot in patch.slots() {
        let slot = slot?;
        match slot.state {
            SlotState::Unchanged => {}
            SlotState::Absent => region.remove_slot(slot.pos, slot.timestamp)?,
            SlotState::Present(payload) => {
                region.write_slot(slot.pos, &payload, slot.timestamp)?
            }
        }
    }
    region.set_timestamps(&timestamps)?;
    region.compact()?;
    Ok(())
}
