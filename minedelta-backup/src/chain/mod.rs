//! Reverse-delta backup chain.
//!
//! The newest entry is a complete copy of the world; every older entry is a
//! delta turning its newer neighbor back into its own state. Creating a backup
//! therefore rewrites only the previous newest entry, and dropping the oldest
//! one is a plain directory removal.

pub mod commit;
pub mod metadata;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SubsecRound, Utc};
use tempfile::TempDir;

use crate::config::ChainConfig;
use crate::delta::{self, WORLD_DIR};
use crate::diff::DiffContext;
use crate::error::{BackupError, Result};
use crate::manager::{BackupInfo, BackupManager, BackupRef, IndexMode};
use crate::pool::WorkerPool;
use crate::progress::Progress;
use crate::world::{self, Ignore};

use self::commit::Commit;
use self::metadata::{ChainMetadata, EntryKind, EntryRecord};

const STAGING_PREFIX: &str = ".staging-";
const RESTORE_PREFIX: &str = ".minedelta-restore-";

pub struct DiffBackupManager {
    world: PathBuf,
    root: PathBuf,
    config: ChainConfig,
    ignore: Ignore,
    pool: WorkerPool,
}

impl DiffBackupManager {
    /// A manager for the world at `world` keeping its chain in `root`.
    /// Nothing is read until the first operation.
    pub fn new(
        world: impl Into<PathBuf>,
        root: impl Into<PathBuf>,
        config: ChainConfig,
    ) -> Result<Self> {
        let pool = WorkerPool::new(config.workers)?;
        Ok(Self {
            world: world.into(),
            root: root.into(),
            ignore: Ignore::new(config.ignore.as_slice()),
            config,
            pool,
        })
    }

    pub fn world(&self) -> &Path {
        &self.world
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Create the chain directory and clean up after an interrupted run: finish
    /// or roll back its commit, then drop staging directories and entry
    /// directories the metadata does not know.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(BackupError::io(&self.root))?;
        let metadata = self.load()?;
        let entries = fs::read_dir(&self.root).map_err(BackupError::io(&self.root))?;
        for entry in entries {
            let entry = entry.map_err(BackupError::io(&self.root))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let stale = if name.starts_with(STAGING_PREFIX) {
                true
            } else if let Ok(id) = name.parse::<u64>() {
                metadata.position(id).is_none()
            } else {
                false
            };
            if stale {
                log::warn!("removing leftover {}", entry.path().display());
                world::remove_path(&entry.path()).map_err(BackupError::io(&entry.path()))?;
            }
        }
        Ok(())
    }

    /// Chain metadata, after settling any commit an earlier run left pending.
    fn load(&self) -> Result<ChainMetadata> {
        commit::recover(&self.root)?;
        ChainMetadata::load(&self.root)
    }

    pub fn entry_dir(&self, id: u64) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn staging(&self) -> Result<TempDir> {
        fs::create_dir_all(&self.root).map_err(BackupError::io(&self.root))?;
        tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)
            .map_err(BackupError::io(&self.root))
    }

    fn resolve(&self, metadata: &ChainMetadata, target: BackupRef) -> Result<usize> {
        let advertised = self.config.index_mode;
        if target.mode() != advertised {
            return Err(BackupError::InvalidIndexMode {
                advertised,
                given: target.mode(),
            });
        }
        let index = match target {
            BackupRef::Index(index) => (index < metadata.entries.len()).then_some(index),
            BackupRef::Id(id) => metadata.position(id),
        };
        index.ok_or(BackupError::UnknownBackup(target))
    }

    /// Rebuild the world state of the entry at `index` into `dst`.
    fn materialize(
        &self,
        metadata: &ChainMetadata,
        index: usize,
        dst: &Path,
        progress: &dyn Progress,
    ) -> Result<()> {
        let Some(full) = metadata.entries.first() else {
            return Err(BackupError::chain_corrupt(&self.root, "chain has no entries"));
        };
        let full_dir = self.entry_dir(full.id);
        if full_dir.join(delta::MANIFEST).exists() || !full_dir.join(WORLD_DIR).is_dir() {
            return Err(BackupError::chain_corrupt(
                &full_dir,
                format!("newest backup {} is not a complete copy", full.id),
            ));
        }
        progress.report(&format!("copying backup {}", full.id));
        world::copy_tree(&full_dir.join(WORLD_DIR), dst, &Ignore::none())?;
        for entry in &metadata.entries[1..=index] {
            progress.report(&format!("applying backup {}", entry.id));
            delta::apply(&self.entry_dir(entry.id), dst, &self.pool, progress)?;
        }
        Ok(())
    }

    fn diff_context<'a>(&'a self, progress: &'a dyn Progress) -> DiffContext<'a> {
        DiffContext {
            pool: &self.pool,
            ignore: &self.ignore,
            progress,
        }
    }

    /// Replace the newest FULL entry by the materialized state of the next one.
    fn promote(&self, mut metadata: ChainMetadata, progress: &dyn Progress) -> Result<()> {
        let old_full = metadata.entries[0].id;
        let next = metadata.entries[1].id;
        let staging = self.staging()?;
        let promoted = staging.path().join("promoted");
        let replaced = staging.path().join("replaced");
        self.materialize(&metadata, 1, &promoted.join(WORLD_DIR), progress)?;

        metadata.entries.remove(0);
        metadata.entries[0].kind = EntryKind::Full;
        let mut commit = Commit::new(&self.root, staging, metadata);
        commit.rename(&self.entry_dir(next), &replaced);
        commit.rename(&promoted, &self.entry_dir(next));
        commit.run()?;

        remove_entry_dir(&self.entry_dir(old_full));
        Ok(())
    }
}

fn remove_entry_dir(dir: &Path) {
    // the metadata no longer references it, `prepare` sweeps what is left
    if let Err(err) = fs::remove_dir_all(dir) {
        log::warn!("could not remove {}: {err}", dir.display());
    }
}

impl BackupManager for DiffBackupManager {
    fn index_mode(&self) -> IndexMode {
        self.config.index_mode
    }

    fn create_backup(
        &mut self,
        description: Option<&str>,
        progress: &dyn Progress,
    ) -> Result<BackupInfo> {
        let mut metadata = self.load()?;
        let staging = self.staging()?;
        let staged_entry = staging.path().join("entry");
        let staged_world = staged_entry.join(WORLD_DIR);
        let staged_delta = staging.path().join("delta");
        let replaced = staging.path().join("replaced");

        progress.report(&format!("copying {}", self.world.display()));
        let copied = world::copy_tree(&self.world, &staged_world, &self.ignore)?;
        log::info!("staged {copied} files of {}", self.world.display());

        let record = EntryRecord {
            id: metadata.next_id,
            timestamp: Utc::now().trunc_subsecs(0),
            description: description.map(str::to_string),
            kind: EntryKind::Full,
        };

        let newest = metadata.entries.first().map(|entry| entry.id);
        if let Some(newest) = newest {
            delta::store_reverse(
                &self.entry_dir(newest).join(WORLD_DIR),
                &staged_world,
                &self.diff_context(progress),
                &staged_delta,
            )?;
            metadata.entries[0].kind = EntryKind::Delta;
        }
        metadata.entries.insert(0, record.clone());
        metadata.next_id += 1;

        let mut commit = Commit::new(&self.root, staging, metadata);
        if let Some(newest) = newest {
            commit.rename(&self.entry_dir(newest), &replaced);
            commit.rename(&staged_delta, &self.entry_dir(newest));
        }
        commit.rename(&staged_entry, &self.entry_dir(record.id));
        commit.run()?;

        log::info!("created backup {} in {}", record.id, self.root.display());
        Ok(BackupInfo::from(&record))
    }

    fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        Ok(ChainMetadata::load(&self.root)?.infos())
    }

    fn restore_backup(&self, target: BackupRef, progress: &dyn Progress) -> Result<()> {
        let metadata = self.load()?;
        let index = self.resolve(&metadata, target)?;

        let busy = |reason: String| BackupError::RestoreTargetBusy {
            path: self.world.clone(),
            reason,
        };
        let parent = match self.world.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let read_only = |path: &Path| {
            fs::metadata(path).is_ok_and(|meta| meta.permissions().readonly())
        };
        if read_only(&self.world) {
            return Err(busy("world directory is read-only".to_string()));
        }
        if read_only(parent) {
            return Err(busy(format!("{} is read-only", parent.display())));
        }
        let staging = tempfile::Builder::new()
            .prefix(RESTORE_PREFIX)
            .tempdir_in(parent)
            .map_err(|err| busy(format!("cannot stage next to it: {err}")))?;

        let staged = staging.path().join(WORLD_DIR);
        self.materialize(&metadata, index, &staged, progress)?;
        let carried = world::carry_ignored(&self.world, &staged, &self.ignore)?;
        log::debug!("carried {carried} ignored entries into the restored world");

        world::swap_in(&staged, &self.world, &staging.path().join("previous"))?;
        log::info!(
            "restored backup {} into {}",
            metadata.entries[index].id,
            self.world.display()
        );
        Ok(())
    }

    fn delete_backup(&mut self, target: BackupRef, progress: &dyn Progress) -> Result<()> {
        let mut metadata = self.load()?;
        let index = self.resolve(&metadata, target)?;
        let len = metadata.entries.len();
        let id = metadata.entries[index].id;

        if len == 1 || index == len - 1 {
            metadata.entries.remove(index);
            metadata.save(&self.root)?;
            remove_entry_dir(&self.entry_dir(id));
        } else if index == 0 {
            progress.report(&format!("promoting backup {}", metadata.entries[1].id));
            self.promote(metadata, progress)?;
        } else {
            return Err(BackupError::InvalidDeleteTarget { index, len });
        }
        log::info!("deleted backup {id}");
        Ok(())
    }
}
