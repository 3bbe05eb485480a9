//! Walking, copying and swapping world directories.

use std::collections::{BTreeMap, HashSet};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use minedelta_anvil::RegionPos;
use walkdir::WalkDir;

use crate::error::{BackupError, Result};

/// File and directory names skipped at any depth.
#[derive(Debug, Clone, Default)]
pub struct Ignore {
    names: HashSet<OsString>,
}

impl Ignore {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            names: names.iter().map(|name| OsString::from(name.as_ref())).collect(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn matches(&self, name: &OsStr) -> bool {
        self.names.contains(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A non-empty `r.<x>.<z>.mca` file. The game also leaves empty ones around,
    /// those are ordinary files.
    Region(RegionPos),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldFile {
    pub kind: FileKind,
    pub len: u64,
}

/// Every regular file below `root` that is not ignored, keyed by relative path.
pub fn scan(root: &Path, ignore: &Ignore) -> Result<BTreeMap<PathBuf, WorldFile>> {
    let mut files = BTreeMap::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !ignore.matches(entry.file_name()));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let len = entry.metadata()?.len();
        let kind = match RegionPos::from_path(relative) {
            Some(pos) if len > 0 => FileKind::Region(pos),
            _ => FileKind::Other,
        };
        files.insert(relative.to_path_buf(), WorldFile { kind, len });
    }
    Ok(files)
}

/// Copy a world, skipping ignored names. Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path, ignore: &Ignore) -> Result<usize> {
    let files = scan(src, ignore)?;
    fs::create_dir_all(dst).map_err(BackupError::io(dst))?;
    for relative in files.keys() {
        copy_file(&src.join(relative), &dst.join(relative))?;
    }
    log::debug!("copied {} files from {} to {}", files.len(), src.display(), dst.display());
    Ok(files.len())
}

pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    create_parent(dst)?;
    fs::copy(src, dst).map_err(BackupError::io(src))?;
    Ok(())
}

pub fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    create_parent(path)?;
    fs::write(path, contents).map_err(BackupError::io(path))
}

pub fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(BackupError::io(parent)),
        None => Ok(()),
    }
}

/// Remove a file, a missing one is fine.
pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(BackupError::io(path)(err)),
        _ => Ok(()),
    }
}

/// Remove a file, then every directory it leaves empty on the way up to `root`.
/// `root` itself is kept.
pub fn remove_file_pruned(path: &Path, root: &Path) -> Result<()> {
    remove_file(path)?;
    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        match fs::remove_dir(current) {
            Ok(()) => dir = current.parent(),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::DirectoryNotEmpty | io::ErrorKind::NotFound
                ) =>
            {
                break;
            }
            Err(err) => return Err(BackupError::io(current)(err)),
        }
    }
    Ok(())
}

pub fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Copy the ignored entries of `live` (lock files, datapacks, ...) into `staged`
/// so they survive a swap.
pub fn carry_ignored(live: &Path, staged: &Path, ignore: &Ignore) -> Result<usize> {
    if !live.is_dir() {
        return Ok(0);
    }
    let mut carried = 0;
    let mut walker = WalkDir::new(live).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        if entry.depth() == 0 || !ignore.matches(entry.file_name()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(live) else {
            continue;
        };
        let target = staged.join(relative);
        if entry.file_type().is_dir() {
            walker.skip_current_dir();
            copy_tree(entry.path(), &target, &Ignore::none())?;
        } else if entry.file_type().is_file() {
            copy_file(entry.path(), &target)?;
        }
        carried += 1;
    }
    Ok(carried)
}

/// Replace `world` by `staged` with two renames.
///
/// The current world is parked at `parking` (which must not exist yet) and put
/// back when the second rename fails.
pub fn swap_in(staged: &Path, world: &Path, parking: &Path) -> Result<()> {
    let busy = |err: io::Error| BackupError::RestoreTargetBusy {
        path: world.to_path_buf(),
        reason: err.to_string(),
    };
    let parked = world.exists();
    if parked {
        fs::rename(world, parking).map_err(busy)?;
    }
    if let Err(err) = fs::rename(staged, world) {
        if parked {
            if let Err(undo) = fs::rename(parking, world) {
                log::error!(
                    "could not move {} back to {}: {undo}",
                    parking.display(),
                    world.display()
                );
            }
        }
        return Err(busy(err));
    }
    Ok(())
}
