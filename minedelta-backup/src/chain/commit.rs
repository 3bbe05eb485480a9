//! Crash-safe chain commits.
//!
//! A commit is a list of directory renames inside the chain root followed by
//! the metadata save. The intent is persisted before the first rename, so a
//! commit that never reached its metadata can be rolled back by the next run,
//! even when the process died halfway.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use super::metadata::{self, ChainMetadata};
use crate::error::{BackupError, Result};

pub const INTENT_FILE: &str = "commit.json";

/// Paths are relative to the chain root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub renames: Vec<Rename>,
    /// Metadata the chain holds once the commit is complete.
    pub metadata: ChainMetadata,
}

impl Intent {
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join(INTENT_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BackupError::io(&path)(err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| BackupError::Metadata { path, source })
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        metadata::write_json(&root.join(INTENT_FILE), self)
    }
}

/// Pending renames plus the staging directory they move things in and out of.
///
/// Dropping an unfinished commit undoes the renames done so far. If that fails
/// too, the staging directory and the intent stay on disk for [`recover`].
pub struct Commit<'a> {
    root: &'a Path,
    staging: TempDir,
    intent: Intent,
    written: bool,
    done: usize,
}

impl<'a> Commit<'a> {
    pub fn new(root: &'a Path, staging: TempDir, metadata: ChainMetadata) -> Self {
        Self {
            root,
            staging,
            intent: Intent {
                renames: Vec::new(),
                metadata,
            },
            written: false,
            done: 0,
        }
    }

    pub fn rename(&mut self, from: &Path, to: &Path) {
        let relative = |path: &Path| path.strip_prefix(self.root).unwrap_or(path).to_path_buf();
        let rename = Rename {
            from: relative(from),
            to: relative(to),
        };
        self.intent.renames.push(rename);
    }

    pub fn run(mut self) -> Result<()> {
        self.intent.save(self.root)?;
        self.written = true;
        for rename in &self.intent.renames {
            let from = self.root.join(&rename.from);
            fs::rename(&from, self.root.join(&rename.to)).map_err(BackupError::io(&from))?;
            self.done += 1;
        }
        self.intent.metadata.save(self.root)?;
        self.written = false;
        remove_intent(self.root);
        Ok(())
    }
}

impl Drop for Commit<'_> {
    fn drop(&mut self) {
        if !self.written {
            return;
        }
        for rename in self.intent.renames[..self.done].iter().rev() {
            let (from, to) = (self.root.join(&rename.from), self.root.join(&rename.to));
            if let Err(err) = fs::rename(&to, &from) {
                log::error!("rollback of {} -> {} failed: {err}", from.display(), to.display());
                let kept = self.staging.path().display();
                log::error!("keeping {kept} for the next run to recover");
                self.staging.disable_cleanup(true);
                return;
            }
        }
        remove_intent(self.root);
    }
}

fn remove_intent(root: &Path) {
    let path = root.join(INTENT_FILE);
    if let Err(err) = fs::remove_file(&path) {
        log::warn!("could not remove {}: {err}", path.display());
    }
}

/// Finish what an interrupted commit left behind. A commit whose metadata was
/// saved is kept; any other is rolled back by reversing the renames it got to.
pub fn recover(root: &Path) -> Result<()> {
    let Some(intent) = Intent::load(root)? else {
        return Ok(());
    };
    if ChainMetadata::load(root)? == intent.metadata {
        log::info!("commit in {} had completed", root.display());
    } else {
        log::warn!("rolling back interrupted commit in {}", root.display());
        for rename in intent.renames.iter().rev() {
            let (from, to) = (root.join(&rename.from), root.join(&rename.to));
            // a rename that never happened leaves `from` in place
            if to.exists() && !from.exists() {
                fs::rename(&to, &from).map_err(BackupError::io(&to))?;
            }
        }
    }
    let path = root.join(INTENT_FILE);
    fs::remove_file(&path).map_err(BackupError::io(&path))
}
