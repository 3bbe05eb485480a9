//! The capability every backup method offers to its callers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::progress::Progress;

/// Public summary of a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub id: u64,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// How a manager expects backups to be referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Position in [`BackupManager::list_backups`], 0 being the newest.
    #[default]
    Index,
    /// The identifier found in [`BackupInfo::id`].
    Id,
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexMode::Index => "index",
            IndexMode::Id => "id",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupRef {
    Index(usize),
    Id(u64),
}

impl BackupRef {
    pub fn mode(self) -> IndexMode {
        match self {
            BackupRef::Index(_) => IndexMode::Index,
            BackupRef::Id(_) => IndexMode::Id,
        }
    }
}

impl fmt::Display for BackupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupRef::Index(index) => write!(f, "index {index}"),
            BackupRef::Id(id) => write!(f, "id {id}"),
        }
    }
}

/// A backup method.
///
/// Mutating calls take `&mut self`; callers sharing a chain across processes
/// must make sure only one of them writes at a time.
pub trait BackupManager {
    /// The reference mode accepted by `restore_backup` and `delete_backup`.
    fn index_mode(&self) -> IndexMode;

    fn create_backup(
        &mut self,
        description: Option<&str>,
        progress: &dyn Progress,
    ) -> Result<BackupInfo>;

    /// Backups ordered newest to oldest.
    fn list_backups(&self) -> Result<Vec<BackupInfo>>;

    /// Replace the world with the state captured by a backup.
    fn restore_backup(&self, target: BackupRef, progress: &dyn Progress) -> Result<()>;

    fn delete_backup(&mut self, target: BackupRef, progress: &dyn Progress) -> Result<()>;
}
