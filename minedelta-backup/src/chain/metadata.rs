//! `chain.json`: the ordered entry list of a chain.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};
use crate::manager::BackupInfo;

pub const METADATA_FILE: &str = "chain.json";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Complete copy of the world.
    Full,
    /// Reverse patch against the newer neighbor.
    Delta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: EntryKind,
}

impl From<&EntryRecord> for BackupInfo {
    fn from(record: &EntryRecord) -> Self {
        BackupInfo {
            id: record.id,
            description: record.description.clone(),
            timestamp: record.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub version: u32,
    pub next_id: u64,
    /// Newest first.
    pub entries: Vec<EntryRecord>,
}

impl Default for ChainMetadata {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            next_id: 1,
            entries: Vec::new(),
        }
    }
}

impl ChainMetadata {
    /// Load and validate the metadata of the chain at `root`. A chain that was
    /// never written is empty.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(METADATA_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(BackupError::io(&path)(err)),
        };
        let metadata: Self =
            serde_json::from_slice(&bytes).map_err(|source| BackupError::Metadata {
                path: path.clone(),
                source,
            })?;
        metadata.validate(&path)?;
        Ok(metadata)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = root.join(METADATA_FILE);
        self.validate(&path)?;
        write_json(&path, self)
    }

    pub fn validate(&self, path: &Path) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(BackupError::chain_corrupt(
                path,
                format!("unsupported format version {}", self.version),
            ));
        }
        let mut seen = HashSet::new();
        for (index, entry) in self.entries.iter().enumerate() {
            let expected = if index == 0 { EntryKind::Full } else { EntryKind::Delta };
            if entry.kind != expected {
                return Err(BackupError::chain_corrupt(
                    path,
                    format!(
                        "entry {} at index {index} is {:?}, expected {expected:?}",
                        entry.id, entry.kind
                    ),
                ));
            }
            if !seen.insert(entry.id) || entry.id >= self.next_id {
                return Err(BackupError::chain_corrupt(
                    path,
                    format!("entry id {} is duplicated or not below {}", entry.id, self.next_id),
                ));
            }
        }
        Ok(())
    }

    pub fn position(&self, id: u64) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    pub fn infos(&self) -> Vec<BackupInfo> {
        self.entries.iter().map(BackupInfo::from).collect()
    }
}

/// Write through a temporary sibling and a rename, so readers see either the
/// old or the new contents.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| BackupError::Metadata {
        path: path.to_path_buf(),
        source,
    })?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(BackupError::io(&tmp))?;
    fs::rename(&tmp, path).map_err(BackupError::io(path))
}
