use std::io;
use std::path::{Path, PathBuf};

use minedelta_anvil::AnvilError;
use thiserror::Error;

use crate::manager::{BackupRef, IndexMode};

pub type Result<T, E = BackupError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BackupError {
    /// Region codec failure, carrying the offending file path.
    #[error(transparent)]
    Region(#[from] AnvilError),

    #[error("no backup found for {0}")]
    UnknownBackup(BackupRef),

    #[error("backups of this chain are addressed by {advertised}, got a reference by {given}")]
    InvalidIndexMode {
        advertised: IndexMode,
        given: IndexMode,
    },

    /// Only the newest and the oldest backup can be deleted.
    #[error("backup at index {index} is neither the newest nor the oldest of {len} backups")]
    InvalidDeleteTarget { index: usize, len: usize },

    #[error("cannot safely overwrite {}: {reason}", path.display())]
    RestoreTargetBusy { path: PathBuf, reason: String },

    #[error("backup chain at {} is inconsistent: {reason}", path.display())]
    ChainCorrupt { path: PathBuf, reason: String },

    #[error("invalid metadata in {}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error("could not start worker pool")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl BackupError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn chain_corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::ChainCorrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn is_corrupt_container(&self) -> bool {
        matches!(self, Self::Region(AnvilError::CorruptContainer { .. }))
    }

    pub fn is_unsupported_codec(&self) -> bool {
        matches!(self, Self::Region(AnvilError::UnsupportedCodec { .. }))
    }
}
