use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::compression::Codec;

pub type Result<T, E = AnvilError> = std::result::Result<T, E>;

/// Errors raised while reading or writing region containers.
#[derive(Debug, Error)]
pub enum AnvilError {
    /// The file is not a structurally valid region container.
    #[error("corrupt region file {}: {reason}", path.display())]
    CorruptContainer { path: PathBuf, reason: String },

    /// A slot uses a compression type this build cannot handle.
    #[error("unsupported chunk compression type {id}{}", in_file(.path))]
    UnsupportedCodec { id: u8, path: Option<PathBuf> },

    #[error("chunk payload needs {sectors} sectors, a region slot holds at most 255")]
    PayloadTooLarge { sectors: usize },

    #[error("{codec} stream could not be processed")]
    Compression {
        codec: Codec,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AnvilError {
    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::CorruptContainer {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn in_file(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}
