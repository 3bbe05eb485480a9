use std::num::NonZeroUsize;

use crate::manager::IndexMode;

/// Names never backed up, compared, deleted or restored, at any depth of the world.
pub const DEFAULT_IGNORE: &[&str] = &[
    "session.lock",
    "DistantHorizons.sqlite",
    "datapacks",
    "icon.png",
];

/// Settings of one backup chain. Every manager owns its copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// Threads used for region diffing and patching.
    pub workers: NonZeroUsize,
    pub index_mode: IndexMode,
    pub ignore: Vec<String>,
}

impl ChainConfig {
    pub fn with_workers(mut self, workers: NonZeroUsize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_index_mode(mut self, index_mode: IndexMode) -> Self {
        self.index_mode = index_mode;
        self
    }

    pub fn with_ignore<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore = names.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            index_mode: IndexMode::Index,
            ignore: DEFAULT_IGNORE.iter().map(|name| name.to_string()).collect(),
        }
    }
}
