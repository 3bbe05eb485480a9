//! Differential backups of Minecraft worlds.
//!
//! Worlds are compared chunk by chunk through [`minedelta_anvil`]; a backup
//! chain keeps the newest state as a full copy and every older state as a
//! reverse delta against its newer neighbor.

pub mod chain;
pub mod change_set;
pub mod config;
pub mod delta;
pub mod diff;
pub mod error;
pub mod manager;
pub mod pool;
pub mod progress;
pub mod stats;
pub mod world;

pub use chain::DiffBackupManager;
pub use change_set::{ChangeKind, ChangeSet, ChunkChange, FileChange, RegionChange};
pub use config::{ChainConfig, DEFAULT_IGNORE};
pub use diff::{DiffContext, diff};
pub use error::{BackupError, Result};
pub use manager::{BackupInfo, BackupManager, BackupRef, IndexMode};
pub use pool::WorkerPool;
pub use progress::{LogProgress, NoProgress, Progress};
pub use world::Ignore;
