use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use minedelta_backup::{
    BackupManager, BackupRef, ChainConfig, DiffBackupManager, IndexMode, LogProgress, Progress,
};

#[derive(Parser)]
#[command(name = "minedelta", about = "Differential chunk-level backups for Minecraft worlds")]
pub struct Args {
    /// World directory to back up and restore into
    #[arg(short, long, env = "MINEDELTA_WORLD", default_value = "world")]
    pub world: PathBuf,

    /// Directory holding the backup chain
    #[arg(short, long, env = "MINEDELTA_BACKUPS", default_value = "backups")]
    pub backups: PathBuf,

    /// Worker threads for region diffing and patching (default: all cores)
    #[arg(long, env = "MINEDELTA_WORKERS")]
    pub workers: Option<NonZeroUsize>,

    /// Address backups by id instead of list position
    #[arg(long)]
    pub by_id: bool,

    /// Send progress to the log (RUST_LOG=info) instead of stdout
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Back up the current state of the world
    Create {
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Show backups, newest first
    List {
        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace the world with a backup
    Restore { target: u64 },
    /// Delete the newest or the oldest backup
    Delete { target: u64 },
}

impl Args {
    fn config(&self) -> ChainConfig {
        let mut config = ChainConfig::default();
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if self.by_id {
            config = config.with_index_mode(IndexMode::Id);
        }
        config
    }

    fn target(&self, value: u64) -> Result<BackupRef> {
        if self.by_id {
            return Ok(BackupRef::Id(value));
        }
        let index = usize::try_from(value).context("backup index out of range")?;
        Ok(BackupRef::Index(index))
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut manager = DiffBackupManager::new(&args.world, &args.backups, args.config())
        .context("Failed to set up backup manager")?;
    manager
        .prepare()
        .with_context(|| format!("Failed to prepare {}", args.backups.display()))?;
    log::debug!(
        "chain {} for world {} ready",
        args.backups.display(),
        args.world.display()
    );

    let print = |message: &str| println!("{message}");
    let progress: &dyn Progress = if args.quiet { &LogProgress } else { &print };

    match &args.command {
        Command::Create { message } => {
            let info = manager
                .create_backup(message.as_deref(), progress)
                .with_context(|| format!("Failed to back up {}", args.world.display()))?;
            log::info!("backup {} holds {}", info.id, args.world.display());
            println!("Created backup {} at {}", info.id, info.timestamp.with_timezone(&Local));
        }
        Command::List { json } => {
            let backups = manager.list_backups().context("Failed to read backup chain")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&backups)?);
                return Ok(());
            }
            if backups.is_empty() {
                println!("No backups in {}", args.backups.display());
            }
            for (index, info) in backups.iter().enumerate() {
                println!(
                    "{index:>5}  {:>5}  {}  {}",
                    info.id,
                    info.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                    info.description.as_deref().unwrap_or("")
                );
            }
        }
        Command::Restore { target } => {
            let target = args.target(*target)?;
            manager
                .restore_backup(target, progress)
                .with_context(|| format!("Failed to restore {target}"))?;
            println!("Restored {target} into {}", args.world.display());
        }
        Command::Delete { target } => {
            let target = args.target(*target)?;
            manager
                .delete_backup(target, progress)
                .with_context(|| format!("Failed to delete {target}"))?;
            println!("Deleted {target}");
        }
    }
    Ok(())
}
