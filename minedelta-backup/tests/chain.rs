mod common;

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use common::*;
use minedelta_backup::{
    BackupError, BackupManager, BackupRef, ChainConfig, DEFAULT_IGNORE, DiffBackupManager,
    DiffContext, Ignore, IndexMode, NoProgress, WorkerPool, diff,
};

struct Fixture {
    _dir: tempfile::TempDir,
    base: PathBuf,
    world: PathBuf,
    manager: DiffBackupManager,
}

impl Fixture {
    fn new(mode: IndexMode) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_path_buf();
        let world = base.join("world");
        sample_world(&world);
        let config = ChainConfig::default()
            .with_workers(NonZeroUsize::new(3).unwrap())
            .with_index_mode(mode);
        let manager = DiffBackupManager::new(&world, base.join("backups"), config).unwrap();
        manager.prepare().unwrap();
        Self {
            _dir: dir,
            base,
            world,
            manager,
        }
    }

    fn backup(&mut self, description: &str) -> u64 {
        self.manager.create_backup(Some(description), &NoProgress).unwrap().id
    }

    /// Keep a copy of the live world to compare restores against.
    fn keep(&self, name: &str) -> PathBuf {
        let copy = self.base.join("kept").join(name);
        copy_world(&self.world, &copy);
        copy
    }

    fn descriptions(&self) -> Vec<String> {
        self.manager
            .list_backups()
            .unwrap()
            .into_iter()
            .map(|info| info.description.unwrap_or_default())
            .collect()
    }

    fn kinds(&self) -> Vec<String> {
        let bytes = fs::read(self.manager.root().join("chain.json")).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        json["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["kind"].as_str().unwrap().to_string())
            .collect()
    }

    fn restore(&self, target: BackupRef) {
        self.manager.restore_backup(target, &NoProgress).unwrap();
    }
}

/// Four generations touching regions, chunks, timestamps and plain files.
fn four_generations(fixture: &mut Fixture) -> Vec<PathBuf> {
    let world = fixture.world.clone();
    let mut kept = Vec::new();

    fixture.backup("gen1");
    kept.push(fixture.keep("gen1"));

    set_chunk(&world, "region/r.0.0.mca", 0, 0, 2);
    set_chunk(&world, "region/r.3.3.mca", 1, 1, 2);
    write(&world, "level.dat", b"level v2");
    fixture.backup("gen2");
    kept.push(fixture.keep("gen2"));

    remove_chunk(&world, "region/r.0.0.mca", 5, 9);
    fs::remove_file(world.join("DIM-1/region/r.0.-1.mca")).unwrap();
    fs::remove_file(world.join("playerdata/alice.dat")).unwrap();
    set_timestamp(&world, "entities/r.0.0.mca", 0, 0, 7);
    fixture.backup("gen3");
    kept.push(fixture.keep("gen3"));

    set_chunk_with(&world, "region/r.0.0.mca", 0, 0, 2, minedelta_anvil::Codec::Gzip);
    set_chunk(&world, "DIM-1/region/r.0.-1.mca", 3, 3, 4);
    write(&world, "playerdata/alice.dat", b"alice v4");
    fixture.backup("gen4");
    kept.push(fixture.keep("gen4"));

    kept.reverse();
    kept
}

#[test]
fn test_day1_day2() {
    let mut fixture = Fixture::new(IndexMode::Index);
    fixture.backup("day1");
    let day1 = fixture.keep("day1");

    set_chunk(&fixture.world, "region/r.0.0.mca", 1, 0, 2);
    write(&fixture.world, "level.dat", b"level day2");
    fixture.backup("day2");
    let day2 = fixture.keep("day2");
    assert_eq!(fixture.descriptions(), ["day2", "day1"]);

    fixture.restore(BackupRef::Index(1));
    assert_eq!(state(&fixture.world), state(&day1));

    fixture.manager.delete_backup(BackupRef::Index(1), &NoProgress).unwrap();
    assert_eq!(fixture.descriptions(), ["day2"]);

    fixture.restore(BackupRef::Index(0));
    assert_eq!(state(&fixture.world), state(&day2));
}

#[test]
fn test_restore_reproduces_every_generation() {
    let mut fixture = Fixture::new(IndexMode::Index);
    let kept = four_generations(&mut fixture);
    assert_eq!(fixture.kinds(), ["full", "delta", "delta", "delta"]);

    let pool = WorkerPool::new(NonZeroUsize::new(2).unwrap()).unwrap();
    let ignore = Ignore::new(DEFAULT_IGNORE);
    for (index, expected) in kept.iter().enumerate() {
        fixture.restore(BackupRef::Index(index));
        assert_eq!(state(&fixture.world), state(expected), "index {index}");

        let ctx = DiffContext {
            pool: &pool,
            ignore: &ignore,
            progress: &NoProgress,
        };
        assert!(diff(&fixture.world, expected, &ctx).unwrap().is_empty(), "index {index}");
    }
}

#[test]
fn test_ids_are_monotonic_and_addressable() {
    let mut fixture = Fixture::new(IndexMode::Id);
    let kept = four_generations(&mut fixture);
    let ids = |fixture: &Fixture| -> Vec<u64> {
        fixture.manager.list_backups().unwrap().iter().map(|info| info.id).collect()
    };
    assert_eq!(ids(&fixture), [4, 3, 2, 1]);

    fixture.restore(BackupRef::Id(2));
    assert_eq!(state(&fixture.world), state(&kept[2]));

    fixture.manager.delete_backup(BackupRef::Id(1), &NoProgress).unwrap();
    fixture.backup("gen5");
    assert_eq!(ids(&fixture), [5, 4, 3, 2]);
}

#[test]
fn test_listing_twice_is_identical() {
    let mut fixture = Fixture::new(IndexMode::Index);
    assert!(fixture.manager.list_backups().unwrap().is_empty());
    fixture.backup("one");
    fixture.backup("two");
    let first = fixture.manager.list_backups().unwrap();
    let second = fixture.manager.list_backups().unwrap();
    assert_eq!(first, second);
    assert!(first[0].timestamp >= first[1].timestamp);
    assert_eq!(first[0].timestamp.timestamp_subsec_nanos(), 0);
}

#[test]
fn test_unknown_backup_leaves_chain_alone() {
    let mut fixture = Fixture::new(IndexMode::Index);
    fixture.backup("only");
    let root = fixture.manager.root().to_path_buf();
    let chain_before = raw_tree(&root);
    let world_before = raw_tree(&fixture.world);

    let err = fixture.manager.restore_backup(BackupRef::Index(1), &NoProgress).unwrap_err();
    assert!(matches!(err, BackupError::UnknownBackup(BackupRef::Index(1))), "{err}");
    let err = fixture.manager.delete_backup(BackupRef::Index(3), &NoProgress).unwrap_err();
    assert!(matches!(err, BackupError::UnknownBackup(BackupRef::Index(3))), "{err}");

    assert_eq!(raw_tree(&root), chain_before);
    assert_eq!(raw_tree(&fixture.world), world_before);
}

#[test]
fn test_wrong_index_mode() {
    let mut fixture = Fixture::new(IndexMode::Id);
    fixture.backup("only");
    assert_eq!(fixture.manager.index_mode(), IndexMode::Id);
    let err = fixture.manager.restore_backup(BackupRef::Index(0), &NoProgress).unwrap_err();
    assert!(matches!(
        err,
        BackupError::InvalidIndexMode {
            advertised: IndexMode::Id,
            given: IndexMode::Index
        }
    ));
}

#[test]
fn test_corrupt_region_creates_no_entry() {
    let mut fixture = Fixture::new(IndexMode::Index);
    fixture.backup("good");
    let root = fixture.manager.root().to_path_buf();
    let chain_before = raw_tree(&root);

    corrupt_first_slot(&fixture.world, "region/r.0.0.mca");
    let err = fixture.manager.create_backup(Some("bad"), &NoProgress).unwrap_err();
    assert!(err.is_corrupt_container(), "{err}");

    assert_eq!(fixture.descriptions(), ["good"]);
    assert_eq!(raw_tree(&root), chain_before);
}

#[test]
fn test_interior_delete_is_rejected() {
    let mut fixture = Fixture::new(IndexMode::Index);
    fixture.backup("a");
    fixture.backup("b");
    fixture.backup("c");
    let err = fixture.manager.delete_backup(BackupRef::Index(1), &NoProgress).unwrap_err();
    assert!(matches!(err, BackupError::InvalidDeleteTarget { index: 1, len: 3 }));
    assert_eq!(fixture.descriptions(), ["c", "b", "a"]);
}

#[test]
fn test_delete_oldest_keeps_remaining_entries() {
    let mut fixture = Fixture::new(IndexMode::Index);
    let kept = four_generations(&mut fixture);
    let root = fixture.manager.root().to_path_buf();
    let stored: Vec<_> = [4, 3, 2]
        .iter()
        .map(|id| raw_tree(&root.join(id.to_string())))
        .collect();

    fixture.manager.delete_backup(BackupRef::Index(3), &NoProgress).unwrap();
    assert_eq!(fixture.descriptions(), ["gen4", "gen3", "gen2"]);
    assert!(!root.join("1").exists());
    for (id, before) in [4, 3, 2].iter().zip(&stored) {
        assert_eq!(&raw_tree(&root.join(id.to_string())), before, "entry {id}");
    }

    fixture.restore(BackupRef::Index(2));
    assert_eq!(state(&fixture.world), state(&kept[2]));
}

#[test]
fn test_delete_newest_promotes_next() {
    let mut fixture = Fixture::new(IndexMode::Index);
    let kept = four_generations(&mut fixture);

    fixture.manager.delete_backup(BackupRef::Index(0), &NoProgress).unwrap();
    assert_eq!(fixture.descriptions(), ["gen3", "gen2", "gen1"]);
    assert_eq!(fixture.kinds(), ["full", "delta", "delta"]);
    assert!(!fixture.manager.root().join("4").exists());

    for (index, expected) in kept[1..].iter().enumerate() {
        fixture.restore(BackupRef::Index(index));
        assert_eq!(state(&fixture.world), state(expected), "index {index}");
    }

    // the chain keeps growing from the promoted entry
    set_chunk(&fixture.world, "region/r.9.9.mca", 0, 0, 9);
    fixture.backup("gen5");
    assert_eq!(fixture.kinds(), ["full", "delta", "delta", "delta"]);
    fixture.restore(BackupRef::Index(1));
    assert_eq!(state(&fixture.world), state(&kept[1]));
}

#[test]
fn test_delete_single_entry_empties_chain() {
    let mut fixture = Fixture::new(IndexMode::Index);
    fixture.backup("only");
    fixture.manager.delete_backup(BackupRef::Index(0), &NoProgress).unwrap();
    assert!(fixture.manager.list_backups().unwrap().is_empty());
    assert!(!fixture.manager.root().join("1").exists());

    // an emptied chain starts over with a full copy
    let id = fixture.backup("again");
    assert_eq!(id, 2);
    assert_eq!(fixture.kinds(), ["full"]);
}

#[test]
fn test_ignored_files_survive_restore() {
    let mut fixture = Fixture::new(IndexMode::Index);
    fixture.backup("base");
    let stored = fixture.manager.root().join("1/world");
    assert!(stored.join("level.dat").exists());
    assert!(!stored.join("session.lock").exists());
    assert!(!stored.join("datapacks").exists());

    write(&fixture.world, "session.lock", b"live lock");
    write(&fixture.world, "level.dat", b"scribbled");
    fixture.restore(BackupRef::Index(0));

    let world = &fixture.world;
    assert_eq!(fs::read(world.join("level.dat")).unwrap(), b"level v1");
    assert_eq!(fs::read(world.join("session.lock")).unwrap(), b"live lock");
    assert_eq!(fs::read(world.join("datapacks/pack/pack.mcmeta")).unwrap(), b"{}");
}

#[test]
fn test_restore_into_missing_world() {
    let mut fixture = Fixture::new(IndexMode::Index);
    fixture.backup("base");
    let expected = fixture.keep("base");
    fs::remove_dir_all(&fixture.world).unwrap();

    fixture.restore(BackupRef::Index(0));
    assert_eq!(state(&fixture.world), state(&expected));
    assert_no_leftovers(&fixture.base);
}

#[test]
fn test_progress_is_reported() {
    let mut fixture = Fixture::new(IndexMode::Index);
    fixture.backup("base");
    set_chunk(&fixture.world, "region/r.0.0.mca", 0, 0, 2);

    let messages = std::cell::RefCell::new(Vec::new());
    let sink = |message: &str| messages.borrow_mut().push(message.to_string());
    fixture.manager.create_backup(None, &sink).unwrap();
    let messages = messages.into_inner();
    assert!(messages[0].starts_with("copying "));
    assert!(messages.iter().any(|m| m.starts_with("diffing region/r.0.0.mca")));
    assert!(messages.last().unwrap().contains("regions compared"));
}

#[test]
fn test_restore_drops_directories_added_later() {
    let mut fixture = Fixture::new(IndexMode::Index);
    fixture.backup("day1");
    let day1 = fixture.keep("day1");

    set_chunk(&fixture.world, "DIM1/region/r.0.0.mca", 0, 0, 1);
    write(&fixture.world, "stats/nested/bob.json", b"{}");
    fixture.backup("day2");

    fixture.restore(BackupRef::Index(1));
    assert_eq!(state(&fixture.world), state(&day1));
    assert_eq!(dirs(&fixture.world), dirs(&day1));
    assert!(!fixture.world.join("DIM1").exists());
}

#[test]
fn test_unsupported_codec_creates_no_entry() {
    let mut fixture = Fixture::new(IndexMode::Index);
    fixture.backup("good");
    let root = fixture.manager.root().to_path_buf();
    let chain_before = raw_tree(&root);

    set_first_codec_byte(&fixture.world, "region/r.0.0.mca", 9);
    let err = fixture.manager.create_backup(Some("bad"), &NoProgress).unwrap_err();
    assert!(err.is_unsupported_codec(), "{err}");
    assert!(!err.is_corrupt_container());

    assert_eq!(fixture.descriptions(), ["good"]);
    assert_eq!(raw_tree(&root), chain_before);
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

#[cfg(unix)]
#[test]
fn test_read_only_world_is_busy() {
    let mut fixture = Fixture::new(IndexMode::Index);
    fixture.backup("base");
    write(&fixture.world, "level.dat", b"live");
    let before = raw_tree(&fixture.world);

    set_mode(&fixture.world, 0o555);
    let result = fixture.manager.restore_backup(BackupRef::Index(0), &NoProgress);
    set_mode(&fixture.world, 0o755);

    let err = result.unwrap_err();
    assert!(matches!(err, BackupError::RestoreTargetBusy { .. }), "{err}");
    assert_eq!(raw_tree(&fixture.world), before);
    assert_no_leftovers(&fixture.base);
}

#[cfg(unix)]
#[test]
fn test_read_only_parent_is_busy() {
    let mut fixture = Fixture::new(IndexMode::Index);
    fixture.backup("base");
    write(&fixture.world, "level.dat", b"live");
    let before = raw_tree(&fixture.world);

    set_mode(&fixture.base, 0o555);
    let result = fixture.manager.restore_backup(BackupRef::Index(0), &NoProgress);
    set_mode(&fixture.base, 0o755);

    let err = result.unwrap_err();
    assert!(matches!(err, BackupError::RestoreTargetBusy { .. }), "{err}");
    assert_eq!(raw_tree(&fixture.world), before);
    assert_no_leftovers(&fixture.base);
}

fn assert_no_leftovers(base: &Path) {
    for entry in fs::read_dir(base).unwrap() {
        let name = entry.unwrap().file_name();
        assert!(!name.to_string_lossy().starts_with(".minedelta-restore-"), "{name:?}");
    }
}
