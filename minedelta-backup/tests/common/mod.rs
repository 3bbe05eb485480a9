#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use minedelta_anvil::{
    ChunkPayload, ChunkPos, ChunkSlot, Codec, RegionFile, RegionPos, read_slots,
};
use minedelta_backup::world::{self, FileKind, Ignore};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Chunk {
    #[serde(rename = "xPos")]
    x_pos: i32,
    #[serde(rename = "zPos")]
    z_pos: i32,
    #[serde(rename = "LastUpdate")]
    last_update: i64,
    #[serde(rename = "Status")]
    status: String,
}

pub fn payload(region: &str, pos: ChunkPos, version: i64, codec: Codec) -> ChunkPayload {
    let region = RegionPos::from_path(Path::new(region)).unwrap();
    let (x_pos, z_pos) = region.local_to_world(pos);
    let nbt = fastnbt::to_bytes(&Chunk {
        x_pos,
        z_pos,
        last_update: version,
        status: "minecraft:full".to_string(),
    })
    .unwrap();
    ChunkPayload::compress(codec, &nbt).unwrap()
}

/// Write chunk `(x, z)` of `region` (relative to the world) at `version`.
pub fn set_chunk(world: &Path, region: &str, x: u8, z: u8, version: i64) {
    set_chunk_with(world, region, x, z, version, Codec::Zlib);
}

pub fn set_chunk_with(world: &Path, region: &str, x: u8, z: u8, version: i64, codec: Codec) {
    let pos = ChunkPos { x, z };
    let mut file = open_or_create(&world.join(region));
    let timestamp = 1_700_000_000 + version as u32;
    file.write_slot(pos, &payload(region, pos, version, codec), timestamp)
        .unwrap();
}

pub fn remove_chunk(world: &Path, region: &str, x: u8, z: u8) {
    let mut file = RegionFile::open(world.join(region)).unwrap();
    file.remove_slot(ChunkPos { x, z }, 0).unwrap();
}

pub fn set_timestamp(world: &Path, region: &str, x: u8, z: u8, timestamp: u32) {
    let mut file = RegionFile::open(world.join(region)).unwrap();
    let mut timestamps = file.timestamps().to_vec();
    timestamps[ChunkPos { x, z }.index()] = timestamp;
    file.set_timestamps(&timestamps).unwrap();
}

fn open_or_create(path: &Path) -> RegionFile {
    if path.is_file() {
        RegionFile::open(path).unwrap()
    } else {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RegionFile::create(path).unwrap()
    }
}

pub fn write(world: &Path, relative: &str, contents: &[u8]) {
    world::write_file(&world.join(relative), contents).unwrap();
}

/// Make the first present slot of a region declare more bytes than the file has.
pub fn corrupt_first_slot(world: &Path, region: &str) {
    let path = world.join(region);
    let mut bytes = fs::read(&path).unwrap();
    let location = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    assert_ne!(location, 0, "slot (0,0) must be present");
    let start = (location >> 8) as usize * 4096;
    bytes[start..start + 4].copy_from_slice(&0x00ff_ffffu32.to_be_bytes());
    fs::write(&path, bytes).unwrap();
}

/// Overwrite the compression type byte of slot (0,0).
pub fn set_first_codec_byte(world: &Path, region: &str, tag: u8) {
    let path = world.join(region);
    let mut bytes = fs::read(&path).unwrap();
    let location = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    assert_ne!(location, 0, "slot (0,0) must be present");
    bytes[(location >> 8) as usize * 4096 + 4] = tag;
    fs::write(&path, bytes).unwrap();
}

#[derive(Debug, PartialEq)]
pub enum Content {
    Region(Vec<ChunkSlot>),
    File(Vec<u8>),
}

/// What a world holds, independent of how region files lay out their sectors.
pub fn state(world: &Path) -> BTreeMap<PathBuf, Content> {
    state_with(world, &Ignore::new(minedelta_backup::DEFAULT_IGNORE))
}

pub fn state_with(world: &Path, ignore: &Ignore) -> BTreeMap<PathBuf, Content> {
    world::scan(world, ignore)
        .unwrap()
        .into_iter()
        .map(|(relative, file)| {
            let full = world.join(&relative);
            let content = match file.kind {
                FileKind::Region(_) => {
                    Content::Region(read_slots(&full).unwrap().map(|slot| slot.unwrap()).collect())
                }
                FileKind::Other => Content::File(fs::read(&full).unwrap()),
            };
            (relative, content)
        })
        .collect()
}

/// Raw bytes of every file below `dir`.
pub fn raw_tree(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    world::scan(dir, &Ignore::none())
        .unwrap()
        .into_keys()
        .map(|relative| {
            let bytes = fs::read(dir.join(&relative)).unwrap();
            (relative, bytes)
        })
        .collect()
}

/// Every directory below `dir`, relative to it.
pub fn dirs(dir: &Path) -> BTreeSet<PathBuf> {
    walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.path().strip_prefix(dir).unwrap().to_path_buf())
        .collect()
}

pub fn copy_world(src: &Path, dst: &Path) {
    world::copy_tree(src, dst, &Ignore::none()).unwrap();
}

/// A small world: two overworld regions, a nether region, level data and
/// files the game keeps but nobody backs up.
pub fn sample_world(world: &Path) {
    for (x, z) in [(0, 0), (1, 0), (5, 9), (31, 31)] {
        set_chunk(world, "region/r.0.0.mca", x, z, 1);
    }
    set_chunk(world, "region/r.-1.0.mca", 0, 0, 1);
    set_chunk(world, "entities/r.0.0.mca", 0, 0, 1);
    set_chunk(world, "DIM-1/region/r.0.-1.mca", 3, 3, 1);
    write(world, "level.dat", b"level v1");
    write(world, "playerdata/alice.dat", b"alice v1");
    write(world, "poi/r.0.0.mca", b"");
    write(world, "session.lock", b"lock");
    write(world, "datapacks/pack/pack.mcmeta", b"{}");
}
