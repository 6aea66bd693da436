//! End-to-end render runs against small synthetic worlds.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use blockmap::config::Config;
use blockmap::coord::{ChunkPos, RegionPos, Rotation};
use blockmap::dispatch::NullProgress;
use blockmap::image::codec::{ImageCodec, PngCodec};
use blockmap::image::rgba_alpha;
use blockmap::manager::{RenderBehaviors, RenderManager};
use blockmap::region::chunk::{BlockStatesNbt, ChunkNbt, PaletteEntryNbt, SectionNbt};
use blockmap::region::{compress, RegionFile, COMPRESSION_ZLIB};
use blockmap::webmeta::WebMeta;

/// A chunk whose section 4 (y 64..80) is solid stone.
fn stone_chunk(pos: ChunkPos) -> ChunkNbt {
    ChunkNbt {
        x_pos: pos.x,
        z_pos: pos.z,
        status: Some("minecraft:full".to_string()),
        sections: vec![SectionNbt {
            y: 4,
            block_states: Some(BlockStatesNbt {
                palette: vec![PaletteEntryNbt {
                    name: "minecraft:stone".to_string(),
                    properties: None,
                }],
                data: None,
            }),
            biomes: None,
        }],
    }
}

/// Writes region files holding solid-stone chunks with the given timestamps.
fn write_world(world_dir: &Path, chunks: &[(ChunkPos, u32)]) {
    let region_dir = world_dir.join("region");
    std::fs::create_dir_all(&region_dir).unwrap();

    let mut regions: std::collections::BTreeMap<RegionPos, Vec<(ChunkPos, u32)>> =
        std::collections::BTreeMap::new();
    for &(pos, timestamp) in chunks {
        regions.entry(pos.region()).or_default().push((pos, timestamp));
    }
    for (region_pos, chunks) in regions {
        let path = region_dir.join(region_pos.filename());
        let mut region = RegionFile::new(&path, Rotation::TopLeft).unwrap();
        for (pos, timestamp) in chunks {
            let raw = fastnbt::to_bytes(&stone_chunk(pos)).unwrap();
            let packed = compress(&raw, COMPRESSION_ZLIB).unwrap();
            region.set_chunk_data(pos, packed, COMPRESSION_ZLIB);
            region.set_chunk_timestamp(pos, timestamp);
        }
        region.write(None).unwrap();
    }
}

fn config_for(world_dir: &Path, out_dir: &Path) -> Config {
    Config::parse(&format!(
        r#"
        output_dir = "{}"

        [world.main]
        input_dir = "{}"

        [map.surface]
        world = "main"
        render_view = "topdown"
        texture_size = 4
        "#,
        out_dir.display(),
        world_dir.display(),
    ))
    .unwrap()
}

fn run(config: &Config) -> bool {
    let mut manager = RenderManager::new(config.clone());
    manager.set_behaviors(RenderBehaviors::default());
    manager.run(2, &NullProgress).unwrap()
}

fn mtime(path: &Path) -> SystemTime {
    std::fs::metadata(path).unwrap().modified().unwrap()
}

/// A chunk timestamp safely newer than any stored render time.
fn future_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as u32
        + 1000
}

#[test]
fn test_empty_world_produces_transparent_base_only() {
    let world_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(world_dir.path().join("region")).unwrap();

    let config = config_for(world_dir.path(), out_dir.path());
    assert!(run(&config));

    let rotation_dir = out_dir.path().join("surface/tl");
    let base = PngCodec.read(&rotation_dir.join("base.png")).unwrap();
    assert!(base.is_transparent(), "empty world renders a transparent root");
    for quadrant in 1..=4 {
        assert!(!rotation_dir.join(format!("{}", quadrant)).exists());
        assert!(!rotation_dir.join(format!("{}.png", quadrant)).exists());
    }

    let meta = WebMeta::read(out_dir.path()).unwrap();
    let map = meta.map("surface").unwrap();
    assert_eq!(map.max_zoom, 0);
    assert_ne!(map.last_rendered(Rotation::TopLeft), 0);
}

#[test]
fn test_single_chunk_renders_one_leaf() {
    let world_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    write_world(world_dir.path(), &[(ChunkPos::new(0, 0), 1000)]);

    let config = config_for(world_dir.path(), out_dir.path());
    assert!(run(&config));

    let rotation_dir = out_dir.path().join("surface/tl");
    // The chunk sits in the SE quadrant of the depth-1 tree: exactly one
    // leaf plus the root exist.
    assert!(rotation_dir.join("4.png").is_file());
    assert!(rotation_dir.join("base.png").is_file());
    for absent in ["1.png", "2.png", "3.png"] {
        assert!(!rotation_dir.join(absent).exists(), "{} must not exist", absent);
    }

    // The leaf has content in its north-west corner (blocks 0..16 of 32).
    let leaf = PngCodec.read(&rotation_dir.join("4.png")).unwrap();
    assert_ne!(rgba_alpha(leaf.get(0, 0)), 0);
    assert_ne!(rgba_alpha(leaf.get(63, 63)), 0);
    assert_eq!(rgba_alpha(leaf.get(64, 64)), 0);

    // And the base shows it stacked into the SE quadrant.
    let base = PngCodec.read(&rotation_dir.join("base.png")).unwrap();
    let s = base.width() as i32;
    assert_ne!(rgba_alpha(base.get(s / 2, s / 2)), 0);
    assert_eq!(rgba_alpha(base.get(0, 0)), 0);

    let meta = WebMeta::read(out_dir.path()).unwrap();
    assert_eq!(meta.map("surface").unwrap().max_zoom, 1);
    assert_eq!(meta.map("surface").unwrap().tile_size, 128);
}

#[test]
fn test_rerun_with_unchanged_world_writes_nothing() {
    let world_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    write_world(world_dir.path(), &[(ChunkPos::new(0, 0), 1000)]);

    let config = config_for(world_dir.path(), out_dir.path());
    assert!(run(&config));

    let leaf = out_dir.path().join("surface/tl/4.png");
    let base = out_dir.path().join("surface/tl/base.png");
    let leaf_before = mtime(&leaf);
    let base_before = mtime(&base);

    assert!(run(&config));
    assert_eq!(mtime(&leaf), leaf_before, "leaf must not be rewritten");
    assert_eq!(mtime(&base), base_before, "base must not be rewritten");

    // The metadata still advanced.
    let meta = WebMeta::read(out_dir.path()).unwrap();
    assert_ne!(meta.map("surface").unwrap().last_rendered(Rotation::TopLeft), 0);
}

#[test]
fn test_touched_chunk_rerenders_its_tile() {
    let world_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    // Two chunks in different leaf tiles.
    write_world(
        world_dir.path(),
        &[(ChunkPos::new(0, 0), 1000), (ChunkPos::new(-3, -3), 1000)],
    );

    let config = config_for(world_dir.path(), out_dir.path());
    assert!(run(&config));

    let rotation_dir = out_dir.path().join("surface/tl");
    let touched_leaf = rotation_dir.join("4/1.png");
    let untouched_leaf = rotation_dir.join("1/1.png");
    assert!(touched_leaf.is_file());
    assert!(untouched_leaf.is_file());
    let touched_before = mtime(&touched_leaf);
    let untouched_before = mtime(&untouched_leaf);
    let base_before = mtime(&rotation_dir.join("base.png"));

    // Bump the chunk at the origin past the stored render time. The two
    // chunks live in different region files, so rewriting this one leaves
    // the other region untouched.
    let future = future_timestamp();
    write_world(world_dir.path(), &[(ChunkPos::new(0, 0), future)]);

    assert!(run(&config));
    assert_ne!(mtime(&touched_leaf), touched_before, "touched tile re-renders");
    assert_ne!(
        mtime(&rotation_dir.join("base.png")),
        base_before,
        "composite ancestors re-render"
    );
    assert_eq!(
        mtime(&untouched_leaf),
        untouched_before,
        "other tiles stay untouched"
    );
}

#[test]
fn test_growing_world_promotes_the_tree() {
    let world_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    write_world(world_dir.path(), &[(ChunkPos::new(0, 0), 1000)]);

    let config = config_for(world_dir.path(), out_dir.path());
    assert!(run(&config));
    let rotation_dir = out_dir.path().join("surface/tl");
    assert!(rotation_dir.join("4.png").is_file());
    assert_eq!(WebMeta::read(out_dir.path()).unwrap().map("surface").unwrap().max_zoom, 1);

    // A new far-away chunk forces depth 3: tile (2, 2) needs a radius of 4.
    // Its timestamp is fresh, as a newly generated chunk's would be.
    write_world(
        world_dir.path(),
        &[(ChunkPos::new(0, 0), 1000), (ChunkPos::new(4, 4), future_timestamp())],
    );
    assert!(run(&config));

    // The old depth-1 leaf was pushed down twice: 4.png -> 4/1.png ->
    // 4/1/1.png, which is exactly the depth-3 address of tile (0, 0).
    assert!(rotation_dir.join("4/1/1.png").is_file());
    // The new chunk renders at its own depth-3 leaf, tile (2, 2).
    assert!(rotation_dir.join("4/4/1.png").is_file());
    assert!(rotation_dir.join("base.png").is_file());
    assert_eq!(WebMeta::read(out_dir.path()).unwrap().map("surface").unwrap().max_zoom, 3);
}

#[test]
fn test_rotations_share_one_depth() {
    let world_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    write_world(world_dir.path(), &[(ChunkPos::new(0, 0), 1000), (ChunkPos::new(4, 4), 1000)]);

    let config = Config::parse(&format!(
        r#"
        output_dir = "{}"

        [world.main]
        input_dir = "{}"

        [map.surface]
        world = "main"
        render_view = "topdown"
        texture_size = 4
        rotations = ["top-left", "top-right"]
        "#,
        out_dir.path().display(),
        world_dir.path().display(),
    ))
    .unwrap();
    assert!(run(&config));

    // Rotating moves the chunks to other quadrants, but both rotations use
    // the unified depth.
    let meta = WebMeta::read(out_dir.path()).unwrap();
    assert_eq!(meta.map("surface").unwrap().max_zoom, 3);
    assert!(out_dir.path().join("surface/tl/base.png").is_file());
    assert!(out_dir.path().join("surface/tr/base.png").is_file());
    assert_ne!(meta.map("surface").unwrap().last_rendered(Rotation::TopRight), 0);
}

#[test]
fn test_isometric_map_renders() {
    let world_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    write_world(world_dir.path(), &[(ChunkPos::new(0, 0), 1000)]);

    let config = Config::parse(&format!(
        r#"
        output_dir = "{}"

        [world.main]
        input_dir = "{}"

        [map.iso]
        world = "main"
        texture_size = 4
        "#,
        out_dir.path().display(),
        world_dir.path().display(),
    ))
    .unwrap();
    assert!(run(&config));

    let rotation_dir = out_dir.path().join("iso/tl");
    let base = PngCodec.read(&rotation_dir.join("base.png")).unwrap();
    assert!(
        !base.is_transparent(),
        "isometric base must show the stone slab"
    );
}
