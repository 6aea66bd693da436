//! A rotated, cropped view of one world dimension.
//!
//! The view owns a bounded cache of decoded chunks and a small cache of open
//! region files. Every public position is in the rotated frame; positions are
//! rotated back to the on-disk frame exactly once, at the top of each lookup.
//! Each render worker forks its own view so the caches are never shared.

pub mod entities;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use moka::sync::Cache;
use thiserror::Error;
use tracing::warn;

use crate::blockstate::{BlockStateRegistry, UNKNOWN_BLOCK_ID};
use crate::coord::{BlockPos, ChunkPos, RegionPos, Rotation, WorldCrop};
use crate::region::{Chunk, RegionFile, RegionError};
use crate::sprite::biome;

/// Decoded chunks kept per view, by default a 3x3 region neighborhood.
pub const DEFAULT_CHUNK_CACHE_CHUNKS: u64 = 9 * 32 * 32;

const REGION_CACHE_REGIONS: u64 = 9;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} has no region directory")]
    NoRegionDir(PathBuf),

    #[error(transparent)]
    Region(#[from] RegionError),
}

/// A world dimension, selecting the region subdirectory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dimension {
    #[default]
    Overworld,
    Nether,
    End,
}

impl Dimension {
    pub fn parse(name: &str) -> Option<Dimension> {
        match name {
            "overworld" => Some(Dimension::Overworld),
            "nether" => Some(Dimension::Nether),
            "end" => Some(Dimension::End),
            _ => None,
        }
    }

    pub fn region_dir(self, world_dir: &Path) -> PathBuf {
        match self {
            Dimension::Overworld => world_dir.join("region"),
            Dimension::Nether => world_dir.join("DIM-1").join("region"),
            Dimension::End => world_dir.join("DIM1").join("region"),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Overworld => "overworld",
            Dimension::Nether => "nether",
            Dimension::End => "end",
        };
        write!(f, "{}", name)
    }
}

/// One chunk slot of the cache. Broken chunks are remembered so their
/// blocks render as the unknown block and the error is logged only once.
#[derive(Clone)]
enum CachedChunk {
    Missing,
    Broken,
    Loaded(Arc<Chunk>),
}

/// Read access to the blocks of one world, under a rotation and crop.
pub struct World {
    region_dir: PathBuf,
    rotation: Rotation,
    crop: WorldCrop,
    registry: Arc<BlockStateRegistry>,
    /// Regions that exist and intersect the crop, in the rotated frame.
    regions: BTreeSet<RegionPos>,
    region_cache: Cache<RegionPos, Arc<RegionFile>>,
    chunk_cache: Cache<ChunkPos, CachedChunk>,
    chunk_cache_capacity: u64,
}

impl World {
    /// Opens a world: scans the region directory once and caches the listing.
    pub fn open(
        world_dir: &Path,
        dimension: Dimension,
        rotation: Rotation,
        crop: WorldCrop,
        registry: Arc<BlockStateRegistry>,
        chunk_cache_capacity: u64,
    ) -> Result<World, WorldError> {
        let region_dir = dimension.region_dir(world_dir);
        if !region_dir.is_dir() {
            return Err(WorldError::NoRegionDir(region_dir));
        }

        let mut regions = BTreeSet::new();
        for entry in std::fs::read_dir(&region_dir)? {
            let entry = entry?;
            let Some(pos) = entry
                .file_name()
                .to_str()
                .and_then(RegionPos::from_filename)
            else {
                continue;
            };
            if crop.is_region_contained(pos) {
                regions.insert(pos.rotated(rotation));
            }
        }

        Ok(World {
            region_dir,
            rotation,
            crop,
            registry,
            regions,
            region_cache: Cache::new(REGION_CACHE_REGIONS),
            chunk_cache: Cache::new(chunk_cache_capacity),
            chunk_cache_capacity,
        })
    }

    /// A new view of the same world with its own, empty caches.
    pub fn fork(&self) -> World {
        self.fork_with_capacity(self.chunk_cache_capacity)
    }

    /// Like [`World::fork`], but with a different chunk cache bound.
    pub fn fork_with_capacity(&self, chunk_cache_capacity: u64) -> World {
        World {
            region_dir: self.region_dir.clone(),
            rotation: self.rotation,
            crop: self.crop.clone(),
            registry: Arc::clone(&self.registry),
            regions: self.regions.clone(),
            region_cache: Cache::new(REGION_CACHE_REGIONS),
            chunk_cache: Cache::new(chunk_cache_capacity),
            chunk_cache_capacity,
        }
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn crop(&self) -> &WorldCrop {
        &self.crop
    }

    pub fn registry(&self) -> &Arc<BlockStateRegistry> {
        &self.registry
    }

    pub fn air_id(&self) -> u16 {
        self.registry.air_id()
    }

    pub fn region_dir(&self) -> &Path {
        &self.region_dir
    }

    /// Regions of this world, in the rotated frame.
    pub fn available_regions(&self) -> &BTreeSet<RegionPos> {
        &self.regions
    }

    /// On-disk path of a region given in the rotated frame.
    pub fn region_path(&self, pos: RegionPos) -> PathBuf {
        self.region_dir
            .join(pos.rotated(self.rotation.inverse()).filename())
    }

    /// Loads (or returns the cached) fully-read region file.
    pub fn get_region(&self, pos: RegionPos) -> Result<Arc<RegionFile>, WorldError> {
        if let Some(region) = self.region_cache.get(&pos) {
            return Ok(region);
        }
        let mut region = RegionFile::new(self.region_path(pos), self.rotation)?;
        region.read()?;
        let region = Arc::new(region);
        self.region_cache.insert(pos, Arc::clone(&region));
        Ok(region)
    }

    /// Reads only the header of a region, uncached. Used by tile scans.
    pub fn region_headers(&self, pos: RegionPos) -> Result<RegionFile, WorldError> {
        let mut region = RegionFile::new(self.region_path(pos), self.rotation)?;
        region.read_only_headers()?;
        Ok(region)
    }

    /// The chunk at a rotated-frame position, if it exists, decodes, and is
    /// fully generated.
    pub fn get_chunk(&self, pos: ChunkPos) -> Option<Arc<Chunk>> {
        match self.cached_chunk(pos) {
            CachedChunk::Loaded(chunk) => Some(chunk),
            _ => None,
        }
    }

    fn cached_chunk(&self, pos: ChunkPos) -> CachedChunk {
        if !self.regions.contains(&pos.region()) {
            return CachedChunk::Missing;
        }
        self.chunk_cache.get_with(pos, || self.load_chunk(pos))
    }

    fn load_chunk(&self, pos: ChunkPos) -> CachedChunk {
        let original = pos.rotated(self.rotation.inverse());
        if !self.crop.is_chunk_contained(original) {
            return CachedChunk::Missing;
        }
        let region = match self.get_region(pos.region()) {
            Ok(region) => region,
            Err(err) => {
                warn!(region = %pos.region(), error = %err, "skipping unreadable region");
                return CachedChunk::Missing;
            }
        };
        if !region.has_chunk(pos) {
            return CachedChunk::Missing;
        }
        match region.load_chunk(pos, &self.registry) {
            Ok(chunk) if chunk.is_fully_generated() => CachedChunk::Loaded(Arc::new(chunk)),
            Ok(_) => CachedChunk::Missing,
            Err(err) => {
                warn!(chunk = %pos, error = %err, "chunk is broken, rendering it as unknown");
                CachedChunk::Broken
            }
        }
    }

    /// Registry id of the block at a rotated-frame position. Positions
    /// outside the crop, the world, or any loaded chunk are air.
    pub fn get_block(&self, pos: BlockPos) -> u16 {
        self.lookup(pos, |chunk, x, z, y| chunk.block_id(x, z, y))
    }

    /// Sprite-key id of the block at a rotated-frame position.
    pub fn get_block_render(&self, pos: BlockPos) -> u16 {
        self.lookup(pos, |chunk, x, z, y| chunk.render_id(x, z, y))
    }

    /// Biome id at a rotated-frame position.
    pub fn get_biome(&self, pos: BlockPos) -> u8 {
        let original = pos.rotated(self.rotation.inverse());
        if !self.crop.is_block_contained_xz(original) {
            return biome::DEFAULT_BIOME;
        }
        let Some(chunk) = self.get_chunk(pos.chunk()) else {
            return biome::DEFAULT_BIOME;
        };
        let (x, z) = original.chunk_local();
        chunk.biome_id(x, z, pos.y)
    }

    fn lookup(&self, pos: BlockPos, read: impl Fn(&Chunk, i32, i32, i32) -> u16) -> u16 {
        let original = pos.rotated(self.rotation.inverse());
        if !self.crop.is_block_contained_xz(original) || !self.crop.is_block_contained_y(original) {
            return self.air_id();
        }
        match self.cached_chunk(pos.chunk()) {
            CachedChunk::Missing => self.air_id(),
            CachedChunk::Broken => UNKNOWN_BLOCK_ID,
            CachedChunk::Loaded(chunk) => {
                let (x, z) = original.chunk_local();
                read(&chunk, x, z, pos.y)
            }
        }
    }

    /// Highest non-air block in the rotated-frame column `(x, z)`, honoring
    /// the y crop.
    pub fn top_non_air(&self, x: i32, z: i32) -> Option<i32> {
        let pos = BlockPos::new(x, z, 0);
        let chunk = self.get_chunk(pos.chunk())?;
        let original = pos.rotated(self.rotation.inverse());
        if !self.crop.is_block_contained_xz(original) {
            return None;
        }
        let (cx, cz) = original.chunk_local();
        let top = chunk.top_non_air(cx, cz)?;
        match (self.crop.min_y, self.crop.max_y) {
            (_, Some(max)) if top > max => {
                // Rescan below the crop ceiling.
                let air = self.air_id();
                (self.crop.min_y.unwrap_or(0)..=max)
                    .rev()
                    .find(|&y| chunk.block_id(cx, cz, y) != air)
            }
            (Some(min), _) if top < min => None,
            _ => Some(top),
        }
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("region_dir", &self.region_dir)
            .field("rotation", &self.rotation)
            .field("regions", &self.regions.len())
            .finish()
    }
}
