//! Coordinate algebra for worlds and tiles.
//!
//! Provides the position types used throughout the renderer (region, chunk,
//! block and tile positions) together with the four cardinal world rotations.
//! All grid granularities share one rotation rule, so rotating a block and
//! then taking its chunk gives the same result as rotating the chunk.

mod crop;

pub use crop::WorldCrop;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Chunks along one edge of a region.
pub const REGION_CHUNKS: i32 = 32;

/// Blocks along one horizontal edge of a chunk.
pub const CHUNK_BLOCKS: i32 = 16;

/// World height in blocks.
pub const CHUNK_HEIGHT: i32 = 256;

/// Highest valid block y coordinate.
pub const CHUNK_TOP_Y: i32 = CHUNK_HEIGHT - 1;

/// Rotates a cell coordinate one quarter turn.
///
/// Cells occupy `[x, x+1) x [z, z+1)`, which is where the `-1` comes from:
/// the cell at `(0, 0)` maps to `(-1, 0)`, not `(0, 0)`. The same rule works
/// for blocks, chunks and regions, keeping the granularities consistent.
#[inline]
fn rotate_cell(x: i32, z: i32) -> (i32, i32) {
    (-z - 1, x)
}

#[inline]
fn rotate_cell_by(mut x: i32, mut z: i32, steps: u8) -> (i32, i32) {
    for _ in 0..(steps % 4) {
        let (nx, nz) = rotate_cell(x, z);
        x = nx;
        z = nz;
    }
    (x, z)
}

/// One of the four cardinal rotations of the world about the vertical axis.
///
/// The names describe which world corner ends up in the top-left corner of
/// the rendered map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    TopLeft = 0,
    TopRight = 1,
    BottomRight = 2,
    BottomLeft = 3,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::TopLeft,
        Rotation::TopRight,
        Rotation::BottomRight,
        Rotation::BottomLeft,
    ];

    /// Number of quarter turns this rotation applies.
    pub fn steps(self) -> u8 {
        self as u8
    }

    pub fn from_steps(steps: u8) -> Rotation {
        Self::ALL[(steps % 4) as usize]
    }

    /// The rotation that undoes this one.
    pub fn inverse(self) -> Rotation {
        Self::from_steps((4 - self.steps()) % 4)
    }

    /// Parses a rotation from its long or short name.
    pub fn parse(name: &str) -> Option<Rotation> {
        match name {
            "top-left" | "tl" => Some(Rotation::TopLeft),
            "top-right" | "tr" => Some(Rotation::TopRight),
            "bottom-right" | "br" => Some(Rotation::BottomRight),
            "bottom-left" | "bl" => Some(Rotation::BottomLeft),
            _ => None,
        }
    }

    /// Short directory-safe name (`tl`, `tr`, `br`, `bl`).
    pub fn short_name(self) -> &'static str {
        match self {
            Rotation::TopLeft => "tl",
            Rotation::TopRight => "tr",
            Rotation::BottomRight => "br",
            Rotation::BottomLeft => "bl",
        }
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rotation::TopLeft => "top-left",
            Rotation::TopRight => "top-right",
            Rotation::BottomRight => "bottom-right",
            Rotation::BottomLeft => "bottom-left",
        };
        write!(f, "{}", name)
    }
}

/// Position of a region file in the region grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> RegionPos {
        RegionPos { x, z }
    }

    pub fn rotated(self, rotation: Rotation) -> RegionPos {
        let (x, z) = rotate_cell_by(self.x, self.z, rotation.steps());
        RegionPos { x, z }
    }

    /// Region file name in the conventional `r.X.Z.mca` form.
    pub fn filename(self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }

    /// Parses a region position out of an `r.X.Z.mca` file name.
    pub fn from_filename(filename: &str) -> Option<RegionPos> {
        let rest = filename.strip_prefix("r.")?.strip_suffix(".mca")?;
        let (raw_x, raw_z) = rest.split_once('.')?;
        Some(RegionPos {
            x: raw_x.parse().ok()?,
            z: raw_z.parse().ok()?,
        })
    }
}

impl fmt::Display for RegionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r.{}.{}", self.x, self.z)
    }
}

/// Position of a chunk in the global chunk grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> ChunkPos {
        ChunkPos { x, z }
    }

    /// The region this chunk lives in.
    pub fn region(self) -> RegionPos {
        RegionPos {
            x: self.x.div_euclid(REGION_CHUNKS),
            z: self.z.div_euclid(REGION_CHUNKS),
        }
    }

    /// Local coordinates within the region, both in `0..32`.
    pub fn region_local(self) -> (i32, i32) {
        (
            self.x.rem_euclid(REGION_CHUNKS),
            self.z.rem_euclid(REGION_CHUNKS),
        )
    }

    pub fn rotated(self, rotation: Rotation) -> ChunkPos {
        let (x, z) = rotate_cell_by(self.x, self.z, rotation.steps());
        ChunkPos { x, z }
    }

    /// World x coordinate of the chunk's west edge.
    pub fn block_x(self) -> i32 {
        self.x * CHUNK_BLOCKS
    }

    /// World z coordinate of the chunk's north edge.
    pub fn block_z(self) -> i32 {
        self.z * CHUNK_BLOCKS
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Position of a single block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub z: i32,
    pub y: i32,
}

impl BlockPos {
    pub fn new(x: i32, z: i32, y: i32) -> BlockPos {
        BlockPos { x, z, y }
    }

    /// The chunk containing this block.
    pub fn chunk(self) -> ChunkPos {
        ChunkPos {
            x: self.x.div_euclid(CHUNK_BLOCKS),
            z: self.z.div_euclid(CHUNK_BLOCKS),
        }
    }

    /// Local coordinates within the chunk, both horizontal values in `0..16`.
    pub fn chunk_local(self) -> (i32, i32) {
        (
            self.x.rem_euclid(CHUNK_BLOCKS),
            self.z.rem_euclid(CHUNK_BLOCKS),
        )
    }

    /// Rotates the horizontal position; y is unaffected.
    pub fn rotated(self, rotation: Rotation) -> BlockPos {
        let (x, z) = rotate_cell_by(self.x, self.z, rotation.steps());
        BlockPos { x, z, y: self.y }
    }

    pub fn offset(self, dx: i32, dz: i32, dy: i32) -> BlockPos {
        BlockPos {
            x: self.x + dx,
            z: self.z + dz,
            y: self.y + dy,
        }
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.z, self.y)
    }
}

/// Draw ordering along the view normal: lower blocks first, then by the
/// south-east diagonal. Adjacent opaque blocks keep a stable order so tiles
/// render deterministically.
impl Ord for BlockPos {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.y, self.x + self.z, self.x).cmp(&(other.y, other.x + other.z, other.x))
    }
}

impl PartialOrd for BlockPos {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Position of a tile in the tile grid of one zoom level.
///
/// Tile positions are centered around the map origin while scanning and are
/// translated into the `[0, 2^depth)` range by the quad-tree path encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub fn new(x: i32, y: i32) -> TilePos {
        TilePos { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> TilePos {
        TilePos {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl fmt::Display for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}
