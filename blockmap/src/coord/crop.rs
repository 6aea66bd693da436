//! Optional world boundaries applied while rendering.

use super::{BlockPos, ChunkPos, RegionPos, CHUNK_BLOCKS, REGION_CHUNKS};

/// Crops the world to a rectangular or circular area.
///
/// The horizontal and vertical checks are independent so callers can apply
/// only the one they need. Bounds are inclusive; an unset bound never
/// excludes anything, so widening a crop keeps every block it contained.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorldCrop {
    pub min_x: Option<i32>,
    pub max_x: Option<i32>,
    pub min_z: Option<i32>,
    pub max_z: Option<i32>,
    pub min_y: Option<i32>,
    pub max_y: Option<i32>,
    /// Center and radius of a circular xz crop, in blocks.
    pub circle: Option<(BlockPos, i32)>,
}

impl WorldCrop {
    pub fn is_unbounded(&self) -> bool {
        *self == WorldCrop::default()
    }

    /// Whether rendered tiles should be centered on the cropped area.
    ///
    /// Centering only makes sense when the crop pins the map to a finite
    /// area: a circular crop, or bounds on both horizontal axes.
    pub fn needs_centering(&self) -> bool {
        self.circle.is_some()
            || (self.min_x.is_some()
                && self.max_x.is_some()
                && self.min_z.is_some()
                && self.max_z.is_some())
    }

    pub fn is_block_contained_xz(&self, pos: BlockPos) -> bool {
        if let Some((center, radius)) = self.circle {
            let dx = (pos.x - center.x) as i64;
            let dz = (pos.z - center.z) as i64;
            if dx * dx + dz * dz > (radius as i64) * (radius as i64) {
                return false;
            }
        }
        self.min_x.is_none_or(|min| pos.x >= min)
            && self.max_x.is_none_or(|max| pos.x <= max)
            && self.min_z.is_none_or(|min| pos.z >= min)
            && self.max_z.is_none_or(|max| pos.z <= max)
    }

    pub fn is_block_contained_y(&self, pos: BlockPos) -> bool {
        self.min_y.is_none_or(|min| pos.y >= min) && self.max_y.is_none_or(|max| pos.y <= max)
    }

    /// Whether any block of the chunk can lie inside the xz crop.
    ///
    /// Conservative: may keep a chunk whose blocks are all outside a circular
    /// crop corner, which the per-block check then rejects.
    pub fn is_chunk_contained(&self, chunk: ChunkPos) -> bool {
        let min = BlockPos::new(chunk.block_x(), chunk.block_z(), 0);
        let max = BlockPos::new(
            chunk.block_x() + CHUNK_BLOCKS - 1,
            chunk.block_z() + CHUNK_BLOCKS - 1,
            0,
        );
        self.is_area_contained(min, max)
    }

    /// Whether any chunk of the region can lie inside the xz crop.
    pub fn is_region_contained(&self, region: RegionPos) -> bool {
        let blocks = REGION_CHUNKS * CHUNK_BLOCKS;
        let min = BlockPos::new(region.x * blocks, region.z * blocks, 0);
        let max = BlockPos::new(min.x + blocks - 1, min.z + blocks - 1, 0);
        self.is_area_contained(min, max)
    }

    fn is_area_contained(&self, min: BlockPos, max: BlockPos) -> bool {
        if self.min_x.is_some_and(|b| max.x < b)
            || self.max_x.is_some_and(|b| min.x > b)
            || self.min_z.is_some_and(|b| max.z < b)
            || self.max_z.is_some_and(|b| min.z > b)
        {
            return false;
        }
        if let Some((center, radius)) = self.circle {
            // Distance from the circle center to the closest point of the area.
            let dx = (center.x.clamp(min.x, max.x) - center.x) as i64;
            let dz = (center.z.clamp(min.z, max.z) - center.z) as i64;
            if dx * dx + dz * dz > (radius as i64) * (radius as i64) {
                return false;
            }
        }
        true
    }
}
