//! Projections from voxel space onto tile images.
//!
//! Three views share the tile-to-world contract: the isometric view draws
//! cubes on a diamond grid, the top-down view maps blocks linearly, and the
//! side view stacks columns with a half-block vertical step. Each view knows
//! which tiles a chunk can reach (for the scan) and how to render one leaf
//! tile (for the workers).

pub mod composite;
mod isometric;
mod side;
mod topdown;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::coord::{ChunkPos, TilePos, CHUNK_BLOCKS, CHUNK_TOP_Y};
use crate::image::Pixmap;
use crate::sprite::SpriteCache;
use crate::world::World;

/// Block columns (or diagonal columns) per tile edge.
pub const TILE_COLUMNS: i32 = 32;

/// Renders leaf tiles for one view.
///
/// Implementations own their world view (with its chunk cache), so one
/// renderer belongs to exactly one worker.
pub trait TileRenderer: Send {
    /// Tile edge length in pixels.
    fn tile_size(&self) -> u32;

    /// Renders the tile at `pos` (projection frame, before centering) into a
    /// cleared `tile_size x tile_size` image.
    fn render_tile(&mut self, pos: TilePos, tile: &mut Pixmap);
}

/// The projection of a map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderView {
    #[default]
    Isometric,
    TopDown,
    Side,
}

impl RenderView {
    pub fn parse(name: &str) -> Option<RenderView> {
        match name {
            "isometric" => Some(RenderView::Isometric),
            "topdown" => Some(RenderView::TopDown),
            "side" => Some(RenderView::Side),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RenderView::Isometric => "isometric",
            RenderView::TopDown => "topdown",
            RenderView::Side => "side",
        }
    }

    /// Tile edge length in pixels for a texture size.
    pub fn tile_size(self, texture_size: u32) -> u32 {
        TILE_COLUMNS as u32 * texture_size
    }

    /// Appends every tile position whose image can contain blocks of the
    /// chunk, in the projection frame. Conservative over the full world
    /// height: the scan only sees chunk headers, not contents.
    pub fn chunk_tiles(self, chunk: ChunkPos, out: &mut Vec<TilePos>) {
        let x0 = chunk.block_x();
        let z0 = chunk.block_z();
        let x1 = x0 + CHUNK_BLOCKS - 1;
        let z1 = z0 + CHUNK_BLOCKS - 1;

        match self {
            RenderView::Isometric => {
                // Diagonal columns c = x + z; sprites reach two columns right.
                let c_min = x0 + z0;
                let c_max = x1 + z1;
                // Screen rows r = (z - x) - 2y in half-texture units; sprites
                // span [r - 3, r + 1).
                let r_min = (z0 - x1) - 2 * CHUNK_TOP_Y;
                let r_max = z1 - x0;
                push_tile_range(
                    out,
                    c_min.div_euclid(TILE_COLUMNS),
                    (c_max + 1).div_euclid(TILE_COLUMNS),
                    (r_min - 3).div_euclid(2 * TILE_COLUMNS),
                    r_max.div_euclid(2 * TILE_COLUMNS),
                );
            }
            RenderView::TopDown => {
                push_tile_range(
                    out,
                    x0.div_euclid(TILE_COLUMNS),
                    x1.div_euclid(TILE_COLUMNS),
                    z0.div_euclid(TILE_COLUMNS),
                    z1.div_euclid(TILE_COLUMNS),
                );
            }
            RenderView::Side => {
                // Screen rows r = z + (top_y - y); sprites span [r, r + 2).
                let r_min = z0;
                let r_max = z1 + CHUNK_TOP_Y;
                push_tile_range(
                    out,
                    x0.div_euclid(TILE_COLUMNS),
                    x1.div_euclid(TILE_COLUMNS),
                    r_min.div_euclid(2 * TILE_COLUMNS),
                    (r_max + 1).div_euclid(2 * TILE_COLUMNS),
                );
            }
        }
    }

    /// Builds the renderer for this view. The world becomes the renderer's
    /// private view; fork it per worker before calling this.
    pub fn create_renderer(
        self,
        world: World,
        sprites: Arc<SpriteCache>,
    ) -> Box<dyn TileRenderer> {
        match self {
            RenderView::Isometric => Box::new(isometric::IsometricTileRenderer::new(world, sprites)),
            RenderView::TopDown => Box::new(topdown::TopDownTileRenderer::new(world, sprites)),
            RenderView::Side => Box::new(side::SideTileRenderer::new(world, sprites)),
        }
    }
}

impl fmt::Display for RenderView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn push_tile_range(out: &mut Vec<TilePos>, tx_min: i32, tx_max: i32, ty_min: i32, ty_max: i32) {
    for ty in ty_min..=ty_max {
        for tx in tx_min..=tx_max {
            out.push(TilePos::new(tx, ty));
        }
    }
}
