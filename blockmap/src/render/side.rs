//! The side view: columns drawn south-to-front with a half-block vertical
//! step, so block fronts and tops both stay visible.
//!
//! Screen mapping in texture units: `px = x * t`, and a screen row
//! `r = z + (top_y - y)` that is `t/2` pixels tall. Sprites are one block
//! tall (two rows), so consecutive blocks of a column overlap halfway.

use std::sync::Arc;

use crate::coord::{BlockPos, TilePos, CHUNK_TOP_Y};
use crate::image::Pixmap;
use crate::sprite::{biome, SpriteCache};
use crate::world::World;

use super::{TileRenderer, TILE_COLUMNS};

pub(crate) struct SideTileRenderer {
    world: World,
    sprites: Arc<SpriteCache>,
}

impl SideTileRenderer {
    pub(crate) fn new(world: World, sprites: Arc<SpriteCache>) -> SideTileRenderer {
        SideTileRenderer { world, sprites }
    }

    /// A block is hidden when both the block in front of it (toward the
    /// camera) and the one above it are opaque.
    fn is_hidden(&self, pos: BlockPos) -> bool {
        let front = self.world.get_block_render(pos.offset(0, 1, 0));
        let above = self.world.get_block_render(pos.offset(0, 0, 1));
        self.sprites.is_opaque(front) && self.sprites.is_opaque(above)
    }
}

impl TileRenderer for SideTileRenderer {
    fn tile_size(&self) -> u32 {
        TILE_COLUMNS as u32 * self.sprites.texture_size()
    }

    fn render_tile(&mut self, pos: TilePos, tile: &mut Pixmap) {
        tile.clear();
        let t = self.sprites.texture_size() as i32;
        let x0 = pos.x * TILE_COLUMNS;
        let row0 = pos.y * 2 * TILE_COLUMNS;
        let rows = 2 * TILE_COLUMNS;

        // Far to near: smaller z first, then bottom-up within a column so
        // upper blocks overdraw the top sliver of the one below.
        let z_min = row0 - CHUNK_TOP_Y - 1;
        let z_max = row0 + rows;
        for z in z_min..=z_max {
            for y in 0..=CHUNK_TOP_Y {
                let r = z + (CHUNK_TOP_Y - y);
                // Sprites cover rows [r, r + 2).
                if r + 2 <= row0 || r >= row0 + rows {
                    continue;
                }
                for x in x0..x0 + TILE_COLUMNS {
                    let block_pos = BlockPos::new(x, z, y);
                    let id = self.world.get_block_render(block_pos);
                    let info = self.sprites.info(id);
                    if info.empty {
                        continue;
                    }
                    if info.liquid
                        && self.world.get_block_render(block_pos.offset(0, 0, 1)) == id
                    {
                        continue;
                    }
                    if self.is_hidden(block_pos) {
                        continue;
                    }
                    let sprite = self.sprites.sprite(id, 0);
                    let draw_x = (x - x0) * t;
                    let draw_y = (r - row0) * t / 2;
                    if info.biome_tinted {
                        let tint = biome::biome_tint(self.world.get_biome(block_pos));
                        tile.alpha_blit_tinted(sprite, draw_x, draw_y, tint);
                    } else if info.opaque {
                        tile.simple_blit(sprite, draw_x, draw_y);
                    } else {
                        tile.alpha_blit(sprite, draw_x, draw_y);
                    }
                }
            }
        }
    }
}
