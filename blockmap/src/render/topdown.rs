//! The top-down view: one block column per `t x t` cell, shaded by height.

use std::sync::Arc;

use crate::coord::{BlockPos, TilePos, CHUNK_TOP_Y};
use crate::image::{rgba, rgba_multiply, Pixmap, RgbaPixel};
use crate::sprite::{biome, SpriteCache};
use crate::world::World;

use super::{TileRenderer, TILE_COLUMNS};

pub(crate) struct TopDownTileRenderer {
    world: World,
    sprites: Arc<SpriteCache>,
}

impl TopDownTileRenderer {
    pub(crate) fn new(world: World, sprites: Arc<SpriteCache>) -> TopDownTileRenderer {
        TopDownTileRenderer { world, sprites }
    }

    /// Combined biome and height tint for one block.
    fn tint_for(&self, pos: BlockPos, biome_tinted: bool, emits_light: bool) -> RgbaPixel {
        let base = if biome_tinted {
            biome::biome_tint(self.world.get_biome(pos))
        } else {
            rgba(255, 255, 255, 255)
        };
        if emits_light {
            return base;
        }
        // Deep columns fade toward half brightness.
        let shade = 128 + (127 * pos.y.clamp(0, CHUNK_TOP_Y) / CHUNK_TOP_Y) as u8;
        rgba_multiply(base, shade, shade, shade, 255)
    }
}

impl TileRenderer for TopDownTileRenderer {
    fn tile_size(&self) -> u32 {
        TILE_COLUMNS as u32 * self.sprites.texture_size()
    }

    fn render_tile(&mut self, pos: TilePos, tile: &mut Pixmap) {
        tile.clear();
        let t = self.sprites.texture_size() as i32;
        let x0 = pos.x * TILE_COLUMNS;
        let z0 = pos.y * TILE_COLUMNS;

        for z in z0..z0 + TILE_COLUMNS {
            for x in x0..x0 + TILE_COLUMNS {
                let Some(top) = self.world.top_non_air(x, z) else {
                    continue;
                };

                // Collect the visible stack: walk down through translucent
                // blocks until something opaque closes the column.
                let mut stack: Vec<(u16, BlockPos)> = Vec::new();
                for y in (0..=top).rev() {
                    let block_pos = BlockPos::new(x, z, y);
                    let id = self.world.get_block_render(block_pos);
                    let info = self.sprites.info(id);
                    if info.empty {
                        continue;
                    }
                    stack.push((id, block_pos));
                    if info.opaque {
                        break;
                    }
                }

                // Draw bottom-up so translucent layers composite correctly.
                for (id, block_pos) in stack.iter().rev() {
                    let info = self.sprites.info(*id);
                    let sprite = self.sprites.sprite(*id, 0);
                    let tint = self.tint_for(*block_pos, info.biome_tinted, info.emits_light);
                    tile.alpha_blit_tinted(sprite, (x - x0) * t, (z - z0) * t, tint);
                }
            }
        }
    }
}
