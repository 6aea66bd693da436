//! The isometric view.
//!
//! Screen mapping, in texture units `t`: a block at `(x, z, y)` projects to
//! the diagonal column `c = x + z` (each column is `t` pixels wide) and the
//! screen row `r = (z - x) - 2y` (each row is `t/2` pixels tall). Stepping a
//! block by `(x+1, z-1, y-1)` leaves both invariant, so that step walks the
//! view ray behind a block: the tile is rendered by walking every ray that
//! crosses it from the top of the world downwards and painting the collected
//! blocks back to front.

use std::sync::Arc;

use crate::coord::{BlockPos, TilePos, CHUNK_TOP_Y};
use crate::image::{Pixmap, RgbaPixel};
use crate::sprite::{biome, SpriteCache, SpriteInfo, FACE_LEFT, FACE_RIGHT, FACE_TOP};
use crate::world::World;

use super::{TileRenderer, TILE_COLUMNS};

/// Iterates the view rays of one tile, yielding the top block of each ray and
/// its fixed draw position on the tile image.
pub(crate) struct TileTopBlockIterator {
    texture_size: i32,
    tile_col: i32,
    tile_row: i32,
    col: i32,
    row: i32,
    col_end: i32,
    row_end: i32,
}

impl TileTopBlockIterator {
    pub(crate) fn new(tile: TilePos, texture_size: i32) -> TileTopBlockIterator {
        let tile_col = tile.x * TILE_COLUMNS;
        let tile_row = tile.y * 2 * TILE_COLUMNS;
        // Sprites are two columns wide and four rows tall, so rays from just
        // outside the tile edge still draw into it.
        let col_start = tile_col - 1;
        let row_start = tile_row;
        let mut it = TileTopBlockIterator {
            texture_size,
            tile_col,
            tile_row,
            col: col_start,
            row: row_start,
            col_end: tile_col + TILE_COLUMNS - 1,
            row_end: tile_row + 2 * TILE_COLUMNS + 2,
        };
        it.align_parity();
        it
    }

    /// Column and row must share parity to name a block ray.
    fn align_parity(&mut self) {
        if (self.col + self.row).rem_euclid(2) != 0 {
            self.col += 1;
        }
    }
}

impl Iterator for TileTopBlockIterator {
    type Item = (BlockPos, i32, i32);

    fn next(&mut self) -> Option<Self::Item> {
        if self.col > self.col_end {
            self.row += 1;
            if self.row > self.row_end {
                return None;
            }
            self.col = self.tile_col - 1;
            self.align_parity();
        }
        let (col, row) = (self.col, self.row);
        self.col += 2;

        // Solve c = x + z, r = (z - x) - 2y for the ray's top block.
        let top_offset = row + 2 * CHUNK_TOP_Y;
        let top = BlockPos::new(
            (col - top_offset) / 2,
            (col + top_offset) / 2,
            CHUNK_TOP_Y,
        );
        let t = self.texture_size;
        let draw_x = (col - self.tile_col) * t;
        let draw_y = (row - 3 - self.tile_row) * t / 2;
        Some((top, draw_x, draw_y))
    }
}

/// Walks the blocks behind a top block: each step is `(x+1, z-1, y-1)`.
pub(crate) struct BlockRowIterator {
    current: BlockPos,
}

impl BlockRowIterator {
    pub(crate) fn new(top: BlockPos) -> BlockRowIterator {
        BlockRowIterator { current: top }
    }
}

impl Iterator for BlockRowIterator {
    type Item = BlockPos;

    fn next(&mut self) -> Option<BlockPos> {
        if self.current.y < 0 {
            return None;
        }
        let pos = self.current;
        self.current = pos.offset(1, -1, -1);
        Some(pos)
    }
}

/// A block scheduled for drawing on the current tile.
struct RenderBlock {
    x: i32,
    y: i32,
    transparent: bool,
    pos: BlockPos,
    id: u16,
    faces: u8,
    tint: Option<RgbaPixel>,
}

pub(crate) struct IsometricTileRenderer {
    world: World,
    sprites: Arc<SpriteCache>,
}

impl IsometricTileRenderer {
    pub(crate) fn new(world: World, sprites: Arc<SpriteCache>) -> IsometricTileRenderer {
        IsometricTileRenderer { world, sprites }
    }

    fn visible_faces(&self, pos: BlockPos, info: &SpriteInfo) -> u8 {
        // A liquid surface only ever shows its top.
        if info.liquid {
            return FACE_TOP;
        }
        let mut faces = 0;
        if !self.neighbor_opaque(pos.offset(0, 0, 1)) {
            faces |= FACE_TOP;
        }
        if !self.neighbor_opaque(pos.offset(-1, 0, 0)) {
            faces |= FACE_LEFT;
        }
        if !self.neighbor_opaque(pos.offset(0, 1, 0)) {
            faces |= FACE_RIGHT;
        }
        faces
    }

    fn neighbor_opaque(&self, pos: BlockPos) -> bool {
        self.sprites.is_opaque(self.world.get_block_render(pos))
    }
}

impl TileRenderer for IsometricTileRenderer {
    fn tile_size(&self) -> u32 {
        TILE_COLUMNS as u32 * self.sprites.texture_size()
    }

    fn render_tile(&mut self, pos: TilePos, tile: &mut Pixmap) {
        tile.clear();
        let mut blocks: Vec<RenderBlock> = Vec::new();

        for (top, draw_x, draw_y) in TileTopBlockIterator::new(pos, self.sprites.texture_size() as i32) {
            for block_pos in BlockRowIterator::new(top) {
                let id = self.world.get_block_render(block_pos);
                let info = self.sprites.info(id);
                if info.empty {
                    continue;
                }
                if info.liquid && self.world.get_block_render(block_pos.offset(0, 0, 1)) == id {
                    // Interior liquid, fully covered by its own kind.
                    continue;
                }

                let faces = self.visible_faces(block_pos, &info);
                if faces != 0 {
                    let tint = info
                        .biome_tinted
                        .then(|| biome::biome_tint(self.world.get_biome(block_pos)));
                    blocks.push(RenderBlock {
                        x: draw_x,
                        y: draw_y,
                        transparent: !info.opaque,
                        pos: block_pos,
                        id,
                        faces,
                        tint,
                    });
                }
                if info.opaque {
                    // Everything deeper on this ray is occluded.
                    break;
                }
            }
        }

        // Back to front, stable on (y, x+z).
        blocks.sort_by(|a, b| a.pos.cmp(&b.pos));

        for block in &blocks {
            let sprite = self.sprites.sprite(block.id, block.faces);
            match (block.tint, block.transparent) {
                (Some(tint), _) => tile.alpha_blit_tinted(sprite, block.x, block.y, tint),
                (None, true) => tile.alpha_blit(sprite, block.x, block.y),
                (None, false) => tile.simple_blit(sprite, block.x, block.y),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_iterator_steps_into_the_scene() {
        let mut rows = BlockRowIterator::new(BlockPos::new(0, 10, 2));
        assert_eq!(rows.next(), Some(BlockPos::new(0, 10, 2)));
        assert_eq!(rows.next(), Some(BlockPos::new(1, 9, 1)));
        assert_eq!(rows.next(), Some(BlockPos::new(2, 8, 0)));
        assert_eq!(rows.next(), None);
    }

    #[test]
    fn test_top_iterator_covers_the_tile() {
        let t = 4;
        let mut count = 0;
        for (top, draw_x, draw_y) in TileTopBlockIterator::new(TilePos::new(0, 0), t) {
            count += 1;
            assert_eq!(top.y, CHUNK_TOP_Y);
            // Draw positions reach at most one sprite beyond the tile edge.
            assert!(draw_x >= -2 * t && draw_x < TILE_COLUMNS * t);
            assert!(draw_y >= -2 * t && draw_y < 2 * TILE_COLUMNS * t / 2 + 2 * t);
        }
        // Columns run -1..=31 (17 odd, 16 even), rows 0..=66 (34 even, 33
        // odd); only matching parities name a ray.
        assert_eq!(count, 34 * 16 + 33 * 17);
    }

    #[test]
    fn test_ray_projection_is_invariant_under_row_steps() {
        for (top, _, _) in TileTopBlockIterator::new(TilePos::new(-1, 2), 4).take(8) {
            let col = top.x + top.z;
            let row = (top.z - top.x) - 2 * top.y;
            for pos in BlockRowIterator::new(top).take(16) {
                assert_eq!(pos.x + pos.z, col);
                assert_eq!((pos.z - pos.x) - 2 * pos.y, row);
            }
        }
    }
}
