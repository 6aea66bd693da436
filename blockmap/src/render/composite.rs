//! Builds composite tiles from their four children.
//!
//! A composite at level `k` is the 2x downscale of its children at `k+1`,
//! stitched in quadrant order NW, NE, SW, SE. Missing children are treated
//! as fully transparent.

use crate::image::Pixmap;

/// Assembles a parent tile from up to four child images.
///
/// Children are indexed `0..4` for quadrants NW, NE, SW, SE (the quad-tree
/// digits 1..4). Every present child must be `tile_size` square.
pub fn build_composite(children: &[Option<Pixmap>; 4], tile_size: u32) -> Pixmap {
    let s = tile_size as i32;
    let mut canvas = Pixmap::new(tile_size * 2, tile_size * 2);
    let quadrants = [(0, 0), (s, 0), (0, s), (s, s)];
    for (child, (x, y)) in children.iter().zip(quadrants) {
        if let Some(image) = child {
            canvas.simple_blit(image, x, y);
        }
    }
    canvas.resize_half()
}

/// Re-parents an old top-level composite one zoom level deeper: the old
/// image, downscaled, lands in the quadrant opposite to its own digit.
/// Used when the tile tree grows.
pub fn demoted_composite(old: &Pixmap, quadrant: usize, tile_size: u32) -> Pixmap {
    let s = (tile_size / 2) as i32;
    let half = old.resize_half();
    let mut out = Pixmap::new(tile_size, tile_size);
    let at = match quadrant {
        // Digit 1 (NW) keeps its content toward the center: SE corner.
        0 => (s, s),
        1 => (0, s),
        2 => (s, 0),
        _ => (0, 0),
    };
    out.simple_blit(&half, at.0, at.1);
    out
}
