//! The tile quad-tree: paths, the scan, and the required set.
//!
//! Level 0 is the single root covering the whole map; level `k` has
//! `2^k x 2^k` nodes. Child digits are 1 = NW, 2 = NE, 3 = SW, 4 = SE, so a
//! leaf is addressed by a `depth`-digit path. Tile positions in the tree
//! frame are centered on the origin: a tree of depth `d` covers positions in
//! `[-2^(d-1), 2^(d-1))` on both axes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};

use crate::coord::TilePos;
use crate::render::RenderView;
use crate::world::World;

/// Address of a node in the quad-tree: a sequence of child digits 1..=4.
/// The empty path is the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TilePath {
    digits: Vec<u8>,
}

impl TilePath {
    pub fn root() -> TilePath {
        TilePath::default()
    }

    pub fn depth(&self) -> u32 {
        self.digits.len() as u32
    }

    pub fn digits(&self) -> &[u8] {
        &self.digits
    }

    pub fn child(&self, digit: u8) -> TilePath {
        debug_assert!((1..=4).contains(&digit));
        let mut digits = self.digits.clone();
        digits.push(digit);
        TilePath { digits }
    }

    pub fn parent(&self) -> Option<TilePath> {
        if self.digits.is_empty() {
            return None;
        }
        Some(TilePath {
            digits: self.digits[..self.digits.len() - 1].to_vec(),
        })
    }

    /// The tile position this path addresses at its own depth.
    pub fn tile_pos(&self) -> TilePos {
        let depth = self.depth();
        let mut x = -(1i32 << (depth.max(1) - 1));
        let mut y = x;
        if depth == 0 {
            return TilePos::new(0, 0);
        }
        for (level, digit) in self.digits.iter().enumerate() {
            let span = 1i32 << (depth as usize - level - 1);
            match digit {
                1 => {}
                2 => x += span,
                3 => y += span,
                4 => {
                    x += span;
                    y += span;
                }
                _ => unreachable!("digits are validated on construction"),
            }
        }
        TilePos::new(x, y)
    }

    /// The path of a tile position at the given depth, or `None` if the
    /// position lies outside the tree.
    pub fn from_tile_pos(pos: TilePos, depth: u32) -> Option<TilePath> {
        let radius = 1i32 << (depth.max(1) - 1);
        if depth == 0 || pos.x < -radius || pos.x >= radius || pos.y < -radius || pos.y >= radius {
            return None;
        }
        let mut digits = Vec::with_capacity(depth as usize);
        let (mut min_x, mut min_y) = (-radius, -radius);
        for level in 0..depth {
            let span = 1i32 << (depth - level - 1);
            let east = pos.x >= min_x + span;
            let south = pos.y >= min_y + span;
            digits.push(match (east, south) {
                (false, false) => 1,
                (true, false) => 2,
                (false, true) => 3,
                (true, true) => 4,
            });
            if east {
                min_x += span;
            }
            if south {
                min_y += span;
            }
        }
        Some(TilePath { digits })
    }

    /// On-disk location of this tile relative to the map rotation root:
    /// `1/4/3.ext`, or `base.ext` for the root.
    pub fn file_path(&self, extension: &str) -> PathBuf {
        if self.digits.is_empty() {
            return PathBuf::from(format!("base.{}", extension));
        }
        let mut path = PathBuf::new();
        for digit in &self.digits[..self.digits.len() - 1] {
            path.push(digit.to_string());
        }
        path.push(format!("{}.{}", self.digits[self.digits.len() - 1], extension));
        path
    }
}

impl fmt::Display for TilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.digits.is_empty() {
            return write!(f, "base");
        }
        let mut first = true;
        for digit in &self.digits {
            if !first {
                write!(f, "/")?;
            }
            write!(f, "{}", digit)?;
            first = false;
        }
        Ok(())
    }
}

/// Identifies the tile geometry a map renders against, without the rotation.
/// All rotations of a group share one tree depth.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileSetGroupId {
    pub world: String,
    pub view: RenderView,
    pub texture_size: u32,
}

/// One concrete tile set: a group plus a rotation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileSetId {
    pub world: String,
    pub view: RenderView,
    pub texture_size: u32,
    pub rotation: crate::coord::Rotation,
}

impl TileSetId {
    /// Reduction to the rotation-independent group.
    pub fn group(&self) -> TileSetGroupId {
        TileSetGroupId {
            world: self.world.clone(),
            view: self.view,
            texture_size: self.texture_size,
        }
    }
}

/// The scanned tile tree of one map/rotation.
#[derive(Clone)]
pub struct TileSet {
    view: RenderView,
    depth: u32,
    min_depth: u32,
    tile_offset: TilePos,
    /// Per inhabited render tile (tree frame), the newest contributing chunk
    /// modification time.
    render_tiles: HashMap<TilePos, u32>,
    required: HashSet<TilePos>,
}

impl TileSet {
    pub fn new(view: RenderView) -> TileSet {
        TileSet {
            view,
            depth: 0,
            min_depth: 0,
            tile_offset: TilePos::new(0, 0),
            render_tiles: HashMap::new(),
            required: HashSet::new(),
        }
    }

    pub fn view(&self) -> RenderView {
        self.view
    }

    /// Height of the tree (the map's max zoom level).
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Offset subtracted from projection-frame tile positions; stored in the
    /// viewer metadata so the map origin matches.
    pub fn tile_offset(&self) -> TilePos {
        self.tile_offset
    }

    /// Grows the tree. Shrinking is not allowed: an existing deeper tree on
    /// disk stays valid, so a smaller depth is ignored.
    pub fn set_depth(&mut self, depth: u32) {
        if depth > self.depth {
            self.depth = depth;
        }
    }

    /// Walks every region of the world and records which render tiles are
    /// inhabited and how fresh their newest contributing chunk is.
    ///
    /// With `center` set the tile grid is translated so the inhabited area
    /// surrounds the origin; the applied offset is kept for the metadata.
    /// Unreadable regions are skipped with a warning, the scan continues.
    pub fn scan(&mut self, world: &World, center: bool) {
        self.render_tiles.clear();
        self.required.clear();

        let inverse = world.rotation().inverse();
        let mut tiles = Vec::new();
        for &region_pos in world.available_regions() {
            let region = match world.region_headers(region_pos) {
                Ok(region) => region,
                Err(err) => {
                    warn!(region = %region_pos, error = %err, "skipping unreadable region");
                    continue;
                }
            };
            for &chunk_pos in region.containing_chunks() {
                if !world.crop().is_chunk_contained(chunk_pos.rotated(inverse)) {
                    continue;
                }
                let timestamp = region.chunk_timestamp(chunk_pos).unwrap_or(0);
                tiles.clear();
                self.view.chunk_tiles(chunk_pos, &mut tiles);
                for &tile in &tiles {
                    let entry = self.render_tiles.entry(tile).or_insert(0);
                    *entry = (*entry).max(timestamp);
                }
            }
        }

        self.tile_offset = if center {
            self.center_offset()
        } else {
            TilePos::new(0, 0)
        };
        if self.tile_offset != TilePos::new(0, 0) {
            let offset = self.tile_offset;
            self.render_tiles = std::mem::take(&mut self.render_tiles)
                .into_iter()
                .map(|(pos, ts)| (pos.offset(-offset.x, -offset.y), ts))
                .collect();
        }

        self.min_depth = self.fitting_depth();
        self.set_depth(self.min_depth);
        debug!(
            tiles = self.render_tiles.len(),
            depth = self.min_depth,
            offset = %self.tile_offset,
            "scanned tile set"
        );
    }

    fn center_offset(&self) -> TilePos {
        if self.render_tiles.is_empty() {
            return TilePos::new(0, 0);
        }
        let xs: (i32, i32) = self.bounds(|pos| pos.x);
        let ys: (i32, i32) = self.bounds(|pos| pos.y);
        TilePos::new(
            (xs.0 + xs.1 + 1).div_euclid(2),
            (ys.0 + ys.1 + 1).div_euclid(2),
        )
    }

    fn bounds(&self, axis: impl Fn(&TilePos) -> i32) -> (i32, i32) {
        self.render_tiles
            .keys()
            .fold((i32::MAX, i32::MIN), |(lo, hi), pos| {
                (lo.min(axis(pos)), hi.max(axis(pos)))
            })
    }

    /// The smallest depth whose centered tree contains every inhabited tile.
    fn fitting_depth(&self) -> u32 {
        let mut depth = 1;
        for pos in self.render_tiles.keys() {
            while TilePath::from_tile_pos(*pos, depth).is_none() {
                depth += 1;
            }
        }
        if self.render_tiles.is_empty() {
            0
        } else {
            depth
        }
    }

    /// Tree-frame position back to the projection frame the renderer uses.
    pub fn projection_pos(&self, pos: TilePos) -> TilePos {
        pos.offset(self.tile_offset.x, self.tile_offset.y)
    }

    pub fn render_tiles_count(&self) -> usize {
        self.render_tiles.len()
    }

    pub fn render_tiles(&self) -> impl Iterator<Item = &TilePos> {
        self.render_tiles.keys()
    }

    /// Incremental mode: a tile is required iff a contributing chunk is newer
    /// than the last completed render of this map/rotation.
    pub fn scan_required_by_timestamp(&mut self, last_rendered: u32) {
        self.required = self
            .render_tiles
            .iter()
            .filter(|(_, &freshness)| freshness > last_rendered)
            .map(|(pos, _)| *pos)
            .collect();
    }

    /// File-mtime mode: a tile is required iff its output file is missing or
    /// older than the newest contributing chunk.
    pub fn scan_required_by_filetimes(&mut self, output_dir: &Path, extension: &str) {
        let depth = self.depth;
        self.required = self
            .render_tiles
            .iter()
            .filter(|(pos, &freshness)| {
                let Some(path) = TilePath::from_tile_pos(**pos, depth) else {
                    return true;
                };
                match std::fs::metadata(output_dir.join(path.file_path(extension)))
                    .and_then(|meta| meta.modified())
                {
                    Ok(mtime) => {
                        let secs = mtime
                            .duration_since(UNIX_EPOCH)
                            .map(|d| d.as_secs())
                            .unwrap_or(0);
                        secs < freshness as u64
                    }
                    Err(_) => true,
                }
            })
            .map(|(pos, _)| *pos)
            .collect();
    }

    /// Force mode: every inhabited tile is required.
    pub fn reset_required(&mut self) {
        self.required = self.render_tiles.keys().copied().collect();
    }

    pub fn required_render_tiles_count(&self) -> usize {
        self.required.len()
    }

    /// Paths of the required leaf tiles at the current depth.
    pub fn required_leaf_paths(&self) -> Vec<TilePath> {
        self.required
            .iter()
            .filter_map(|pos| TilePath::from_tile_pos(*pos, self.depth))
            .collect()
    }

    /// Composite paths required by upward propagation, grouped by level.
    /// Index `k` of the result holds the required paths at depth `k`, so the
    /// last entry is the deepest composite level (`depth - 1`) and entry 0 is
    /// the root.
    pub fn required_composite_levels(&self) -> Vec<HashSet<TilePath>> {
        if self.depth == 0 {
            return vec![HashSet::from([TilePath::root()])];
        }
        let mut levels: Vec<HashSet<TilePath>> =
            (0..self.depth).map(|_| HashSet::new()).collect();
        for leaf in self.required_leaf_paths() {
            let mut node = leaf;
            while let Some(parent) = node.parent() {
                let level = parent.depth() as usize;
                if !levels[level].insert(parent.clone()) {
                    break;
                }
                node = parent;
            }
        }
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstate::BlockStateRegistry;
    use crate::coord::{ChunkPos, Rotation, WorldCrop};
    use crate::world::tests::write_test_world_with;
    use crate::world::{Dimension, World, DEFAULT_CHUNK_CACHE_CHUNKS};
    use std::sync::Arc;

    #[test]
    fn test_path_pos_roundtrip() {
        for depth in 1..=5u32 {
            let radius = 1 << (depth - 1);
            for x in -radius..radius {
                for y in -radius..radius {
                    let pos = TilePos::new(x, y);
                    let path = TilePath::from_tile_pos(pos, depth).unwrap();
                    assert_eq!(path.depth(), depth);
                    assert_eq!(path.tile_pos(), pos, "roundtrip at depth {}", depth);
                }
            }
        }
    }

    #[test]
    fn test_path_outside_tree() {
        assert_eq!(TilePath::from_tile_pos(TilePos::new(1, 0), 1), None);
        assert_eq!(TilePath::from_tile_pos(TilePos::new(-2, 0), 1), None);
        assert!(TilePath::from_tile_pos(TilePos::new(1, 0), 2).is_some());
    }

    #[test]
    fn test_path_digits_follow_quadrants() {
        // Depth 1: the four tiles are exactly the four digits.
        let nw = TilePath::from_tile_pos(TilePos::new(-1, -1), 1).unwrap();
        let ne = TilePath::from_tile_pos(TilePos::new(0, -1), 1).unwrap();
        let sw = TilePath::from_tile_pos(TilePos::new(-1, 0), 1).unwrap();
        let se = TilePath::from_tile_pos(TilePos::new(0, 0), 1).unwrap();
        assert_eq!(nw.digits(), &[1]);
        assert_eq!(ne.digits(), &[2]);
        assert_eq!(sw.digits(), &[3]);
        assert_eq!(se.digits(), &[4]);
    }

    #[test]
    fn test_file_path_layout() {
        let path = TilePath { digits: vec![1, 4, 3] };
        assert_eq!(path.file_path("png"), PathBuf::from("1/4/3.png"));
        assert_eq!(path.to_string(), "1/4/3");
        assert_eq!(TilePath::root().file_path("jpg"), PathBuf::from("base.jpg"));
    }

    #[test]
    fn test_parent_child() {
        let path = TilePath::root().child(2).child(3);
        assert_eq!(path.parent(), Some(TilePath::root().child(2)));
        assert_eq!(TilePath::root().parent(), None);
    }

    #[test]
    fn test_tile_set_id_group_reduction() {
        let id = TileSetId {
            world: "main".to_string(),
            view: RenderView::Isometric,
            texture_size: 16,
            rotation: Rotation::TopRight,
        };
        let group = id.group();
        assert_eq!(group.world, "main");
        assert_eq!(group.view, RenderView::Isometric);
        // Two rotations of the same map reduce to the same group.
        let other = TileSetId {
            rotation: Rotation::BottomLeft,
            ..id.clone()
        };
        assert_eq!(other.group(), group);
    }

    fn scan_world(dir: &Path, chunks: &[(ChunkPos, u32)], view: RenderView) -> TileSet {
        write_test_world_with(dir, chunks);
        let world = World::open(
            dir,
            Dimension::Overworld,
            Rotation::TopLeft,
            WorldCrop::default(),
            Arc::new(BlockStateRegistry::new()),
            DEFAULT_CHUNK_CACHE_CHUNKS,
        )
        .unwrap();
        let mut tile_set = TileSet::new(view);
        tile_set.scan(&world, false);
        tile_set
    }

    #[test]
    fn test_scan_records_freshness() {
        let dir = tempfile::tempdir().unwrap();
        let tile_set = scan_world(
            dir.path(),
            &[(ChunkPos::new(0, 0), 500), (ChunkPos::new(1, 0), 900)],
            RenderView::TopDown,
        );
        // Both chunks land in tile (0, 0); freshness is the max.
        assert_eq!(tile_set.render_tiles_count(), 1);
        assert_eq!(tile_set.depth(), 1);
        let mut set = tile_set;
        set.scan_required_by_timestamp(800);
        assert_eq!(set.required_render_tiles_count(), 1);
        set.scan_required_by_timestamp(900);
        assert_eq!(set.required_render_tiles_count(), 0);
    }

    #[test]
    fn test_rescan_without_changes_requires_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut tile_set = scan_world(dir.path(), &[(ChunkPos::new(0, 0), 1000)], RenderView::TopDown);
        tile_set.scan_required_by_timestamp(1000);
        assert_eq!(
            tile_set.required_render_tiles_count(),
            0,
            "unchanged mtimes must produce an empty required set"
        );
    }

    #[test]
    fn test_force_requires_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut tile_set =
            scan_world(dir.path(), &[(ChunkPos::new(0, 0), 1000)], RenderView::TopDown);
        tile_set.reset_required();
        assert_eq!(
            tile_set.required_render_tiles_count(),
            tile_set.render_tiles_count()
        );
    }

    #[test]
    fn test_depth_grows_with_world_spread() {
        let dir = tempfile::tempdir().unwrap();
        // A chunk far east lands in tile (128, 0); the origin-centered tree
        // needs 2^(depth-1) > 128, so depth 9.
        let tile_set = scan_world(
            dir.path(),
            &[(ChunkPos::new(0, 0), 1), (ChunkPos::new(256, 0), 1)],
            RenderView::TopDown,
        );
        assert_eq!(tile_set.depth(), 9);
    }

    #[test]
    fn test_set_depth_only_grows() {
        let mut tile_set = TileSet::new(RenderView::TopDown);
        tile_set.set_depth(3);
        tile_set.set_depth(2);
        assert_eq!(tile_set.depth(), 3);
        tile_set.set_depth(5);
        assert_eq!(tile_set.depth(), 5);
    }

    #[test]
    fn test_composite_levels_propagate_upward() {
        let dir = tempfile::tempdir().unwrap();
        let mut tile_set = scan_world(
            dir.path(),
            &[(ChunkPos::new(0, 0), 1), (ChunkPos::new(256, 0), 1)],
            RenderView::TopDown,
        );
        tile_set.reset_required();
        let levels = tile_set.required_composite_levels();
        assert_eq!(levels.len(), tile_set.depth() as usize);
        // The root is always required when any leaf is.
        assert!(levels[0].contains(&TilePath::root()));
        // Every required composite's child set leads down to a leaf.
        for (level, paths) in levels.iter().enumerate().skip(1) {
            for path in paths {
                assert_eq!(path.depth() as usize, level);
                assert!(levels[level - 1].contains(&path.parent().unwrap()));
            }
        }
    }

    #[test]
    fn test_centering_offsets_tiles() {
        let dir = tempfile::tempdir().unwrap();
        write_test_world_with(dir.path(), &[(ChunkPos::new(64, 64), 1)]);
        let world = World::open(
            dir.path(),
            Dimension::Overworld,
            Rotation::TopLeft,
            WorldCrop::default(),
            Arc::new(BlockStateRegistry::new()),
            DEFAULT_CHUNK_CACHE_CHUNKS,
        )
        .unwrap();

        let mut centered = TileSet::new(RenderView::TopDown);
        centered.scan(&world, true);
        let mut plain = TileSet::new(RenderView::TopDown);
        plain.scan(&world, false);

        // Chunk (64, 64) is tile (32, 32): uncentered needs depth 7,
        // centered pulls it to the origin.
        assert!(centered.depth() < plain.depth());
        assert_eq!(centered.tile_offset(), TilePos::new(32, 32));
        let tree_pos = *centered.render_tiles().next().unwrap();
        assert_eq!(centered.projection_pos(tree_pos), TilePos::new(32, 32));
    }
}
