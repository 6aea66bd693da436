//! Orchestrates a whole render run: scan, required sets, dispatch, metadata.
//!
//! One pass per map/rotation. All rotations of a map share one tree depth,
//! which is unified across every tile set of a group during the scan. The
//! timestamp persisted after a successful rotation is the time scanning
//! *started*: chunks modified while rendering are picked up by the next run.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::blockstate::BlockStateRegistry;
use crate::config::{Config, ImageFormat, MapConfig};
use crate::coord::Rotation;
use crate::dispatch::{Dispatcher, ProgressSink, RenderContext};
use crate::image::codec::{CodecError, ImageCodec, JpegCodec, PngCodec};
use crate::image::Pixmap;
use crate::render::composite::{build_composite, demoted_composite};
use crate::sprite::SpriteCache;
use crate::tile::{TileSet, TileSetGroupId, TileSetId};
use crate::webmeta::WebMeta;
use crate::world::World;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("cannot create output directory {0}: {1}")]
    OutputDir(PathBuf, #[source] std::io::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Meta(#[from] crate::webmeta::MetaError),
}

/// What to do with a map/rotation this run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderBehavior {
    /// Render the tiles whose chunks changed since the last run.
    #[default]
    Auto,
    /// Render every inhabited tile.
    Force,
    /// Do not render at all.
    Skip,
}

/// Per-map, per-rotation render behaviors with a default.
#[derive(Clone, Debug, Default)]
pub struct RenderBehaviors {
    default: RenderBehavior,
    overrides: HashMap<String, [RenderBehavior; 4]>,
}

impl RenderBehaviors {
    pub fn new(default: RenderBehavior) -> RenderBehaviors {
        RenderBehaviors {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn behavior(&self, map: &str, rotation: Rotation) -> RenderBehavior {
        self.overrides
            .get(map)
            .map_or(self.default, |rotations| {
                rotations[rotation.steps() as usize]
            })
    }

    pub fn set_map(&mut self, map: &str, behavior: RenderBehavior) {
        self.overrides.insert(map.to_string(), [behavior; 4]);
    }

    pub fn set(&mut self, map: &str, rotation: Rotation, behavior: RenderBehavior) {
        let default = self.default;
        let rotations = self
            .overrides
            .entry(map.to_string())
            .or_insert([default; 4]);
        rotations[rotation.steps() as usize] = behavior;
    }

    /// Whether every rotation of the map is skipped.
    pub fn is_complete_skip(&self, map: &MapConfig) -> bool {
        map.rotations
            .iter()
            .all(|&rotation| self.behavior(&map.name, rotation) == RenderBehavior::Skip)
    }

    /// Builds the behavior table from `map` or `map:rotation` selector
    /// lists as given on the command line. Unknown selectors are warned
    /// about and ignored.
    pub fn from_selectors(
        config: &Config,
        skip_all: bool,
        skip: &[String],
        auto: &[String],
        force: &[String],
    ) -> RenderBehaviors {
        let mut behaviors = RenderBehaviors::new(if skip_all {
            RenderBehavior::Skip
        } else {
            RenderBehavior::Auto
        });
        if !skip_all {
            behaviors.apply_selectors(config, skip, RenderBehavior::Skip);
        }
        behaviors.apply_selectors(config, auto, RenderBehavior::Auto);
        behaviors.apply_selectors(config, force, RenderBehavior::Force);
        behaviors
    }

    fn apply_selectors(&mut self, config: &Config, selectors: &[String], behavior: RenderBehavior) {
        for selector in selectors {
            let (map_name, rotation) = match selector.split_once(':') {
                Some((map, rotation)) => (map, Some(rotation)),
                None => (selector.as_str(), None),
            };
            let Some(map) = config.map(map_name) else {
                warn!("unknown map '{}'", map_name);
                continue;
            };
            match rotation {
                None => self.set_map(map_name, behavior),
                Some(raw) => {
                    let Some(rotation) = Rotation::parse(raw) else {
                        warn!("unknown rotation '{}'", raw);
                        continue;
                    };
                    if !map.rotations.contains(&rotation) {
                        warn!("map '{}' does not have rotation '{}'", map_name, rotation);
                        continue;
                    }
                    self.set(map_name, rotation, behavior);
                }
            }
        }
    }
}

/// Drives scan, render and composite for every configured map.
pub struct RenderManager {
    config: Config,
    behaviors: RenderBehaviors,
    registry: Arc<BlockStateRegistry>,
    meta: WebMeta,
    worlds: HashMap<(String, Rotation), World>,
    tile_sets: HashMap<TileSetId, TileSet>,
    required_maps: Vec<(String, Vec<Rotation>)>,
    map_initialized: HashSet<String>,
    time_started_scanning: u64,
    cancel: Arc<AtomicBool>,
}

impl RenderManager {
    pub fn new(config: Config) -> RenderManager {
        RenderManager {
            config,
            behaviors: RenderBehaviors::default(),
            registry: Arc::new(BlockStateRegistry::new()),
            meta: WebMeta::default(),
            worlds: HashMap::new(),
            tile_sets: HashMap::new(),
            required_maps: Vec::new(),
            map_initialized: HashSet::new(),
            time_started_scanning: 0,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_behaviors(&mut self, behaviors: RenderBehaviors) {
        self.behaviors = behaviors;
    }

    /// Flag a signal handler can flip for a clean shutdown between tiles.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The maps (and rotations) this run will render, known after `run`
    /// started scanning.
    pub fn required_maps(&self) -> &[(String, Vec<Rotation>)] {
        &self.required_maps
    }

    /// Runs the whole render. Returns `false` when any map failed; only a
    /// missing output root is fatal.
    pub fn run(&mut self, jobs: usize, progress: &dyn ProgressSink) -> Result<bool, ManagerError> {
        self.initialize()?;

        info!("scanning worlds");
        self.scan_worlds();

        let started = Instant::now();
        let required_maps = self.required_maps.clone();
        let total_maps = required_maps.len();
        let mut success = true;
        for (map_index, (map_name, rotations)) in required_maps.iter().enumerate() {
            info!("[{}/{}] rendering map {}", map_index + 1, total_maps, map_name);
            for (rotation_index, &rotation) in rotations.iter().enumerate() {
                if self.cancel.load(Ordering::Relaxed) {
                    info!("render cancelled");
                    return Ok(success);
                }
                info!(
                    "[{}.{}/{}.{}] rendering rotation {}",
                    map_index + 1,
                    rotation_index + 1,
                    map_index + 1,
                    rotations.len(),
                    rotation
                );
                let rotation_started = Instant::now();
                if let Err(err) = self.render_rotation(map_name, rotation, jobs, progress) {
                    error!(map = %map_name, %rotation, error = %err, "rendering failed");
                    success = false;
                } else {
                    info!(
                        "[{}.{}] rendering rotation {} took {} seconds",
                        map_index + 1,
                        rotation_index + 1,
                        rotation,
                        rotation_started.elapsed().as_secs()
                    );
                }
            }
        }
        info!(
            "rendering all maps took {} seconds",
            started.elapsed().as_secs()
        );
        Ok(success)
    }

    fn initialize(&mut self) -> Result<(), ManagerError> {
        std::fs::create_dir_all(&self.config.output_dir)
            .map_err(|err| ManagerError::OutputDir(self.config.output_dir.clone(), err))?;
        self.meta = match WebMeta::read(&self.config.output_dir) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(error = %err, "stored metadata is unreadable, starting fresh");
                WebMeta::default()
            }
        };
        Ok(())
    }

    /// Loads every world backing a non-skipped map and scans its tile sets.
    /// Every rotation of a map is scanned, even skipped ones, so all
    /// rotations agree on one tree depth.
    fn scan_worlds(&mut self) {
        self.time_started_scanning = unix_now();
        self.required_maps.clear();

        let mut needed: BTreeSet<TileSetId> = BTreeSet::new();
        for map in &self.config.maps {
            if self.behaviors.is_complete_skip(map) {
                continue;
            }
            let mut required_rotations = Vec::new();
            for &rotation in &map.rotations {
                needed.insert(TileSetId {
                    world: map.world.clone(),
                    view: map.view,
                    texture_size: map.texture_size,
                    rotation,
                });
                if self.behaviors.behavior(&map.name, rotation) != RenderBehavior::Skip {
                    required_rotations.push(rotation);
                }
            }
            self.required_maps
                .push((map.name.clone(), required_rotations));
        }

        let mut group_depth: BTreeMap<TileSetGroupId, u32> = BTreeMap::new();
        for id in needed {
            let Some(world_config) = self.config.world(&id.world) else {
                continue;
            };
            let world_key = (id.world.clone(), id.rotation);
            if !self.worlds.contains_key(&world_key) {
                match World::open(
                    &world_config.input_dir,
                    world_config.dimension,
                    id.rotation,
                    world_config.crop.clone(),
                    Arc::clone(&self.registry),
                    crate::world::DEFAULT_CHUNK_CACHE_CHUNKS,
                ) {
                    Ok(world) => {
                        self.worlds.insert(world_key.clone(), world);
                    }
                    Err(err) => {
                        error!(world = %id.world, error = %err, "cannot load world, its maps are skipped");
                        continue;
                    }
                }
            }

            let mut tile_set = TileSet::new(id.view);
            tile_set.scan(&self.worlds[&world_key], world_config.crop.needs_centering());
            let depth = group_depth.entry(id.group()).or_insert(0);
            *depth = (*depth).max(tile_set.depth());
            self.tile_sets.insert(id, tile_set);
        }

        for (id, tile_set) in &mut self.tile_sets {
            if let Some(&depth) = group_depth.get(&id.group()) {
                tile_set.set_depth(depth);
            }
        }
    }

    fn render_rotation(
        &mut self,
        map_name: &str,
        rotation: Rotation,
        jobs: usize,
        progress: &dyn ProgressSink,
    ) -> Result<(), ManagerError> {
        let Some(map) = self.config.map(map_name).cloned() else {
            return Ok(());
        };
        if self.behaviors.behavior(map_name, rotation) == RenderBehavior::Skip {
            return Ok(());
        }
        let id = TileSetId {
            world: map.world.clone(),
            view: map.view,
            texture_size: map.texture_size,
            rotation,
        };
        if !self.tile_sets.contains_key(&id) {
            warn!(map = %map_name, "world did not load, skipping");
            return Ok(());
        }

        if !self.map_initialized.contains(map_name) {
            self.initialize_map(&map)?;
            self.map_initialized.insert(map_name.to_string());
        }

        let last_rendered = self
            .meta
            .map(map_name)
            .map_or(0, |meta| meta.last_rendered(rotation));
        if last_rendered != 0 {
            info!(
                "last rendering was {} seconds ago",
                unix_now().saturating_sub(last_rendered)
            );
        }

        let output_dir = self.rotation_dir(map_name, rotation);
        std::fs::create_dir_all(&output_dir)
            .map_err(|err| ManagerError::OutputDir(output_dir.clone(), err))?;

        let tile_set = self.tile_sets.get_mut(&id).expect("checked above");
        match self.behaviors.behavior(map_name, rotation) {
            RenderBehavior::Auto => {
                info!("scanning required tiles");
                if map.use_image_mtimes {
                    tile_set.scan_required_by_filetimes(&output_dir, map.image_format.extension());
                } else {
                    tile_set.scan_required_by_timestamp(last_rendered as u32);
                }
            }
            RenderBehavior::Force => tile_set.reset_required(),
            RenderBehavior::Skip => unreachable!("checked above"),
        }

        let depth = tile_set.depth();
        let tile_offset = tile_set.tile_offset();
        let required = tile_set.required_render_tiles_count();
        let inhabited = tile_set.render_tiles_count();

        // Keep the viewer metadata current even when nothing renders.
        let codec = make_codec(&map, &self.config);
        {
            let meta = self.meta.map_mut(map_name);
            meta.max_zoom = depth;
            meta.tile_size = map.view.tile_size(map.texture_size);
            meta.image_format = map.image_format.extension().to_string();
            meta.set_tile_offset(rotation, tile_offset);
        }

        if required == 0 {
            info!("no tiles need to get rendered");
            if inhabited == 0 {
                // An empty world still gets its (fully transparent) root tile.
                let base = output_dir.join(format!("base.{}", map.image_format.extension()));
                if !base.exists() {
                    let size = map.view.tile_size(map.texture_size);
                    codec.write(&Pixmap::new(size, size), &base)?;
                }
            }
            self.meta
                .map_mut(map_name)
                .set_last_rendered(rotation, self.time_started_scanning);
            self.meta.write(&self.config.output_dir)?;
            return Ok(());
        }
        info!("{} of {} tiles need to get rendered", required, inhabited);

        let sprites = Arc::new(SpriteCache::build(
            &self.registry,
            map.view,
            rotation,
            map.texture_size,
        ));
        let world = self.worlds[&(map.world.clone(), rotation)]
            .fork_with_capacity(map.chunk_cache_chunks);
        let context = RenderContext {
            output_dir,
            view: map.view,
            world,
            sprites,
            tile_set: Arc::new(self.tile_sets[&id].clone()),
            codec: codec.into(),
        };

        let dispatcher = if required == 1 {
            Dispatcher::new(1)
        } else {
            Dispatcher::new(jobs)
        };
        dispatcher.dispatch(&context, progress, &self.cancel);

        if self.cancel.load(Ordering::Relaxed) {
            // Unfinished tiles stay stale; the next run picks them up.
            return Ok(());
        }

        self.meta
            .map_mut(map_name)
            .set_last_rendered(rotation, self.time_started_scanning);
        self.meta.write(&self.config.output_dir)?;
        Ok(())
    }

    fn rotation_dir(&self, map_name: &str, rotation: Rotation) -> PathBuf {
        self.config
            .output_dir
            .join(map_name)
            .join(rotation.short_name())
    }

    /// Grows the on-disk tree when this run's depth exceeds the stored one.
    fn initialize_map(&mut self, map: &MapConfig) -> Result<(), ManagerError> {
        let id = TileSetId {
            world: map.world.clone(),
            view: map.view,
            texture_size: map.texture_size,
            rotation: map.rotations[0],
        };
        let Some(new_zoom) = self.tile_sets.get(&id).map(TileSet::depth) else {
            return Ok(());
        };
        let old_zoom = self.meta.map(&map.name).map_or(0, |meta| meta.max_zoom);
        if old_zoom != 0 && old_zoom < new_zoom {
            info!(
                "the max zoom level of map {} increased from {} to {}, moving tiles",
                map.name, old_zoom, new_zoom
            );
            for &rotation in &map.rotations {
                let dir = self.rotation_dir(&map.name, rotation);
                for _ in old_zoom..new_zoom {
                    self.increase_max_zoom(&dir, map)?;
                }
            }
        }
        self.meta.map_mut(&map.name).max_zoom = new_zoom;
        self.meta.write(&self.config.output_dir)?;
        Ok(())
    }

    /// Pushes the four top-level subtrees one level down (`1 -> 1/4`,
    /// `2 -> 2/3`, `3 -> 3/2`, `4 -> 4/1`) and rebuilds the level-1
    /// composites and the root from the moved images. A directory without
    /// subtrees is left untouched, which makes the operation idempotent.
    fn increase_max_zoom(&self, dir: &Path, map: &MapConfig) -> Result<(), ManagerError> {
        let extension = map.image_format.extension();
        let codec = make_codec(map, &self.config);
        let mut moved: [Option<Pixmap>; 4] = [None, None, None, None];

        for digit in 1u8..=4 {
            let opposite = 5 - digit;
            let subtree = dir.join(digit.to_string());
            if subtree.is_dir() {
                let staging = dir.join(format!("{}_", digit));
                std::fs::rename(&subtree, &staging)?;
                std::fs::create_dir_all(&subtree)?;
                std::fs::rename(&staging, subtree.join(opposite.to_string()))?;
            }
            let old_composite = dir.join(format!("{}.{}", digit, extension));
            if old_composite.is_file() {
                let target = subtree.join(format!("{}.{}", opposite, extension));
                std::fs::create_dir_all(&subtree)?;
                std::fs::rename(&old_composite, &target)?;
                match codec.read(&target) {
                    Ok(image) => moved[(digit - 1) as usize] = Some(image),
                    Err(err) => {
                        warn!(tile = %target.display(), error = %err, "moved composite is unreadable")
                    }
                }
            }
        }

        if moved.iter().all(Option::is_none) {
            return Ok(());
        }

        // New level-1 composites hold their old content in the opposite
        // quadrant; the root is rebuilt from those.
        let size = moved
            .iter()
            .flatten()
            .next()
            .map(Pixmap::width)
            .unwrap_or_else(|| map.view.tile_size(map.texture_size));
        let mut children: [Option<Pixmap>; 4] = [None, None, None, None];
        for digit in 1u8..=4 {
            if let Some(old) = &moved[(digit - 1) as usize] {
                let demoted = demoted_composite(old, (digit - 1) as usize, size);
                codec.write(&demoted, &dir.join(format!("{}.{}", digit, extension)))?;
                children[(digit - 1) as usize] = Some(demoted);
            }
        }
        let base = build_composite(&children, size);
        codec.write(&base, &dir.join(format!("base.{}", extension)))?;
        Ok(())
    }
}

fn make_codec(map: &MapConfig, config: &Config) -> Box<dyn ImageCodec> {
    match map.image_format {
        ImageFormat::Png => Box::new(PngCodec),
        ImageFormat::Jpeg => Box::new(JpegCodec::new(map.jpeg_quality, config.background_color)),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |age| age.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::parse(
            r#"
            output_dir = "/tmp/out"

            [world.main]
            input_dir = "/tmp/world"

            [map.day]
            world = "main"
            rotations = ["top-left", "top-right"]

            [map.night]
            world = "main"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_behavior_defaults_and_overrides() {
        let mut behaviors = RenderBehaviors::new(RenderBehavior::Auto);
        assert_eq!(behaviors.behavior("day", Rotation::TopLeft), RenderBehavior::Auto);

        behaviors.set("day", Rotation::TopRight, RenderBehavior::Force);
        assert_eq!(behaviors.behavior("day", Rotation::TopRight), RenderBehavior::Force);
        // Setting one rotation keeps the default for the others.
        assert_eq!(behaviors.behavior("day", Rotation::TopLeft), RenderBehavior::Auto);

        behaviors.set_map("night", RenderBehavior::Skip);
        assert_eq!(behaviors.behavior("night", Rotation::BottomLeft), RenderBehavior::Skip);
    }

    #[test]
    fn test_selectors_with_rotation() {
        let config = test_config();
        let behaviors = RenderBehaviors::from_selectors(
            &config,
            false,
            &["night".to_string()],
            &[],
            &["day:tr".to_string()],
        );
        assert_eq!(behaviors.behavior("day", Rotation::TopRight), RenderBehavior::Force);
        assert_eq!(behaviors.behavior("day", Rotation::TopLeft), RenderBehavior::Auto);
        assert_eq!(behaviors.behavior("night", Rotation::TopLeft), RenderBehavior::Skip);
    }

    #[test]
    fn test_skip_all_keeps_force_overrides() {
        let config = test_config();
        let behaviors = RenderBehaviors::from_selectors(
            &config,
            true,
            &[],
            &[],
            &["day".to_string()],
        );
        assert_eq!(behaviors.behavior("day", Rotation::TopLeft), RenderBehavior::Force);
        assert_eq!(behaviors.behavior("night", Rotation::TopLeft), RenderBehavior::Skip);
        let night = config.map("night").unwrap();
        assert!(behaviors.is_complete_skip(night));
    }

    #[test]
    fn test_unknown_selectors_are_ignored() {
        let config = test_config();
        let behaviors = RenderBehaviors::from_selectors(
            &config,
            false,
            &["ghost".to_string(), "day:diagonal".to_string()],
            &[],
            &[],
        );
        // Both selectors are invalid, nothing changed.
        assert_eq!(behaviors.behavior("day", Rotation::TopLeft), RenderBehavior::Auto);
    }
}
