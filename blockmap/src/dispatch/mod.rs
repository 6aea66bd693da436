//! Distributes render work across a pool of OS worker threads.
//!
//! Leaf tiles are queued first and pulled one at a time by the workers, each
//! of which owns its renderer, world view and scratch tile image. Composite
//! tiles are then processed level by level from the leaves upward; the
//! barrier between levels guarantees every child exists on disk before its
//! parent is assembled, without any locking on the tile tree.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{error, info, warn};

use crate::image::codec::ImageCodec;
use crate::image::Pixmap;
use crate::render::composite::build_composite;
use crate::render::RenderView;
use crate::sprite::SpriteCache;
use crate::tile::{TilePath, TileSet};
use crate::world::World;

/// Receives progress updates from the dispatcher. Implementations must be
/// safe to call from several workers at once.
pub trait ProgressSink: Send + Sync {
    fn set_max(&self, max: usize);
    fn advance(&self, delta: usize);
}

/// Swallows all progress.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn set_max(&self, _max: usize) {}
    fn advance(&self, _delta: usize) {}
}

/// Logs progress in ten-percent steps.
#[derive(Debug, Default)]
pub struct LogProgress {
    max: AtomicUsize,
    value: AtomicUsize,
    logged_decile: AtomicUsize,
}

impl LogProgress {
    pub fn new() -> LogProgress {
        LogProgress::default()
    }

    pub fn value(&self) -> usize {
        self.value.load(Ordering::Relaxed)
    }
}

impl ProgressSink for LogProgress {
    fn set_max(&self, max: usize) {
        self.max.store(max, Ordering::Relaxed);
        self.value.store(0, Ordering::Relaxed);
        self.logged_decile.store(0, Ordering::Relaxed);
    }

    fn advance(&self, delta: usize) {
        let value = self.value.fetch_add(delta, Ordering::Relaxed) + delta;
        let max = self.max.load(Ordering::Relaxed).max(1);
        let decile = value * 10 / max;
        if decile > self.logged_decile.swap(decile, Ordering::Relaxed) {
            info!("rendered {}/{} tiles ({}%)", value, max, decile * 10);
        }
    }
}

/// Fans progress out to several sinks.
#[derive(Default)]
pub struct MultiplexingProgress {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl MultiplexingProgress {
    pub fn new() -> MultiplexingProgress {
        MultiplexingProgress::default()
    }

    pub fn add(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sinks.push(sink);
    }
}

impl ProgressSink for MultiplexingProgress {
    fn set_max(&self, max: usize) {
        for sink in &self.sinks {
            sink.set_max(max);
        }
    }

    fn advance(&self, delta: usize) {
        for sink in &self.sinks {
            sink.advance(delta);
        }
    }
}

/// Everything a worker needs to render one map/rotation.
///
/// The world is a template: each worker forks its own view so chunk caches
/// are never shared. Sprites, tile set and codec are shared read-only.
pub struct RenderContext {
    pub output_dir: PathBuf,
    pub view: RenderView,
    pub world: World,
    pub sprites: Arc<SpriteCache>,
    pub tile_set: Arc<TileSet>,
    pub codec: Arc<dyn ImageCodec>,
}

impl RenderContext {
    fn tile_size(&self) -> u32 {
        self.view.tile_size(self.sprites.texture_size())
    }
}

enum Phase {
    Leaf,
    Composite,
}

/// The worker pool driving one map/rotation to completion.
pub struct Dispatcher {
    jobs: usize,
}

impl Dispatcher {
    pub fn new(jobs: usize) -> Dispatcher {
        Dispatcher { jobs: jobs.max(1) }
    }

    /// Renders all required leaf tiles, then the required composites bottom
    /// up. Tile write failures are logged and leave a hole; the next run
    /// picks the tile up again as stale.
    pub fn dispatch(&self, ctx: &RenderContext, progress: &dyn ProgressSink, cancel: &AtomicBool) {
        let mut leafs = ctx.tile_set.required_leaf_paths();
        leafs.sort();
        let levels = ctx.tile_set.required_composite_levels();
        let total = leafs.len() + levels.iter().map(|level| level.len()).sum::<usize>();
        progress.set_max(total);

        self.run_phase(ctx, leafs, Phase::Leaf, progress, cancel);

        // Deepest composite level first; each level only reads tiles the
        // previous one wrote.
        for level in levels.iter().rev() {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let mut paths: Vec<TilePath> = level.iter().cloned().collect();
            paths.sort();
            self.run_phase(ctx, paths, Phase::Composite, progress, cancel);
        }
    }

    fn run_phase(
        &self,
        ctx: &RenderContext,
        paths: Vec<TilePath>,
        phase: Phase,
        progress: &dyn ProgressSink,
        cancel: &AtomicBool,
    ) {
        if paths.is_empty() {
            return;
        }
        let workers = self.jobs.min(paths.len());
        let (tx, rx) = crossbeam_channel::unbounded::<TilePath>();
        for path in paths {
            tx.send(path).expect("queue lives until all paths are sent");
        }
        drop(tx);

        if workers == 1 {
            Self::worker(ctx, &phase, rx, progress, cancel);
            return;
        }
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                let phase = &phase;
                scope.spawn(move || Self::worker(ctx, phase, rx, progress, cancel));
            }
        });
    }

    fn worker(
        ctx: &RenderContext,
        phase: &Phase,
        rx: Receiver<TilePath>,
        progress: &dyn ProgressSink,
        cancel: &AtomicBool,
    ) {
        let mut renderer = match phase {
            Phase::Leaf => Some(
                ctx.view
                    .create_renderer(ctx.world.fork(), Arc::clone(&ctx.sprites)),
            ),
            Phase::Composite => None,
        };
        let size = ctx.tile_size();
        let mut scratch = Pixmap::new(size, size);

        while let Ok(path) = rx.recv() {
            if cancel.load(Ordering::Relaxed) {
                // Unfinished tiles simply stay stale for the next run.
                continue;
            }
            match (&mut renderer, phase) {
                (Some(renderer), Phase::Leaf) => {
                    let pos = ctx.tile_set.projection_pos(path.tile_pos());
                    renderer.render_tile(pos, &mut scratch);
                    Self::write_tile(ctx, &path, &scratch);
                }
                (_, Phase::Composite) => {
                    let parent = Self::assemble_composite(ctx, &path, size);
                    Self::write_tile(ctx, &path, &parent);
                }
                _ => unreachable!("leaf workers always carry a renderer"),
            }
            progress.advance(1);
        }
    }

    fn assemble_composite(ctx: &RenderContext, path: &TilePath, size: u32) -> Pixmap {
        let mut children: [Option<Pixmap>; 4] = [None, None, None, None];
        for digit in 1..=4u8 {
            let child_path = ctx
                .output_dir
                .join(path.child(digit).file_path(ctx.codec.extension()));
            if !child_path.exists() {
                continue;
            }
            match ctx.codec.read(&child_path) {
                Ok(image) => children[(digit - 1) as usize] = Some(image),
                Err(err) => {
                    warn!(tile = %path.child(digit), error = %err, "skipping unreadable child tile");
                }
            }
        }
        build_composite(&children, size)
    }

    fn write_tile(ctx: &RenderContext, path: &TilePath, image: &Pixmap) {
        let out = ctx.output_dir.join(path.file_path(ctx.codec.extension()));
        if let Some(parent) = out.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                error!(tile = %path, error = %err, "cannot create tile directory");
                return;
            }
        }
        if let Err(err) = ctx.codec.write(image, &out) {
            error!(tile = %path, error = %err, "cannot write tile");
        }
    }
}
