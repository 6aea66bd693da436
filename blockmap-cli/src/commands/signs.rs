//! Prints the signs of every configured world, via the entities cache.

use std::sync::Arc;

use tracing::error;

use blockmap::blockstate::BlockStateRegistry;
use blockmap::config::Config;
use blockmap::coord::Rotation;
use blockmap::world::entities::EntitiesCache;
use blockmap::world::{World, DEFAULT_CHUNK_CACHE_CHUNKS};

pub fn run(config: &Config) -> i32 {
    let registry = Arc::new(BlockStateRegistry::new());
    let mut exit_code = 0;

    for (name, world_config) in &config.worlds {
        let world = match World::open(
            &world_config.input_dir,
            world_config.dimension,
            Rotation::TopLeft,
            world_config.crop.clone(),
            Arc::clone(&registry),
            DEFAULT_CHUNK_CACHE_CHUNKS,
        ) {
            Ok(world) => world,
            Err(err) => {
                error!(world = %name, "cannot open world: {}", err);
                exit_code = 1;
                continue;
            }
        };

        let mut cache = EntitiesCache::new(&world);
        if let Err(err) = cache.update(&world, None) {
            error!(world = %name, "cannot update entities cache: {}", err);
            exit_code = 1;
            continue;
        }

        for sign in cache.signs(&world_config.crop) {
            println!("{} {} {}", name, sign.pos(), sign.text());
        }
    }
    exit_code
}
