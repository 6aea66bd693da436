//! Biome ids and their grass/foliage tint colors.
//!
//! Chunks store biome palettes by name; the renderer only needs a compact id
//! and a tint color, so names are folded into this fixed table at decode
//! time. Unlisted biomes fall back to plains.

use crate::image::{rgba, RgbaPixel};

/// Id of the fallback biome (plains).
pub const DEFAULT_BIOME: u8 = 0;

struct Biome {
    name: &'static str,
    tint: RgbaPixel,
}

const fn biome(name: &'static str, r: u8, g: u8, b: u8) -> Biome {
    Biome {
        name,
        tint: rgba(r, g, b, 255),
    }
}

static BIOMES: &[Biome] = &[
    biome("minecraft:plains", 0x91, 0xbd, 0x59),
    biome("minecraft:forest", 0x79, 0xc0, 0x5a),
    biome("minecraft:birch_forest", 0x88, 0xbb, 0x67),
    biome("minecraft:dark_forest", 0x50, 0x7a, 0x32),
    biome("minecraft:taiga", 0x86, 0xb7, 0x83),
    biome("minecraft:snowy_plains", 0x80, 0xb4, 0x97),
    biome("minecraft:snowy_taiga", 0x80, 0xb4, 0x97),
    biome("minecraft:desert", 0xbf, 0xb7, 0x55),
    biome("minecraft:badlands", 0x90, 0x81, 0x4d),
    biome("minecraft:savanna", 0xbf, 0xb7, 0x55),
    biome("minecraft:jungle", 0x59, 0xc9, 0x3c),
    biome("minecraft:swamp", 0x6a, 0x70, 0x39),
    biome("minecraft:mushroom_fields", 0x55, 0xc9, 0x3f),
    biome("minecraft:ocean", 0x8e, 0xb9, 0x71),
    biome("minecraft:deep_ocean", 0x8e, 0xb9, 0x71),
    biome("minecraft:river", 0x8e, 0xb9, 0x71),
    biome("minecraft:beach", 0x91, 0xbd, 0x59),
    biome("minecraft:windswept_hills", 0x8a, 0xb6, 0x89),
];

/// Compact id for a biome name.
pub fn biome_id(name: &str) -> u8 {
    BIOMES
        .iter()
        .position(|b| b.name == name)
        .map_or(DEFAULT_BIOME, |i| i as u8)
}

/// Grass tint color for a biome id.
pub fn biome_tint(id: u8) -> RgbaPixel {
    BIOMES
        .get(id as usize)
        .map_or(BIOMES[DEFAULT_BIOME as usize].tint, |b| b.tint)
}
