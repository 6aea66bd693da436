//! Pre-rendered per-block sprites.
//!
//! Sprites are generated once at the start of a map/rotation from a recipe
//! table of per-block base colors and capabilities, keyed by the interned id
//! of the sprite-relevant block state (unknown property keys stripped). The
//! cache is immutable after that warm-up, so workers read it without locks.
//! Block states without a recipe render as a magenta placeholder.

pub mod biome;

use std::collections::HashMap;

use crate::blockstate::{BlockState, BlockStateRegistry};
use crate::image::{rgba, rgba_multiply, Pixmap, RgbaPixel};
use crate::render::RenderView;
use crate::coord::Rotation;

/// Face bits for isometric sprite variants.
pub const FACE_TOP: u8 = 1;
pub const FACE_LEFT: u8 = 2;
pub const FACE_RIGHT: u8 = 4;
pub const FACE_ALL: u8 = FACE_TOP | FACE_LEFT | FACE_RIGHT;

const COLOR_UNKNOWN: RgbaPixel = rgba(0xff, 0x00, 0xff, 0xff);
const COLOR_WATER: RgbaPixel = rgba(0x30, 0x59, 0xc9, 0xb0);

/// How a block fills its cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    /// Nothing to draw.
    Empty,
    /// A full cube.
    Solid,
    /// A full translucent cube, culled against its own kind.
    Liquid,
}

struct BlockRecipe {
    name: &'static str,
    color: RgbaPixel,
    shape: Shape,
    biome_tinted: bool,
    emits_light: bool,
    /// Property keys that select different sprites, with every value
    /// combination to pre-build ("" is the bare state).
    variants: &'static [(&'static str, &'static [&'static str])],
}

const fn solid(name: &'static str, r: u8, g: u8, b: u8) -> BlockRecipe {
    BlockRecipe {
        name,
        color: rgba(r, g, b, 0xff),
        shape: Shape::Solid,
        biome_tinted: false,
        emits_light: false,
        variants: &[],
    }
}

const fn empty(name: &'static str) -> BlockRecipe {
    BlockRecipe {
        name,
        color: 0,
        shape: Shape::Empty,
        biome_tinted: false,
        emits_light: false,
        variants: &[],
    }
}

static RECIPES: &[BlockRecipe] = &[
    empty("minecraft:air"),
    empty("minecraft:cave_air"),
    empty("minecraft:void_air"),
    solid("minecraft:stone", 0x7d, 0x7d, 0x7d),
    solid("minecraft:granite", 0x95, 0x67, 0x56),
    solid("minecraft:diorite", 0xbd, 0xbd, 0xbe),
    solid("minecraft:andesite", 0x84, 0x84, 0x86),
    solid("minecraft:deepslate", 0x50, 0x50, 0x52),
    solid("minecraft:bedrock", 0x33, 0x33, 0x33),
    solid("minecraft:dirt", 0x86, 0x60, 0x43),
    BlockRecipe {
        name: "minecraft:grass_block",
        color: rgba(0x90, 0x90, 0x90, 0xff),
        shape: Shape::Solid,
        biome_tinted: true,
        emits_light: false,
        variants: &[("snowy", &["false", "true"])],
    },
    solid("minecraft:sand", 0xda, 0xd0, 0x9e),
    solid("minecraft:sandstone", 0xd5, 0xc9, 0x93),
    solid("minecraft:gravel", 0x84, 0x7f, 0x7e),
    solid("minecraft:clay", 0x9f, 0xa4, 0xb1),
    BlockRecipe {
        name: "minecraft:water",
        color: COLOR_WATER,
        shape: Shape::Liquid,
        biome_tinted: false,
        emits_light: false,
        variants: &[],
    },
    BlockRecipe {
        name: "minecraft:lava",
        color: rgba(0xd4, 0x5a, 0x12, 0xff),
        shape: Shape::Liquid,
        biome_tinted: false,
        emits_light: true,
        variants: &[],
    },
    solid("minecraft:oak_log", 0x6b, 0x53, 0x32),
    solid("minecraft:spruce_log", 0x3b, 0x27, 0x14),
    solid("minecraft:birch_log", 0xd5, 0xcb, 0xb4),
    solid("minecraft:oak_planks", 0x9c, 0x7f, 0x4e),
    BlockRecipe {
        name: "minecraft:oak_leaves",
        color: rgba(0x7a, 0x7a, 0x7a, 0xe0),
        shape: Shape::Solid,
        biome_tinted: true,
        emits_light: false,
        variants: &[],
    },
    BlockRecipe {
        name: "minecraft:spruce_leaves",
        color: rgba(0x61, 0x99, 0x61, 0xe0),
        shape: Shape::Solid,
        biome_tinted: false,
        emits_light: false,
        variants: &[],
    },
    solid("minecraft:snow_block", 0xf1, 0xfc, 0xfc),
    solid("minecraft:snow", 0xf1, 0xfc, 0xfc),
    BlockRecipe {
        name: "minecraft:ice",
        color: rgba(0x7d, 0xad, 0xff, 0xc0),
        shape: Shape::Solid,
        biome_tinted: false,
        emits_light: false,
        variants: &[],
    },
    BlockRecipe {
        name: "minecraft:glass",
        color: rgba(0xff, 0xff, 0xff, 0x40),
        shape: Shape::Solid,
        biome_tinted: false,
        emits_light: false,
        variants: &[],
    },
    solid("minecraft:coal_ore", 0x6e, 0x6e, 0x6e),
    solid("minecraft:iron_ore", 0x8a, 0x80, 0x78),
    solid("minecraft:gold_ore", 0x93, 0x8a, 0x6a),
    solid("minecraft:diamond_ore", 0x81, 0x8c, 0x8c),
    solid("minecraft:obsidian", 0x14, 0x12, 0x1d),
    BlockRecipe {
        name: "minecraft:glowstone",
        color: rgba(0xf9, 0xd4, 0x9c, 0xff),
        shape: Shape::Solid,
        biome_tinted: false,
        emits_light: true,
        variants: &[],
    },
    solid("minecraft:netherrack", 0x72, 0x2e, 0x2e),
    solid("minecraft:end_stone", 0xdd, 0xe6, 0xa5),
    solid("minecraft:mycelium", 0x6f, 0x63, 0x73),
    solid("minecraft:podzol", 0x5a, 0x3e, 0x1a),
    solid("minecraft:terracotta", 0x98, 0x60, 0x43),
];

/// Capabilities of a block, resolved once per sprite id.
#[derive(Clone, Copy, Debug)]
pub struct SpriteInfo {
    /// Draw nothing at all (air).
    pub empty: bool,
    /// Fully covers its cell, letting the renderer cull hidden faces and
    /// stop walking a view ray early.
    pub opaque: bool,
    /// A liquid; interior faces against the same liquid are skipped.
    pub liquid: bool,
    pub biome_tinted: bool,
    pub emits_light: bool,
}

impl SpriteInfo {
    const UNKNOWN: SpriteInfo = SpriteInfo {
        empty: false,
        opaque: true,
        liquid: false,
        biome_tinted: false,
        emits_light: false,
    };
}

/// The per-map/rotation sprite cache.
pub struct SpriteCache {
    view: RenderView,
    texture_size: u32,
    /// Face bits that produce distinct sprites under the current view.
    face_mask: u8,
    sprites: HashMap<(u16, u8), Pixmap>,
    info: HashMap<u16, SpriteInfo>,
    unknown: Pixmap,
}

impl SpriteCache {
    /// Builds sprites for every recipe variant and registers their known
    /// property keys with the registry.
    pub fn build(
        registry: &BlockStateRegistry,
        view: RenderView,
        rotation: Rotation,
        texture_size: u32,
    ) -> SpriteCache {
        let face_mask = match view {
            RenderView::Isometric => FACE_ALL,
            RenderView::TopDown | RenderView::Side => 0,
        };

        let mut cache = SpriteCache {
            view,
            texture_size,
            face_mask,
            sprites: HashMap::new(),
            info: HashMap::new(),
            unknown: Pixmap::new(1, 1),
        };
        cache.unknown = cache.draw_sprite(COLOR_UNKNOWN, Shape::Solid, FACE_ALL, rotation);

        for recipe in RECIPES {
            for (key, _) in recipe.variants {
                registry.add_known_property(recipe.name, key);
            }
            for state in recipe_states(recipe) {
                let id = registry.get_or_intern(&state);
                cache.info.insert(
                    id,
                    SpriteInfo {
                        empty: recipe.shape == Shape::Empty,
                        opaque: recipe.shape == Shape::Solid
                            && crate::image::rgba_alpha(recipe.color) == 0xff,
                        liquid: recipe.shape == Shape::Liquid,
                        biome_tinted: recipe.biome_tinted,
                        emits_light: recipe.emits_light,
                    },
                );
                if recipe.shape == Shape::Empty {
                    continue;
                }
                let color = variant_color(recipe, &state);
                for faces in 0..=face_mask {
                    let sprite = cache.draw_sprite(color, recipe.shape, faces, rotation);
                    cache.sprites.insert((id, faces), sprite);
                }
            }
        }
        cache
    }

    pub fn texture_size(&self) -> u32 {
        self.texture_size
    }

    /// Sprite for a block state id and the faces the renderer wants drawn.
    /// Unknown states get the magenta placeholder.
    pub fn sprite(&self, id: u16, faces: u8) -> &Pixmap {
        self.sprites
            .get(&(id, faces & self.face_mask))
            .unwrap_or(&self.unknown)
    }

    pub fn info(&self, id: u16) -> SpriteInfo {
        self.info.get(&id).copied().unwrap_or(SpriteInfo::UNKNOWN)
    }

    pub fn is_opaque(&self, id: u16) -> bool {
        self.info(id).opaque
    }

    fn draw_sprite(&self, color: RgbaPixel, shape: Shape, faces: u8, rotation: Rotation) -> Pixmap {
        match self.view {
            RenderView::Isometric => draw_isometric_cube(self.texture_size, color, shape, faces, rotation),
            RenderView::TopDown => draw_flat_top(self.texture_size, color),
            RenderView::Side => draw_side_face(self.texture_size, color),
        }
    }
}

/// All states a recipe gets sprites for: every combination of its variant
/// properties, including the combinations where a property is absent (a
/// chunk palette does not always carry every property).
fn recipe_states(recipe: &BlockRecipe) -> Vec<BlockState> {
    let mut states = vec![BlockState::new(recipe.name)];
    for (key, values) in recipe.variants {
        let mut next = states.clone();
        for state in &states {
            for value in *values {
                next.push(state.clone().with_property(*key, *value));
            }
        }
        states = next;
    }
    states
}

fn variant_color(recipe: &BlockRecipe, state: &BlockState) -> RgbaPixel {
    // A snow cover swaps the whole top for white, the one variant-driven
    // color change the recipe table models.
    if state.property("snowy") == Some("true") {
        return rgba(0xf1, 0xfc, 0xfc, 0xff);
    }
    recipe.color
}

/// An isometric cube sprite, `2t` wide and `2t` tall: a 2:1 top diamond over
/// two side faces. The two visible sides swap their shading on odd rotations
/// so lighting stays anchored to the world, not the screen.
fn draw_isometric_cube(
    t: u32,
    color: RgbaPixel,
    shape: Shape,
    faces: u8,
    rotation: Rotation,
) -> Pixmap {
    let size = 2 * t;
    let mut sprite = Pixmap::new(size, size);
    let t = t as i32;

    let (left_shade, right_shade) = if rotation.steps() % 2 == 0 {
        (200u8, 152u8)
    } else {
        (152u8, 200u8)
    };
    let left_color = rgba_multiply(color, left_shade, left_shade, left_shade, 255);
    let right_color = rgba_multiply(color, right_shade, right_shade, right_shade, 255);

    // Liquids only ever show their surface.
    let (draw_left, draw_right) = match shape {
        Shape::Liquid => (false, false),
        _ => (faces & FACE_LEFT != 0, faces & FACE_RIGHT != 0),
    };
    let draw_top = faces & FACE_TOP != 0 || shape == Shape::Liquid;

    if draw_left {
        // West face: from (0, t/2) sloping down to (t, t), one block tall.
        for col in 0..t {
            let top = t / 2 + (col + 1) / 2;
            for row in top..top + t {
                sprite.set(col, row, left_color);
            }
        }
    }
    if draw_right {
        // South face: from (t, t) sloping up to (2t, t/2).
        for col in t..2 * t {
            let top = t - (col - t + 1) / 2;
            for row in top + t / 2..top + t / 2 + t {
                sprite.set(col, row, right_color);
            }
        }
    }
    if draw_top {
        // Top diamond centered on (t, t/2).
        for col in 0..2 * t {
            let dx = (col - t).abs();
            let spread = (t - dx) / 2;
            for row in t / 2 - spread..t / 2 + spread {
                sprite.set(col, row, color);
            }
        }
    }
    sprite
}

/// A flat `t x t` top face for the top-down view.
fn draw_flat_top(t: u32, color: RgbaPixel) -> Pixmap {
    let mut sprite = Pixmap::new(t, t);
    sprite.fill(color);
    sprite
}

/// A `t x t` sprite for the side view: top face above, front face below.
/// Blocks step half a sprite vertically, so consecutive blocks overlap.
fn draw_side_face(t: u32, color: RgbaPixel) -> Pixmap {
    let mut sprite = Pixmap::new(t, t);
    let front = rgba_multiply(color, 200, 200, 200, 255);
    let t = t as i32;
    for y in 0..t {
        let c = if y < t / 2 { color } else { front };
        for x in 0..t {
            sprite.set(x, y, c);
        }
    }
    sprite
}
