//! Decoded chunks and their palette-based block storage.
//!
//! A chunk is stored as up to 16 vertical sections. Each section carries a
//! palette of block states plus, when it holds more than one state, an array
//! of palette indices packed into 64-bit words. Indices never span words;
//! the index width is `ceil(log2(palette size))` with a 4-bit minimum.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blockstate::{BlockState, BlockStateRegistry};
use crate::coord::{ChunkPos, CHUNK_BLOCKS, CHUNK_HEIGHT};
use crate::sprite::biome;

const SECTIONS: usize = (CHUNK_HEIGHT / CHUNK_BLOCKS) as usize;
const SECTION_BLOCKS: usize = (CHUNK_BLOCKS * CHUNK_BLOCKS * CHUNK_BLOCKS) as usize;
const SECTION_BIOMES: usize = SECTION_BLOCKS / (4 * 4 * 4);

/// Why a chunk failed to load from its region file.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk does not exist")]
    NotExist,

    #[error("chunk payload could not be decompressed: {0}")]
    DataInvalid(#[source] std::io::Error),

    #[error("unsupported chunk compression tag {0}")]
    UnsupportedCompression(u8),

    #[error("chunk NBT is invalid: {0}")]
    Nbt(#[from] fastnbt::error::Error),
}

/// On-disk chunk schema, the subset the renderer needs.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkNbt {
    #[serde(rename = "xPos")]
    pub x_pos: i32,
    #[serde(rename = "zPos")]
    pub z_pos: i32,
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub sections: Vec<SectionNbt>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SectionNbt {
    #[serde(rename = "Y")]
    pub y: i8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_states: Option<BlockStatesNbt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biomes: Option<BiomesNbt>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockStatesNbt {
    pub palette: Vec<PaletteEntryNbt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<fastnbt::LongArray>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaletteEntryNbt {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Properties", default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BiomesNbt {
    pub palette: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<fastnbt::LongArray>,
}

#[derive(Clone, Copy, Debug)]
struct PaletteIds {
    /// Registry id of the full block state.
    full: u16,
    /// Registry id of the sprite-cache key (unknown properties stripped).
    render: u16,
}

struct Section {
    palette: Vec<PaletteIds>,
    /// 4096 palette indices in YZX order; `None` means "all palette entry 0".
    indices: Option<Vec<u16>>,
    biome_palette: Vec<u8>,
    /// 64 biome palette indices for the 4x4x4 biome cells; `None` means all 0.
    biome_indices: Option<Vec<u8>>,
}

/// A decoded chunk: block and biome lookups against interned state ids.
///
/// All coordinates are local to the chunk and in the on-disk frame; the world
/// view handles rotation before it gets here.
pub struct Chunk {
    pos: ChunkPos,
    air_id: u16,
    fully_generated: bool,
    sections: Vec<Option<Section>>,
}

impl Chunk {
    /// Decodes a chunk from uncompressed NBT, interning every palette entry.
    pub fn decode(
        data: &[u8],
        registry: &BlockStateRegistry,
    ) -> Result<Chunk, fastnbt::error::Error> {
        let nbt: ChunkNbt = fastnbt::from_bytes(data)?;

        let mut sections: Vec<Option<Section>> = (0..SECTIONS).map(|_| None).collect();
        for section_nbt in nbt.sections {
            let index = section_nbt.y;
            if index < 0 || index as usize >= SECTIONS {
                continue;
            }
            let Some(block_states) = section_nbt.block_states else {
                continue;
            };
            if block_states.palette.is_empty() {
                continue;
            }

            let palette: Vec<PaletteIds> = block_states
                .palette
                .iter()
                .map(|entry| {
                    let mut state = BlockState::new(entry.name.clone());
                    if let Some(properties) = &entry.properties {
                        for (key, value) in properties {
                            state.set_property(key.clone(), value.clone());
                        }
                    }
                    let full = registry.get_or_intern(&state);
                    PaletteIds {
                        full,
                        render: registry.sprite_key_id(full),
                    }
                })
                .collect();

            let indices = block_states
                .data
                .as_ref()
                .map(|data| unpack_indices(data, palette.len(), SECTION_BLOCKS));

            let (biome_palette, biome_indices) = match section_nbt.biomes {
                Some(biomes) if !biomes.palette.is_empty() => {
                    let palette: Vec<u8> =
                        biomes.palette.iter().map(|name| biome::biome_id(name)).collect();
                    let indices = biomes.data.as_ref().map(|data| {
                        unpack_indices(data, palette.len(), SECTION_BIOMES)
                            .into_iter()
                            .map(|v| v as u8)
                            .collect()
                    });
                    (palette, indices)
                }
                _ => (vec![biome::DEFAULT_BIOME], None),
            };

            sections[index as usize] = Some(Section {
                palette,
                indices,
                biome_palette,
                biome_indices,
            });
        }

        Ok(Chunk {
            pos: ChunkPos::new(nbt.x_pos, nbt.z_pos),
            air_id: registry.air_id(),
            fully_generated: nbt.status.as_deref().is_none_or(|s| s == "minecraft:full"),
            sections,
        })
    }

    /// Chunk position in the on-disk frame, as recorded in the chunk itself.
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Whether world generation finished for this chunk.
    pub fn is_fully_generated(&self) -> bool {
        self.fully_generated
    }

    /// Registry id of the block at local `(x, z, y)`. Out-of-range or empty
    /// positions are air.
    pub fn block_id(&self, x: i32, z: i32, y: i32) -> u16 {
        self.palette_ids(x, z, y).map_or(self.air_id, |ids| ids.full)
    }

    /// Sprite-cache key id of the block at local `(x, z, y)`.
    pub fn render_id(&self, x: i32, z: i32, y: i32) -> u16 {
        self.palette_ids(x, z, y)
            .map_or(self.air_id, |ids| ids.render)
    }

    fn palette_ids(&self, x: i32, z: i32, y: i32) -> Option<PaletteIds> {
        if !(0..CHUNK_BLOCKS).contains(&x) || !(0..CHUNK_BLOCKS).contains(&z) {
            return None;
        }
        if !(0..CHUNK_HEIGHT).contains(&y) {
            return None;
        }
        let section = self.sections[(y / CHUNK_BLOCKS) as usize].as_ref()?;
        let block = ((y % CHUNK_BLOCKS) * CHUNK_BLOCKS + z) * CHUNK_BLOCKS + x;
        let palette_index = match &section.indices {
            Some(indices) => indices[block as usize] as usize,
            None => 0,
        };
        section.palette.get(palette_index).copied()
    }

    /// Biome id of the 4x4x4 biome cell containing local `(x, z, y)`.
    pub fn biome_id(&self, x: i32, z: i32, y: i32) -> u8 {
        if !(0..CHUNK_BLOCKS).contains(&x)
            || !(0..CHUNK_BLOCKS).contains(&z)
            || !(0..CHUNK_HEIGHT).contains(&y)
        {
            return biome::DEFAULT_BIOME;
        }
        let Some(section) = self.sections[(y / CHUNK_BLOCKS) as usize].as_ref() else {
            return biome::DEFAULT_BIOME;
        };
        let cell = ((y % CHUNK_BLOCKS) / 4 * 4 + z / 4) * 4 + x / 4;
        let palette_index = match &section.biome_indices {
            Some(indices) => indices[cell as usize] as usize,
            None => 0,
        };
        section
            .biome_palette
            .get(palette_index)
            .copied()
            .unwrap_or(biome::DEFAULT_BIOME)
    }

    /// Highest non-air block in the local column `(x, z)`.
    pub fn top_non_air(&self, x: i32, z: i32) -> Option<i32> {
        for section_index in (0..SECTIONS).rev() {
            if self.sections[section_index].is_none() {
                continue;
            }
            let base = section_index as i32 * CHUNK_BLOCKS;
            for y in (base..base + CHUNK_BLOCKS).rev() {
                if self.block_id(x, z, y) != self.air_id {
                    return Some(y);
                }
            }
        }
        None
    }
}

/// Unpacks `count` palette indices from 64-bit words.
///
/// The index width is `ceil(log2(palette))` with a 4-bit minimum, and indices
/// never span a word boundary. Missing trailing data yields index 0.
fn unpack_indices(data: &fastnbt::LongArray, palette_len: usize, count: usize) -> Vec<u16> {
    let bits = index_bits(palette_len, 4);
    let per_word = 64 / bits;
    let mask = (1u64 << bits) - 1;

    let mut out = vec![0u16; count];
    let mut written = 0;
    'words: for word in data.iter() {
        let mut word = *word as u64;
        for _ in 0..per_word {
            if written >= count {
                break 'words;
            }
            out[written] = (word & mask) as u16;
            word >>= bits;
            written += 1;
        }
    }
    out
}

fn index_bits(palette_len: usize, minimum: u32) -> u32 {
    let significant = usize::BITS - palette_len.saturating_sub(1).leading_zeros();
    significant.max(minimum)
}
