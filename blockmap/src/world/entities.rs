//! A side cache of tile entities, used to extract sign markers without
//! re-reading every chunk on every run.
//!
//! The cache lives in `entities.nbt.gz` next to the region files. A region's
//! entities are reused when the region file is older than the cache;
//! otherwise its chunks are rescanned and the cache rewritten.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::coord::{BlockPos, ChunkPos, RegionPos, Rotation, WorldCrop};
use crate::dispatch::ProgressSink;
use crate::region::RegionFile;
use crate::world::{World, WorldError};

/// A sign with its text extracted.
///
/// Sign lines may be stored as JSON. A line is treated as JSON when it is
/// `null` or wrapped in quotes or braces; a line that looks like JSON but
/// fails to parse is kept as raw text, with a warning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignEntity {
    pos: BlockPos,
    lines: [String; 4],
    text: String,
}

impl SignEntity {
    pub fn new(pos: BlockPos, raw_lines: [String; 4]) -> SignEntity {
        let lines = if raw_lines.iter().all(|line| is_json_line(line)) {
            raw_lines.map(|line| parse_json_line(&line))
        } else {
            raw_lines
        };
        let text = lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        SignEntity { pos, lines, text }
    }

    pub fn pos(&self) -> BlockPos {
        self.pos
    }

    pub fn lines(&self) -> &[String; 4] {
        &self.lines
    }

    /// All non-empty lines joined with single spaces.
    pub fn text(&self) -> &str {
        &self.text
    }
}

fn is_json_line(line: &str) -> bool {
    if line.is_empty() {
        return false;
    }
    let bytes = line.as_bytes();
    line == "null"
        || (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
        || (bytes[0] == b'{' && bytes[bytes.len() - 1] == b'}')
}

/// Extracts the plain text of one JSON sign line. Falls back to the raw
/// line when the JSON is malformed.
fn parse_json_line(line: &str) -> String {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            warn!(line, error = %err, "sign line looks like JSON but does not parse, keeping raw text");
            return line.to_string();
        }
    };
    match extract_json_text(&value) {
        Some(text) => text,
        None => {
            warn!(line, "JSON sign line has no text component, keeping raw text");
            line.to_string()
        }
    }
}

/// The `{"text": ..., "extra": [...]}` component tree, flattened.
fn extract_json_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => Some(String::new()),
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Object(object) => {
            let mut text = object.get("text")?.as_str()?.to_string();
            if let Some(extra) = object.get("extra") {
                for part in extra.as_array()? {
                    text.push_str(&extract_json_text(part)?);
                }
            }
            Some(text)
        }
        _ => None,
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheNbt {
    regions: Vec<CacheRegionNbt>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheRegionNbt {
    x: i32,
    z: i32,
    chunks: Vec<CacheChunkNbt>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheChunkNbt {
    x: i32,
    z: i32,
    entities: Vec<fastnbt::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkEntitiesNbt {
    #[serde(rename = "block_entities", default)]
    block_entities: Vec<fastnbt::Value>,
}

/// The per-world entities cache. All positions are in the on-disk frame.
pub struct EntitiesCache {
    cache_file: PathBuf,
    entities: HashMap<RegionPos, HashMap<ChunkPos, Vec<fastnbt::Value>>>,
}

impl EntitiesCache {
    pub fn new(world: &World) -> EntitiesCache {
        EntitiesCache {
            cache_file: world.region_dir().join("entities.nbt.gz"),
            entities: HashMap::new(),
        }
    }

    /// Loads the cache file. Returns its modification time in seconds, or 0
    /// when there is no usable cache.
    fn read_cache_file(&mut self) -> u64 {
        let Ok(mut file) = File::open(&self.cache_file) else {
            debug!(file = %self.cache_file.display(), "no entities cache yet");
            return 0;
        };
        let mut raw = Vec::new();
        if let Err(err) = GzDecoder::new(&mut file).read_to_end(&mut raw) {
            warn!(error = %err, "entities cache is unreadable, rescanning everything");
            return 0;
        }
        let nbt: CacheNbt = match fastnbt::from_bytes(&raw) {
            Ok(nbt) => nbt,
            Err(err) => {
                warn!(error = %err, "entities cache is corrupt, rescanning everything");
                return 0;
            }
        };

        for region in nbt.regions {
            let chunks = self
                .entities
                .entry(RegionPos::new(region.x, region.z))
                .or_default();
            for chunk in region.chunks {
                chunks.insert(ChunkPos::new(chunk.x, chunk.z), chunk.entities);
            }
        }

        file.metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |age| age.as_secs())
    }

    fn write_cache_file(&self) -> Result<(), WorldError> {
        let mut nbt = CacheNbt::default();
        for (region_pos, chunks) in &self.entities {
            let mut region = CacheRegionNbt {
                x: region_pos.x,
                z: region_pos.z,
                chunks: Vec::new(),
            };
            for (chunk_pos, entities) in chunks {
                region.chunks.push(CacheChunkNbt {
                    x: chunk_pos.x,
                    z: chunk_pos.z,
                    entities: entities.clone(),
                });
            }
            nbt.regions.push(region);
        }

        let raw = fastnbt::to_bytes(&nbt)
            .map_err(|err| std::io::Error::other(format!("entities cache encode: {}", err)))?;
        let mut encoder = GzEncoder::new(File::create(&self.cache_file)?, Compression::default());
        encoder.write_all(&raw)?;
        encoder.finish()?;
        Ok(())
    }

    /// Brings the cache up to date with the world's region files: regions
    /// older than the cache are kept, newer ones are rescanned chunk by
    /// chunk, and the cache file is rewritten.
    pub fn update(
        &mut self,
        world: &World,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<(), WorldError> {
        let cache_time = self.read_cache_file();

        let regions = world.available_regions();
        if let Some(progress) = progress {
            progress.set_max(regions.len());
        }
        for &region_pos in regions {
            let path = world.region_path(region_pos);
            let region_mtime = std::fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
                .map_or(u64::MAX, |age| age.as_secs());
            if region_mtime < cache_time {
                debug!(region = %region_pos, "entities are cached");
                if let Some(progress) = progress {
                    progress.advance(1);
                }
                continue;
            }

            // Scan in the on-disk frame, independent of the world rotation.
            let mut region = RegionFile::new(&path, Rotation::TopLeft)?;
            region.read()?;
            let region_entities = self.entities.entry(region.pos()).or_default();
            for chunk_pos in region.containing_chunks().clone() {
                if region
                    .chunk_timestamp(chunk_pos)
                    .is_some_and(|ts| (ts as u64) < cache_time)
                {
                    continue;
                }
                let Some((data, compression)) = region.chunk_data(chunk_pos) else {
                    continue;
                };
                match read_chunk_entities(data, compression) {
                    Ok(entities) => {
                        region_entities.insert(chunk_pos, entities);
                    }
                    Err(err) => {
                        warn!(chunk = %chunk_pos, error = %err, "skipping chunk with unreadable entities");
                    }
                }
            }
            if let Some(progress) = progress {
                progress.advance(1);
            }
        }

        self.write_cache_file()
    }

    /// All signs inside the crop, with their text extracted.
    pub fn signs(&self, crop: &WorldCrop) -> Vec<SignEntity> {
        let mut signs = Vec::new();
        for (region_pos, chunks) in &self.entities {
            if !crop.is_region_contained(*region_pos) {
                continue;
            }
            for (chunk_pos, entities) in chunks {
                if !crop.is_chunk_contained(*chunk_pos) {
                    continue;
                }
                for entity in entities {
                    if let Some(sign) = sign_from_entity(entity, crop) {
                        signs.push(sign);
                    }
                }
            }
        }
        signs.sort_by_key(|sign| (sign.pos.z, sign.pos.x, sign.pos.y));
        signs
    }
}

fn read_chunk_entities(
    data: &[u8],
    compression: u8,
) -> Result<Vec<fastnbt::Value>, crate::region::ChunkError> {
    let raw = crate::region::decompress(data, compression)?;
    let nbt: ChunkEntitiesNbt = fastnbt::from_bytes(&raw)?;
    Ok(nbt.block_entities)
}

fn sign_from_entity(entity: &fastnbt::Value, crop: &WorldCrop) -> Option<SignEntity> {
    let fastnbt::Value::Compound(fields) = entity else {
        return None;
    };
    let id = string_field(fields, "id")?;
    if id != "minecraft:sign" && id != "Sign" {
        return None;
    }
    let pos = BlockPos::new(
        int_field(fields, "x")?,
        int_field(fields, "z")?,
        int_field(fields, "y")?,
    );
    if !crop.is_block_contained_xz(pos) || !crop.is_block_contained_y(pos) {
        return None;
    }
    let lines = [
        string_field(fields, "Text1").unwrap_or_default(),
        string_field(fields, "Text2").unwrap_or_default(),
        string_field(fields, "Text3").unwrap_or_default(),
        string_field(fields, "Text4").unwrap_or_default(),
    ];
    Some(SignEntity::new(pos, lines))
}

fn string_field(fields: &HashMap<String, fastnbt::Value>, key: &str) -> Option<String> {
    match fields.get(key) {
        Some(fastnbt::Value::String(value)) => Some(value.clone()),
        _ => None,
    }
}

fn int_field(fields: &HashMap<String, fastnbt::Value>, key: &str) -> Option<i32> {
    match fields.get(key) {
        Some(fastnbt::Value::Int(value)) => Some(*value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(lines: [&str; 4]) -> SignEntity {
        SignEntity::new(
            BlockPos::new(0, 0, 64),
            lines.map(|line| line.to_string()),
        )
    }

    #[test]
    fn test_plain_sign_text() {
        let sign = sign(["hello", "", "world", ""]);
        assert_eq!(sign.text(), "hello world");
    }

    #[test]
    fn test_json_sign_lines_are_extracted() {
        let sign = sign([
            r#"{"text":"spawn"}"#,
            r#""town hall""#,
            "null",
            r#"{"text":"go ","extra":[{"text":"east"}]}"#,
        ]);
        assert_eq!(sign.lines()[0], "spawn");
        assert_eq!(sign.lines()[1], "town hall");
        assert_eq!(sign.lines()[2], "");
        assert_eq!(sign.lines()[3], "go east");
        assert_eq!(sign.text(), "spawn town hall go east");
    }

    #[test]
    fn test_malformed_json_line_keeps_raw_text() {
        // Looks like JSON by the heuristic, but is not.
        let sign = sign([r#"{not json}"#, r#""fine""#, "null", "null"]);
        assert_eq!(sign.lines()[0], "{not json}");
        assert_eq!(sign.lines()[1], "fine");
    }

    #[test]
    fn test_mixed_lines_disable_json_parsing() {
        // One raw line means the sign predates the JSON format.
        let sign = sign([r#""quoted""#, "plain", "", ""]);
        assert_eq!(sign.lines()[0], r#""quoted""#);
        assert_eq!(sign.text(), r#""quoted" plain"#);
    }

    #[test]
    fn test_json_line_detection() {
        assert!(is_json_line("null"));
        assert!(is_json_line(r#""x""#));
        assert!(is_json_line("{}"));
        assert!(!is_json_line(""));
        assert!(!is_json_line("plain"));
        assert!(!is_json_line(r#""unterminated"#));
    }

    #[test]
    fn test_sign_entity_filtering() {
        let mut fields = HashMap::new();
        fields.insert("id".to_string(), fastnbt::Value::String("minecraft:sign".to_string()));
        fields.insert("x".to_string(), fastnbt::Value::Int(10));
        fields.insert("y".to_string(), fastnbt::Value::Int(70));
        fields.insert("z".to_string(), fastnbt::Value::Int(-5));
        fields.insert("Text1".to_string(), fastnbt::Value::String("hi".to_string()));
        let entity = fastnbt::Value::Compound(fields.clone());

        let sign = sign_from_entity(&entity, &WorldCrop::default()).unwrap();
        assert_eq!(sign.pos(), BlockPos::new(10, -5, 70));
        assert_eq!(sign.text(), "hi");

        // Cropped out.
        let crop = WorldCrop {
            max_x: Some(0),
            ..WorldCrop::default()
        };
        assert_eq!(sign_from_entity(&entity, &crop), None);

        // Not a sign.
        fields.insert("id".to_string(), fastnbt::Value::String("minecraft:chest".to_string()));
        assert_eq!(sign_from_entity(&fastnbt::Value::Compound(fields), &WorldCrop::default()), None);
    }
}
