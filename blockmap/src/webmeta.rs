//! The metadata document the web viewer and incremental renders read.
//!
//! One JSON file, `maps.json`, lives in the output root. It records, per
//! map, the max zoom, tile size and image format for the viewer, plus the
//! per-rotation last-render timestamps and tile offsets the next run needs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coord::{Rotation, TilePos};

const META_FILENAME: &str = "maps.json";

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stored state of one map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapMeta {
    #[serde(default)]
    pub max_zoom: u32,
    #[serde(default)]
    pub tile_size: u32,
    #[serde(default)]
    pub image_format: String,
    /// Unix seconds of the last completed render, indexed by rotation.
    /// Zero means "never rendered".
    #[serde(default)]
    pub last_rendered: [u64; 4],
    /// Tile offset applied by centering, indexed by rotation.
    #[serde(default)]
    pub tile_offsets: [TilePos; 4],
}

impl MapMeta {
    pub fn last_rendered(&self, rotation: Rotation) -> u64 {
        self.last_rendered[rotation.steps() as usize]
    }

    pub fn set_last_rendered(&mut self, rotation: Rotation, timestamp: u64) {
        self.last_rendered[rotation.steps() as usize] = timestamp;
    }

    pub fn set_tile_offset(&mut self, rotation: Rotation, offset: TilePos) {
        self.tile_offsets[rotation.steps() as usize] = offset;
    }
}

/// The whole metadata document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebMeta {
    #[serde(default)]
    pub maps: BTreeMap<String, MapMeta>,
}

impl WebMeta {
    fn path(output_dir: &Path) -> PathBuf {
        output_dir.join(META_FILENAME)
    }

    /// Reads the document from the output root. A missing file is an empty
    /// document; a corrupt one is an error so a typo cannot silently force
    /// a full re-render.
    pub fn read(output_dir: &Path) -> Result<WebMeta, MetaError> {
        let path = Self::path(output_dir);
        if !path.exists() {
            return Ok(WebMeta::default());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Writes the document atomically (temp file, then rename).
    pub fn write(&self, output_dir: &Path) -> Result<(), MetaError> {
        let path = Self::path(output_dir);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn map(&self, name: &str) -> Option<&MapMeta> {
        self.maps.get(name)
    }

    pub fn map_mut(&mut self, name: &str) -> &mut MapMeta {
        self.maps.entry(name.to_string()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let meta = WebMeta::read(dir.path()).unwrap();
        assert!(meta.maps.is_empty());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = WebMeta::default();
        {
            let map = meta.map_mut("overworld_iso");
            map.max_zoom = 5;
            map.tile_size = 512;
            map.image_format = "png".to_string();
            map.set_last_rendered(Rotation::TopRight, 1234);
            map.set_tile_offset(Rotation::TopRight, TilePos::new(3, -2));
        }
        meta.write(dir.path()).unwrap();

        let read = WebMeta::read(dir.path()).unwrap();
        assert_eq!(read, meta);
        let map = read.map("overworld_iso").unwrap();
        assert_eq!(map.last_rendered(Rotation::TopRight), 1234);
        assert_eq!(map.last_rendered(Rotation::TopLeft), 0);
        // No temp file left behind.
        assert!(!dir.path().join("maps.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(META_FILENAME), "{ not json").unwrap();
        assert!(matches!(
            WebMeta::read(dir.path()),
            Err(MetaError::Json(_))
        ));
    }
}
