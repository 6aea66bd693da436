//! The TOML configuration file: worlds, maps, output settings.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::coord::{BlockPos, Rotation, WorldCrop};
use crate::image::{rgba, RgbaPixel};
use crate::render::RenderView;
use crate::world::Dimension;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("config file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("world '{0}': {1}")]
    World(String, String),

    #[error("map '{0}': {1}")]
    Map(String, String),
}

/// Output image container of a map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFileRaw {
    output_dir: PathBuf,
    #[serde(default)]
    background_color: Option<String>,
    #[serde(default)]
    world: BTreeMap<String, WorldSectionRaw>,
    #[serde(default)]
    map: BTreeMap<String, MapSectionRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorldSectionRaw {
    input_dir: PathBuf,
    #[serde(default)]
    dimension: Option<String>,
    #[serde(default)]
    min_x: Option<i32>,
    #[serde(default)]
    max_x: Option<i32>,
    #[serde(default)]
    min_z: Option<i32>,
    #[serde(default)]
    max_z: Option<i32>,
    #[serde(default)]
    min_y: Option<i32>,
    #[serde(default)]
    max_y: Option<i32>,
    #[serde(default)]
    center_x: Option<i32>,
    #[serde(default)]
    center_z: Option<i32>,
    #[serde(default)]
    radius: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MapSectionRaw {
    world: String,
    #[serde(default)]
    render_view: Option<String>,
    #[serde(default)]
    texture_size: Option<u32>,
    #[serde(default)]
    rotations: Option<Vec<String>>,
    #[serde(default)]
    image_format: Option<String>,
    #[serde(default)]
    jpeg_quality: Option<u8>,
    #[serde(default)]
    use_image_mtimes: Option<bool>,
    #[serde(default)]
    chunk_cache_chunks: Option<u64>,
}

/// A validated world section.
#[derive(Clone, Debug)]
pub struct WorldConfig {
    pub input_dir: PathBuf,
    pub dimension: Dimension,
    pub crop: WorldCrop,
}

/// A validated map section.
#[derive(Clone, Debug)]
pub struct MapConfig {
    pub name: String,
    pub world: String,
    pub view: RenderView,
    pub texture_size: u32,
    pub rotations: Vec<Rotation>,
    pub image_format: ImageFormat,
    pub jpeg_quality: u8,
    pub use_image_mtimes: bool,
    pub chunk_cache_chunks: u64,
}

/// The validated configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub output_dir: PathBuf,
    pub background_color: RgbaPixel,
    pub worlds: BTreeMap<String, WorldConfig>,
    pub maps: Vec<MapConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Config::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Config, ConfigError> {
        let raw: ConfigFileRaw = toml::from_str(raw)?;

        let background_color = match &raw.background_color {
            Some(hex) => parse_color(hex).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "background_color '{}' is not a #rrggbb color",
                    hex
                ))
            })?,
            None => rgba(0xe0, 0xe0, 0xe0, 0xff),
        };

        let mut worlds = BTreeMap::new();
        for (name, section) in raw.world {
            worlds.insert(name.clone(), validate_world(&name, section)?);
        }

        if raw.map.is_empty() {
            return Err(ConfigError::Invalid("no maps configured".to_string()));
        }
        let mut maps = Vec::new();
        for (name, section) in raw.map {
            maps.push(validate_map(&name, section, &worlds)?);
        }

        Ok(Config {
            output_dir: raw.output_dir,
            background_color,
            worlds,
            maps,
        })
    }

    pub fn map(&self, name: &str) -> Option<&MapConfig> {
        self.maps.iter().find(|map| map.name == name)
    }

    pub fn world(&self, name: &str) -> Option<&WorldConfig> {
        self.worlds.get(name)
    }
}

fn validate_world(name: &str, section: WorldSectionRaw) -> Result<WorldConfig, ConfigError> {
    let dimension = match section.dimension.as_deref() {
        None => Dimension::Overworld,
        Some(raw) => Dimension::parse(raw).ok_or_else(|| {
            ConfigError::World(
                name.to_string(),
                format!("unknown dimension '{}' (overworld, nether, end)", raw),
            )
        })?,
    };

    let circle = match (section.center_x, section.center_z, section.radius) {
        (None, None, None) => None,
        (Some(x), Some(z), Some(radius)) if radius > 0 => {
            Some((BlockPos::new(x, z, 0), radius))
        }
        _ => {
            return Err(ConfigError::World(
                name.to_string(),
                "a circular crop needs center_x, center_z and a positive radius".to_string(),
            ))
        }
    };
    if circle.is_some() && (section.min_x.is_some() || section.max_x.is_some()
        || section.min_z.is_some() || section.max_z.is_some())
    {
        return Err(ConfigError::World(
            name.to_string(),
            "circular and rectangular crops cannot be combined".to_string(),
        ));
    }

    Ok(WorldConfig {
        input_dir: section.input_dir,
        dimension,
        crop: WorldCrop {
            min_x: section.min_x,
            max_x: section.max_x,
            min_z: section.min_z,
            max_z: section.max_z,
            min_y: section.min_y,
            max_y: section.max_y,
            circle,
        },
    })
}

fn validate_map(
    name: &str,
    section: MapSectionRaw,
    worlds: &BTreeMap<String, WorldConfig>,
) -> Result<MapConfig, ConfigError> {
    if !worlds.contains_key(&section.world) {
        return Err(ConfigError::Map(
            name.to_string(),
            format!("references unknown world '{}'", section.world),
        ));
    }

    let view = match section.render_view.as_deref() {
        None => RenderView::Isometric,
        Some(raw) => RenderView::parse(raw).ok_or_else(|| {
            ConfigError::Map(
                name.to_string(),
                format!("unknown render_view '{}' (isometric, topdown, side)", raw),
            )
        })?,
    };

    let texture_size = section.texture_size.unwrap_or(16);
    if texture_size == 0 || texture_size % 2 != 0 || texture_size > 64 {
        return Err(ConfigError::Map(
            name.to_string(),
            format!("texture_size {} must be even and in 2..=64", texture_size),
        ));
    }

    let rotations = match &section.rotations {
        None => vec![Rotation::TopLeft],
        Some(raw) => {
            let mut rotations = Vec::new();
            for entry in raw {
                let rotation = Rotation::parse(entry).ok_or_else(|| {
                    ConfigError::Map(
                        name.to_string(),
                        format!("unknown rotation '{}'", entry),
                    )
                })?;
                if !rotations.contains(&rotation) {
                    rotations.push(rotation);
                }
            }
            if rotations.is_empty() {
                return Err(ConfigError::Map(
                    name.to_string(),
                    "rotations must not be empty".to_string(),
                ));
            }
            rotations
        }
    };

    let image_format = match section.image_format.as_deref() {
        None | Some("png") => ImageFormat::Png,
        Some("jpeg") | Some("jpg") => ImageFormat::Jpeg,
        Some(other) => {
            return Err(ConfigError::Map(
                name.to_string(),
                format!("unknown image_format '{}' (png, jpeg)", other),
            ))
        }
    };

    let jpeg_quality = section.jpeg_quality.unwrap_or(85);
    if !(1..=100).contains(&jpeg_quality) {
        return Err(ConfigError::Map(
            name.to_string(),
            format!("jpeg_quality {} must be in 1..=100", jpeg_quality),
        ));
    }

    Ok(MapConfig {
        name: name.to_string(),
        world: section.world,
        view,
        texture_size,
        rotations,
        image_format,
        jpeg_quality,
        use_image_mtimes: section.use_image_mtimes.unwrap_or(false),
        chunk_cache_chunks: section
            .chunk_cache_chunks
            .unwrap_or(crate::world::DEFAULT_CHUNK_CACHE_CHUNKS),
    })
}

/// Parses `#rrggbb` into an opaque pixel.
fn parse_color(hex: &str) -> Option<RgbaPixel> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(rgba(r, g, b, 0xff))
}
