//! Reading and writing tile images.
//!
//! The renderer only ever sees the [`ImageCodec`] trait; the implementations
//! here delegate to the `image` crate. Writes go to a temporary sibling file
//! first and are renamed into place, so a crash never leaves a half-written
//! tile behind.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use thiserror::Error;

use super::{blend, rgba, Pixmap, RgbaPixel};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("image {0} has invalid dimensions {1}x{2}")]
    InvalidDimensions(PathBuf, u32, u32),
}

/// Encodes and decodes tile images on disk.
pub trait ImageCodec: Send + Sync {
    /// File extension without the dot, e.g. `png`.
    fn extension(&self) -> &'static str;

    fn read(&self, path: &Path) -> Result<Pixmap, CodecError>;

    fn write(&self, image: &Pixmap, path: &Path) -> Result<(), CodecError>;
}

fn to_rgba_bytes(image: &Pixmap) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(image.pixels().len() * 4);
    for pixel in image.pixels() {
        bytes.extend_from_slice(&pixel.to_le_bytes());
    }
    bytes
}

fn from_rgba_bytes(width: u32, height: u32, bytes: &[u8]) -> Pixmap {
    let pixels = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Pixmap::from_raw(width, height, pixels).expect("pixel count matches dimensions")
}

fn read_rgba(path: &Path) -> Result<Pixmap, CodecError> {
    let decoded = image::open(path)?.to_rgba8();
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(CodecError::InvalidDimensions(path.to_path_buf(), width, height));
    }
    Ok(from_rgba_bytes(width, height, decoded.as_raw()))
}

/// Runs `write` against a temporary file next to `path`, then renames the
/// result into place.
fn write_atomically(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> Result<(), CodecError>,
) -> Result<(), CodecError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut writer = BufWriter::new(File::create(&tmp)?);
    match write(&mut writer) {
        Ok(()) => {
            drop(writer);
            fs::rename(&tmp, path)?;
            Ok(())
        }
        Err(err) => {
            drop(writer);
            let _ = fs::remove_file(&tmp);
            Err(err)
        }
    }
}

/// PNG tiles, with alpha.
#[derive(Clone, Copy, Debug, Default)]
pub struct PngCodec;

impl ImageCodec for PngCodec {
    fn extension(&self) -> &'static str {
        "png"
    }

    fn read(&self, path: &Path) -> Result<Pixmap, CodecError> {
        read_rgba(path)
    }

    fn write(&self, image: &Pixmap, path: &Path) -> Result<(), CodecError> {
        let bytes = to_rgba_bytes(image);
        write_atomically(path, |writer| {
            PngEncoder::new(writer)
                .write_image(&bytes, image.width(), image.height(), ExtendedColorType::Rgba8)
                .map_err(CodecError::from)
        })
    }
}

/// JPEG tiles. JPEG has no alpha channel, so translucent pixels are
/// composited onto the configured background color before encoding.
#[derive(Clone, Copy, Debug)]
pub struct JpegCodec {
    pub quality: u8,
    pub background: RgbaPixel,
}

impl JpegCodec {
    pub fn new(quality: u8, background: RgbaPixel) -> JpegCodec {
        JpegCodec {
            quality,
            background,
        }
    }
}

impl ImageCodec for JpegCodec {
    fn extension(&self) -> &'static str {
        "jpg"
    }

    fn read(&self, path: &Path) -> Result<Pixmap, CodecError> {
        read_rgba(path)
    }

    fn write(&self, image: &Pixmap, path: &Path) -> Result<(), CodecError> {
        let opaque_background = self.background | 0xff00_0000;
        let mut bytes = Vec::with_capacity(image.pixels().len() * 3);
        for &pixel in image.pixels() {
            let mut flattened = opaque_background;
            blend(&mut flattened, pixel);
            let [r, g, b, _] = flattened.to_le_bytes();
            bytes.extend_from_slice(&[r, g, b]);
        }

        write_atomically(path, |writer| {
            JpegEncoder::new_with_quality(writer, self.quality)
                .write_image(&bytes, image.width(), image.height(), ExtendedColorType::Rgb8)
                .map_err(CodecError::from)
        })
    }
}

/// Builds the codec for a map's configured image format.
pub fn codec_for(
    format: crate::config::ImageFormat,
    jpeg_quality: u8,
    background: RgbaPixel,
) -> Box<dyn ImageCodec> {
    match format {
        crate::config::ImageFormat::Png => Box::new(PngCodec),
        crate::config::ImageFormat::Jpeg => Box::new(JpegCodec::new(jpeg_quality, background)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkered(size: u32) -> Pixmap {
        let mut img = Pixmap::new(size, size);
        for y in 0..size as i32 {
            for x in 0..size as i32 {
                if (x + y) % 2 == 0 {
                    img.set(x, y, rgba(200, 30, 40, 255));
                }
            }
        }
        img
    }

    #[test]
    fn test_png_roundtrip_preserves_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        let img = checkered(8);

        PngCodec.write(&img, &path).unwrap();
        let read = PngCodec.read(&path).unwrap();
        assert_eq!(read, img);
        // No temp file left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_jpeg_write_flattens_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.jpg");
        let img = Pixmap::new(8, 8); // fully transparent

        let codec = JpegCodec::new(90, rgba(16, 32, 64, 0));
        codec.write(&img, &path).unwrap();
        let read = codec.read(&path).unwrap();
        // Transparent input becomes the background color (JPEG is lossy, so
        // only check it is close and fully opaque).
        let p = read.get(0, 0);
        assert_eq!(crate::image::rgba_alpha(p), 255);
        assert!((crate::image::rgba_red(p) as i32 - 16).abs() < 16);
        assert!((crate::image::rgba_blue(p) as i32 - 64).abs() < 16);
    }

    #[test]
    fn test_read_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PngCodec.read(&dir.path().join("nope.png")).is_err());
    }
}
