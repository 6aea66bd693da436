//! The region file container format.
//!
//! A region file holds up to 32x32 chunks. The layout is bit-exact: an 8 KiB
//! header of 1024 big-endian location words (`offset_in_sectors << 8 |
//! sector_count`) followed by 1024 big-endian per-chunk modification times,
//! then the chunk payloads. Each payload starts with a big-endian 32-bit
//! length and a one-byte compression tag (1 = gzip, 2 = zlib).
//!
//! The file itself is rotation-agnostic; positions passed in are rotated back
//! to the on-disk frame before indexing.

pub mod chunk;

pub use chunk::{Chunk, ChunkError};

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};
use flate2::read::{GzDecoder, ZlibDecoder};
use thiserror::Error;

use crate::blockstate::BlockStateRegistry;
use crate::coord::{ChunkPos, RegionPos, Rotation, REGION_CHUNKS};

/// Size of one allocation sector.
pub const SECTOR_BYTES: usize = 4096;

/// Header size: locations plus timestamps.
pub const HEADER_BYTES: usize = 2 * SECTOR_BYTES;

/// Chunk slots per region.
pub const CHUNKS: usize = (REGION_CHUNKS * REGION_CHUNKS) as usize;

pub const COMPRESSION_GZIP: u8 = 1;
pub const COMPRESSION_ZLIB: u8 = 2;

#[derive(Debug, Error)]
pub enum RegionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} is not a region file name (expected r.X.Z.mca)")]
    BadFilename(PathBuf),

    #[error("region file {path} is truncated: {size} bytes, the header alone needs {HEADER_BYTES}")]
    TooShort { path: PathBuf, size: u64 },

    #[error("chunk slot {slot} of {path} points past the end of the file")]
    ChunkOutOfBounds { path: PathBuf, slot: usize },
}

#[derive(Clone, Debug, Default)]
struct ChunkSlot {
    present: bool,
    timestamp: u32,
    compression: u8,
    data: Vec<u8>,
}

/// An in-memory region file.
///
/// Slots are indexed `z * 32 + x` over the original (de-rotated) local chunk
/// coordinates. The set of contained chunks is exposed in the rotated frame.
pub struct RegionFile {
    path: PathBuf,
    pos: RegionPos,
    pos_original: RegionPos,
    rotation: Rotation,
    slots: Vec<ChunkSlot>,
    containing: BTreeSet<ChunkPos>,
}

impl RegionFile {
    /// Creates a handle for the region file at `path`. The region position is
    /// parsed from the file name; nothing is read yet.
    pub fn new(path: impl Into<PathBuf>, rotation: Rotation) -> Result<RegionFile, RegionError> {
        let path = path.into();
        let pos_original = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(RegionPos::from_filename)
            .ok_or_else(|| RegionError::BadFilename(path.clone()))?;
        Ok(RegionFile {
            path,
            pos: pos_original.rotated(rotation),
            pos_original,
            rotation,
            slots: vec![ChunkSlot::default(); CHUNKS],
            containing: BTreeSet::new(),
        })
    }

    /// Region position in the rotated frame.
    pub fn pos(&self) -> RegionPos {
        self.pos
    }

    /// Fully parses the header and all present chunk payloads.
    ///
    /// Succeeds even if individual chunk payloads are corrupt; those errors
    /// surface later in [`RegionFile::load_chunk`]. Fails if the header is
    /// truncated or a chunk's offset and length point past the end.
    pub fn read(&mut self) -> Result<(), RegionError> {
        self.read_inner(true)
    }

    /// Parses only the header: which chunks exist and their timestamps.
    pub fn read_only_headers(&mut self) -> Result<(), RegionError> {
        self.read_inner(false)
    }

    fn read_inner(&mut self, with_payloads: bool) -> Result<(), RegionError> {
        let mut file = File::open(&self.path)?;
        let size = file.metadata()?.len();
        if size < HEADER_BYTES as u64 {
            return Err(RegionError::TooShort {
                path: self.path.clone(),
                size,
            });
        }

        let raw = if with_payloads {
            let mut raw = Vec::with_capacity(size as usize);
            file.read_to_end(&mut raw)?;
            raw
        } else {
            let mut raw = vec![0u8; HEADER_BYTES];
            file.read_exact(&mut raw)?;
            raw
        };

        self.slots = vec![ChunkSlot::default(); CHUNKS];
        self.containing.clear();

        for slot_index in 0..CHUNKS {
            let location = read_u32_be(&raw, slot_index * 4);
            let timestamp = read_u32_be(&raw, SECTOR_BYTES + slot_index * 4);
            if location == 0 {
                continue;
            }

            let chunk_pos = self.slot_chunk_pos(slot_index);
            self.containing.insert(chunk_pos);
            let slot = &mut self.slots[slot_index];
            slot.present = true;
            slot.timestamp = timestamp;

            if !with_payloads {
                continue;
            }

            let offset = (location >> 8) as usize * SECTOR_BYTES;
            if offset + 5 > raw.len() {
                return Err(RegionError::ChunkOutOfBounds {
                    path: self.path.clone(),
                    slot: slot_index,
                });
            }
            let length = read_u32_be(&raw, offset) as usize;
            if length == 0 || offset + 4 + length > raw.len() {
                return Err(RegionError::ChunkOutOfBounds {
                    path: self.path.clone(),
                    slot: slot_index,
                });
            }
            let slot = &mut self.slots[slot_index];
            slot.compression = raw[offset + 4];
            slot.data = raw[offset + 5..offset + 4 + length].to_vec();
        }
        Ok(())
    }

    /// Reassembles the region file with 4 KiB sector alignment, preserving
    /// compression tags and timestamps. Writes to `filename` if given, the
    /// original path otherwise.
    pub fn write(&self, filename: Option<&Path>) -> Result<(), RegionError> {
        let path = filename.unwrap_or(&self.path);
        let mut writer = BufWriter::new(File::create(path)?);

        let mut locations = [0u32; CHUNKS];
        let mut next_sector = (HEADER_BYTES / SECTOR_BYTES) as u32;
        for (slot_index, slot) in self.slots.iter().enumerate() {
            if !slot.present {
                continue;
            }
            let payload_len = slot.data.len() + 5;
            let sectors = payload_len.div_ceil(SECTOR_BYTES) as u32;
            locations[slot_index] = (next_sector << 8) | (sectors & 0xff);
            next_sector += sectors;
        }

        for location in locations {
            writer.write_u32::<BigEndian>(location)?;
        }
        for slot in &self.slots {
            writer.write_u32::<BigEndian>(slot.timestamp)?;
        }
        for slot in &self.slots {
            if !slot.present {
                continue;
            }
            writer.write_u32::<BigEndian>(slot.data.len() as u32 + 1)?;
            writer.write_u8(slot.compression)?;
            writer.write_all(&slot.data)?;
            let written = slot.data.len() + 5;
            let padding = written.next_multiple_of(SECTOR_BYTES) - written;
            writer.write_all(&vec![0u8; padding])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Number of chunks contained in this region.
    pub fn containing_chunks_count(&self) -> usize {
        self.containing.len()
    }

    /// Contained chunk positions, in the rotated frame.
    pub fn containing_chunks(&self) -> &BTreeSet<ChunkPos> {
        &self.containing
    }

    pub fn has_chunk(&self, pos: ChunkPos) -> bool {
        self.chunk_index(pos)
            .is_some_and(|index| self.slots[index].present)
    }

    pub fn chunk_timestamp(&self, pos: ChunkPos) -> Option<u32> {
        let index = self.chunk_index(pos)?;
        self.slots[index].present.then(|| self.slots[index].timestamp)
    }

    pub fn set_chunk_timestamp(&mut self, pos: ChunkPos, timestamp: u32) {
        if let Some(index) = self.chunk_index(pos) {
            self.slots[index].timestamp = timestamp;
        }
    }

    /// Raw compressed chunk payload and its compression tag.
    pub fn chunk_data(&self, pos: ChunkPos) -> Option<(&[u8], u8)> {
        let index = self.chunk_index(pos)?;
        let slot = &self.slots[index];
        slot.present
            .then_some((slot.data.as_slice(), slot.compression))
    }

    /// Replaces a chunk's raw payload. An empty payload removes the chunk.
    pub fn set_chunk_data(&mut self, pos: ChunkPos, data: Vec<u8>, compression: u8) {
        let Some(index) = self.chunk_index(pos) else {
            return;
        };
        if data.is_empty() {
            self.slots[index] = ChunkSlot::default();
            self.containing.remove(&pos);
        } else {
            let slot = &mut self.slots[index];
            slot.present = true;
            slot.data = data;
            slot.compression = compression;
            self.containing.insert(pos);
        }
    }

    /// Decompresses and decodes one chunk.
    pub fn load_chunk(
        &self,
        pos: ChunkPos,
        registry: &BlockStateRegistry,
    ) -> Result<Chunk, ChunkError> {
        let (data, compression) = self.chunk_data(pos).ok_or(ChunkError::NotExist)?;
        let decompressed = decompress(data, compression)?;
        Chunk::decode(&decompressed, registry).map_err(ChunkError::from)
    }

    /// Slot index for a chunk position given in the rotated frame, or `None`
    /// if the chunk belongs to a different region.
    fn chunk_index(&self, pos: ChunkPos) -> Option<usize> {
        let original = pos.rotated(self.rotation.inverse());
        if original.region() != self.pos_original {
            return None;
        }
        let (x, z) = original.region_local();
        Some((z * REGION_CHUNKS + x) as usize)
    }

    /// Chunk position, in the rotated frame, for a slot index.
    fn slot_chunk_pos(&self, slot_index: usize) -> ChunkPos {
        let x = (slot_index as i32) % REGION_CHUNKS;
        let z = (slot_index as i32) / REGION_CHUNKS;
        let original = ChunkPos::new(
            self.pos_original.x * REGION_CHUNKS + x,
            self.pos_original.z * REGION_CHUNKS + z,
        );
        original.rotated(self.rotation)
    }
}

fn read_u32_be(raw: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

/// Inflates a chunk payload according to its compression tag.
pub fn decompress(data: &[u8], compression: u8) -> Result<Vec<u8>, ChunkError> {
    let mut out = Vec::new();
    match compression {
        COMPRESSION_GZIP => GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(ChunkError::DataInvalid)?,
        COMPRESSION_ZLIB => ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(ChunkError::DataInvalid)?,
        other => return Err(ChunkError::UnsupportedCompression(other)),
    };
    Ok(out)
}

/// Deflates a payload with the given compression tag, for cache files and
/// region reassembly.
pub fn compress(data: &[u8], compression: u8) -> Result<Vec<u8>, ChunkError> {
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;

    let mut out = Vec::new();
    match compression {
        COMPRESSION_GZIP => {
            let mut encoder = GzEncoder::new(&mut out, Compression::default());
            encoder.write_all(data).map_err(ChunkError::DataInvalid)?;
            encoder.finish().map_err(ChunkError::DataInvalid)?;
        }
        COMPRESSION_ZLIB => {
            let mut encoder = ZlibEncoder::new(&mut out, Compression::default());
            encoder.write_all(data).map_err(ChunkError::DataInvalid)?;
            encoder.finish().map_err(ChunkError::DataInvalid)?;
        }
        other => return Err(ChunkError::UnsupportedCompression(other)),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region_path(dir: &Path, x: i32, z: i32) -> PathBuf {
        dir.join(RegionPos::new(x, z).filename())
    }

    fn payload(tag: u8) -> Vec<u8> {
        compress(&[tag; 64], COMPRESSION_ZLIB).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_filenames() {
        assert!(matches!(
            RegionFile::new("/tmp/level.dat", Rotation::TopLeft),
            Err(RegionError::BadFilename(_))
        ));
    }

    #[test]
    fn test_read_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = region_path(dir.path(), 0, 0);
        fs::write(&path, vec![0u8; 100]).unwrap();

        let mut region = RegionFile::new(&path, Rotation::TopLeft).unwrap();
        assert!(matches!(region.read(), Err(RegionError::TooShort { .. })));
    }

    #[test]
    fn test_read_rejects_chunk_past_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = region_path(dir.path(), 0, 0);
        // Slot 0 claims data in sector 2, but the file ends with the header.
        let mut raw = vec![0u8; HEADER_BYTES];
        raw[0..4].copy_from_slice(&((2u32 << 8) | 1).to_be_bytes());
        fs::write(&path, raw).unwrap();

        let mut region = RegionFile::new(&path, Rotation::TopLeft).unwrap();
        assert!(matches!(
            region.read(),
            Err(RegionError::ChunkOutOfBounds { slot: 0, .. })
        ));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = region_path(dir.path(), -1, 2);

        let mut region = RegionFile::new(&path, Rotation::TopLeft).unwrap();
        let a = ChunkPos::new(-32, 64);
        let b = ChunkPos::new(-1, 95);
        region.set_chunk_data(a, payload(1), COMPRESSION_ZLIB);
        region.set_chunk_timestamp(a, 1111);
        region.set_chunk_data(b, payload(2), COMPRESSION_GZIP);
        region.set_chunk_timestamp(b, 2222);
        region.write(None).unwrap();

        // Written file is sector aligned.
        let size = fs::metadata(&path).unwrap().len() as usize;
        assert!(size > HEADER_BYTES);
        assert_eq!(size % SECTOR_BYTES, 0);

        let mut read_back = RegionFile::new(&path, Rotation::TopLeft).unwrap();
        read_back.read().unwrap();
        assert_eq!(read_back.containing_chunks_count(), 2);
        assert_eq!(read_back.chunk_timestamp(a), Some(1111));
        assert_eq!(read_back.chunk_timestamp(b), Some(2222));
        assert_eq!(
            read_back.chunk_data(a).map(|(d, c)| (d.to_vec(), c)),
            Some((payload(1), COMPRESSION_ZLIB))
        );
        assert_eq!(
            read_back.chunk_data(b).map(|(d, c)| (d.to_vec(), c)),
            Some((payload(2), COMPRESSION_GZIP))
        );
    }

    #[test]
    fn test_headers_only_skips_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = region_path(dir.path(), 0, 0);

        let mut region = RegionFile::new(&path, Rotation::TopLeft).unwrap();
        let pos = ChunkPos::new(3, 4);
        region.set_chunk_data(pos, payload(7), COMPRESSION_ZLIB);
        region.set_chunk_timestamp(pos, 42);
        region.write(None).unwrap();

        let mut headers = RegionFile::new(&path, Rotation::TopLeft).unwrap();
        headers.read_only_headers().unwrap();
        assert!(headers.has_chunk(pos));
        assert_eq!(headers.chunk_timestamp(pos), Some(42));
        assert_eq!(headers.chunk_data(pos).map(|(d, _)| d.len()), Some(0));
    }

    #[test]
    fn test_rotated_indexing() {
        let dir = tempfile::tempdir().unwrap();
        let path = region_path(dir.path(), 0, 0);

        // Write a region with one chunk, in the on-disk frame.
        let mut region = RegionFile::new(&path, Rotation::TopLeft).unwrap();
        let original = ChunkPos::new(5, 9);
        region.set_chunk_data(original, payload(1), COMPRESSION_ZLIB);
        region.write(None).unwrap();

        // Open the same file with a quarter turn: the chunk must appear at
        // its rotated position and nowhere else.
        let mut rotated = RegionFile::new(&path, Rotation::TopRight).unwrap();
        rotated.read().unwrap();
        let expected = original.rotated(Rotation::TopRight);
        assert!(rotated.has_chunk(expected));
        assert!(!rotated.has_chunk(original));
        assert_eq!(rotated.containing_chunks().iter().next(), Some(&expected));
        assert_eq!(rotated.pos(), RegionPos::new(0, 0).rotated(Rotation::TopRight));
    }

    #[test]
    fn test_empty_payload_removes_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = region_path(dir.path(), 0, 0);
        let mut region = RegionFile::new(&path, Rotation::TopLeft).unwrap();
        let pos = ChunkPos::new(1, 1);
        region.set_chunk_data(pos, payload(1), COMPRESSION_ZLIB);
        assert!(region.has_chunk(pos));
        region.set_chunk_data(pos, Vec::new(), COMPRESSION_ZLIB);
        assert!(!region.has_chunk(pos));
        assert_eq!(region.containing_chunks_count(), 0);
    }

    #[test]
    fn test_decompress_rejects_unknown_tag() {
        assert!(matches!(
            decompress(&[1, 2, 3], 9),
            Err(ChunkError::UnsupportedCompression(9))
        ));
    }

    #[test]
    fn test_decompress_garbage_is_data_invalid() {
        assert!(matches!(
            decompress(&[0xde, 0xad, 0xbe, 0xef], COMPRESSION_ZLIB),
            Err(ChunkError::DataInvalid(_))
        ));
    }

    #[test]
    fn test_gzip_roundtrip() {
        let data = b"squish me".to_vec();
        let packed = compress(&data, COMPRESSION_GZIP).unwrap();
        assert_eq!(decompress(&packed, COMPRESSION_GZIP).unwrap(), data);
    }
}
