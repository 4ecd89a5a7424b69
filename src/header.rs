use std::io::{Cursor, Write};
use std::num::NonZeroU64;

use bytes::Buf;

use crate::error::PmtError;

/// Size in bytes of the fixed `PMTiles` v3 header.
pub const HEADER_SIZE: usize = 127;

/// Bytes that must be read up front to guarantee the header and (if small
/// enough) the root directory are both covered by a single range request.
pub const MAX_INITIAL_BYTES: usize = 16_384;

static V3_MAGIC: &[u8] = b"PMTiles";
static V2_MAGIC: &[u8] = b"PM";

/// The 127-byte fixed header at the start of every `PMTiles` archive.
///
/// Coordinate and zoom fields are public since they're cheap, self-contained
/// metadata; counters that may be absent (pre-clustering) and the raw
/// compression/clustered bytes are kept private behind accessors so callers
/// outside the crate can't observe a half-written intermediate state.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub(crate) version: u8,
    pub(crate) root_offset: u64,
    pub(crate) root_length: u64,
    pub(crate) metadata_offset: u64,
    pub(crate) metadata_length: u64,
    pub(crate) leaf_offset: u64,
    pub(crate) leaf_length: u64,
    pub(crate) data_offset: u64,
    pub(crate) data_length: u64,
    pub(crate) n_addressed_tiles: Option<NonZeroU64>,
    pub(crate) n_tile_entries: Option<NonZeroU64>,
    pub(crate) n_tile_contents: Option<NonZeroU64>,
    pub(crate) clustered: bool,
    pub(crate) internal_compression: Compression,
    /// Compression applied to each tile's bytes.
    pub tile_compression: Compression,
    /// The format of the tiles stored in this archive.
    pub tile_type: TileType,
    /// Lowest zoom level present in the archive.
    pub min_zoom: u8,
    /// Highest zoom level present in the archive.
    pub max_zoom: u8,
    /// Western edge of the archive's bounds, in degrees.
    pub min_longitude: f64,
    /// Southern edge of the archive's bounds, in degrees.
    pub min_latitude: f64,
    /// Eastern edge of the archive's bounds, in degrees.
    pub max_longitude: f64,
    /// Northern edge of the archive's bounds, in degrees.
    pub max_latitude: f64,
    /// Suggested initial zoom level for display.
    pub center_zoom: u8,
    /// Suggested initial center longitude for display.
    pub center_longitude: f64,
    /// Suggested initial center latitude for display.
    pub center_latitude: f64,
}

impl Header {
    /// Builds a fresh header for a new archive with reasonable defaults;
    /// directory/data offsets are all zero until the writer finalizes them.
    #[must_use]
    pub fn new(tile_compression: Compression, tile_type: TileType) -> Self {
        Self {
            version: 3,
            root_offset: 0,
            root_length: 0,
            metadata_offset: 0,
            metadata_length: 0,
            leaf_offset: 0,
            leaf_length: 0,
            data_offset: 0,
            data_length: 0,
            n_addressed_tiles: None,
            n_tile_entries: None,
            n_tile_contents: None,
            clustered: true,
            internal_compression: Compression::Gzip,
            tile_compression,
            tile_type,
            min_zoom: 0,
            max_zoom: 0,
            min_longitude: 0.0,
            min_latitude: 0.0,
            max_longitude: 0.0,
            max_latitude: 0.0,
            center_zoom: 0,
            center_longitude: 0.0,
            center_latitude: 0.0,
        }
    }

    /// The `PMTiles` spec version (always `3` for archives this crate writes).
    #[must_use]
    pub fn spec_version(&self) -> u8 {
        self.version
    }

    /// Whether tiles are written in ascending tile-id order with deduplicated,
    /// RLE-merged runs (required for directory optimization and range merging).
    #[must_use]
    pub fn clustered(&self) -> bool {
        self.clustered
    }

    /// Compression applied to the root/leaf directories and the metadata blob.
    #[must_use]
    pub fn internal_compression(&self) -> Compression {
        self.internal_compression
    }

    /// Count of distinct `(z, x, y)` addresses covered by the directory tree,
    /// including those folded into RLE runs. `None` until the writer finalizes.
    #[must_use]
    pub fn n_addressed_tiles(&self) -> Option<u64> {
        self.n_addressed_tiles.map(NonZeroU64::get)
    }

    /// Count of directory entries (distinct RLE runs) across all leaves.
    #[must_use]
    pub fn n_tile_entries(&self) -> Option<u64> {
        self.n_tile_entries.map(NonZeroU64::get)
    }

    /// Count of distinct tile byte payloads after content-hash deduplication.
    #[must_use]
    pub fn n_tile_contents(&self) -> Option<u64> {
        self.n_tile_contents.map(NonZeroU64::get)
    }

    pub(crate) fn root_offset(&self) -> u64 {
        self.root_offset
    }

    pub(crate) fn root_length(&self) -> u64 {
        self.root_length
    }

    pub(crate) fn leaf_offset(&self) -> u64 {
        self.leaf_offset
    }

    pub(crate) fn leaf_length(&self) -> u64 {
        self.leaf_length
    }

    pub(crate) fn metadata_offset(&self) -> u64 {
        self.metadata_offset
    }

    pub(crate) fn metadata_length(&self) -> u64 {
        self.metadata_length
    }

    pub(crate) fn data_offset(&self) -> u64 {
        self.data_offset
    }

    pub(crate) fn data_length(&self) -> u64 {
        self.data_length
    }

    fn read_coordinate_part<B: Buf>(mut buf: B) -> f64 {
        f64::from(buf.get_i32_le()) / 10_000_000.
    }

    fn write_coordinate_part(value: f64) -> i32 {
        #[allow(clippy::cast_possible_truncation)]
        {
            (value * 10_000_000.) as i32
        }
    }

    /// Parses the fixed 127-byte header from the front of an archive.
    ///
    /// # Errors
    /// Returns [`PmtError::InvalidMagicNumber`] if the bytes aren't a
    /// `PMTiles` archive at all, [`PmtError::UnsupportedPmTilesVersion`] if
    /// they're a v2 (`PM`-prefixed) archive, or [`PmtError::InvalidHeader`] /
    /// [`PmtError::InvalidCompression`] / [`PmtError::InvalidTileType`] if the
    /// magic matches but the remaining fields don't parse.
    pub fn try_from_bytes(raw_bytes: &[u8; HEADER_SIZE]) -> Result<Self, PmtError> {
        if &raw_bytes[0..V3_MAGIC.len()] != V3_MAGIC {
            return if &raw_bytes[0..V2_MAGIC.len()] == V2_MAGIC {
                Err(PmtError::UnsupportedPmTilesVersion(2))
            } else {
                Err(PmtError::InvalidMagicNumber)
            };
        }

        let mut bytes = Cursor::new(&raw_bytes[V3_MAGIC.len()..]);

        let version = bytes.get_u8();
        if version != 3 {
            return Err(PmtError::UnsupportedPmTilesVersion(version));
        }

        Ok(Self {
            version,
            root_offset: bytes.get_u64_le(),
            root_length: bytes.get_u64_le(),
            metadata_offset: bytes.get_u64_le(),
            metadata_length: bytes.get_u64_le(),
            leaf_offset: bytes.get_u64_le(),
            leaf_length: bytes.get_u64_le(),
            data_offset: bytes.get_u64_le(),
            data_length: bytes.get_u64_le(),
            n_addressed_tiles: NonZeroU64::new(bytes.get_u64_le()),
            n_tile_entries: NonZeroU64::new(bytes.get_u64_le()),
            n_tile_contents: NonZeroU64::new(bytes.get_u64_le()),
            clustered: bytes.get_u8() == 1,
            internal_compression: Compression::try_from(bytes.get_u8())?,
            tile_compression: Compression::try_from(bytes.get_u8())?,
            tile_type: TileType::try_from(bytes.get_u8())?,
            min_zoom: bytes.get_u8(),
            max_zoom: bytes.get_u8(),
            min_longitude: Self::read_coordinate_part(&mut bytes),
            min_latitude: Self::read_coordinate_part(&mut bytes),
            max_longitude: Self::read_coordinate_part(&mut bytes),
            max_latitude: Self::read_coordinate_part(&mut bytes),
            center_zoom: bytes.get_u8(),
            center_longitude: Self::read_coordinate_part(&mut bytes),
            center_latitude: Self::read_coordinate_part(&mut bytes),
        })
    }

    /// Serializes the header back to its 127-byte on-disk form.
    ///
    /// # Errors
    /// Propagates any I/O error from `writer`.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), PmtError> {
        writer.write_all(V3_MAGIC)?;
        writer.write_all(&[self.version])?;
        writer.write_all(&self.root_offset.to_le_bytes())?;
        writer.write_all(&self.root_length.to_le_bytes())?;
        writer.write_all(&self.metadata_offset.to_le_bytes())?;
        writer.write_all(&self.metadata_length.to_le_bytes())?;
        writer.write_all(&self.leaf_offset.to_le_bytes())?;
        writer.write_all(&self.leaf_length.to_le_bytes())?;
        writer.write_all(&self.data_offset.to_le_bytes())?;
        writer.write_all(&self.data_length.to_le_bytes())?;
        writer.write_all(&self.n_addressed_tiles.map_or(0, NonZeroU64::get).to_le_bytes())?;
        writer.write_all(&self.n_tile_entries.map_or(0, NonZeroU64::get).to_le_bytes())?;
        writer.write_all(&self.n_tile_contents.map_or(0, NonZeroU64::get).to_le_bytes())?;
        writer.write_all(&[u8::from(self.clustered)])?;
        writer.write_all(&[self.internal_compression as u8])?;
        writer.write_all(&[self.tile_compression as u8])?;
        writer.write_all(&[self.tile_type as u8])?;
        writer.write_all(&[self.min_zoom])?;
        writer.write_all(&[self.max_zoom])?;
        writer.write_all(&Self::write_coordinate_part(self.min_longitude).to_le_bytes())?;
        writer.write_all(&Self::write_coordinate_part(self.min_latitude).to_le_bytes())?;
        writer.write_all(&Self::write_coordinate_part(self.max_longitude).to_le_bytes())?;
        writer.write_all(&Self::write_coordinate_part(self.max_latitude).to_le_bytes())?;
        writer.write_all(&[self.center_zoom])?;
        writer.write_all(&Self::write_coordinate_part(self.center_longitude).to_le_bytes())?;
        writer.write_all(&Self::write_coordinate_part(self.center_latitude).to_le_bytes())?;
        Ok(())
    }
}

/// Compression algorithm applied to a byte blob (tile, directory, or metadata).
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum Compression {
    /// Compression state is not recorded / not known.
    Unknown = 0,
    /// Stored uncompressed.
    None = 1,
    /// DEFLATE via gzip framing.
    Gzip = 2,
    /// Brotli.
    Brotli = 3,
    /// Zstandard.
    Zstd = 4,
}

impl TryFrom<u8> for Compression {
    type Error = PmtError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::None),
            2 => Ok(Self::Gzip),
            3 => Ok(Self::Brotli),
            4 => Ok(Self::Zstd),
            _ => Err(PmtError::InvalidCompression),
        }
    }
}

/// The format of tiles stored in an archive.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum TileType {
    /// Format is not recorded / not known.
    Unknown = 0,
    /// Mapbox Vector Tile.
    Mvt = 1,
    /// PNG raster tile.
    Png = 2,
    /// JPEG raster tile.
    Jpeg = 3,
    /// WebP raster tile.
    Webp = 4,
    /// AVIF raster tile.
    Avif = 5,
}

impl TryFrom<u8> for TileType {
    type Error = PmtError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Mvt),
            2 => Ok(Self::Png),
            3 => Ok(Self::Jpeg),
            4 => Ok(Self::Webp),
            5 => Ok(Self::Avif),
            _ => Err(PmtError::InvalidTileType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Compression, Header, TileType};

    #[test]
    fn roundtrip_header() {
        let mut header = Header::new(Compression::Gzip, TileType::Mvt);
        header.min_zoom = 0;
        header.max_zoom = 14;
        header.min_longitude = -122.5;
        header.min_latitude = 37.0;
        header.max_longitude = -122.0;
        header.max_latitude = 37.9;
        header.center_zoom = 10;
        header.center_longitude = -122.25;
        header.center_latitude = 37.45;
        header.root_offset = 127;
        header.root_length = 1000;

        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), super::HEADER_SIZE);

        let mut arr = [0u8; super::HEADER_SIZE];
        arr.copy_from_slice(&buf);
        let decoded = Header::try_from_bytes(&arr).unwrap();

        assert_eq!(decoded.spec_version(), 3);
        assert_eq!(decoded.tile_type, TileType::Mvt);
        assert_eq!(decoded.min_zoom, 0);
        assert_eq!(decoded.max_zoom, 14);
        assert!((decoded.min_longitude - -122.5).abs() < 1e-6);
        assert!((decoded.center_latitude - 37.45).abs() < 1e-6);
        assert_eq!(decoded.root_offset(), 127);
        assert_eq!(decoded.root_length(), 1000);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0u8; super::HEADER_SIZE];
        assert!(Header::try_from_bytes(&bytes).is_err());
    }

    #[test]
    fn rejects_v2_magic() {
        let mut bytes = [0u8; super::HEADER_SIZE];
        bytes[0..2].copy_from_slice(b"PM");
        match Header::try_from_bytes(&bytes) {
            Err(crate::error::PmtError::UnsupportedPmTilesVersion(2)) => {}
            other => panic!("expected UnsupportedPmTilesVersion(2), got {other:?}"),
        }
    }
}
