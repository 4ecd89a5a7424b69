use std::fmt::{Debug, Formatter};

use bytes::{Buf, Bytes};
use varint_rs::{VarintReader, VarintWriter};

use crate::error::PmtError;
use crate::header::Compression;
use crate::tile::TileId;
use crate::writer::WriteTo;

/// Maximum size in bytes the root directory may occupy after compression,
/// leaving the rest of [`crate::header::MAX_INITIAL_BYTES`] to the header.
pub(crate) const MAX_ROOT_DIR_BYTES: usize = crate::header::MAX_INITIAL_BYTES - crate::header::HEADER_SIZE;

/// A single entry in a root or leaf directory.
///
/// `run_length == 0` means this entry points at a leaf directory rather than
/// tile data; any other value is the count of consecutive addressed tile ids
/// (starting at `tile_id`) sharing this offset/length.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// The Hilbert tile id this entry (or, for a leaf pointer, this leaf's
    /// first tile) addresses.
    pub tile_id: u64,
    /// Byte offset into the tile data section (or leaf directory section).
    pub offset: u64,
    /// Byte length of the tile data (or leaf directory).
    pub length: u32,
    /// Count of consecutive tile ids sharing this entry; `0` for leaf pointers.
    pub run_length: u32,
}

impl DirEntry {
    /// Whether this entry points at a leaf directory rather than tile data.
    #[must_use]
    pub fn is_leaf_pointer(&self) -> bool {
        self.run_length == 0
    }

    /// Iterates the `(z, x, y)` coordinates this entry's run covers.
    pub fn iter_coords(&self) -> impl Iterator<Item = crate::tile::TileCoord> + '_ {
        (self.tile_id..self.tile_id + u64::from(self.run_length.max(1)))
            .filter_map(|id| TileId::new(id).ok())
            .filter_map(|id| crate::tile::TileCoord::try_from(id).ok())
    }
}

/// An ordered collection of directory entries (a root or leaf directory).
#[derive(Clone, Default)]
pub struct Directory {
    pub(crate) entries: Vec<DirEntry>,
}

impl Debug for Directory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Directory [entries: {}]", self.entries.len()))
    }
}

impl Directory {
    /// Builds a directory from already-sorted entries.
    #[must_use]
    pub fn from_entries(entries: Vec<DirEntry>) -> Self {
        Self { entries }
    }

    /// Builds an empty directory with room for `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Appends an entry. Entries must be pushed in ascending `tile_id` order.
    pub fn push(&mut self, entry: DirEntry) {
        self.entries.push(entry);
    }

    /// Number of entries in this directory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether this directory has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrows the entries in this directory.
    #[must_use]
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    /// Consumes the directory, returning its entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<DirEntry> {
        self.entries
    }

    /// Finds the entry whose run covers `tile_id`, via binary search over a
    /// directory sorted by ascending `tile_id`.
    #[must_use]
    pub fn find_tile_id(&self, tile_id: TileId) -> Option<&DirEntry> {
        let tile_id = tile_id.value();
        match self.entries.binary_search_by(|e| e.tile_id.cmp(&tile_id)) {
            Ok(idx) => self.entries.get(idx),
            Err(0) => None,
            Err(next_id) => {
                let previous = self.entries.get(next_id - 1)?;
                if previous.is_leaf_pointer() {
                    // leaf pointers don't have a run; only an exact match applies
                    None
                } else if previous.tile_id + u64::from(previous.run_length) > tile_id {
                    Some(previous)
                } else {
                    None
                }
            }
        }
    }

    /// Size in bytes this directory would occupy after compression.
    ///
    /// # Errors
    /// Propagates any error from the underlying compressor.
    pub fn compressed_size(&self, compression: Compression) -> crate::error::PmtResult<usize> {
        WriteTo::compressed_size(self, compression)
    }
}

impl WriteTo for Directory {
    fn write_to<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let mut out = writer;
        out.write_usize_varint(self.entries.len())?;

        let mut last_id = 0u64;
        for entry in &self.entries {
            out.write_u64_varint(entry.tile_id - last_id)?;
            last_id = entry.tile_id;
        }

        for entry in &self.entries {
            out.write_u32_varint(entry.run_length)?;
        }

        for entry in &self.entries {
            out.write_u32_varint(entry.length)?;
        }

        let mut last_entry: Option<&DirEntry> = None;
        for entry in &self.entries {
            let is_contiguous = last_entry.is_some_and(|e| e.offset + u64::from(e.length) == entry.offset);
            if is_contiguous {
                out.write_u64_varint(0)?;
            } else {
                out.write_u64_varint(entry.offset + 1)?;
            }
            last_entry = Some(entry);
        }

        Ok(())
    }
}

impl TryFrom<Bytes> for Directory {
    type Error = PmtError;

    fn try_from(buffer: Bytes) -> Result<Self, PmtError> {
        let mut buffer = buffer.reader();
        let n_entries = buffer
            .read_usize_varint()
            .map_err(|_| PmtError::VarintDecode)?;

        let mut entries = vec![DirEntry::default(); n_entries];

        let mut next_tile_id = 0;
        for entry in &mut entries {
            next_tile_id += buffer
                .read_u64_varint()
                .map_err(|_| PmtError::VarintDecode)?;
            entry.tile_id = next_tile_id;
        }

        for entry in &mut entries {
            entry.run_length = buffer
                .read_u32_varint()
                .map_err(|_| PmtError::VarintDecode)?;
        }

        for entry in &mut entries {
            entry.length = buffer
                .read_u32_varint()
                .map_err(|_| PmtError::VarintDecode)?;
        }

        let mut last_entry: Option<usize> = None;
        for i in 0..entries.len() {
            let offset = buffer
                .read_u64_varint()
                .map_err(|_| PmtError::VarintDecode)?;
            entries[i].offset = if offset == 0 {
                let last = last_entry.ok_or(PmtError::InvalidEntry)?;
                entries[last].offset + u64::from(entries[last].length)
            } else {
                offset - 1
            };
            last_entry = Some(i);
        }

        Ok(Self { entries })
    }
}

/// Splits entries into a root directory plus, if needed, leaf directories so
/// the root fits within `target_root_len` bytes once compressed.
///
/// Ported from go-pmtiles's `optimizeDirectories`
/// (<https://github.com/protomaps/go-pmtiles/blob/f1c24e6/pmtiles/directory.go#L368-L396>)
/// and planetiler's `WriteablePmtiles`.
///
/// # Errors
/// Returns an error if directory compression fails, or if a directory or its
/// entries overflow the on-disk integer widths.
pub fn optimize_directories(
    mut entries: Vec<DirEntry>,
    target_root_len: usize,
    compression: Compression,
) -> crate::error::PmtResult<(Directory, Vec<Directory>)> {
    if entries.len() < 16_384 {
        let root_dir = Directory::from_entries(std::mem::take(&mut entries));
        let root_bytes = root_dir.compressed_size(compression)?;
        if root_bytes <= target_root_len {
            return Ok((root_dir, vec![]));
        }
        entries = root_dir.into_entries();
    }

    let mut leaf_size = (entries.len() / 3500).max(4096);
    loop {
        let (root_dir, leaf_dirs) = build_roots_leaves(&entries, leaf_size, compression)?;
        let root_bytes = root_dir.compressed_size(compression)?;
        if root_bytes <= target_root_len {
            return Ok((root_dir, leaf_dirs));
        }
        leaf_size += leaf_size / 5; // go-pmtiles: leaf_size *= 1.2
    }
}

fn build_roots_leaves(
    entries: &[DirEntry],
    leaf_size: usize,
    compression: Compression,
) -> crate::error::PmtResult<(Directory, Vec<Directory>)> {
    let mut root_dir = Directory::with_capacity(entries.len() / leaf_size.max(1));
    let mut leaves = Vec::with_capacity(entries.len() / leaf_size.max(1));
    let mut offset = 0u64;
    for chunk in entries.chunks(leaf_size) {
        let leaf = Directory::from_entries(chunk.to_vec());
        let leaf_bytes = leaf.compressed_size(compression)?;
        leaves.push(leaf);

        root_dir.push(DirEntry {
            tile_id: chunk[0].tile_id,
            offset,
            length: u32::try_from(leaf_bytes).map_err(|_| PmtError::IndexEntryOverflow)?,
            run_length: 0,
        });
        offset += leaf_bytes as u64;
    }

    Ok((root_dir, leaves))
}

#[cfg(test)]
mod tests {
    use super::{DirEntry, Directory};
    use crate::header::Compression;
    use crate::tile::TileId;
    use crate::writer::WriteTo;

    fn entry(tile_id: u64, offset: u64, length: u32, run_length: u32) -> DirEntry {
        DirEntry {
            tile_id,
            offset,
            length,
            run_length,
        }
    }

    #[test]
    fn roundtrip_directory() {
        let dir = Directory::from_entries(vec![
            entry(0, 0, 100, 1),
            entry(1, 100, 50, 1),
            entry(5, 150, 25, 3),
            entry(10, 500, 10, 1),
        ]);

        let mut buf = Vec::new();
        dir.write_to(&mut buf).unwrap();

        let decoded = Directory::try_from(bytes::Bytes::from(buf)).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded.entries()[2].tile_id, 5);
        assert_eq!(decoded.entries()[2].run_length, 3);
        assert_eq!(decoded.entries()[3].offset, 500);
    }

    #[test]
    fn find_tile_id_matches_run() {
        let dir = Directory::from_entries(vec![entry(0, 0, 100, 1), entry(5, 150, 25, 3)]);

        assert!(dir.find_tile_id(TileId::new(0).unwrap()).is_some());
        assert!(dir.find_tile_id(TileId::new(5).unwrap()).is_some());
        assert!(dir.find_tile_id(TileId::new(6).unwrap()).is_some());
        assert!(dir.find_tile_id(TileId::new(7).unwrap()).is_some());
        assert!(dir.find_tile_id(TileId::new(8).unwrap()).is_none());
        assert!(dir.find_tile_id(TileId::new(1).unwrap()).is_none());
    }

    #[test]
    fn optimize_directories_without_leaves() {
        let entries: Vec<_> = (0..10).map(|i| entry(i, i * 10, 10, 1)).collect();
        let (root, leaves) = super::optimize_directories(entries, super::MAX_ROOT_DIR_BYTES, Compression::None)
            .unwrap();
        assert!(leaves.is_empty());
        assert_eq!(root.len(), 10);
    }
}
