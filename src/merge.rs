//! Merge several clustered `PMTiles` archives whose tile-id sets are disjoint
//! into a single archive.

use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use bytes::Bytes;
use countio::Counter;
use futures_util::TryStreamExt;

use crate::async_reader::{AsyncBackend, AsyncPmTilesReader};
use crate::cache::DirectoryCache;
use crate::directory::{MAX_ROOT_DIR_BYTES, optimize_directories};
use crate::header::HEADER_SIZE;
use crate::writer::WriteTo;
use crate::{DirEntry, Header, PmtError, PmtResult, TileCoord, TileId};

/// Outcome of a successful merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeStats {
    /// Sum of run lengths across all merged entries.
    pub addressed_tiles: u64,
    /// Number of directory entries (RLE runs) in the merged archive.
    pub tile_entries: u64,
    /// Number of distinct tile byte payloads after dedup.
    pub tile_contents: u64,
    /// Total bytes of tile data written.
    pub tile_data_length: u64,
}

struct TaggedEntry {
    entry: DirEntry,
    input_idx: usize,
}

/// A contiguous run of bytes to copy from one input's tile-data section.
struct CopyRange {
    input_idx: usize,
    src_offset: u64,
    dst_offset: u64,
    length: u64,
}

/// Merges `inputs` into `output`.
///
/// All inputs must be clustered and share `tile_type`, `tile_compression`,
/// and `internal_compression`; their tile-id sets must be pairwise disjoint.
/// Metadata, center, and center zoom are taken from the first input; bounds
/// are the union of all inputs' bounds.
///
/// # Errors
/// Returns [`PmtError::MergeConflict`] if inputs disagree on format fields or
/// if any two inputs address the same tile id. Propagates I/O and decode
/// errors from the inputs or the output.
pub async fn merge_archives<B, C, W>(
    inputs: &[Arc<AsyncPmTilesReader<B, C>>],
    output: &mut W,
) -> PmtResult<MergeStats>
where
    B: AsyncBackend + Sync + Send,
    C: DirectoryCache + Sync + Send,
    W: Write + Seek,
{
    if inputs.is_empty() {
        return Err(PmtError::MergeConflict("no input archives given".into()));
    }

    let first_header = inputs[0].get_header().clone();
    for (idx, input) in inputs.iter().enumerate().skip(1) {
        let header = input.get_header();
        if !header.clustered() {
            return Err(PmtError::MergeConflict(format!(
                "input {idx} is not clustered"
            )));
        }
        if header.tile_type != first_header.tile_type
            || header.tile_compression != first_header.tile_compression
            || header.internal_compression() != first_header.internal_compression()
        {
            return Err(PmtError::MergeConflict(format!(
                "input {idx} has mismatched tile_type/tile_compression/internal_compression"
            )));
        }
    }
    if !first_header.clustered() {
        return Err(PmtError::MergeConflict("input 0 is not clustered".into()));
    }

    // Gather every entry from every input, tagged by which input it came from.
    let mut tagged = Vec::new();
    for (input_idx, input) in inputs.iter().enumerate() {
        let entries: Vec<DirEntry> = input.clone().entries().try_collect().await?;
        for entry in entries {
            tagged.push(TaggedEntry { entry, input_idx });
        }
    }
    tagged.sort_by_key(|t| t.entry.tile_id);

    // Pairwise-disjoint check: any overlap between adjacent runs belonging to
    // different inputs is an error, reporting the offending tile.
    for pair in tagged.windows(2) {
        let [a, b] = pair else { unreachable!() };
        let a_end = a.entry.tile_id + u64::from(a.entry.run_length.max(1));
        if b.entry.tile_id < a_end && a.input_idx != b.input_idx {
            let coord = TileId::new(b.entry.tile_id)
                .ok()
                .and_then(|id| TileCoord::try_from(id).ok());
            return Err(PmtError::MergeConflict(format!(
                "inputs {} and {} both address tile {coord:?}",
                a.input_idx, b.input_idx
            )));
        }
    }

    // Re-number offsets, preserving dedup per input and coalescing
    // consecutive same-input contiguous ranges into a single copy.
    let mut dst_of: HashMap<(usize, u64), u64> = HashMap::new();
    let mut reencoded = Vec::with_capacity(tagged.len());
    let mut ranges: Vec<CopyRange> = Vec::new();
    let mut dst_offset = 0u64;
    let mut addressed_tiles = 0u64;

    for t in tagged {
        addressed_tiles += u64::from(t.entry.run_length);
        let key = (t.input_idx, t.entry.offset);
        if let Some(&existing) = dst_of.get(&key) {
            reencoded.push(DirEntry {
                offset: existing,
                ..t.entry
            });
            continue;
        }

        if let Some(last) = ranges.last_mut() {
            if last.input_idx == t.input_idx && last.src_offset + last.length == t.entry.offset {
                last.length += u64::from(t.entry.length);
            } else {
                ranges.push(CopyRange {
                    input_idx: t.input_idx,
                    src_offset: t.entry.offset,
                    dst_offset,
                    length: u64::from(t.entry.length),
                });
            }
        } else {
            ranges.push(CopyRange {
                input_idx: t.input_idx,
                src_offset: t.entry.offset,
                dst_offset,
                length: u64::from(t.entry.length),
            });
        }

        reencoded.push(DirEntry {
            offset: dst_offset,
            ..t.entry
        });
        dst_of.insert(key, dst_offset);
        dst_offset += u64::from(t.entry.length);
    }

    let tile_data_length = dst_offset;
    let tile_contents = dst_of.len() as u64;
    let tile_entries = reencoded.len() as u64;

    let (min_zoom, max_zoom) = zoom_bounds(&reencoded)?;

    let compression = first_header.internal_compression();
    let metadata = inputs[0].get_metadata().await?;

    let mut new_header = Header::new(first_header.tile_compression, first_header.tile_type);
    new_header.internal_compression = compression;
    new_header.min_zoom = min_zoom;
    new_header.max_zoom = max_zoom;
    new_header.center_zoom = first_header.center_zoom;
    new_header.center_longitude = first_header.center_longitude;
    new_header.center_latitude = first_header.center_latitude;
    new_header.min_longitude = inputs
        .iter()
        .map(|i| i.get_header().min_longitude)
        .fold(f64::INFINITY, f64::min);
    new_header.min_latitude = inputs
        .iter()
        .map(|i| i.get_header().min_latitude)
        .fold(f64::INFINITY, f64::min);
    new_header.max_longitude = inputs
        .iter()
        .map(|i| i.get_header().max_longitude)
        .fold(f64::NEG_INFINITY, f64::max);
    new_header.max_latitude = inputs
        .iter()
        .map(|i| i.get_header().max_latitude)
        .fold(f64::NEG_INFINITY, f64::max);

    let (root_dir, leaf_dirs) = optimize_directories(reencoded, MAX_ROOT_DIR_BYTES, compression)?;

    output.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
    let root_length =
        root_dir.write_compressed_to_counted(&mut Counter::new(&mut output), compression)?;
    new_header.root_length = root_length as u64;

    let metadata_length = metadata
        .as_bytes()
        .write_compressed_to_counted(&mut Counter::new(&mut output), compression)? as u64;
    new_header.metadata_length = metadata_length;

    let mut leaf_length = 0usize;
    for leaf in &leaf_dirs {
        leaf_length += leaf.write_compressed_to_counted(&mut Counter::new(&mut output), compression)?;
    }
    new_header.leaf_length = leaf_length as u64;

    new_header.root_offset = HEADER_SIZE as u64;
    new_header.metadata_offset = new_header.root_offset + new_header.root_length;
    new_header.leaf_offset = new_header.metadata_offset + new_header.metadata_length;
    new_header.data_offset = new_header.leaf_offset + new_header.leaf_length;
    new_header.data_length = tile_data_length;

    new_header.n_addressed_tiles = std::num::NonZeroU64::new(addressed_tiles);
    new_header.n_tile_entries = std::num::NonZeroU64::new(tile_entries);
    new_header.n_tile_contents = std::num::NonZeroU64::new(tile_contents);

    // Batch-copy tile bytes from each input's data section.
    for range in &ranges {
        let input = &inputs[range.input_idx];
        let src_data_offset = input.get_header().data_offset();
        let bytes: Bytes = read_input_range(input, src_data_offset + range.src_offset, range.length).await?;
        output.seek(SeekFrom::Start(new_header.data_offset + range.dst_offset))?;
        output.write_all(&bytes)?;
    }

    output.rewind()?;
    new_header.write_to(&mut *output)?;
    output.flush()?;

    Ok(MergeStats {
        addressed_tiles,
        tile_entries,
        tile_contents,
        tile_data_length,
    })
}

async fn read_input_range<B: AsyncBackend + Sync + Send, C: DirectoryCache + Sync + Send>(
    input: &AsyncPmTilesReader<B, C>,
    offset: u64,
    length: u64,
) -> PmtResult<Bytes> {
    let offset = usize::try_from(offset).map_err(PmtError::IoRangeOverflow)?;
    let length = usize::try_from(length).map_err(PmtError::IoRangeOverflow)?;
    input.backend.read_exact(offset, length).await
}

fn zoom_bounds(entries: &[DirEntry]) -> PmtResult<(u8, u8)> {
    let mut min_zoom = u8::MAX;
    let mut max_zoom = 0u8;
    for entry in entries {
        let id = TileId::new(entry.tile_id)?;
        let zoom = id.zoom().ok_or(PmtError::InvalidHeader)?;
        min_zoom = min_zoom.min(zoom);
        max_zoom = max_zoom.max(zoom);
    }
    if entries.is_empty() {
        min_zoom = 0;
    }
    Ok((min_zoom, max_zoom))
}
