//! Incremental sync: a content-addressed sidecar (`makesync`) describing an
//! archive in fixed-size, tile-id-ordered blocks, and a planner (`sync`) that
//! compares a local archive against that sidecar to avoid re-downloading
//! blocks the local file already has.

use std::io::Write;
use std::sync::Arc;

use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;
use varint_rs::{VarintReader, VarintWriter};

use crate::async_reader::{AsyncBackend, AsyncPmTilesReader};
use crate::cache::DirectoryCache;
use crate::{DirEntry, PmtError, PmtResult};

/// Default cap on the byte span of a single HTTP Range request while
/// fetching `wanted` blocks, leaving headroom for multipart framing.
pub const DEFAULT_MAX_RANGE_BYTES: u64 = 1024 * 1024 - 200;

/// JSON header line at the start of a `.sync` sidecar file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFileHeader {
    /// Sidecar format version.
    pub version: u32,
    /// Target block size in kilobytes used to produce this sidecar.
    pub block_size_kb: u64,
    /// Hash algorithm used for block digests; always `"xxh64"`.
    pub hash_type: String,
    /// Number of blocks encoded in the varint stream that follows.
    pub num_blocks: usize,
    /// Optional whole-archive MD5, hex-encoded.
    pub md5: Option<String>,
}

/// A single content-addressed block: the tile id it starts at, its byte
/// range in the source archive's tile-data section, and its content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncBlock {
    /// Tile id of the first entry folded into this block.
    pub start_tile_id: u64,
    /// Byte offset of the block within the tile-data section.
    pub offset: u64,
    /// Byte length of the block.
    pub length: u64,
    /// `xxh64` digest of the block's bytes.
    pub hash: u64,
}

/// Writes a `.sync` sidecar for `reader` to `out`: a JSON header line
/// followed by a varint-delta-encoded block stream.
///
/// # Errors
/// Returns an error if the archive isn't clustered, if any range read or
/// directory fetch fails, or if writing to `out` fails.
pub async fn make_sync_file<B, C, W>(
    reader: &Arc<AsyncPmTilesReader<B, C>>,
    block_size_kb: u64,
    out: &mut W,
) -> PmtResult<()>
where
    B: AsyncBackend + Sync + Send,
    C: DirectoryCache + Sync + Send,
    W: Write,
{
    let header = reader.get_header();
    if !header.clustered() {
        return Err(PmtError::InvariantViolation(
            "makesync requires a clustered archive".into(),
        ));
    }

    let entries: Vec<DirEntry> = reader.clone().entries().try_collect().await?;
    let max_bytes = block_size_kb.saturating_mul(1000);
    let data_offset = header.data_offset();

    let mut blocks = Vec::new();
    let mut block_start_tile: Option<u64> = None;
    let mut block_start_offset = 0u64;
    let mut block_end_offset = 0u64;

    for entry in &entries {
        if entry.length == 0 {
            continue;
        }
        match block_start_tile {
            None => {
                block_start_tile = Some(entry.tile_id);
                block_start_offset = entry.offset;
                block_end_offset = entry.offset + u64::from(entry.length);
            }
            Some(_) => {
                if entry.offset < block_end_offset {
                    return Err(PmtError::InvariantViolation(format!(
                        "tile {} has an offset that jumps backward; archive is not clustered",
                        entry.tile_id
                    )));
                }
                let prospective_len = entry.offset + u64::from(entry.length) - block_start_offset;
                if prospective_len > max_bytes {
                    blocks.push((block_start_tile.unwrap(), block_start_offset, block_end_offset));
                    block_start_tile = Some(entry.tile_id);
                    block_start_offset = entry.offset;
                    block_end_offset = entry.offset + u64::from(entry.length);
                } else {
                    block_end_offset = entry.offset + u64::from(entry.length);
                }
            }
        }
    }
    if let Some(start_tile) = block_start_tile {
        blocks.push((start_tile, block_start_offset, block_end_offset));
    }

    let mut hashed_blocks = Vec::with_capacity(blocks.len());
    for (start_tile_id, offset, end_offset) in blocks {
        let length = end_offset - offset;
        let bytes = reader
            .backend
            .read_exact(
                usize::try_from(data_offset + offset).map_err(PmtError::IoRangeOverflow)?,
                usize::try_from(length).map_err(PmtError::IoRangeOverflow)?,
            )
            .await?;
        let hash = XxHash64::oneshot(0, &bytes);
        hashed_blocks.push(SyncBlock {
            start_tile_id,
            offset,
            length,
            hash,
        });
    }

    let file_header = SyncFileHeader {
        version: 1,
        block_size_kb,
        hash_type: "xxh64".to_string(),
        num_blocks: hashed_blocks.len(),
        md5: None,
    };
    let header_line = serde_json::to_string(&file_header).map_err(|_| PmtError::VarintDecode)?;
    writeln!(out, "{header_line}")?;

    let mut last_tile_id = 0u64;
    for block in &hashed_blocks {
        out.write_u64_varint(block.start_tile_id - last_tile_id)?;
        out.write_u64_varint(block.length)?;
        out.write_all(&block.hash.to_le_bytes())?;
        last_tile_id = block.start_tile_id;
    }

    Ok(())
}

/// Parses a `.sync` sidecar produced by [`make_sync_file`].
///
/// # Errors
/// Returns an error if the header line isn't valid JSON, or the block
/// stream is truncated or malformed.
pub fn parse_sync_file(bytes: &[u8]) -> PmtResult<(SyncFileHeader, Vec<SyncBlock>)> {
    let newline = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(PmtError::VarintDecode)?;
    let header: SyncFileHeader =
        serde_json::from_slice(&bytes[..newline]).map_err(|_| PmtError::VarintDecode)?;

    let mut cursor = std::io::Cursor::new(&bytes[newline + 1..]);
    let mut blocks = Vec::with_capacity(header.num_blocks);
    let mut last_tile_id = 0u64;
    for _ in 0..header.num_blocks {
        let delta = cursor
            .read_u64_varint()
            .map_err(|_| PmtError::VarintDecode)?;
        let length = cursor
            .read_u64_varint()
            .map_err(|_| PmtError::VarintDecode)?;
        let mut hash_bytes = [0u8; 8];
        std::io::Read::read_exact(&mut cursor, &mut hash_bytes)?;
        let hash = u64::from_le_bytes(hash_bytes);
        last_tile_id += delta;
        blocks.push(SyncBlock {
            start_tile_id: last_tile_id,
            offset: 0, // filled in by the caller once matched against a remote layout
            length,
            hash,
        });
    }
    Ok((header, blocks))
}

/// What to do for one block of the target archive during a sync.
#[derive(Debug, Clone, Copy)]
pub enum SyncAction {
    /// The local file already has matching bytes; copy from `local_offset`.
    Have {
        /// Offset of this block's bytes in the local file's tile-data section.
        local_offset: u64,
        /// Byte length of the block.
        length: u64,
    },
    /// The local file's bytes differ or are absent; fetch from the remote
    /// archive's tile-data section at `remote_offset`.
    Wanted {
        /// Offset of this block's bytes in the remote file's tile-data section.
        remote_offset: u64,
        /// Byte length of the block.
        length: u64,
    },
}

/// A plan for bringing a local archive up to date with a remote one.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// One action per remote block, in tile-id order.
    pub actions: Vec<SyncAction>,
    /// Total bytes across all blocks.
    pub total_bytes: u64,
    /// Bytes that must be fetched from the remote.
    pub wanted_bytes: u64,
}

/// Matches each parsed block's `start_tile_id` against `remote`'s own
/// directory entries, filling in the real byte `offset` that
/// [`parse_sync_file`] leaves as `0`.
///
/// # Errors
/// Returns an error if the remote archive isn't clustered, its directory
/// can't be read, or a block's `start_tile_id` has no matching entry.
pub async fn resolve_remote_offsets<B, C>(
    remote: &Arc<AsyncPmTilesReader<B, C>>,
    blocks: &[SyncBlock],
) -> PmtResult<Vec<SyncBlock>>
where
    B: AsyncBackend + Sync + Send,
    C: DirectoryCache + Sync + Send,
{
    let entries: Vec<DirEntry> = remote.clone().entries().try_collect().await?;
    let by_start_tile: std::collections::HashMap<u64, &DirEntry> =
        entries.iter().map(|e| (e.tile_id, e)).collect();

    blocks
        .iter()
        .map(|block| {
            let entry = by_start_tile.get(&block.start_tile_id).ok_or_else(|| {
                PmtError::InvariantViolation(format!(
                    "sync block starting at tile {} has no matching entry in the remote archive",
                    block.start_tile_id
                ))
            })?;
            Ok(SyncBlock {
                start_tile_id: block.start_tile_id,
                offset: entry.offset,
                length: block.length,
                hash: block.hash,
            })
        })
        .collect()
}

/// Applies a [`SyncPlan`] to bring `dest_path` up to date with `remote`.
///
/// Copies the header, directories, and metadata verbatim from `remote`,
/// then writes the tile-data section by pulling each block from whichever
/// side the plan says already has it (`local` for `Have`, `remote` for
/// `Wanted`), in `plan.actions` order, which matches the destination's
/// tile-data byte layout exactly. The result is written to a temporary file
/// beside `dest_path` and renamed into place atomically.
///
/// # Errors
/// Returns an error if a backend read or a filesystem write fails.
pub async fn apply_sync_plan<LB, LC, RB, RC>(
    local: &Arc<AsyncPmTilesReader<LB, LC>>,
    remote: &Arc<AsyncPmTilesReader<RB, RC>>,
    plan: &SyncPlan,
    dest_path: &std::path::Path,
) -> PmtResult<()>
where
    LB: AsyncBackend + Sync + Send,
    LC: DirectoryCache + Sync + Send,
    RB: AsyncBackend + Sync + Send,
    RC: DirectoryCache + Sync + Send,
{
    let remote_header = remote.get_header();
    let local_header = local.get_header();

    let mut tmp_path = dest_path.as_os_str().to_os_string();
    tmp_path.push(".sync-tmp");
    let tmp_path = std::path::PathBuf::from(tmp_path);

    let mut out = std::fs::File::create(&tmp_path)?;

    let prefix_len =
        usize::try_from(remote_header.data_offset()).map_err(PmtError::IoRangeOverflow)?;
    let prefix = remote.backend.read_exact(0, prefix_len).await?;
    out.write_all(&prefix)?;

    for action in &plan.actions {
        let bytes = match *action {
            SyncAction::Have { local_offset, length } => {
                let offset = usize::try_from(local_header.data_offset() + local_offset)
                    .map_err(PmtError::IoRangeOverflow)?;
                let length = usize::try_from(length).map_err(PmtError::IoRangeOverflow)?;
                local.backend.read_exact(offset, length).await?
            }
            SyncAction::Wanted { remote_offset, length } => {
                let offset = usize::try_from(remote_header.data_offset() + remote_offset)
                    .map_err(PmtError::IoRangeOverflow)?;
                let length = usize::try_from(length).map_err(PmtError::IoRangeOverflow)?;
                remote.backend.read_exact(offset, length).await?
            }
        };
        out.write_all(&bytes)?;
    }
    out.flush()?;
    drop(out);

    std::fs::rename(&tmp_path, dest_path)?;
    Ok(())
}

/// Compares `local`'s tile entries against a remote `.sync` sidecar,
/// classifying each remote block as already present locally (`Have`) or
/// needing a fetch (`Wanted`).
///
/// # Errors
/// Returns an error if the archive isn't clustered, the sidecar fails to
/// parse, or reading local tile bytes fails.
pub async fn sync_archive<B, C>(
    local: &Arc<AsyncPmTilesReader<B, C>>,
    remote_blocks: &[SyncBlock],
) -> PmtResult<SyncPlan>
where
    B: AsyncBackend + Sync + Send,
    C: DirectoryCache + Sync + Send,
{
    let header = local.get_header();
    if !header.clustered() {
        return Err(PmtError::InvariantViolation(
            "sync requires a clustered local archive".into(),
        ));
    }
    let data_offset = header.data_offset();

    let entries: Vec<DirEntry> = local.clone().entries().try_collect().await?;
    let local_by_start: std::collections::HashMap<u64, &DirEntry> =
        entries.iter().map(|e| (e.tile_id, e)).collect();

    let mut actions = Vec::with_capacity(remote_blocks.len());
    let mut total_bytes = 0u64;
    let mut wanted_bytes = 0u64;

    for block in remote_blocks {
        total_bytes += block.length;
        let Some(&candidate) = local_by_start.get(&block.start_tile_id) else {
            actions.push(SyncAction::Wanted {
                remote_offset: block.offset,
                length: block.length,
            });
            wanted_bytes += block.length;
            continue;
        };

        let local_length = u64::from(candidate.length);
        if local_length != block.length {
            actions.push(SyncAction::Wanted {
                remote_offset: block.offset,
                length: block.length,
            });
            wanted_bytes += block.length;
            continue;
        }

        let local_bytes = local
            .backend
            .read_exact(
                usize::try_from(data_offset + candidate.offset).map_err(PmtError::IoRangeOverflow)?,
                usize::try_from(local_length).map_err(PmtError::IoRangeOverflow)?,
            )
            .await?;
        let local_hash = XxHash64::oneshot(0, &local_bytes);

        if local_hash == block.hash {
            actions.push(SyncAction::Have {
                local_offset: candidate.offset,
                length: block.length,
            });
        } else {
            actions.push(SyncAction::Wanted {
                remote_offset: block.offset,
                length: block.length,
            });
            wanted_bytes += block.length;
        }
    }

    Ok(SyncPlan {
        actions,
        total_bytes,
        wanted_bytes,
    })
}

#[cfg(test)]
#[cfg(feature = "mmap-async-tokio")]
mod tests {
    use super::*;
    use crate::{Compression, MmapBackend, PmTilesWriter, TileCoord, TileType};

    async fn build_archive(path: &std::path::Path, tiles: &[(u8, u64, u64, &[u8])]) {
        let out = std::fs::File::create(path).unwrap();
        let mut writer = PmTilesWriter::new(TileType::Png)
            .internal_compression(Compression::None)
            .create(out)
            .unwrap();
        for &(z, x, y, data) in tiles {
            let coord = TileCoord::new(z, x, y).unwrap();
            writer.add_tile(coord, data).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn roundtrip_sync_file_and_identical_plan() {
        let file = tempfile::NamedTempFile::with_suffix(".pmtiles").unwrap();
        build_archive(
            file.path(),
            &[
                (2, 0, 0, b"aaaa"),
                (2, 0, 1, b"bbbb"),
                (2, 1, 0, b"cccc"),
                (2, 1, 1, b"dddd"),
            ],
        )
        .await;

        let backend = MmapBackend::try_from(file.path()).await.unwrap();
        let reader = Arc::new(AsyncPmTilesReader::try_from_source(backend).await.unwrap());

        let mut sidecar = Vec::new();
        make_sync_file(&reader, 1, &mut sidecar).await.unwrap();

        let (header, blocks) = parse_sync_file(&sidecar).unwrap();
        assert_eq!(header.hash_type, "xxh64");
        assert!(!blocks.is_empty());

        // Re-derive real offsets for the parsed blocks by re-running makesync
        // logic against the same archive (parse_sync_file alone can't know
        // byte offsets, only the caller matching against a directory can).
        let entries: Vec<DirEntry> = reader.clone().entries().try_collect().await.unwrap();
        let mut remote_blocks = Vec::new();
        for block in &blocks {
            let entry = entries.iter().find(|e| e.tile_id == block.start_tile_id).unwrap();
            remote_blocks.push(SyncBlock {
                start_tile_id: block.start_tile_id,
                offset: entry.offset,
                length: block.length,
                hash: block.hash,
            });
        }

        let plan = sync_archive(&reader, &remote_blocks).await.unwrap();
        assert_eq!(plan.wanted_bytes, 0, "identical archive should need nothing");
        assert!(plan.actions.iter().all(|a| matches!(a, SyncAction::Have { .. })));
    }
}
