//! Re-walk an archive's directories and header counters, checking the
//! invariants a well-formed `PMTiles` archive must satisfy.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::TryStreamExt;

use crate::async_reader::{AsyncBackend, AsyncPmTilesReader};
use crate::cache::DirectoryCache;
use crate::{DirEntry, PmtError, PmtResult, TileCoord, TileId};

/// A single invariant violation found by [`verify_archive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyIssue {
    /// Header's `n_addressed_tiles` disagrees with the sum of run lengths.
    AddressedTilesMismatch { expected: u64, actual: u64 },
    /// Header's `n_tile_entries` disagrees with the number of directory entries.
    TileEntriesMismatch { expected: u64, actual: u64 },
    /// Header's `n_tile_contents` disagrees with the number of distinct offsets.
    TileContentsMismatch { expected: u64, actual: u64 },
    /// An entry's zoom falls outside `[min_zoom, max_zoom]`.
    ZoomOutOfRange { tile_id: u64, zoom: u8 },
    /// `center_zoom` is outside `[min_zoom, max_zoom]`.
    CenterZoomOutOfRange { center_zoom: u8 },
    /// Bounds do not enclose positive area.
    NonPositiveBoundsArea,
    /// An entry's byte range falls outside the tile-data section.
    EntryOutsideDataSection { tile_id: u64 },
    /// A clustered archive has an entry whose offset does not advance
    /// monotonically with tile id.
    OffsetsNotMonotonic { tile_id: u64 },
}

/// Outcome of [`verify_archive`]: empty `issues` means the archive is valid.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// Every invariant violation found, in the order encountered.
    pub issues: Vec<VerifyIssue>,
}

impl VerifyReport {
    /// Whether no issues were found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Verifies an archive's directories against its header counters and the
/// structural invariants described in the format.
///
/// # Errors
/// Returns an error if any directory can't be fetched or decoded. Invariant
/// violations are reported in the returned [`VerifyReport`], not as errors.
pub async fn verify_archive<B, C>(reader: &Arc<AsyncPmTilesReader<B, C>>) -> PmtResult<VerifyReport>
where
    B: AsyncBackend + Sync + Send,
    C: DirectoryCache + Sync + Send,
{
    let header = reader.get_header();
    let mut issues = Vec::new();

    let entries: Vec<DirEntry> = reader.clone().entries().try_collect().await?;

    let addressed_tiles: u64 = entries.iter().map(|e| u64::from(e.run_length.max(1))).sum();
    if let Some(expected) = header.n_addressed_tiles() {
        if expected != addressed_tiles {
            issues.push(VerifyIssue::AddressedTilesMismatch {
                expected,
                actual: addressed_tiles,
            });
        }
    }

    let tile_entries = entries.len() as u64;
    if let Some(expected) = header.n_tile_entries() {
        if expected != tile_entries {
            issues.push(VerifyIssue::TileEntriesMismatch {
                expected,
                actual: tile_entries,
            });
        }
    }

    let distinct_offsets: HashSet<u64> = entries.iter().map(|e| e.offset).collect();
    let tile_contents = distinct_offsets.len() as u64;
    if let Some(expected) = header.n_tile_contents() {
        if expected != tile_contents {
            issues.push(VerifyIssue::TileContentsMismatch {
                expected,
                actual: tile_contents,
            });
        }
    }

    for entry in &entries {
        let Ok(id) = TileId::new(entry.tile_id) else {
            continue;
        };
        if let Some(zoom) = id.zoom() {
            if zoom < header.min_zoom || zoom > header.max_zoom {
                issues.push(VerifyIssue::ZoomOutOfRange {
                    tile_id: entry.tile_id,
                    zoom,
                });
            }
        }

        let data_length = header.data_length();
        if u64::from(entry.length) > 0 && entry.offset + u64::from(entry.length) > data_length {
            issues.push(VerifyIssue::EntryOutsideDataSection {
                tile_id: entry.tile_id,
            });
        }
    }

    if header.center_zoom < header.min_zoom || header.center_zoom > header.max_zoom {
        issues.push(VerifyIssue::CenterZoomOutOfRange {
            center_zoom: header.center_zoom,
        });
    }

    if header.max_longitude <= header.min_longitude || header.max_latitude <= header.min_latitude {
        issues.push(VerifyIssue::NonPositiveBoundsArea);
    }

    if header.clustered() {
        let mut last_offset: Option<u64> = None;
        for entry in &entries {
            if let Some(last) = last_offset {
                if entry.offset < last {
                    issues.push(VerifyIssue::OffsetsNotMonotonic {
                        tile_id: entry.tile_id,
                    });
                }
            }
            last_offset = Some(entry.offset);
        }
    }

    Ok(VerifyReport { issues })
}

/// Renders a single issue as a human-readable line, resolving tile ids to
/// `(z, x, y)` where possible.
#[must_use]
pub fn describe_issue(issue: &VerifyIssue) -> String {
    match issue {
        VerifyIssue::AddressedTilesMismatch { expected, actual } => {
            format!("n_addressed_tiles header says {expected}, but found {actual}")
        }
        VerifyIssue::TileEntriesMismatch { expected, actual } => {
            format!("n_tile_entries header says {expected}, but found {actual}")
        }
        VerifyIssue::TileContentsMismatch { expected, actual } => {
            format!("n_tile_contents header says {expected}, but found {actual}")
        }
        VerifyIssue::ZoomOutOfRange { tile_id, zoom } => {
            format!("tile {} ({}) has zoom {zoom} outside the header's zoom range", tile_id, describe_tile(*tile_id))
        }
        VerifyIssue::CenterZoomOutOfRange { center_zoom } => {
            format!("center_zoom {center_zoom} is outside [min_zoom, max_zoom]")
        }
        VerifyIssue::NonPositiveBoundsArea => "bounds do not enclose a positive area".to_string(),
        VerifyIssue::EntryOutsideDataSection { tile_id } => {
            format!("tile {} ({}) points outside the tile-data section", tile_id, describe_tile(*tile_id))
        }
        VerifyIssue::OffsetsNotMonotonic { tile_id } => {
            format!("tile {} ({}) offset does not advance monotonically in a clustered archive", tile_id, describe_tile(*tile_id))
        }
    }
}

fn describe_tile(tile_id: u64) -> String {
    TileId::new(tile_id)
        .ok()
        .and_then(|id| TileCoord::try_from(id).ok())
        .map_or_else(|| "?/?/?".to_string(), |c| format!("{}/{}/{}", c.z(), c.x(), c.y()))
}

#[cfg(test)]
#[cfg(feature = "mmap-async-tokio")]
mod tests {
    use super::*;
    use crate::{Compression, MmapBackend, PmTilesWriter, TileCoord, TileType};

    #[tokio::test]
    async fn clean_archive_has_no_issues() {
        let file = tempfile::NamedTempFile::with_suffix(".pmtiles").unwrap();
        let out = std::fs::File::create(file.path()).unwrap();
        let mut writer = PmTilesWriter::new(TileType::Png)
            .internal_compression(Compression::None)
            .max_zoom(3)
            .create(out)
            .unwrap();
        for (z, x, y) in [(0, 0, 0), (1, 0, 0), (2, 1, 1), (3, 2, 2)] {
            let coord = TileCoord::new(z, x, y).unwrap();
            writer.add_tile(coord, &[z, x as u8, y as u8]).unwrap();
        }
        writer.finalize().unwrap();

        let backend = MmapBackend::try_from(file.path()).await.unwrap();
        let reader = Arc::new(AsyncPmTilesReader::try_from_source(backend).await.unwrap());
        let report = verify_archive(&reader).await.unwrap();
        assert!(report.is_ok(), "{:?}", report.issues);
    }
}
