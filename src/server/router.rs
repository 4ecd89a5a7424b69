//! Pure request-resolution logic for the tile, metadata, and `TileJSON` routes.
//!
//! These functions take an already-resolved [`AsyncPmTilesReader`] and return a
//! transport-agnostic outcome; binding them to sockets and an HTTP framework is
//! left to the embedder — no such binding ships in this crate.

use std::sync::Arc;

use bytes::Bytes;

use crate::async_reader::{self, AsyncBackend, AsyncPmTilesReader, MAX_DIRECTORY_DEPTH};
use crate::cache::DirectoryCache;
use crate::directory::Directory;
use crate::header::{Compression, TileType};
use crate::server::Coordinator;
use crate::tile::TileCoord;
use crate::PmtError;

/// Outcome of resolving a tile request, mirroring the HTTP status codes a
/// binding should emit: 200/204/400/404.
pub enum TileLookup {
    /// The tile exists; serve it with the given `Content-Type` and, if the
    /// archive's tiles are compressed, a matching `Content-Encoding`.
    Found {
        /// Raw (still-compressed, per `tile_compression`) tile bytes.
        data: Bytes,
        /// MIME type for the `Content-Type` header.
        content_type: &'static str,
        /// Value for the `Content-Encoding` header, if the bytes are compressed.
        content_encoding: Option<&'static str>,
    },
    /// The request was inside the archive's zoom range, but no tile exists
    /// at that coordinate. HTTP 204.
    NoContent,
    /// The `z`/`x`/`y` requested is outside `[min_zoom, max_zoom]`. HTTP 404.
    OutsideZoomRange,
    /// The requested extension does not match the archive's tile type. HTTP 400.
    ExtensionMismatch,
}

/// Maps a tile type to the file extension used in its route
/// (`GET /{name}/{z}/{x}/{y}.{ext}`) and `TileJSON` `tiles` template.
#[must_use]
pub fn tile_extension(tile_type: TileType) -> &'static str {
    match tile_type {
        TileType::Mvt => "mvt",
        TileType::Png => "png",
        TileType::Jpeg => "jpg",
        TileType::Webp => "webp",
        TileType::Avif => "avif",
        TileType::Unknown => "bin",
    }
}

fn content_type(tile_type: TileType) -> &'static str {
    match tile_type {
        TileType::Mvt => "application/x-protobuf",
        TileType::Png => "image/png",
        TileType::Jpeg => "image/jpeg",
        TileType::Webp => "image/webp",
        TileType::Avif => "image/avif",
        TileType::Unknown => "application/octet-stream",
    }
}

fn content_encoding(compression: Compression) -> Option<&'static str> {
    match compression {
        Compression::Gzip => Some("gzip"),
        Compression::Brotli => Some("br"),
        Compression::Zstd => Some("zstd"),
        Compression::None | Compression::Unknown => None,
    }
}

/// Fetches and decodes a directory at a given byte range through `coordinator`,
/// so repeated lookups against the same archive share the coalesced,
/// `ETag`-tracked cache instead of re-reading from the backend.
async fn fetch_directory<B, C>(
    reader: &AsyncPmTilesReader<B, C>,
    coordinator: &Coordinator,
    archive_name: &Arc<str>,
    offset: u64,
    length: u64,
) -> Result<Directory, Arc<PmtError>>
where
    B: AsyncBackend + Sync + Send,
    C: DirectoryCache + Sync + Send,
{
    let raw = coordinator
        .fetch_range(&reader.backend, archive_name, offset, length)
        .await?;
    let decompressed = async_reader::decompress(reader.get_header().internal_compression, &raw)
        .map_err(Arc::new)?;
    Directory::try_from(Bytes::from(decompressed)).map_err(Arc::new)
}

/// Walks the directory tree for `tile_id`, fetching every directory and tile
/// byte range through `coordinator` rather than the reader's own (immutable,
/// non-invalidating) cached root directory.
async fn resolve_tile<B, C>(
    reader: &AsyncPmTilesReader<B, C>,
    coordinator: &Coordinator,
    archive_name: &Arc<str>,
    tile_id: crate::tile::TileId,
) -> Result<Option<Bytes>, Arc<PmtError>>
where
    B: AsyncBackend + Sync + Send,
    C: DirectoryCache + Sync + Send,
{
    let header = reader.get_header();
    let mut dir = fetch_directory(
        reader,
        coordinator,
        archive_name,
        header.root_offset(),
        header.root_length(),
    )
    .await?;

    for _ in 0..MAX_DIRECTORY_DEPTH {
        let Some(entry) = dir.find_tile_id(tile_id).copied() else {
            return Ok(None);
        };
        if !entry.is_leaf_pointer() {
            let data = coordinator
                .fetch_range(
                    &reader.backend,
                    archive_name,
                    header.data_offset() + entry.offset,
                    u64::from(entry.length),
                )
                .await?;
            return Ok(Some(data));
        }
        dir = fetch_directory(
            reader,
            coordinator,
            archive_name,
            header.leaf_offset() + entry.offset,
            u64::from(entry.length),
        )
        .await?;
    }
    Err(Arc::new(PmtError::DirectoryTooDeep))
}

/// Resolves `z/x/y.ext` against `reader`, following the lookup algorithm:
/// reject out-of-range zooms, reject extension mismatches, then walk the
/// directory tree through `coordinator`'s coalesced, `ETag`-tracked cache.
///
/// If a fetch reports a stale `ETag` (`RefreshRequired`), the coordinator has
/// already purged the archive's cached ranges and forgotten the tracked
/// `ETag`; this retries the whole resolution exactly once, unconditionally,
/// which cannot itself observe a further `RefreshRequired`.
///
/// # Errors
/// Propagates I/O and decode errors from the underlying directory walk.
pub async fn lookup_tile<B, C>(
    reader: &Arc<AsyncPmTilesReader<B, C>>,
    coordinator: &Coordinator,
    archive_name: &Arc<str>,
    z: u8,
    x: u64,
    y: u64,
    ext: &str,
) -> Result<TileLookup, Arc<PmtError>>
where
    B: AsyncBackend + Sync + Send,
    C: DirectoryCache + Sync + Send,
{
    let header = reader.get_header();
    if z < header.min_zoom || z > header.max_zoom {
        return Ok(TileLookup::OutsideZoomRange);
    }
    if ext != tile_extension(header.tile_type) {
        return Ok(TileLookup::ExtensionMismatch);
    }

    let coord = TileCoord::new(z, x, y).map_err(Arc::new)?;
    let tile_id: crate::tile::TileId = coord.into();

    let result = match resolve_tile(reader, coordinator, archive_name, tile_id).await {
        Err(err) if matches!(err.as_ref(), PmtError::RefreshRequired(_)) => {
            resolve_tile(reader, coordinator, archive_name, tile_id).await?
        }
        other => other?,
    };

    Ok(match result {
        Some(data) => TileLookup::Found {
            data,
            content_type: content_type(header.tile_type),
            content_encoding: content_encoding(header.tile_compression),
        },
        None => TileLookup::NoContent,
    })
}

/// Checks an archive/source `name` against the S3-object-key-safe character
/// class the routes are restricted to, additionally rejecting `..` path
/// segments (the charset alone permits `.` and `/`, which would otherwise let
/// a name escape the configured archive directory).
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_/!*'().".contains(c))
        && !name.split('/').any(|segment| segment == "..")
}

/// Computes the `Access-Control-Allow-Origin` value for a request, given the
/// server's configured CORS setting and the request's `Origin` header.
///
/// `cors_config` may be `*`, a single origin, or a comma-separated allow-list;
/// in the allow-list case the echoed `request_origin` is returned only if it
/// appears in the list.
#[must_use]
pub fn cors_allow_origin(cors_config: &str, request_origin: Option<&str>) -> Option<String> {
    if cors_config == "*" {
        return Some("*".to_string());
    }
    let allowed: Vec<&str> = cors_config.split(',').map(str::trim).collect();
    if allowed.len() == 1 {
        return Some(allowed[0].to_string());
    }
    let origin = request_origin?;
    allowed
        .iter()
        .any(|candidate| *candidate == origin)
        .then(|| origin.to_string())
}
