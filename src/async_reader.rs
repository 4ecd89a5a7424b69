use std::io::Read;

use bytes::Bytes;
#[cfg(feature = "iter-async")]
use futures_util::Stream;

use crate::cache::{DirectoryCache, DirectoryCacheV2, NoCache};
use crate::directory::DirEntry;
use crate::error::{PmtError, PmtResult};
use crate::header::Header;
use crate::tile::TileId;
use crate::{Compression, Directory};

/// Maximum number of leaf-directory hops allowed while resolving a tile id,
/// matching the spec's bound on directory nesting depth.
pub(crate) const MAX_DIRECTORY_DEPTH: u8 = 4;

/// Reads `PMTiles` archives from any [`AsyncBackend`], optionally backed by a
/// [`DirectoryCache`] (defaults to [`NoCache`]).
pub struct AsyncPmTilesReader<B, C = NoCache> {
    header: Header,
    pub(crate) backend: B,
    pub(crate) root_directory: Directory,
    cache: C,
}

impl<B: AsyncBackend + Sync + Send> AsyncPmTilesReader<B, NoCache> {
    /// Creates a new reader from a backend with no directory cache.
    ///
    /// # Errors
    /// Returns an error if the header or root directory can't be read or
    /// don't describe a valid `PMTiles` v3 archive.
    pub async fn try_from_source(backend: B) -> PmtResult<Self> {
        Self::try_from_cached_source(backend, NoCache).await
    }
}

impl<B: AsyncBackend + Sync + Send, C: DirectoryCache + Sync + Send> AsyncPmTilesReader<B, C> {
    /// Creates a new reader from a backend, using `cache` for directory lookups.
    ///
    /// # Errors
    /// Returns an error if the header or root directory can't be read or
    /// don't describe a valid `PMTiles` v3 archive.
    pub async fn try_from_cached_source(backend: B, cache: C) -> PmtResult<Self> {
        let header_bytes = backend.read_exact(0, crate::header::HEADER_SIZE).await?;
        let mut raw = [0u8; crate::header::HEADER_SIZE];
        raw.copy_from_slice(&header_bytes);
        let header = Header::try_from_bytes(&raw)?;

        #[allow(clippy::cast_possible_truncation)]
        let root_directory = Self::read_directory_with_backend(
            &backend,
            header.internal_compression,
            header.root_offset() as usize,
            header.root_length() as usize,
        )
        .await?;

        Ok(Self {
            header,
            backend,
            root_directory,
            cache,
        })
    }

    /// The archive's parsed header.
    #[must_use]
    pub fn get_header(&self) -> &Header {
        &self.header
    }

    /// Fetches and decompresses the metadata blob, expected to be a JSON object.
    ///
    /// # Errors
    /// Returns an error if the read or decompression fails, or if the bytes
    /// aren't valid UTF-8.
    pub async fn get_metadata(&self) -> PmtResult<String> {
        if self.header.metadata_length() == 0 {
            return Ok(String::new());
        }
        #[allow(clippy::cast_possible_truncation)]
        let raw = self
            .backend
            .read_exact(
                self.header.metadata_offset() as usize,
                self.header.metadata_length() as usize,
            )
            .await?;
        let decompressed = decompress(self.header.internal_compression, &raw)?;
        Ok(String::from_utf8(decompressed)?)
    }

    /// Fetches a tile's raw (possibly compressed) bytes by coordinate.
    ///
    /// # Errors
    /// Returns an error if the backend read fails.
    pub async fn get_tile(&self, coord: impl Into<TileRef>) -> PmtResult<Option<Bytes>> {
        let tile_id = coord.into().0;
        let Some(entry) = self.find_tile_entry(tile_id).await? else {
            return Ok(None);
        };
        #[allow(clippy::cast_possible_truncation)]
        let data = self
            .backend
            .read_exact(
                (self.header.data_offset() + entry.offset) as usize,
                entry.length as usize,
            )
            .await?;
        Ok(Some(data))
    }

    /// Fetches and decompresses a tile's bytes by coordinate.
    ///
    /// # Errors
    /// Returns an error if the backend read or decompression fails.
    pub async fn get_tile_decompressed(&self, coord: impl Into<TileRef>) -> PmtResult<Option<Bytes>> {
        let Some(raw) = self.get_tile(coord).await? else {
            return Ok(None);
        };
        Ok(Some(Bytes::from(decompress(
            self.header.tile_compression,
            &raw,
        )?)))
    }

    async fn find_tile_entry(&self, tile_id: TileId) -> PmtResult<Option<DirEntry>> {
        let mut dir_offset = 0usize;
        let mut current: Option<Directory> = None;
        for _ in 0..MAX_DIRECTORY_DEPTH {
            let entry = {
                let dir = current.as_ref().unwrap_or(&self.root_directory);
                dir.find_tile_id(tile_id).copied()
            };
            let Some(entry) = entry else {
                return Ok(None);
            };
            if !entry.is_leaf_pointer() {
                return Ok(Some(entry));
            }
            #[allow(clippy::cast_possible_truncation)]
            let offset = (self.header.leaf_offset() + entry.offset) as usize;
            let length = entry.length as usize;
            dir_offset = offset;
            let fetched = self
                .cache
                .get_dir_entry_or_insert(dir_offset, tile_id, async {
                    self.read_directory(offset, length).await
                })
                .await?;
            if let Some(cached_entry) = fetched {
                if !cached_entry.is_leaf_pointer() {
                    return Ok(Some(cached_entry));
                }
            }
            current = Some(self.read_directory(offset, length).await?);
        }
        Err(PmtError::DirectoryTooDeep)
    }

    /// Reads and decodes a directory at a given byte range, decompressing
    /// with the archive's internal compression.
    ///
    /// # Errors
    /// Returns an error if the backend read, decompression, or decode fails.
    pub async fn read_directory(&self, offset: usize, length: usize) -> PmtResult<Directory> {
        Self::read_directory_with_backend(&self.backend, self.header.internal_compression, offset, length)
            .await
    }

    async fn read_directory_with_backend(
        backend: &B,
        compression: Compression,
        offset: usize,
        length: usize,
    ) -> PmtResult<Directory> {
        let raw = backend.read_exact(offset, length).await?;
        let decompressed = decompress(compression, &raw)?;
        Directory::try_from(Bytes::from(decompressed))
    }

    /// Streams every directory entry in the archive (root entries, followed
    /// by each leaf's entries, fetched lazily).
    #[cfg(feature = "iter-async")]
    pub fn entries(self: std::sync::Arc<Self>) -> impl Stream<Item = PmtResult<DirEntry>> {
        async_stream::try_stream! {
            let mut leaf_offsets = Vec::new();
            for entry in self.root_directory.entries() {
                if entry.is_leaf_pointer() {
                    leaf_offsets.push(*entry);
                } else {
                    yield *entry;
                }
            }
            for leaf in leaf_offsets {
                #[allow(clippy::cast_possible_truncation)]
                let offset = (self.header.leaf_offset() + leaf.offset) as usize;
                let dir = self.read_directory(offset, leaf.length as usize).await?;
                for entry in dir.entries() {
                    yield *entry;
                }
            }
        }
    }
}

/// Wrapper accepted by [`AsyncPmTilesReader::get_tile`], allowing either a
/// [`TileId`] or a [`crate::TileCoord`] to be passed directly.
pub struct TileRef(pub(crate) TileId);

impl From<TileId> for TileRef {
    fn from(id: TileId) -> Self {
        Self(id)
    }
}

impl From<crate::tile::TileCoord> for TileRef {
    fn from(coord: crate::tile::TileCoord) -> Self {
        Self(coord.into())
    }
}

pub(crate) fn decompress(compression: Compression, bytes: &[u8]) -> PmtResult<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    match compression {
        Compression::None | Compression::Unknown => {
            out.extend_from_slice(bytes);
        }
        Compression::Gzip => {
            flate2::read::GzDecoder::new(bytes).read_to_end(&mut out)?;
        }
        #[cfg(feature = "brotli")]
        Compression::Brotli => {
            brotli::Decompressor::new(bytes, 4096).read_to_end(&mut out)?;
        }
        #[cfg(feature = "zstd")]
        Compression::Zstd => {
            zstd::stream::copy_decode(bytes, &mut out)?;
        }
        #[allow(unreachable_patterns)]
        other => return Err(PmtError::UnsupportedCompression(other)),
    }
    Ok(out)
}

/// A byte-range-addressable source of archive bytes.
///
/// Implementors provide raw range reads (`read`, best-effort / may return
/// fewer bytes than requested past EOF) and exact range reads (`read_exact`,
/// must error if the full range can't be satisfied).
pub trait AsyncBackend {
    /// Reads up to `length` bytes starting at `offset`. May return fewer
    /// bytes if the underlying resource is shorter than requested.
    async fn read(&self, offset: usize, length: usize) -> PmtResult<Bytes>;

    /// Reads exactly `length` bytes starting at `offset`.
    ///
    /// The default implementation delegates to [`Self::read`] and errors if
    /// the result is short.
    async fn read_exact(&self, offset: usize, length: usize) -> PmtResult<Bytes> {
        let data = self.read(offset, length).await?;
        if data.len() == length {
            Ok(data)
        } else {
            Err(PmtError::UnexpectedNumberOfBytesReturned(length, data.len()))
        }
    }

    /// Reads a byte range, validating against a previously observed `ETag`.
    ///
    /// `if_match`, when present, is sent as a precondition on the
    /// underlying request; if the remote object no longer matches it the
    /// backend must return [`PmtError::RefreshRequired`] instead of bytes,
    /// carrying whatever new `ETag` it observed (if any), so a caller can
    /// purge its cache and retry. Returns the bytes together with the
    /// object's current `ETag`, if the backend exposes one.
    ///
    /// The default implementation delegates to [`Self::read_exact`] and
    /// never reports an `ETag`, matching backends with no such concept
    /// (e.g. a local mmap'd file, which cannot change underneath a reader).
    async fn read_with_etag(
        &self,
        offset: usize,
        length: usize,
        if_match: Option<&str>,
    ) -> PmtResult<(Bytes, Option<String>)> {
        let _ = if_match;
        Ok((self.read_exact(offset, length).await?, None))
    }
}
