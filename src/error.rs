use crate::header::Compression;

/// Errors produced while reading, writing, or serving `PMTiles` archives.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PmtError {
    /// The first 7 bytes did not match the `PMTiles` v3 magic number.
    #[error("Invalid magic number")]
    InvalidMagicNumber,

    /// The archive's magic number matches the `PM` prefix used by the v2 format.
    #[error("Unsupported PMTiles version: spec version {0} detected; upgrade required")]
    UnsupportedPmTilesVersion(u8),

    /// The 127-byte header could not be parsed.
    #[error("Invalid header")]
    InvalidHeader,

    /// A compression byte did not map to a known [`Compression`] variant.
    #[error("Invalid compression")]
    InvalidCompression,

    /// A tile-type byte did not map to a known tile type.
    #[error("Invalid tile type")]
    InvalidTileType,

    /// A directory entry was malformed (bad varint, missing predecessor for a
    /// contiguous-offset sentinel, premature EOF, ...).
    #[error("Invalid directory entry")]
    InvalidEntry,

    /// More than three leaf-directory hops were required to resolve a tile.
    #[error("Directory nesting too deep; archive is ill-formed")]
    DirectoryTooDeep,

    /// An underlying I/O error, not a range-request precondition failure.
    #[error("I/O error: {0}")]
    Reading(#[from] std::io::Error),

    /// A range request returned a different byte count than was requested.
    #[error("Backend returned {1} bytes, expected {0}")]
    UnexpectedNumberOfBytesReturned(usize, usize),

    /// A range request returned more bytes than were requested.
    #[error("Response body of {0} bytes is longer than the requested {1} bytes")]
    ResponseBodyTooLong(usize, usize),

    /// The remote object no longer matches the `ETag` a caller pinned with `If-Match`.
    /// Distinguished so the tile-serving cache can purge and retry exactly once.
    #[error("Remote object changed; refresh required (etag {0:?})")]
    RefreshRequired(Option<String>),

    /// The backend does not support byte-range requests.
    #[error("Range requests unsupported by this backend")]
    RangeRequestsUnsupported,

    /// Tried to use a compression algorithm that isn't supported for this operation.
    #[error("Unsupported compression: {0:?}")]
    UnsupportedCompression(Compression),

    /// A directory-entry length or offset overflowed the on-disk integer width.
    #[error("Index entry overflowed available integer width")]
    IndexEntryOverflow,

    /// A byte offset did not fit into a `usize` on this platform.
    #[error("I/O range overflowed usize: {0}")]
    IoRangeOverflow(std::num::TryFromIntError),

    /// The memory-mapped file could not be opened.
    #[error("Unable to open mmap file")]
    UnableToOpenMmapFile,

    /// An archive invariant the writer or `verify` requires was violated.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Inputs to `merge` were not disjoint, or otherwise incompatible.
    #[error("Merge conflict: {0}")]
    MergeConflict(String),

    /// CLI/API misuse: mutually exclusive options, missing required input, etc.
    #[error("Invalid usage: {0}")]
    UserError(String),

    /// Metadata or directory bytes were not valid UTF-8.
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// JSON (metadata or `TileJSON`) could not be parsed.
    #[cfg(feature = "tilejson")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A GeoJSON region could not be parsed or had no usable geometry.
    #[cfg(feature = "extract")]
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// A varint could not be read from a directory byte stream.
    #[error("Varint decode error")]
    VarintDecode,

    /// Underlying HTTP client error.
    #[cfg(feature = "http-async")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Underlying invalid header value.
    #[cfg(feature = "http-async")]
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    /// Underlying bad URL.
    #[cfg(feature = "http-async")]
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Underlying `object_store` error.
    #[cfg(feature = "object-store")]
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Underlying S3 error.
    #[cfg(feature = "s3-async-native")]
    #[error("S3 error: {0}")]
    S3(#[from] s3::error::S3Error),
    #[cfg(all(feature = "s3-async-rustls", not(feature = "s3-async-native")))]
    #[error("S3 error: {0}")]
    S3(#[from] s3::error::S3Error),

    /// Underlying AWS SDK S3 error.
    #[cfg(feature = "aws-s3-async")]
    #[error("AWS S3 error: {0}")]
    AwsS3(
        #[from]
        Box<aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>>,
    ),
}

/// Convenience alias used throughout the crate.
pub type PmtResult<T> = Result<T, PmtError>;
