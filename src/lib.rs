#![cfg_attr(all(feature = "__all_non_conflicting"), doc = include_str!("../README.md"))]

#[cfg(feature = "__async")]
mod async_reader;
#[cfg(feature = "__async")]
pub use async_reader::{AsyncBackend, AsyncPmTilesReader};

#[cfg(feature = "__async-aws-s3")]
mod backend_aws_s3;
#[cfg(feature = "http-async")]
mod backend_http;
#[cfg(feature = "mmap-async-tokio")]
mod backend_mmap;
#[cfg(feature = "object-store")]
mod backend_object_store;
#[cfg(feature = "__async-s3")]
mod backend_s3;

#[cfg(feature = "__async")]
mod cache;
#[cfg(feature = "__async")]
pub use cache::{DirCacheResult, DirectoryCache, DirectoryCacheV2, HashMapCache, HashMapCacheV2, NoCache};

mod directory;
mod error;
#[cfg(feature = "extract")]
pub mod extract;
mod header;
#[cfg(feature = "merge")]
mod merge;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "sync")]
mod sync;
mod tile;
#[cfg(feature = "verify")]
mod verify;
#[cfg(feature = "write")]
mod writer;

/// Re-export of crate exposed in our API to simplify dependency management
#[cfg(feature = "__async-aws-s3")]
pub use aws_sdk_s3;
#[cfg(feature = "aws-s3-async")]
pub use backend_aws_s3::AwsS3Backend;
#[cfg(feature = "http-async")]
pub use backend_http::HttpBackend;
#[cfg(feature = "mmap-async-tokio")]
pub use backend_mmap::MmapBackend;
#[cfg(feature = "object-store")]
pub use backend_object_store::ObjectStoreBackend;
#[cfg(feature = "__async-s3")]
pub use backend_s3::S3Backend;
pub use directory::{DirEntry, Directory};
pub use error::{PmtError, PmtResult};
pub use header::{Compression, Header, TileType};
#[cfg(feature = "merge")]
pub use merge::{MergeStats, merge_archives};
/// Re-export of crate exposed in our API to simplify dependency management
#[cfg(feature = "http-async")]
pub use reqwest;
/// Re-export of crate exposed in our API to simplify dependency management
#[cfg(feature = "__async-s3")]
pub use s3;
#[cfg(feature = "sync")]
pub use sync::{
    DEFAULT_MAX_RANGE_BYTES, SyncAction, SyncBlock, SyncFileHeader, SyncPlan, apply_sync_plan,
    make_sync_file, parse_sync_file, resolve_remote_offsets, sync_archive,
};
pub use tile::{MAX_TILE_ID, MAX_ZOOM, PYRAMID_SIZE_BY_ZOOM, TileCoord, TileId};
/// Re-export of crate exposed in our API to simplify dependency management
#[cfg(feature = "tilejson")]
pub use tilejson;
#[cfg(feature = "verify")]
pub use verify::{VerifyIssue, VerifyReport, describe_issue, verify_archive};
#[cfg(feature = "write")]
pub use writer::{PmTilesStreamWriter, PmTilesWriter};
