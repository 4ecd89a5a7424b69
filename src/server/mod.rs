//! Tile-serving core: a byte-range cache coordinator, request-resolution
//! logic for the tile/metadata/`TileJSON` routes, and a `TileJSON` composer.
//!
//! This module is transport-agnostic by design — it has no dependency on any
//! particular HTTP framework. An embedder binds [`router::lookup_tile`] and
//! [`tilejson::build_tilejson`] to actual HTTP routes and sockets; no such
//! binding ships in this crate.

mod coordinator;
mod router;
mod tilejson;

pub use coordinator::{CacheKey, Coordinator};
pub use router::{TileLookup, cors_allow_origin, is_valid_name, lookup_tile, tile_extension};
pub use tilejson::build_tilejson;
